//! Narrow seams to the external collaborators the engine does not implement.
//!
//! Cloning, fetching and artifact installation live outside the core. The
//! engine only ever talks to them through these traits, so tests can plug
//! in doubles and hosts can bring their own transport.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;
use crate::hash::TreeHash;

/// Version-control operations the engine delegates.
///
/// Implementations are expected to release any external handles they
/// acquire (credential caches included) before returning, on failure paths
/// too, and to zeroize sensitive material on release.
pub trait VcsBackend {
    /// Clone `url` into `dest`; `bare` requests a bare repository.
    fn clone_repo(&self, url: &str, dest: &Path, bare: bool) -> Result<()>;

    /// Bring an existing clone up to date with `url`.
    fn fetch(&self, repo: &Path, url: &str) -> Result<()>;

    /// Materialize the tree at `rev` into `dest`, returning its tree hash.
    fn checkout_tree(&self, repo: &Path, rev: &str, dest: &Path) -> Result<TreeHash>;

    /// The tree hash at `rev`, without materializing anything.
    fn tree_hash(&self, repo: &Path, rev: &str) -> Result<TreeHash>;
}

/// Artifact installation the engine delegates.
pub trait Fetcher {
    /// Ensure the content-addressed install of `(name, uuid, tree_hash)`
    /// exists, returning its path.
    fn ensure_installed(&self, name: &str, uuid: &Uuid, tree_hash: &TreeHash) -> Result<PathBuf>;
}
