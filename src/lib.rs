//! Carton — dependency resolver and environment engine.
//!
//! Carton is the core of a package manager: given a project declaring
//! direct dependencies with version constraints and a set of registry
//! snapshots, it computes one concrete version per reachable package and
//! persists the result as a manifest describing the exact dependency
//! graph. It deliberately contains no CLI, no network transport, and no
//! VCS implementation — those are collaborators behind narrow traits.
//!
//! - Packages are identified by UUID; names are a convenience.
//! - Version constraints use an arity-aware algebra: the bound `1.2` is
//!   not the bound `1.2.0`.
//! - Resolution is single-threaded, synchronous, and pure with respect to
//!   its inputs: the same environment, registries and host version always
//!   produce a byte-identical manifest.
//!
//! # Examples
//!
//! ```no_run
//! use carton::{resolve_environment, Environment, Registry, UpgradeLevel, Version};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut env = Environment::open(std::path::Path::new("."))?;
//! let registry = Registry::open(std::path::Path::new("/depot/registries/General"))?;
//!
//! let manifest = resolve_environment(
//!     &env,
//!     std::slice::from_ref(&registry),
//!     &[],
//!     Version::new(1, 10, 0),
//!     &BTreeMap::new(),
//!     UpgradeLevel::Major,
//!     false,
//! )?;
//! env.manifest = Some(manifest);
//! env.write()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`version`] - Versions, bounds, ranges and constraint specs
//! - [`hash`] - UUID identity, git-convention tree hashing, install slugs
//! - [`project`] - The persisted project declaration
//! - [`manifest`] - The persisted resolved graph
//! - [`registry`] - Lazily loaded registry snapshots
//! - [`environment`] - Environment directories and the depot layout
//! - [`resolver`] - Graph construction and resolution
//! - [`pubgrub_resolver`] - The PubGrub solver backend
//! - [`status`] - Manifest diffing for status output
//! - [`config`] - Depot locations and resolver options
//! - [`vcs`] - Trait seams for VCS and artifact-fetch collaborators
//! - [`error`] - Error types and result handling

pub mod config;
pub mod environment;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod project;
pub mod pubgrub_resolver;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod toml_io;
pub mod vcs;
pub mod version;

pub use config::Config;
pub use environment::{
    clone_cache_path, environment_path, find_installed, load_stdlibs, Environment, StdlibInfo,
};
pub use error::{Error, Result};
pub use hash::{tree_hash, version_slug, TreeHash, HOST_NAME, HOST_UUID};
pub use manifest::{Manifest, PackageEntry, MANIFEST_FILE_NAMES, MANIFEST_HEADER};
pub use project::{Compat, GitRepo, PackageSpec, Project, Source, PROJECT_FILE_NAMES};
pub use registry::{PkgEntry, PkgInfo, Registry, VersionInfo};
pub use resolver::{
    build_requirements, collect_fixed, deps_graph, resolve_environment, DepsGraph, FixedPkg,
    UpgradeLevel,
};
pub use status::{annotate, diff, ChangeKind, StatusEntry};
pub use vcs::{Fetcher, VcsBackend};
pub use version::{Version, VersionBound, VersionError, VersionRange, VersionSpec};
