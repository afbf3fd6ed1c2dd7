//! Package identity and content-addressed hashing.
//!
//! Directory trees are hashed in git's tree-object convention so that
//! registry-published hashes can be checked against checkouts produced by
//! any git implementation.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The reserved UUID of the host-runtime pseudo-package.
///
/// It appears in dependency graphs as a fixed node at the running host
/// version and in compat tables under the well-known name `"julia"`.
pub const HOST_UUID: Uuid = Uuid::from_u128(0x1222c4b2_2114_5bfd_aeef_88e4692bbb3e);

/// The well-known compat-table name of the host-runtime pseudo-package.
pub const HOST_NAME: &str = "julia";

/// A 20-byte content digest of a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeHash(pub [u8; 20]);

impl TreeHash {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TreeHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| Error::Registry(format!("invalid tree hash: `{s}`")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Registry(format!("tree hash has the wrong length: `{s}`")))?;
        Ok(TreeHash(bytes))
    }
}

impl Serialize for TreeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TreeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn sha1_object(kind: &str, payload: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    hasher.finalize().into()
}

/// Git blob hash: `sha1("blob <len>\0" || content)`.
pub fn blob_hash(content: &[u8]) -> TreeHash {
    TreeHash(sha1_object("blob", content))
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> &'static str {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        "100755"
    } else {
        "100644"
    }
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> &'static str {
    "100644"
}

enum TreeEntry {
    File { mode: &'static str, hash: [u8; 20] },
    Symlink { hash: [u8; 20] },
    Dir { hash: [u8; 20] },
}

/// Hash a directory in git's tree-object convention.
///
/// `.git` directories are skipped and directories containing no files
/// (transitively) are excluded, matching what a git checkout would record.
pub fn tree_hash(dir: &Path) -> Result<TreeHash> {
    match hash_tree_inner(dir)? {
        Some(hash) => Ok(TreeHash(hash)),
        // An all-empty tree still has a well-defined hash.
        None => Ok(TreeHash(sha1_object("tree", &[]))),
    }
}

fn hash_tree_inner(dir: &Path) -> Result<Option<[u8; 20]>> {
    let mut entries: Vec<(Vec<u8>, String, TreeEntry)> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".git" {
            continue;
        }
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;

        let (sort_key, tree_entry) = if meta.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            let hash = sha1_object("blob", target.to_string_lossy().as_bytes());
            (name.clone().into_bytes(), TreeEntry::Symlink { hash })
        } else if meta.is_dir() {
            let Some(hash) = hash_tree_inner(&path)? else {
                continue;
            };
            // Directories sort as if their name carried a trailing slash.
            let mut key = name.clone().into_bytes();
            key.push(b'/');
            (key, TreeEntry::Dir { hash })
        } else {
            let content = fs::read(&path)?;
            let hash = sha1_object("blob", &content);
            let mode = file_mode(&meta);
            (name.clone().into_bytes(), TreeEntry::File { mode, hash })
        };
        entries.push((sort_key, name, tree_entry));
    }

    if entries.is_empty() {
        return Ok(None);
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = Vec::new();
    for (_, name, entry) in &entries {
        let (mode, hash) = match entry {
            TreeEntry::File { mode, hash } => (*mode, hash),
            TreeEntry::Symlink { hash } => ("120000", hash),
            TreeEntry::Dir { hash } => ("40000", hash),
        };
        payload.extend_from_slice(mode.as_bytes());
        payload.push(b' ');
        payload.extend_from_slice(name.as_bytes());
        payload.push(b'\0');
        payload.extend_from_slice(hash);
    }
    Ok(Some(sha1_object("tree", &payload)))
}

const SLUG_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";
const SLUG_LEN: usize = 5;

/// Short content-addressed directory name for an installed `(uuid, tree)`.
pub fn version_slug(uuid: &Uuid, tree: &TreeHash) -> String {
    let mut hasher = Sha1::new();
    hasher.update(uuid.as_bytes());
    hasher.update(tree.as_bytes());
    let digest: [u8; 20] = hasher.finalize().into();
    let mut value = digest[..8].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    let mut out = [0u8; SLUG_LEN];
    for slot in out.iter_mut().rev() {
        *slot = SLUG_ALPHABET[(value % 32) as usize];
        value /= 32;
    }
    out.iter().map(|&b| char::from(b)).collect()
}
