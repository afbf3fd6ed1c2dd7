//! Environments: a directory holding a project and its manifest.
//!
//! An environment may have either artifact missing — a fresh directory has
//! neither. This module also knows the depot layout: content-addressed
//! installs, clone caches, named environments, and the host's stdlib
//! metadata directory.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::error::Result;
use crate::hash::{version_slug, TreeHash};
use crate::manifest::Manifest;
use crate::project::{Project, PROJECT_FILE_NAMES};
use crate::version::Version;

/// A loaded environment directory.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Absolute path of the environment directory.
    pub dir: PathBuf,
    pub project: Option<Project>,
    pub manifest: Option<Manifest>,
}

impl Environment {
    /// Load `dir`, tolerating missing artifacts.
    pub fn open(dir: &Path) -> Result<Self> {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };
        let project = match Project::find(&dir) {
            Some(path) => Some(Project::read(&path)?),
            None => None,
        };
        let manifest = match Manifest::find(&dir) {
            Some(path) => Some(Manifest::read(&path)?),
            None => None,
        };
        Ok(Self {
            dir,
            project,
            manifest,
        })
    }

    pub fn project_file(&self) -> PathBuf {
        self.dir.join(PROJECT_FILE_NAMES[0])
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.dir.join(crate::manifest::MANIFEST_FILE_NAMES[0])
    }

    /// Drop manifest entries unreachable from the project roots.
    ///
    /// Roots are the project's own uuid (when it is a package) and its
    /// direct deps. Traversal is breadth-first with a visited set: cycles
    /// and diamonds are expected.
    pub fn prune_manifest(&mut self) {
        let Some(manifest) = &mut self.manifest else {
            return;
        };
        let Some(project) = &self.project else {
            return;
        };

        let mut reached: BTreeSet<Uuid> = BTreeSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();
        if let Some(uuid) = project.uuid {
            queue.push_back(uuid);
        }
        queue.extend(project.deps.values().copied());

        while let Some(uuid) = queue.pop_front() {
            if !reached.insert(uuid) {
                continue;
            }
            if let Some(entry) = manifest.deps.get(&uuid) {
                queue.extend(entry.deps.values().copied());
            }
        }

        let before = manifest.deps.len();
        manifest.deps.retain(|uuid, _| reached.contains(uuid));
        if manifest.deps.len() != before {
            tracing::debug!(
                removed = before - manifest.deps.len(),
                "pruned unreachable manifest entries"
            );
        }
    }

    /// Prune, then persist both artifacts, creating the directory as
    /// needed. Each file is written atomically.
    pub fn write(&mut self) -> Result<()> {
        self.prune_manifest();
        fs::create_dir_all(&self.dir)?;
        if let Some(project) = &self.project {
            project.write(&self.project_file())?;
        }
        if let Some(manifest) = &self.manifest {
            manifest.write(&self.manifest_file())?;
        }
        tracing::info!(dir = %self.dir.display(), "wrote environment");
        Ok(())
    }
}

/// Locate a content-addressed install of `(name, uuid, tree_hash)` in any
/// depot, first hit wins.
pub fn find_installed(
    depots: &[PathBuf],
    name: &str,
    uuid: &Uuid,
    tree_hash: &TreeHash,
) -> Option<PathBuf> {
    let slug = version_slug(uuid, tree_hash);
    depots
        .iter()
        .map(|depot| depot.join("packages").join(name).join(&slug))
        .find(|candidate| candidate.is_dir())
}

/// The directory of a named environment under a depot.
pub fn environment_path(depot: &Path, name: &str) -> PathBuf {
    depot.join("environments").join(name)
}

/// The cache directory for a clone of `url`: `clones/<hash(url)>`, with a
/// `_full` suffix for non-bare clones.
pub fn clone_cache_path(depot: &Path, url: &str, full: bool) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    let mut dir = hex::encode(hasher.finalize());
    if full {
        dir.push_str("_full");
    }
    depot.join("clones").join(dir)
}

/// A host-shipped library: always available at exactly the host version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdlibInfo {
    pub name: String,
    pub version: Option<Version>,
    pub deps: BTreeMap<String, Uuid>,
}

/// Scan a stdlib directory: every subdirectory with a project file
/// declaring a uuid contributes one library.
pub fn load_stdlibs(dir: &Path) -> Result<BTreeMap<Uuid, StdlibInfo>> {
    let mut stdlibs = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(stdlibs);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(path) = Project::find(&entry.path()) else {
            continue;
        };
        let project = Project::read(&path)?;
        let (Some(name), Some(uuid)) = (project.name.clone(), project.uuid) else {
            continue;
        };
        stdlibs.insert(
            uuid,
            StdlibInfo {
                name,
                version: project.version,
                deps: project.deps,
            },
        );
    }
    tracing::debug!(count = stdlibs.len(), dir = %dir.display(), "loaded stdlib metadata");
    Ok(stdlibs)
}

/// Read the project file of a developed (path-tracked) package, if any,
/// relative to the environment directory.
pub fn dev_project(env_dir: &Path, rel_path: &Path) -> Result<Option<Project>> {
    let dir = if rel_path.is_absolute() {
        rel_path.to_path_buf()
    } else {
        env_dir.join(rel_path)
    };
    match Project::find(&dir) {
        Some(path) => Ok(Some(Project::read(&path)?)),
        None => Ok(None),
    }
}
