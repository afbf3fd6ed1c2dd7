//! Registry snapshots: content-addressed, lazily loaded package metadata.
//!
//! Opening a registry reads exactly one file (`Registry.toml`). Everything
//! per-package (`Package.toml`, `Versions.toml`, `Compat.toml`, `Deps.toml`)
//! is loaded on the first query of that package and kept in a one-shot cell
//! for the lifetime of the snapshot.
//!
//! Compat and dependency tables are stored compressed on disk, keyed by
//! version ranges. Uncompression expands them per published version and
//! refuses overlapping ranges that disagree, rather than silently picking
//! one side.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;

use toml::{Table, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash::{TreeHash, HOST_NAME, HOST_UUID};
use crate::project::parse_uuid;
use crate::toml_io::{self, as_bool, as_str, as_table, required};
use crate::version::{Version, VersionBound, VersionRange, VersionSpec};

/// Process-wide cache of parsed registry files, keyed by absolute path and
/// invalidated by mtime. Optional: callers can bypass it entirely.
struct CachedFile {
    mtime: SystemTime,
    table: Arc<Table>,
}

static FILE_CACHE: OnceLock<Mutex<HashMap<PathBuf, CachedFile>>> = OnceLock::new();

fn read_registry_file(path: &Path, use_cache: bool) -> Result<Arc<Table>> {
    if !use_cache {
        return Ok(Arc::new(toml_io::read_table(path)?));
    }
    let key = path.canonicalize()?;
    let mtime = std::fs::metadata(&key)?.modified()?;
    let cache = FILE_CACHE.get_or_init(Default::default);
    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = cache.get(&key) {
        if entry.mtime == mtime {
            tracing::debug!(path = %key.display(), "registry file cache hit");
            return Ok(Arc::clone(&entry.table));
        }
    }
    let table = Arc::new(toml_io::read_table(&key)?);
    cache.insert(
        key,
        CachedFile {
            mtime,
            table: Arc::clone(&table),
        },
    );
    Ok(table)
}

/// Per-version registry facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub tree_hash: TreeHash,
    pub yanked: bool,
}

/// Lazily loaded per-package metadata.
#[derive(Debug)]
pub struct PkgInfo {
    pub repo: Option<String>,
    pub subdir: Option<String>,
    pub version_info: BTreeMap<Version, VersionInfo>,
    compat: Vec<(VersionRange, BTreeMap<String, VersionSpec>)>,
    deps: Vec<(VersionRange, BTreeMap<String, Uuid>)>,
    uncompressed: OnceCell<BTreeMap<Version, BTreeMap<Uuid, VersionSpec>>>,
    name: String,
}

impl PkgInfo {
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.version_info.keys()
    }

    pub fn is_yanked(&self, version: &Version) -> bool {
        self.version_info
            .get(version)
            .is_some_and(|info| info.yanked)
    }

    pub fn tree_hash(&self, version: &Version) -> Option<&TreeHash> {
        self.version_info.get(version).map(|info| &info.tree_hash)
    }

    /// Per-version dependency constraints, joined from the compat and deps
    /// tables: dependency uuids come from `Deps.toml`, their specs from
    /// `Compat.toml` (full spec when absent), and the `"julia"` pseudo-name
    /// resolves to the host-runtime uuid.
    pub fn uncompressed_compat(&self) -> Result<&BTreeMap<Version, BTreeMap<Uuid, VersionSpec>>> {
        if let Some(map) = self.uncompressed.get() {
            return Ok(map);
        }
        let map = self.compute_uncompressed()?;
        Ok(self.uncompressed.get_or_init(|| map))
    }

    fn compute_uncompressed(&self) -> Result<BTreeMap<Version, BTreeMap<Uuid, VersionSpec>>> {
        let mut out = BTreeMap::new();
        for version in self.version_info.keys() {
            let deps_at = expand_rows(&self.name, &self.deps, version)?;
            let compat_at = expand_rows(&self.name, &self.compat, version)?;

            let mut merged: BTreeMap<Uuid, VersionSpec> = BTreeMap::new();
            for (dep_name, dep_uuid) in &deps_at {
                let spec = compat_at
                    .get(dep_name)
                    .cloned()
                    .unwrap_or_else(VersionSpec::any);
                merged.insert(*dep_uuid, spec);
            }
            for (dep_name, spec) in &compat_at {
                if dep_name == HOST_NAME {
                    merged.insert(HOST_UUID, spec.clone());
                } else if !deps_at.contains_key(dep_name) {
                    return Err(Error::Registry(format!(
                        "package `{}` declares compat for `{dep_name}` at {version} without a matching deps entry",
                        self.name
                    )));
                }
            }
            out.insert(*version, merged);
        }
        Ok(out)
    }
}

/// Expand range-keyed rows at one version. Overlapping rows must agree.
fn expand_rows<T: Clone + PartialEq>(
    pkg: &str,
    rows: &[(VersionRange, BTreeMap<String, T>)],
    version: &Version,
) -> Result<BTreeMap<String, T>> {
    let mut out: BTreeMap<String, T> = BTreeMap::new();
    for (range, table) in rows {
        if !range.contains(version) {
            continue;
        }
        for (name, value) in table {
            match out.get(name) {
                Some(existing) if existing != value => {
                    return Err(Error::Registry(format!(
                        "package `{pkg}` has overlapping ranges that disagree on `{name}` at {version}"
                    )));
                }
                _ => {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Ok(out)
}

/// One package as listed by a registry, with its lazily loaded detail.
#[derive(Debug)]
pub struct PkgEntry {
    pub name: String,
    pub path: PathBuf,
    info: OnceCell<PkgInfo>,
}

/// An immutable snapshot of one registry directory.
#[derive(Debug)]
pub struct Registry {
    pub name: String,
    pub uuid: Uuid,
    pub repo: String,
    pub url: Option<String>,
    pub tree_info: Option<TreeHash>,
    root: PathBuf,
    pkgs: HashMap<Uuid, PkgEntry>,
    use_cache: bool,
}

impl Registry {
    /// Open a registry directory, reading only `Registry.toml` eagerly.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with_cache(dir, true)
    }

    pub fn open_with_cache(dir: &Path, use_cache: bool) -> Result<Self> {
        let reg_path = dir.join("Registry.toml");
        let table = read_registry_file(&reg_path, use_cache)?;

        let name = as_str(&reg_path, "name", required(&reg_path, &table, "name")?)?.to_string();
        let uuid = parse_uuid(
            &reg_path,
            "uuid",
            as_str(&reg_path, "uuid", required(&reg_path, &table, "uuid")?)?,
        )?;
        let repo = as_str(&reg_path, "repo", required(&reg_path, &table, "repo")?)?.to_string();
        let url = table
            .get("url")
            .map(|v| as_str(&reg_path, "url", v).map(str::to_string))
            .transpose()?;

        let mut pkgs = HashMap::new();
        let packages = as_table(
            &reg_path,
            "packages",
            required(&reg_path, &table, "packages")?,
        )?;
        for (pkg_uuid, entry) in packages {
            let entry = as_table(&reg_path, "packages", entry)?;
            let pkg_uuid = parse_uuid(&reg_path, "packages", pkg_uuid)?;
            let pkg_name =
                as_str(&reg_path, "name", required(&reg_path, entry, "name")?)?.to_string();
            let pkg_path =
                as_str(&reg_path, "path", required(&reg_path, entry, "path")?)?.to_string();
            pkgs.insert(
                pkg_uuid,
                PkgEntry {
                    name: pkg_name,
                    path: PathBuf::from(pkg_path),
                    info: OnceCell::new(),
                },
            );
        }

        let tree_info_path = dir.join(".tree_info.toml");
        let tree_info = if tree_info_path.is_file() {
            let t = read_registry_file(&tree_info_path, use_cache)?;
            let s = as_str(
                &tree_info_path,
                "git-tree-sha1",
                required(&tree_info_path, &t, "git-tree-sha1")?,
            )?;
            Some(s.parse()?)
        } else {
            None
        };

        tracing::debug!(registry = %name, packages = pkgs.len(), "opened registry");
        Ok(Self {
            name,
            uuid,
            repo,
            url,
            tree_info,
            root: dir.to_path_buf(),
            pkgs,
            use_cache,
        })
    }

    /// All uuids claiming `name`; several registries or forks may claim the
    /// same name, so callers must be prepared for more than one.
    pub fn uuids_for_name(&self, name: &str) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .pkgs
            .iter()
            .filter(|(_, entry)| entry.name == name)
            .map(|(uuid, _)| *uuid)
            .collect();
        uuids.sort();
        uuids
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&PkgEntry> {
        self.pkgs.get(uuid)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.pkgs.contains_key(uuid)
    }

    pub fn uuids(&self) -> impl Iterator<Item = &Uuid> {
        self.pkgs.keys()
    }

    /// The package's detail tables, loaded on first access.
    pub fn pkg_info(&self, uuid: &Uuid) -> Result<&PkgInfo> {
        let entry = self.get(uuid).ok_or_else(|| {
            Error::Registry(format!("registry `{}` has no package {uuid}", self.name))
        })?;
        if let Some(info) = entry.info.get() {
            return Ok(info);
        }
        let info = self.load_pkg_info(entry)?;
        Ok(entry.info.get_or_init(|| info))
    }

    fn load_pkg_info(&self, entry: &PkgEntry) -> Result<PkgInfo> {
        let dir = self.root.join(&entry.path);
        tracing::debug!(registry = %self.name, package = %entry.name, "loading package metadata");

        let pkg_path = dir.join("Package.toml");
        let pkg_table = read_registry_file(&pkg_path, self.use_cache)?;
        let repo = pkg_table
            .get("repo")
            .map(|v| as_str(&pkg_path, "repo", v).map(str::to_string))
            .transpose()?;
        let subdir = pkg_table
            .get("subdir")
            .map(|v| as_str(&pkg_path, "subdir", v).map(str::to_string))
            .transpose()?;
        if let Some(v) = pkg_table.get("name") {
            let declared = as_str(&pkg_path, "name", v)?;
            if declared != entry.name {
                return Err(Error::Registry(format!(
                    "registry `{}` lists `{}` but its Package.toml says `{declared}`",
                    self.name, entry.name
                )));
            }
        }

        let versions_path = dir.join("Versions.toml");
        let versions_table = read_registry_file(&versions_path, self.use_cache)?;
        let mut version_info = BTreeMap::new();
        for (key, value) in versions_table.iter() {
            let version =
                Version::parse(key).map_err(|e| Error::parse(&versions_path, e.to_string()))?;
            let value = as_table(&versions_path, key, value)?;
            let tree_hash: TreeHash = as_str(
                &versions_path,
                "git-tree-sha1",
                required(&versions_path, value, "git-tree-sha1")?,
            )?
            .parse()?;
            let yanked = match value.get("yanked") {
                Some(v) => as_bool(&versions_path, "yanked", v)?,
                None => false,
            };
            version_info.insert(version, VersionInfo { tree_hash, yanked });
        }

        let compat = read_ranged_table(&dir.join("Compat.toml"), self.use_cache, |path, value| {
            parse_compat_value(path, value)
        })?;
        let deps = read_ranged_table(&dir.join("Deps.toml"), self.use_cache, |path, value| {
            parse_uuid(path, "deps", as_str(path, "deps", value)?)
        })?;

        Ok(PkgInfo {
            repo,
            subdir,
            version_info,
            compat,
            deps,
            uncompressed: OnceCell::new(),
            name: entry.name.clone(),
        })
    }
}

/// Compat values are a spec string or a list of spec strings to union.
fn parse_compat_value(path: &Path, value: &Value) -> Result<VersionSpec> {
    match value {
        Value::String(s) => Ok(VersionSpec::parse(s)?),
        Value::Array(items) => {
            let mut spec = VersionSpec::none();
            for item in items {
                spec = spec.union(&VersionSpec::parse(as_str(path, "compat", item)?)?);
            }
            Ok(spec)
        }
        _ => Err(Error::schema(path, "compat", "a string or array of strings")),
    }
}

/// Read a `range-key -> { name -> value }` file; absent files are empty.
fn read_ranged_table<T>(
    path: &Path,
    use_cache: bool,
    parse_value: impl Fn(&Path, &Value) -> Result<T>,
) -> Result<Vec<(VersionRange, BTreeMap<String, T>)>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let table = read_registry_file(path, use_cache)?;
    let mut rows = Vec::new();
    for (key, value) in table.iter() {
        let range = parse_range_key(path, key)?;
        let value = as_table(path, key, value)?;
        let mut map = BTreeMap::new();
        for (name, raw) in value {
            map.insert(name.clone(), parse_value(path, raw)?);
        }
        rows.push((range, map));
    }
    Ok(rows)
}

/// Registry range keys: `*`, `1.2`, or `1.2-3` (hyphen, no spaces needed).
fn parse_range_key(path: &Path, key: &str) -> Result<VersionRange> {
    let parse_bound = |s: &str| -> Result<VersionBound> {
        s.parse().map_err(|e: crate::version::VersionError| {
            Error::parse(path, format!("invalid range key `{key}`: {e}"))
        })
    };
    match key.split_once('-') {
        Some((lo, hi)) => Ok(VersionRange::new(
            parse_bound(lo.trim())?,
            parse_bound(hi.trim())?,
        )),
        None => {
            let bound = parse_bound(key.trim())?;
            Ok(VersionRange::new(bound, bound))
        }
    }
}
