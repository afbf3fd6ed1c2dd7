//! Manifest files: the persisted, fully resolved dependency graph.
//!
//! A [`Manifest`] maps package UUIDs to resolved entries. On disk the
//! entries are grouped by name as arrays of tables, because names are not
//! unique — only UUIDs are. Reading normalizes the legacy list form of
//! per-entry `deps` into the map form before any graph check runs, and a
//! legacy top-level layout (no `host_version`/`project_hash`) is silently
//! wrapped into the current one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash::{TreeHash, HOST_UUID};
use crate::project::parse_uuid;
use crate::toml_io::{self, as_array, as_bool, as_str, as_table, required};
use crate::version::Version;

/// Allowed manifest filenames, probed in order.
pub const MANIFEST_FILE_NAMES: &[&str] = &["Manifest.toml"];

/// Exact header emitted at the top of every written manifest.
pub const MANIFEST_HEADER: &str =
    "# This file is machine-generated — editing it directly is not advised";

/// A resolved node of the dependency graph.
#[derive(Debug, Clone, Default)]
pub struct PackageEntry {
    pub name: String,
    pub version: Option<Version>,
    pub path: Option<PathBuf>,
    pub pinned: bool,
    pub repo_url: Option<String>,
    pub repo_rev: Option<String>,
    pub repo_subdir: Option<String>,
    pub tree_hash: Option<TreeHash>,
    /// Outgoing edges: dependency name to dependency uuid.
    pub deps: BTreeMap<String, Uuid>,
    /// Unknown keys, preserved for round-trip; not part of equality.
    pub other: Table,
}

impl PartialEq for PackageEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.path == other.path
            && self.pinned == other.pinned
            && self.repo_url == other.repo_url
            && self.repo_rev == other.repo_rev
            && self.repo_subdir == other.repo_subdir
            && self.tree_hash == other.tree_hash
            && self.deps == other.deps
    }
}

impl Eq for PackageEntry {}

impl PackageEntry {
    /// Fixed entries are ones the resolver may not move: developed from a
    /// local path, tracking an explicit git revision, or pinned.
    pub fn is_fixed(&self) -> bool {
        self.path.is_some() || self.repo_rev.is_some() || self.pinned
    }
}

/// The persisted resolved graph.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Host runtime version this manifest was resolved under.
    pub host_version: Option<Version>,
    /// Digest of the producing project, for staleness detection.
    pub project_hash: Option<String>,
    pub deps: BTreeMap<Uuid, PackageEntry>,
    /// Unknown top-level keys, preserved for round-trip.
    pub other: Table,
}

impl PartialEq for Manifest {
    fn eq(&self, other: &Self) -> bool {
        self.host_version == other.host_version
            && self.project_hash == other.project_hash
            && self.deps == other.deps
    }
}

impl Eq for Manifest {}

struct Stage1Entry {
    uuid: Uuid,
    entry: PackageEntry,
    raw_deps: Option<Value>,
}

impl Manifest {
    /// Probe `dir` for an allowed manifest filename.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        MANIFEST_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::read_with_externals(path, &BTreeSet::new())
    }

    /// Read a manifest, treating `externals` (host-shipped library UUIDs)
    /// as valid edge targets that need no entry of their own.
    pub fn read_with_externals(path: &Path, externals: &BTreeSet<Uuid>) -> Result<Self> {
        let table = toml_io::read_table(path)?;
        Self::from_table(table, path, externals)
    }

    fn from_table(mut table: Table, path: &Path, externals: &BTreeSet<Uuid>) -> Result<Self> {
        // Format evolution: the legacy layout was the bare deps table.
        if !table.contains_key("host_version") && !table.contains_key("project_hash") {
            tracing::warn!(path = %path.display(), "migrating legacy manifest layout");
            let mut wrapped = Table::new();
            wrapped.insert("host_version".into(), Value::String("nothing".into()));
            wrapped.insert("project_hash".into(), Value::String("nothing".into()));
            wrapped.insert("deps".into(), Value::Table(table));
            table = wrapped;
        }

        let mut manifest = Manifest::default();
        if let Some(v) = table.remove("host_version") {
            let s = as_str(path, "host_version", &v)?;
            if s != "nothing" {
                manifest.host_version =
                    Some(Version::parse(s).map_err(|e| Error::parse(path, e.to_string()))?);
            }
        }
        if let Some(v) = table.remove("project_hash") {
            let s = as_str(path, "project_hash", &v)?;
            if s != "nothing" {
                manifest.project_hash = Some(s.to_string());
            }
        }

        let mut stage1: BTreeMap<String, Vec<Stage1Entry>> = BTreeMap::new();
        if let Some(deps_value) = table.remove("deps") {
            for (name, entries) in as_table(path, "deps", &deps_value)? {
                let mut parsed = Vec::new();
                for item in as_array(path, name, entries)? {
                    parsed.push(parse_entry(path, name, item)?);
                }
                stage1.insert(name.clone(), parsed);
            }
        }
        manifest.other = table;

        // Names may collide only when uuids differ.
        for (name, entries) in &stage1 {
            let mut seen = BTreeSet::new();
            for e in entries {
                if !seen.insert(e.uuid) {
                    return Err(Error::GraphInvariant(format!(
                        "{}: `{name}` appears twice with uuid {}",
                        path.display(),
                        e.uuid
                    )));
                }
            }
        }

        // Normalize the legacy list form of `deps` to the map form before
        // any graph check: list entries refer to names, which must resolve
        // to exactly one uuid within this manifest.
        let uuids_by_name: BTreeMap<String, Vec<Uuid>> = stage1
            .iter()
            .map(|(name, entries)| (name.clone(), entries.iter().map(|e| e.uuid).collect()))
            .collect();
        for entries in stage1.values_mut() {
            for e in entries.iter_mut() {
                let Some(raw) = e.raw_deps.take() else {
                    continue;
                };
                match raw {
                    Value::Array(names) => {
                        for item in &names {
                            let dep_name = as_str(path, "deps", item)?;
                            let found = uuids_by_name
                                .get(dep_name)
                                .map(Vec::as_slice)
                                .unwrap_or(&[]);
                            match found {
                                [] => {
                                    return Err(Error::GraphInvariant(format!(
                                        "{}: `{}` depends on `{dep_name}` which has no entry",
                                        path.display(),
                                        e.entry.name
                                    )));
                                }
                                [uuid] => {
                                    e.entry.deps.insert(dep_name.to_string(), *uuid);
                                }
                                _ => {
                                    return Err(Error::AmbiguousDep {
                                        name: dep_name.to_string(),
                                        path: path.to_path_buf(),
                                    });
                                }
                            }
                        }
                    }
                    Value::Table(map) => {
                        for (dep_name, uuid) in &map {
                            let uuid = parse_uuid(path, "deps", as_str(path, "deps", uuid)?)?;
                            e.entry.deps.insert(dep_name.clone(), uuid);
                        }
                    }
                    _ => {
                        return Err(Error::schema(path, "deps", "an array of names or a table"));
                    }
                }
            }
        }

        for entries in stage1.into_values() {
            for e in entries {
                manifest.deps.insert(e.uuid, e.entry);
            }
        }
        manifest.validate(path, externals)?;
        Ok(manifest)
    }

    /// Graph invariants: every edge target has an entry (or is a
    /// host-shipped library), and the target entry carries the edge's name.
    pub fn validate(&self, path: &Path, externals: &BTreeSet<Uuid>) -> Result<()> {
        for (uuid, entry) in &self.deps {
            for (dep_name, dep_uuid) in &entry.deps {
                match self.deps.get(dep_uuid) {
                    Some(target) => {
                        if &target.name != dep_name {
                            return Err(Error::GraphInvariant(format!(
                                "{}: `{}` ({uuid}) calls {dep_uuid} `{dep_name}` but its entry is named `{}`",
                                path.display(),
                                entry.name,
                                target.name
                            )));
                        }
                    }
                    None => {
                        if *dep_uuid != HOST_UUID && !externals.contains(dep_uuid) {
                            return Err(Error::GraphInvariant(format!(
                                "{}: `{}` ({uuid}) depends on `{dep_name}` ({dep_uuid}) which has no entry",
                                path.display(),
                                entry.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Entries grouped by name, each list sorted by uuid.
    fn by_name(&self) -> BTreeMap<&str, Vec<(&Uuid, &PackageEntry)>> {
        let mut by_name: BTreeMap<&str, Vec<(&Uuid, &PackageEntry)>> = BTreeMap::new();
        for (uuid, entry) in &self.deps {
            by_name.entry(&entry.name).or_default().push((uuid, entry));
        }
        by_name
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.insert(
            "host_version".into(),
            Value::String(
                self.host_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "nothing".to_string()),
            ),
        );
        table.insert(
            "project_hash".into(),
            Value::String(
                self.project_hash
                    .clone()
                    .unwrap_or_else(|| "nothing".to_string()),
            ),
        );

        let by_name = self.by_name();
        let ambiguous: BTreeSet<&str> = by_name
            .iter()
            .filter(|(_, entries)| entries.len() > 1)
            .map(|(name, _)| *name)
            .collect();

        let mut deps = Table::new();
        for (name, entries) in &by_name {
            let mut list = Vec::new();
            for (uuid, entry) in entries {
                list.push(Value::Table(entry_table(uuid, entry, &ambiguous)));
            }
            deps.insert((*name).to_string(), Value::Array(list));
        }
        table.insert("deps".into(), Value::Table(deps));
        for (key, value) in &self.other {
            table.insert(key.clone(), value.clone());
        }
        table
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        toml_io::write_table(path, &self.to_table(), Some(MANIFEST_HEADER))
    }
}

fn parse_entry(path: &Path, name: &str, item: &Value) -> Result<Stage1Entry> {
    let mut t = as_table(path, name, item)?.clone();
    let uuid = parse_uuid(
        path,
        "uuid",
        as_str(path, "uuid", required(path, &t, "uuid")?)?,
    )?;
    t.remove("uuid");

    let mut entry = PackageEntry {
        name: name.to_string(),
        ..PackageEntry::default()
    };
    if let Some(v) = t.remove("version") {
        entry.version = Some(
            Version::parse(as_str(path, "version", &v)?)
                .map_err(|e| Error::parse(path, e.to_string()))?,
        );
    }
    if let Some(v) = t.remove("git-tree-sha1") {
        entry.tree_hash = Some(
            as_str(path, "git-tree-sha1", &v)?
                .parse()
                .map_err(|_| Error::parse(path, format!("invalid tree hash for `{name}`")))?,
        );
    }
    if let Some(v) = t.remove("path") {
        entry.path = Some(PathBuf::from(as_str(path, "path", &v)?));
    }
    if let Some(v) = t.remove("pinned") {
        entry.pinned = as_bool(path, "pinned", &v)?;
    }
    if let Some(v) = t.remove("repo-url") {
        entry.repo_url = Some(as_str(path, "repo-url", &v)?.to_string());
    }
    if let Some(v) = t.remove("repo-rev") {
        entry.repo_rev = Some(as_str(path, "repo-rev", &v)?.to_string());
    }
    if let Some(v) = t.remove("repo-subdir") {
        entry.repo_subdir = Some(as_str(path, "repo-subdir", &v)?.to_string());
    }
    let raw_deps = t.remove("deps");
    entry.other = t;
    Ok(Stage1Entry {
        uuid,
        entry,
        raw_deps,
    })
}

fn entry_table(uuid: &Uuid, entry: &PackageEntry, ambiguous: &BTreeSet<&str>) -> Table {
    let mut t = Table::new();
    t.insert("uuid".into(), Value::String(uuid.to_string()));
    if let Some(version) = &entry.version {
        t.insert("version".into(), Value::String(version.to_string()));
    }
    if let Some(tree) = &entry.tree_hash {
        t.insert("git-tree-sha1".into(), Value::String(tree.to_string()));
    }
    if let Some(path) = &entry.path {
        t.insert("path".into(), Value::String(path.display().to_string()));
    }
    if entry.pinned {
        t.insert("pinned".into(), Value::Boolean(true));
    }
    if let Some(url) = &entry.repo_url {
        t.insert("repo-url".into(), Value::String(url.clone()));
    }
    if let Some(rev) = &entry.repo_rev {
        t.insert("repo-rev".into(), Value::String(rev.clone()));
    }
    if let Some(subdir) = &entry.repo_subdir {
        t.insert("repo-subdir".into(), Value::String(subdir.clone()));
    }
    if !entry.deps.is_empty() {
        // The compact list form loses the name -> uuid association, so it
        // is only written when every referenced name is unambiguous.
        if entry.deps.keys().all(|n| !ambiguous.contains(n.as_str())) {
            t.insert(
                "deps".into(),
                Value::Array(
                    entry
                        .deps
                        .keys()
                        .map(|n| Value::String(n.clone()))
                        .collect(),
                ),
            );
        } else {
            let mut map = Table::new();
            for (n, u) in &entry.deps {
                map.insert(n.clone(), Value::String(u.to_string()));
            }
            t.insert("deps".into(), Value::Table(map));
        }
    }
    for (key, value) in &entry.other {
        t.insert(key.clone(), value.clone());
    }
    t
}
