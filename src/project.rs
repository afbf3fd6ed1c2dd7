//! Project files: the persisted declaration of direct dependencies.
//!
//! A [`Project`] records what the user asked for — direct deps, compat
//! constraints, dev sources — while the companion manifest records what a
//! resolution produced. Unknown keys are carried through reads and writes
//! verbatim so foreign tooling can annotate the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use toml::{Table, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash::{TreeHash, HOST_NAME};
use crate::toml_io::{self, as_array, as_str, as_table};
use crate::version::{Version, VersionError, VersionSpec};

/// Allowed project filenames, probed in order.
pub const PROJECT_FILE_NAMES: &[&str] = &["Project.toml"];

/// A version constraint as written by the user plus its parsed form.
///
/// Both are stored so the user's own text round-trips unchanged.
#[derive(Debug, Clone)]
pub struct Compat {
    pub raw: String,
    pub spec: VersionSpec,
}

impl Compat {
    pub fn parse(raw: &str) -> std::result::Result<Self, VersionError> {
        Ok(Self {
            raw: raw.to_string(),
            spec: VersionSpec::parse(raw)?,
        })
    }
}

impl From<VersionSpec> for Compat {
    fn from(spec: VersionSpec) -> Self {
        Self {
            raw: spec.to_string(),
            spec,
        }
    }
}

impl PartialEq for Compat {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl Eq for Compat {}

impl std::fmt::Display for Compat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A git location a package is tracked from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepo {
    pub url: String,
    pub rev: Option<String>,
    pub subdir: Option<String>,
}

/// A pre-resolution request record: everything a caller may say about one
/// package when asking for a change.
#[derive(Debug, Clone, Default)]
pub struct PackageSpec {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    pub version: Option<VersionSpec>,
    pub tree_hash: Option<TreeHash>,
    pub path: Option<PathBuf>,
    pub repo: Option<GitRepo>,
    pub pinned: bool,
}

impl PackageSpec {
    pub fn named(name: &str, uuid: Uuid) -> Self {
        Self {
            name: Some(name.to_string()),
            uuid: Some(uuid),
            ..Self::default()
        }
    }
}

/// A `[sources]` entry: a local path or a git location, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub rev: Option<String>,
    pub subdir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workspace {
    pub projects: Vec<String>,
}

/// The persisted project declaration.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub name: Option<String>,
    pub uuid: Option<Uuid>,
    pub version: Option<Version>,
    pub deps: BTreeMap<String, Uuid>,
    pub weakdeps: BTreeMap<String, Uuid>,
    pub extras: BTreeMap<String, Uuid>,
    pub targets: BTreeMap<String, Vec<String>>,
    pub compat: BTreeMap<String, Compat>,
    pub sources: BTreeMap<String, Source>,
    pub workspace: Option<Workspace>,
    /// Unknown top-level keys, preserved for round-trip. Not part of
    /// equality: two projects that agree on every typed field are the same
    /// declaration.
    pub other: Table,
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.uuid == other.uuid
            && self.version == other.version
            && self.deps == other.deps
            && self.weakdeps == other.weakdeps
            && self.extras == other.extras
            && self.targets == other.targets
            && self.compat == other.compat
            && self.sources == other.sources
            && self.workspace == other.workspace
    }
}

impl Eq for Project {}

pub(crate) fn parse_uuid(path: &Path, field: &str, s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| Error::parse(path, format!("invalid uuid in `{field}`: `{s}`")))
}

fn parse_dep_table(path: &Path, field: &str, value: &Value) -> Result<BTreeMap<String, Uuid>> {
    let table = as_table(path, field, value)?;
    let mut out = BTreeMap::new();
    for (name, raw) in table {
        let uuid = parse_uuid(path, field, as_str(path, field, raw)?)?;
        out.insert(name.clone(), uuid);
    }
    Ok(out)
}

impl Project {
    /// Probe `dir` for an allowed project filename.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        PROJECT_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Does this project declare itself as a package?
    pub fn is_package(&self) -> bool {
        self.name.is_some() && self.uuid.is_some()
    }

    /// The compat spec projected onto a direct dependency, full by default.
    pub fn compat_for(&self, name: &str) -> VersionSpec {
        self.compat
            .get(name)
            .map(|c| c.spec.clone())
            .unwrap_or_else(VersionSpec::any)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let table = toml_io::read_table(path)?;
        Self::from_table(table, path)
    }

    fn from_table(mut table: Table, path: &Path) -> Result<Self> {
        let mut project = Project::default();

        if let Some(v) = table.remove("name") {
            project.name = Some(as_str(path, "name", &v)?.to_string());
        }
        if let Some(v) = table.remove("uuid") {
            project.uuid = Some(parse_uuid(path, "uuid", as_str(path, "uuid", &v)?)?);
        }
        if let Some(v) = table.remove("version") {
            project.version = Some(
                Version::parse(as_str(path, "version", &v)?)
                    .map_err(|e| Error::parse(path, e.to_string()))?,
            );
        }
        if let Some(v) = table.remove("deps") {
            project.deps = parse_dep_table(path, "deps", &v)?;
        }
        if let Some(v) = table.remove("weakdeps") {
            project.weakdeps = parse_dep_table(path, "weakdeps", &v)?;
        }
        if let Some(v) = table.remove("extras") {
            project.extras = parse_dep_table(path, "extras", &v)?;
        }
        if let Some(v) = table.remove("compat") {
            for (name, raw) in as_table(path, "compat", &v)? {
                let compat = Compat::parse(as_str(path, "compat", raw)?)?;
                project.compat.insert(name.clone(), compat);
            }
        }
        if let Some(v) = table.remove("targets") {
            for (target, names) in as_table(path, "targets", &v)? {
                let mut list = Vec::new();
                for item in as_array(path, "targets", names)? {
                    list.push(as_str(path, "targets", item)?.to_string());
                }
                project.targets.insert(target.clone(), list);
            }
        }
        if let Some(v) = table.remove("sources") {
            for (name, entry) in as_table(path, "sources", &v)? {
                let entry = as_table(path, "sources", entry)?;
                let mut source = Source::default();
                for (key, value) in entry {
                    let s = as_str(path, "sources", value)?;
                    match key.as_str() {
                        "path" => source.path = Some(PathBuf::from(s)),
                        "url" => source.url = Some(s.to_string()),
                        "rev" => source.rev = Some(s.to_string()),
                        "subdir" => source.subdir = Some(s.to_string()),
                        other => {
                            return Err(Error::parse(
                                path,
                                format!("unknown key `{other}` in sources entry `{name}`"),
                            ));
                        }
                    }
                }
                project.sources.insert(name.clone(), source);
            }
        }
        if let Some(v) = table.remove("workspace") {
            let ws = as_table(path, "workspace", &v)?;
            let mut projects = Vec::new();
            if let Some(list) = ws.get("projects") {
                for item in as_array(path, "workspace.projects", list)? {
                    projects.push(as_str(path, "workspace.projects", item)?.to_string());
                }
            }
            project.workspace = Some(Workspace { projects });
        }

        project.other = table;
        project.validate(path)?;
        Ok(project)
    }

    /// Invariants: a UUID may not carry two different names across the dep
    /// sections, and every targets/compat/sources key must refer to a
    /// declared dependency (`"julia"` excepted for compat).
    pub fn validate(&self, path: &Path) -> Result<()> {
        let mut seen: BTreeMap<Uuid, &str> = BTreeMap::new();
        for (section, deps) in [
            ("deps", &self.deps),
            ("weakdeps", &self.weakdeps),
            ("extras", &self.extras),
        ] {
            for (name, uuid) in deps {
                match seen.get(uuid) {
                    Some(existing) if *existing != name.as_str() => {
                        return Err(Error::GraphInvariant(format!(
                            "{}: uuid {uuid} is declared both as `{existing}` and as `{name}` (in {section})",
                            path.display()
                        )));
                    }
                    _ => {
                        seen.insert(*uuid, name);
                    }
                }
            }
        }

        let declared = |name: &str| {
            self.deps.contains_key(name)
                || self.weakdeps.contains_key(name)
                || self.extras.contains_key(name)
        };
        for (target, names) in &self.targets {
            for name in names {
                if !declared(name) {
                    return Err(Error::GraphInvariant(format!(
                        "{}: target `{target}` lists `{name}` which is not a declared dependency",
                        path.display()
                    )));
                }
            }
        }
        for name in self.compat.keys() {
            if name != HOST_NAME && !declared(name) {
                return Err(Error::GraphInvariant(format!(
                    "{}: compat entry `{name}` does not match a declared dependency",
                    path.display()
                )));
            }
        }
        for (name, source) in &self.sources {
            if !declared(name) {
                return Err(Error::GraphInvariant(format!(
                    "{}: sources entry `{name}` does not match a declared dependency",
                    path.display()
                )));
            }
            let has_git = source.url.is_some() || source.rev.is_some();
            if source.path.is_some() && has_git {
                return Err(Error::GraphInvariant(format!(
                    "{}: sources entry `{name}` mixes `path` with git keys",
                    path.display()
                )));
            }
            if source.path.is_none() && !has_git {
                return Err(Error::GraphInvariant(format!(
                    "{}: sources entry `{name}` declares neither `path` nor a git location",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Destructure into an ordered table, dropping fields equal to their
    /// defaults and carrying unknown keys through.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        if let Some(name) = &self.name {
            table.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(uuid) = &self.uuid {
            table.insert("uuid".into(), Value::String(uuid.to_string()));
        }
        if let Some(version) = &self.version {
            table.insert("version".into(), Value::String(version.to_string()));
        }
        for (field, deps) in [
            ("deps", &self.deps),
            ("weakdeps", &self.weakdeps),
            ("extras", &self.extras),
        ] {
            if deps.is_empty() {
                continue;
            }
            let mut t = Table::new();
            for (name, uuid) in deps {
                t.insert(name.clone(), Value::String(uuid.to_string()));
            }
            table.insert(field.into(), Value::Table(t));
        }
        if !self.sources.is_empty() {
            let mut t = Table::new();
            for (name, source) in &self.sources {
                let mut entry = Table::new();
                if let Some(path) = &source.path {
                    entry.insert("path".into(), Value::String(path.display().to_string()));
                }
                if let Some(url) = &source.url {
                    entry.insert("url".into(), Value::String(url.clone()));
                }
                if let Some(rev) = &source.rev {
                    entry.insert("rev".into(), Value::String(rev.clone()));
                }
                if let Some(subdir) = &source.subdir {
                    entry.insert("subdir".into(), Value::String(subdir.clone()));
                }
                t.insert(name.clone(), Value::Table(entry));
            }
            table.insert("sources".into(), Value::Table(t));
        }
        if !self.compat.is_empty() {
            let mut t = Table::new();
            for (name, compat) in &self.compat {
                t.insert(name.clone(), Value::String(compat.raw.clone()));
            }
            table.insert("compat".into(), Value::Table(t));
        }
        if !self.targets.is_empty() {
            let mut t = Table::new();
            for (target, names) in &self.targets {
                t.insert(
                    target.clone(),
                    Value::Array(names.iter().map(|n| Value::String(n.clone())).collect()),
                );
            }
            table.insert("targets".into(), Value::Table(t));
        }
        if let Some(ws) = &self.workspace {
            let mut t = Table::new();
            t.insert(
                "projects".into(),
                Value::Array(
                    ws.projects
                        .iter()
                        .map(|p| Value::String(p.clone()))
                        .collect(),
                ),
            );
            table.insert("workspace".into(), Value::Table(t));
        }
        for (key, value) in &self.other {
            table.insert(key.clone(), value.clone());
        }
        table
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        toml_io::write_table(path, &self.to_table(), None)
    }

    /// Digest of the canonical serialized form, recorded in manifests for
    /// staleness detection.
    pub fn content_hash(&self) -> String {
        let body = toml::to_string(&toml_io::ordered(&self.to_table())).unwrap_or_default();
        let mut hasher = Sha1::new();
        hasher.update(body.as_bytes());
        hex::encode(hasher.finalize())
    }
}
