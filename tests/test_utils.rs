//! Test utilities: on-disk registry and environment fixtures.
//!
//! Builders mirror the registry layout the engine reads: `Registry.toml`
//! plus per-package `Package.toml`, `Versions.toml`, `Compat.toml` and
//! `Deps.toml`.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

pub fn uuid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// A deterministic fake tree hash for `(name, version)`.
pub fn fake_tree(name: &str, version: &str) -> String {
    carton::hash::blob_hash(format!("{name}-{version}").as_bytes()).to_string()
}

/// One package being published into a [`TestRegistry`].
pub struct MockPackage {
    pub name: String,
    pub uuid: Uuid,
    versions: Vec<(String, String, bool)>,
    deps: Vec<(String, String, Uuid)>,
    compat: Vec<(String, String, String)>,
}

impl MockPackage {
    pub fn new(name: &str, id: Uuid) -> Self {
        Self {
            name: name.to_string(),
            uuid: id,
            versions: Vec::new(),
            deps: Vec::new(),
            compat: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        let tree = fake_tree(&self.name, version);
        self.versions.push((version.to_string(), tree, false));
        self
    }

    pub fn with_yanked_version(mut self, version: &str) -> Self {
        let tree = fake_tree(&self.name, version);
        self.versions.push((version.to_string(), tree, true));
        self
    }

    /// Publish a version with an explicit tree hash (for conflict tests).
    pub fn with_version_tree(mut self, version: &str, tree: &str) -> Self {
        self.versions.push((version.to_string(), tree.to_string(), false));
        self
    }

    /// Declare a dependency over a version-range key (e.g. `"1"`, `"*"`).
    pub fn with_dep(mut self, range: &str, name: &str, id: Uuid) -> Self {
        self.deps.push((range.to_string(), name.to_string(), id));
        self
    }

    /// Declare a compat entry over a version-range key.
    pub fn with_compat(mut self, range: &str, name: &str, spec: &str) -> Self {
        self.compat
            .push((range.to_string(), name.to_string(), spec.to_string()));
        self
    }
}

/// A registry directory under a tempdir, rebuilt on every `add_package`.
pub struct TestRegistry {
    temp: TempDir,
    name: String,
    uuid: Uuid,
    packages: Vec<(Uuid, String)>,
}

impl TestRegistry {
    pub fn new(name: &str, id: Uuid) -> Self {
        let registry = Self {
            temp: TempDir::new().expect("failed to create registry tempdir"),
            name: name.to_string(),
            uuid: id,
            packages: Vec::new(),
        };
        registry.write_index();
        registry
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn open(&self) -> carton::Registry {
        carton::Registry::open_with_cache(self.path(), false).expect("failed to open registry")
    }

    pub fn add_package(&mut self, pkg: &MockPackage) {
        let rel = PathBuf::from(&pkg.name[..1].to_uppercase()).join(&pkg.name);
        let dir = self.path().join(&rel);
        fs::create_dir_all(&dir).expect("failed to create package dir");

        fs::write(
            dir.join("Package.toml"),
            format!(
                "name = \"{}\"\nuuid = \"{}\"\nrepo = \"https://example.com/{}.git\"\n",
                pkg.name, pkg.uuid, pkg.name
            ),
        )
        .expect("failed to write Package.toml");

        let mut versions = String::new();
        for (version, tree, yanked) in &pkg.versions {
            let _ = writeln!(versions, "[\"{version}\"]");
            let _ = writeln!(versions, "git-tree-sha1 = \"{tree}\"");
            if *yanked {
                let _ = writeln!(versions, "yanked = true");
            }
            versions.push('\n');
        }
        fs::write(dir.join("Versions.toml"), versions).expect("failed to write Versions.toml");

        if !pkg.deps.is_empty() {
            let mut deps = String::new();
            for (range, name, id) in &pkg.deps {
                let _ = writeln!(deps, "[\"{range}\"]\n{name} = \"{id}\"");
            }
            fs::write(dir.join("Deps.toml"), deps).expect("failed to write Deps.toml");
        }
        if !pkg.compat.is_empty() {
            let mut compat = String::new();
            for (range, name, spec) in &pkg.compat {
                let _ = writeln!(compat, "[\"{range}\"]\n{name} = \"{spec}\"");
            }
            fs::write(dir.join("Compat.toml"), compat).expect("failed to write Compat.toml");
        }

        self.packages
            .push((pkg.uuid, rel.display().to_string()));
        self.write_index();
    }

    fn write_index(&self) {
        let mut index = format!(
            "name = \"{}\"\nuuid = \"{}\"\nrepo = \"https://example.com/{}.git\"\n\n[packages]\n",
            self.name, self.uuid, self.name
        );
        // Rebuild the packages table; the engine only reads this file on
        // open, so rewriting between adds is safe.
        let mut names = std::collections::BTreeMap::new();
        for (id, path) in &self.packages {
            names.insert(*id, path.clone());
        }
        for (id, path) in names {
            let pkg_name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let _ = writeln!(
                index,
                "\"{id}\" = {{ name = \"{pkg_name}\", path = \"{path}\" }}"
            );
        }
        fs::write(self.path().join("Registry.toml"), index)
            .expect("failed to write Registry.toml");
    }
}

/// An environment directory with helpers for writing its two artifacts.
pub struct TestEnv {
    temp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("failed to create env tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_project(&self, content: &str) {
        fs::write(self.path().join("Project.toml"), content).expect("failed to write project");
    }

    pub fn write_manifest(&self, content: &str) {
        fs::write(self.path().join("Manifest.toml"), content).expect("failed to write manifest");
    }

    pub fn open(&self) -> carton::Environment {
        carton::Environment::open(self.path()).expect("failed to open environment")
    }

    pub fn manifest_text(&self) -> String {
        fs::read_to_string(self.path().join("Manifest.toml")).expect("failed to read manifest")
    }
}
