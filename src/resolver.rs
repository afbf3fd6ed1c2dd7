//! Resolver front-end: fixed packages, requirement collection, transitive
//! graph construction, and manifest post-processing.
//!
//! The flow for one resolve: collect the packages the solver may not move
//! (the project itself, path-tracked, git-tracked, pinned), seed the
//! requirement set from the project plus caller overrides, close over the
//! registries into an `(all_versions, all_compat)` graph, hand that to the
//! solver backend, then materialize the chosen assignment as a fresh
//! manifest.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use uuid::Uuid;

use crate::environment::{dev_project, Environment, StdlibInfo};
use crate::error::{Error, Result};
use crate::hash::{TreeHash, HOST_NAME, HOST_UUID};
use crate::manifest::{Manifest, PackageEntry};
use crate::project::{PackageSpec, Project};
use crate::pubgrub_resolver;
use crate::registry::Registry;
use crate::version::{Version, VersionSpec};

/// How far an already-manifested package may move during a resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeLevel {
    /// No change to any manifested version.
    Fixed,
    /// Within the same `(major, minor)` series.
    Patch,
    /// Within the same `major` series.
    Minor,
    /// Unconstrained.
    #[default]
    Major,
}

impl UpgradeLevel {
    fn admits(&self, prior: Option<&Version>, candidate: &Version) -> bool {
        let Some(prior) = prior else {
            return true;
        };
        match self {
            UpgradeLevel::Fixed => candidate == prior,
            UpgradeLevel::Patch => {
                candidate.major == prior.major && candidate.minor == prior.minor
            }
            UpgradeLevel::Minor => candidate.major == prior.major,
            UpgradeLevel::Major => true,
        }
    }
}

/// A package whose version the resolver may not choose.
#[derive(Debug, Clone)]
pub struct FixedPkg {
    pub name: String,
    /// The version the graph node sits at.
    pub version: Version,
    /// The version to record in the manifest, when one is known.
    pub recorded_version: Option<Version>,
    /// Constraints this package projects onto others.
    pub requires: BTreeMap<Uuid, VersionSpec>,
}

/// Collect fixed packages: the environment's own project, path-tracked
/// entries (reading the developed project file when present), entries
/// tracking an explicit git revision, and pinned entries.
pub fn collect_fixed(env: &Environment) -> Result<BTreeMap<Uuid, FixedPkg>> {
    let mut fixed = BTreeMap::new();

    if let Some(project) = &env.project {
        if let (Some(name), Some(uuid)) = (&project.name, project.uuid) {
            fixed.insert(
                uuid,
                FixedPkg {
                    name: name.clone(),
                    version: project.version.unwrap_or(Version::new(0, 0, 0)),
                    recorded_version: project.version,
                    requires: project_requires(project),
                },
            );
        }
    }

    if let Some(manifest) = &env.manifest {
        for (uuid, entry) in &manifest.deps {
            if fixed.contains_key(uuid) || !entry.is_fixed() {
                continue;
            }
            let mut version = entry.version;
            let mut requires: BTreeMap<Uuid, VersionSpec> = entry
                .deps
                .values()
                .map(|dep| (*dep, VersionSpec::any()))
                .collect();
            if let Some(path) = &entry.path {
                // A developed package declares its own deps and compat;
                // the manifest copy may be stale.
                if let Some(dev) = dev_project(&env.dir, path)? {
                    if dev.version.is_some() {
                        version = dev.version;
                    }
                    requires = project_requires(&dev);
                }
            }
            fixed.insert(
                *uuid,
                FixedPkg {
                    name: entry.name.clone(),
                    version: version.unwrap_or(Version::new(0, 0, 0)),
                    recorded_version: version,
                    requires,
                },
            );
        }
    }

    Ok(fixed)
}

fn project_requires(project: &Project) -> BTreeMap<Uuid, VersionSpec> {
    let mut requires: BTreeMap<Uuid, VersionSpec> = project
        .deps
        .iter()
        .map(|(name, uuid)| (*uuid, project.compat_for(name)))
        .collect();
    if let Some(host_compat) = project.compat.get(HOST_NAME) {
        requires.insert(HOST_UUID, host_compat.spec.clone());
    }
    requires
}

/// Resolve one name across every attached registry to a single uuid.
fn lookup_name(registries: &[Registry], name: &str) -> Result<Uuid> {
    let mut found: BTreeSet<Uuid> = BTreeSet::new();
    for registry in registries {
        found.extend(registry.uuids_for_name(name));
    }
    let mut iter = found.into_iter();
    match (iter.next(), iter.next()) {
        (Some(uuid), None) => Ok(uuid),
        (None, _) => Err(Error::Registry(format!(
            "package `{name}` was not found in any registry"
        ))),
        (Some(_), Some(_)) => Err(Error::AmbiguousName(name.to_string())),
    }
}

/// Seed the requirement set from the project's direct deps and compat,
/// then apply caller overrides. The host pseudo-package never appears as
/// an active requirement; it is a fixed graph node instead.
pub fn build_requirements(
    project: Option<&Project>,
    extra: &[PackageSpec],
    registries: &[Registry],
) -> Result<BTreeMap<Uuid, VersionSpec>> {
    let mut requirements = BTreeMap::new();
    if let Some(project) = project {
        for (name, uuid) in &project.deps {
            requirements.insert(*uuid, project.compat_for(name));
        }
    }
    for spec in extra {
        let uuid = match spec.uuid {
            Some(uuid) => uuid,
            None => {
                let name = spec.name.as_deref().ok_or_else(|| {
                    Error::Registry("a package spec needs a name or a uuid".to_string())
                })?;
                lookup_name(registries, name)?
            }
        };
        requirements.insert(uuid, spec.version.clone().unwrap_or_else(VersionSpec::any));
    }
    requirements.remove(&HOST_UUID);
    Ok(requirements)
}

/// The resolver's working graph: candidate versions per package and, per
/// version, the constraints projected onto other packages.
#[derive(Debug, Default)]
pub struct DepsGraph {
    pub all_versions: BTreeMap<Uuid, BTreeSet<Version>>,
    pub all_compat: BTreeMap<Uuid, BTreeMap<Version, BTreeMap<Uuid, VersionSpec>>>,
    pub names: BTreeMap<Uuid, String>,
}

impl DepsGraph {
    pub fn name_of(&self, uuid: &Uuid) -> String {
        self.names
            .get(uuid)
            .cloned()
            .unwrap_or_else(|| uuid.to_string())
    }
}

/// Build the graph by worklist closure from the requirements and fixed
/// packages. Yanked versions are skipped unless the prior manifest already
/// sits on them; the upgrade level caps candidates relative to the prior
/// manifest.
#[allow(clippy::too_many_arguments)]
pub fn deps_graph(
    registries: &[Registry],
    fixed: &BTreeMap<Uuid, FixedPkg>,
    requirements: &BTreeMap<Uuid, VersionSpec>,
    host_version: Version,
    stdlibs: &BTreeMap<Uuid, StdlibInfo>,
    prior: &BTreeMap<Uuid, Version>,
    upgrade_level: UpgradeLevel,
) -> Result<DepsGraph> {
    let mut graph = DepsGraph::default();
    let mut todo: VecDeque<Uuid> = VecDeque::new();
    let mut seen: BTreeSet<Uuid> = BTreeSet::new();

    todo.extend(requirements.keys().copied());
    todo.extend(fixed.keys().copied());
    for f in fixed.values() {
        todo.extend(f.requires.keys().copied());
    }
    todo.push_back(HOST_UUID);

    while let Some(uuid) = todo.pop_front() {
        if !seen.insert(uuid) {
            continue;
        }

        if uuid == HOST_UUID {
            graph.names.insert(uuid, HOST_NAME.to_string());
            graph.all_versions.insert(uuid, BTreeSet::from([host_version]));
            graph
                .all_compat
                .insert(uuid, BTreeMap::from([(host_version, BTreeMap::new())]));
            continue;
        }

        if let Some(f) = fixed.get(&uuid) {
            todo.extend(f.requires.keys().copied());
            graph.names.insert(uuid, f.name.clone());
            graph.all_versions.insert(uuid, BTreeSet::from([f.version]));
            graph
                .all_compat
                .insert(uuid, BTreeMap::from([(f.version, f.requires.clone())]));
            continue;
        }

        if let Some(lib) = stdlibs.get(&uuid) {
            let edges: BTreeMap<Uuid, VersionSpec> = lib
                .deps
                .values()
                .map(|dep| (*dep, VersionSpec::any()))
                .collect();
            todo.extend(edges.keys().copied());
            graph.names.insert(uuid, lib.name.clone());
            graph.all_versions.insert(uuid, BTreeSet::from([host_version]));
            graph
                .all_compat
                .insert(uuid, BTreeMap::from([(host_version, edges)]));
            continue;
        }

        let mut versions: BTreeSet<Version> = BTreeSet::new();
        let mut compat: BTreeMap<Version, BTreeMap<Uuid, VersionSpec>> = BTreeMap::new();
        for registry in registries {
            let Some(entry) = registry.get(&uuid) else {
                continue;
            };
            graph
                .names
                .entry(uuid)
                .or_insert_with(|| entry.name.clone());
            let info = registry.pkg_info(&uuid)?;
            for (version, edges) in info.uncompressed_compat()? {
                if info.is_yanked(version) && prior.get(&uuid) != Some(version) {
                    continue;
                }
                if !upgrade_level.admits(prior.get(&uuid), version) {
                    continue;
                }
                // Registries claiming the same uuid contribute a union of
                // versions; the first one to publish a version defines its
                // edges, and tree-hash agreement is checked after solving.
                if compat.contains_key(version) {
                    continue;
                }
                versions.insert(*version);
                todo.extend(edges.keys().copied());
                compat.insert(*version, edges.clone());
            }
        }
        graph.all_versions.insert(uuid, versions);
        graph.all_compat.insert(uuid, compat);
    }

    Ok(graph)
}

/// Look up the tree hash of `(uuid, version)` across all registries that
/// publish it; any disagreement is an error.
fn registry_tree_hash(
    registries: &[Registry],
    uuid: &Uuid,
    version: &Version,
    name: &str,
) -> Result<Option<TreeHash>> {
    let mut found: Option<TreeHash> = None;
    for registry in registries {
        if !registry.contains(uuid) {
            continue;
        }
        let info = registry.pkg_info(uuid)?;
        if let Some(hash) = info.tree_hash(version) {
            match found {
                Some(first) if first != *hash => {
                    return Err(Error::TreeHashConflict {
                        name: name.to_string(),
                        version: *version,
                        first,
                        second: *hash,
                    });
                }
                _ => found = Some(*hash),
            }
        }
    }
    Ok(found)
}

/// Resolve the environment against the registries and produce the updated
/// manifest. Pure with respect to its inputs: identical inputs yield an
/// identical manifest.
#[allow(clippy::too_many_arguments)]
pub fn resolve_environment(
    env: &Environment,
    registries: &[Registry],
    extra: &[PackageSpec],
    host_version: Version,
    stdlibs: &BTreeMap<Uuid, StdlibInfo>,
    upgrade_level: UpgradeLevel,
    verbose_conflicts: bool,
) -> Result<Manifest> {
    let fixed = collect_fixed(env)?;
    let requirements = build_requirements(env.project.as_ref(), extra, registries)?;
    let prior: BTreeMap<Uuid, Version> = env
        .manifest
        .iter()
        .flat_map(|m| m.deps.iter())
        .filter_map(|(uuid, entry)| entry.version.map(|v| (*uuid, v)))
        .collect();

    let mut graph = deps_graph(
        registries,
        &fixed,
        &requirements,
        host_version,
        stdlibs,
        &prior,
        upgrade_level,
    )?;
    if let Some(manifest) = &env.manifest {
        for (uuid, entry) in &manifest.deps {
            graph
                .names
                .entry(*uuid)
                .or_insert_with(|| entry.name.clone());
        }
    }
    tracing::info!(
        packages = graph.all_versions.len(),
        requirements = requirements.len(),
        fixed = fixed.len(),
        "built dependency graph"
    );

    let solution = pubgrub_resolver::solve(&graph, &requirements, verbose_conflicts)?;

    let project_uuid = env.project.as_ref().and_then(|p| p.uuid);
    let mut manifest = Manifest {
        host_version: Some(host_version),
        project_hash: env.project.as_ref().map(|p| p.content_hash()),
        ..Manifest::default()
    };

    for (uuid, version) in &solution {
        if *uuid == HOST_UUID || Some(*uuid) == project_uuid {
            continue;
        }
        let name = graph.name_of(uuid);
        let prior_entry = env.manifest.as_ref().and_then(|m| m.deps.get(uuid));

        let mut entry = PackageEntry {
            name: name.clone(),
            ..PackageEntry::default()
        };
        // Fresh edges come from the graph at the chosen version, never
        // from the previous manifest.
        if let Some(edges) = graph.all_compat.get(uuid).and_then(|m| m.get(version)) {
            for dep_uuid in edges.keys() {
                if *dep_uuid == HOST_UUID {
                    continue;
                }
                entry.deps.insert(graph.name_of(dep_uuid), *dep_uuid);
            }
        }

        if let Some(f) = fixed.get(uuid) {
            entry.version = f.recorded_version;
            if let Some(pe) = prior_entry {
                entry.path = pe.path.clone();
                entry.pinned = pe.pinned;
                entry.repo_url = pe.repo_url.clone();
                entry.repo_rev = pe.repo_rev.clone();
                entry.repo_subdir = pe.repo_subdir.clone();
                entry.tree_hash = pe.tree_hash;
            }
        } else if let Some(lib) = stdlibs.get(uuid) {
            entry.version = lib.version.or(Some(*version));
        } else {
            entry.version = Some(*version);
            entry.tree_hash = registry_tree_hash(registries, uuid, version, &name)?;
            entry.pinned = prior_entry.is_some_and(|pe| pe.pinned)
                || extra
                    .iter()
                    .any(|spec| spec.uuid == Some(*uuid) && spec.pinned);
        }

        manifest.deps.insert(*uuid, entry);
    }

    tracing::info!(resolved = manifest.deps.len(), "resolution complete");
    Ok(manifest)
}
