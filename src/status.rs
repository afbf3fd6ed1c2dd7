//! Status: per-package diff records between two manifests, plus the
//! registry-aware annotations (upgradable, held back, yanked) the
//! presentation layer renders.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::error::Result;
use crate::hash::HOST_UUID;
use crate::manifest::{Manifest, PackageEntry};
use crate::project::Project;
use crate::registry::Registry;
use crate::version::{Version, VersionSpec};

/// How a package moved between the baseline and the current manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Upgraded,
    Downgraded,
    /// Any other difference: source switch, pin change, subdir change.
    Changed,
}

/// One row of status output.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub uuid: Uuid,
    pub name: String,
    pub old: Option<PackageEntry>,
    pub new: Option<PackageEntry>,
    /// `None` when the entry is identical on both sides.
    pub change: Option<ChangeKind>,
    /// A newer version exists but every candidate is blocked by a compat
    /// constraint somewhere in the current resolution.
    pub heldback: bool,
    /// A newer version exists and every projecting constraint admits it.
    pub upgradable: bool,
    /// The manifested version is yanked in every registry publishing it.
    pub yanked: bool,
}

fn registry_tracked(entry: &PackageEntry) -> bool {
    entry.path.is_none() && entry.repo_url.is_none() && entry.repo_rev.is_none()
}

fn classify(old: Option<&PackageEntry>, new: Option<&PackageEntry>) -> Option<ChangeKind> {
    match (old, new) {
        (None, None) => None,
        (None, Some(_)) => Some(ChangeKind::Added),
        (Some(_), None) => Some(ChangeKind::Removed),
        (Some(o), Some(n)) => {
            if o == n {
                return None;
            }
            if let (Some(ov), Some(nv)) = (o.version, n.version) {
                if registry_tracked(o) && registry_tracked(n) && ov != nv {
                    return Some(if nv > ov {
                        ChangeKind::Upgraded
                    } else {
                        ChangeKind::Downgraded
                    });
                }
            }
            Some(ChangeKind::Changed)
        }
    }
}

/// Diff a baseline manifest against the current one, one row per package
/// seen on either side, sorted by name then uuid.
pub fn diff(old: Option<&Manifest>, new: &Manifest) -> Vec<StatusEntry> {
    let mut uuids: BTreeSet<Uuid> = new.deps.keys().copied().collect();
    if let Some(old) = old {
        uuids.extend(old.deps.keys().copied());
    }

    let mut rows = Vec::new();
    for uuid in uuids {
        let old_entry = old.and_then(|m| m.deps.get(&uuid)).cloned();
        let new_entry = new.deps.get(&uuid).cloned();
        let name = new_entry
            .as_ref()
            .or(old_entry.as_ref())
            .map(|e| e.name.clone())
            .unwrap_or_default();
        let change = classify(old_entry.as_ref(), new_entry.as_ref());
        rows.push(StatusEntry {
            uuid,
            name,
            old: old_entry,
            new: new_entry,
            change,
            heldback: false,
            upgradable: false,
            yanked: false,
        });
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.uuid.cmp(&b.uuid)));
    rows
}

/// The compat another manifested package projects onto `target` at its own
/// resolved version, when the registries know it.
fn dependent_spec(
    registries: &[Registry],
    dependent: &Uuid,
    dependent_version: &Version,
    target: &Uuid,
) -> Result<Option<VersionSpec>> {
    for registry in registries {
        if !registry.contains(dependent) {
            continue;
        }
        let info = registry.pkg_info(dependent)?;
        if let Some(edges) = info.uncompressed_compat()?.get(dependent_version) {
            if let Some(spec) = edges.get(target) {
                return Ok(Some(spec.clone()));
            }
        }
    }
    Ok(None)
}

/// Fill in the `heldback` / `upgradable` / `yanked` flags of rows whose
/// current entry is registry-tracked.
///
/// A newer candidate is admissible when the project's compat entry, the
/// compat every dependent projects at its manifested version, and the
/// candidate's own host-runtime compat all accept it.
pub fn annotate(
    rows: &mut [StatusEntry],
    project: Option<&Project>,
    manifest: &Manifest,
    registries: &[Registry],
    host_version: Version,
) -> Result<()> {
    for row in rows.iter_mut() {
        let Some(entry) = &row.new else {
            continue;
        };
        if !registry_tracked(entry) {
            continue;
        }
        let Some(current) = entry.version else {
            continue;
        };

        // Union the published picture across registries: per version, is
        // it live anywhere, and what does it require.
        let mut live: BTreeMap<Version, bool> = BTreeMap::new();
        let mut candidate_compat: BTreeMap<Version, BTreeMap<Uuid, VersionSpec>> = BTreeMap::new();
        for registry in registries {
            if !registry.contains(&row.uuid) {
                continue;
            }
            let info = registry.pkg_info(&row.uuid)?;
            for (version, version_info) in &info.version_info {
                *live.entry(*version).or_insert(false) |= !version_info.yanked;
            }
            for (version, edges) in info.uncompressed_compat()? {
                candidate_compat.entry(*version).or_insert_with(|| edges.clone());
            }
        }
        if live.is_empty() {
            continue;
        }
        row.yanked = live.get(&current) == Some(&false);

        let newer: Vec<Version> = live
            .iter()
            .filter(|(version, is_live)| **version > current && **is_live)
            .map(|(version, _)| *version)
            .collect();
        if newer.is_empty() {
            continue;
        }

        let project_spec = project.and_then(|p| {
            p.deps
                .iter()
                .find(|(_, dep_uuid)| **dep_uuid == row.uuid)
                .map(|(name, _)| p.compat_for(name))
        });

        let mut admissible = false;
        'candidates: for candidate in newer.iter().rev() {
            if let Some(spec) = &project_spec {
                if !spec.contains(candidate) {
                    continue;
                }
            }
            for (dep_uuid, dep_entry) in &manifest.deps {
                if dep_uuid == &row.uuid || !dep_entry.deps.values().any(|u| u == &row.uuid) {
                    continue;
                }
                let Some(dep_version) = dep_entry.version else {
                    continue;
                };
                if let Some(spec) =
                    dependent_spec(registries, dep_uuid, &dep_version, &row.uuid)?
                {
                    if !spec.contains(candidate) {
                        continue 'candidates;
                    }
                }
            }
            if let Some(host_spec) = candidate_compat
                .get(candidate)
                .and_then(|edges| edges.get(&HOST_UUID))
            {
                if !host_spec.contains(&host_version) {
                    continue;
                }
            }
            admissible = true;
            break;
        }
        row.upgradable = admissible;
        row.heldback = !admissible;
    }
    Ok(())
}
