//! PubGrub solver backend.
//!
//! The resolver front-end builds a complete `(all_versions, all_compat)`
//! graph up front; this backend wraps it in a [`DependencyProvider`] with a
//! virtual root and lets PubGrub search it. Any backend satisfying the same
//! post-condition could replace this one — nothing here does I/O.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{self, Display};

use pubgrub::{
    DefaultStringReporter, Dependencies, DependencyConstraints, DependencyProvider,
    PackageResolutionStatistics, PubGrubError, Ranges, Reporter,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::resolver::DepsGraph;
use crate::version::{Version, VersionSpec};

/// Solver-side version sets over concrete versions.
pub type SolverRange = Ranges<Version>;

const ROOT_DISPLAY: &str = "the project";

/// A package as the solver sees it: the virtual root, or a graph node
/// carrying its user-facing name for conflict reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SolverPkg {
    Root,
    Pkg { uuid: Uuid, name: String },
}

impl Display for SolverPkg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverPkg::Root => f.write_str(ROOT_DISPLAY),
            SolverPkg::Pkg { name, .. } => f.write_str(name),
        }
    }
}

/// Convert a [`VersionSpec`] into the solver's half-open range form.
///
/// A bound of arity `n` covers everything sharing its first `n`
/// components, so the exclusive upper end is the successor at that arity.
fn spec_to_ranges(spec: &VersionSpec) -> SolverRange {
    let mut out = Ranges::empty();
    for range in spec.ranges() {
        let lower = range.lower().padded_version();
        let piece = match range.upper().exclusive_upper() {
            Some(upper) => Ranges::from_range_bounds(lower..upper),
            None => Ranges::from_range_bounds(lower..),
        };
        out = out.union(&piece);
    }
    out
}

/// Dependency provider over a prebuilt graph. No I/O, no cache: every
/// question is answered from the maps the front-end assembled.
struct GraphProvider<'a> {
    graph: &'a DepsGraph,
    root_deps: DependencyConstraints<SolverPkg, SolverRange>,
}

impl<'a> GraphProvider<'a> {
    fn pkg(&self, uuid: Uuid) -> SolverPkg {
        SolverPkg::Pkg {
            uuid,
            name: self.graph.name_of(&uuid),
        }
    }
}

impl<'a> DependencyProvider for GraphProvider<'a> {
    type P = SolverPkg;
    type V = Version;
    type VS = SolverRange;
    type M = String;
    type Err = Infallible;
    type Priority = (u32, Reverse<usize>);

    fn choose_version(
        &self,
        package: &SolverPkg,
        range: &SolverRange,
    ) -> std::result::Result<Option<Version>, Infallible> {
        let SolverPkg::Pkg { uuid, .. } = package else {
            let root = Version::new(0, 0, 0);
            return Ok(range.contains(&root).then_some(root));
        };
        let Some(versions) = self.graph.all_versions.get(uuid) else {
            return Ok(None);
        };
        // Highest admissible version wins.
        Ok(versions.iter().rev().find(|v| range.contains(v)).copied())
    }

    fn prioritize(
        &self,
        package: &SolverPkg,
        range: &SolverRange,
        package_statistics: &PackageResolutionStatistics,
    ) -> Self::Priority {
        let SolverPkg::Pkg { uuid, .. } = package else {
            return (u32::MAX, Reverse(1));
        };
        let candidates = self
            .graph
            .all_versions
            .get(uuid)
            .map(|versions| versions.iter().filter(|v| range.contains(v)).count())
            .unwrap_or(0);
        if candidates == 0 {
            return (u32::MAX, Reverse(0));
        }
        // Work on conflict-heavy, option-poor packages first.
        (package_statistics.conflict_count(), Reverse(candidates))
    }

    fn get_dependencies(
        &self,
        package: &SolverPkg,
        version: &Version,
    ) -> std::result::Result<Dependencies<SolverPkg, SolverRange, String>, Infallible> {
        let SolverPkg::Pkg { uuid, name } = package else {
            return Ok(Dependencies::Available(self.root_deps.clone()));
        };
        let Some(compat) = self
            .graph
            .all_compat
            .get(uuid)
            .and_then(|per_version| per_version.get(version))
        else {
            return Ok(Dependencies::Unavailable(format!(
                "{name} has no published version {version}"
            )));
        };
        let mut constraints: DependencyConstraints<SolverPkg, SolverRange> =
            DependencyConstraints::default();
        for (dep_uuid, spec) in compat {
            constraints.insert(self.pkg(*dep_uuid), spec_to_ranges(spec));
        }
        Ok(Dependencies::Available(constraints))
    }
}

/// Run the solver: one version per required or reachable uuid, or a
/// human-readable infeasibility report.
pub(crate) fn solve(
    graph: &DepsGraph,
    requirements: &BTreeMap<Uuid, VersionSpec>,
    verbose_conflicts: bool,
) -> Result<BTreeMap<Uuid, Version>> {
    let mut root_deps: DependencyConstraints<SolverPkg, SolverRange> =
        DependencyConstraints::default();
    for (uuid, spec) in requirements {
        root_deps.insert(
            SolverPkg::Pkg {
                uuid: *uuid,
                name: graph.name_of(uuid),
            },
            spec_to_ranges(spec),
        );
    }

    let provider = GraphProvider { graph, root_deps };
    let solution = pubgrub::resolve(&provider, SolverPkg::Root, Version::new(0, 0, 0))
        .map_err(|e| convert_error(e, verbose_conflicts))?;

    let mut resolved = BTreeMap::new();
    for (pkg, version) in solution {
        if let SolverPkg::Pkg { uuid, .. } = pkg {
            resolved.insert(uuid, version);
        }
    }
    Ok(resolved)
}

fn convert_error(error: PubGrubError<GraphProvider<'_>>, verbose: bool) -> Error {
    match error {
        PubGrubError::NoSolution(mut derivation_tree) => {
            if !verbose {
                derivation_tree.collapse_no_versions();
            }
            let report = DefaultStringReporter::report(&derivation_tree)
                .replace(&format!("{ROOT_DISPLAY} 0.0.0"), ROOT_DISPLAY);
            Error::ResolverInfeasible { report }
        }
        PubGrubError::ErrorChoosingVersion { package, source } => Error::ResolverInfeasible {
            report: format!("could not choose a version for {package}: {source}"),
        },
        PubGrubError::ErrorRetrievingDependencies {
            package,
            version,
            source,
        } => Error::ResolverInfeasible {
            report: format!("could not retrieve dependencies of {package} v{version}: {source}"),
        },
        PubGrubError::ErrorInShouldCancel(source) => Error::ResolverInfeasible {
            report: format!("resolution cancelled: {source}"),
        },
    }
}
