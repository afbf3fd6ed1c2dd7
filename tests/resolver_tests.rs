//! End-to-end resolver scenarios against on-disk registry fixtures.

mod test_utils;

use std::collections::BTreeMap;

use carton::{
    resolve_environment, Environment, Error, Manifest, PackageSpec, Registry, StdlibInfo,
    UpgradeLevel, Version,
};
use test_utils::{fake_tree, uuid, MockPackage, TestEnv, TestRegistry};

fn host() -> Version {
    Version::new(1, 10, 0)
}

fn resolve(env: &Environment, registries: &[Registry]) -> carton::Result<Manifest> {
    resolve_environment(
        env,
        registries,
        &[],
        host(),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
}

fn resolve_at(
    env: &Environment,
    registries: &[Registry],
    level: UpgradeLevel,
) -> carton::Result<Manifest> {
    resolve_environment(
        env,
        registries,
        &[],
        host(),
        &BTreeMap::new(),
        level,
        false,
    )
}

#[test]
fn empty_project_resolves_to_empty_manifest() {
    let env = TestEnv::new();
    env.write_project("");
    let manifest = resolve(&env.open(), &[]).unwrap();
    assert!(manifest.deps.is_empty());
    assert_eq!(manifest.host_version, Some(host()));
}

#[test]
fn single_dep_selects_the_highest_matching_version() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_version("1.1.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!(
        "[deps]\nAlpha = \"{}\"\n\n[compat]\nAlpha = \"^1.0\"\n",
        uuid(0xaa)
    ));

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    let alpha = &manifest.deps[&uuid(0xaa)];
    assert_eq!(alpha.version, Some(Version::new(1, 1, 0)));
    assert_eq!(
        alpha.tree_hash.unwrap().to_string(),
        fake_tree("Alpha", "1.1.0")
    );
}

#[test]
fn transitive_dep_is_pulled_in_with_its_edge() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_dep("1", "Beta", uuid(0xbb))
            .with_compat("1", "Beta", "^2"),
    );
    registry.add_package(&MockPackage::new("Beta", uuid(0xbb)).with_version("2.0.0"));

    let env = TestEnv::new();
    env.write_project(&format!(
        "[deps]\nAlpha = \"{}\"\n\n[compat]\nAlpha = \"^1\"\n",
        uuid(0xaa)
    ));

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 0, 0))
    );
    assert_eq!(
        manifest.deps[&uuid(0xbb)].version,
        Some(Version::new(2, 0, 0))
    );
    assert_eq!(manifest.deps[&uuid(0xaa)].deps["Beta"], uuid(0xbb));
}

#[test]
fn incompatible_requirements_fail_with_the_packages_named() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_dep("1", "Gamma", uuid(0xcc))
            .with_compat("1", "Gamma", "^1"),
    );
    registry.add_package(
        &MockPackage::new("Beta", uuid(0xbb))
            .with_version("1.0.0")
            .with_dep("1", "Gamma", uuid(0xcc))
            .with_compat("1", "Gamma", "^2"),
    );
    registry.add_package(
        &MockPackage::new("Gamma", uuid(0xcc))
            .with_version("1.0.0")
            .with_version("2.0.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!(
        "[deps]\nAlpha = \"{}\"\nBeta = \"{}\"\n\n[compat]\nAlpha = \"^1\"\nBeta = \"^1\"\n",
        uuid(0xaa),
        uuid(0xbb)
    ));

    let err = resolve(&env.open(), &[registry.open()]).unwrap_err();
    let Error::ResolverInfeasible { report } = &err else {
        panic!("expected infeasibility, got {err:?}");
    };
    for name in ["Alpha", "Beta", "Gamma"] {
        assert!(report.contains(name), "missing `{name}` in report:\n{report}");
    }
}

#[test]
fn yanked_versions_are_not_selected() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_yanked_version("1.1.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 0, 0))
    );
}

#[test]
fn yanked_old_version_does_not_block_the_live_one() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_yanked_version("1.0.0")
            .with_version("1.1.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 1, 0))
    );
}

#[test]
fn yanked_only_requirement_is_refused_unless_already_manifested() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_yanked_version("1.0.0"));

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));
    assert!(resolve(&env.open(), &[registry.open()]).is_err());

    // A manifest already sitting on the yanked version may keep it.
    env.write_manifest(&format!(
        "host_version = \"nothing\"\nproject_hash = \"nothing\"\n\n\
         [[deps.Alpha]]\nuuid = \"{}\"\nversion = \"1.0.0\"\n",
        uuid(0xaa)
    ));
    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 0, 0))
    );
}

#[test]
fn path_tracked_package_is_fixed_but_its_deps_resolve() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("2.0.0"));
    registry.add_package(
        &MockPackage::new("Beta", uuid(0xbb))
            .with_version("1.5.0")
            .with_version("2.0.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));
    env.write_manifest(&format!(
        "host_version = \"nothing\"\nproject_hash = \"nothing\"\n\n\
         [[deps.Alpha]]\nuuid = \"{}\"\nversion = \"1.0.0\"\npath = \"Alpha\"\n",
        uuid(0xaa)
    ));
    std::fs::create_dir_all(env.path().join("Alpha")).unwrap();
    std::fs::write(
        env.path().join("Alpha/Project.toml"),
        format!(
            "name = \"Alpha\"\nuuid = \"{}\"\nversion = \"1.0.0\"\n\n\
             [deps]\nBeta = \"{}\"\n\n[compat]\nBeta = \"^1\"\n",
            uuid(0xaa),
            uuid(0xbb)
        ),
    )
    .unwrap();

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    let alpha = &manifest.deps[&uuid(0xaa)];
    // Kept at its developed version even though the registry offers 2.0.0.
    assert_eq!(alpha.version, Some(Version::new(1, 0, 0)));
    assert_eq!(alpha.path.as_deref(), Some(std::path::Path::new("Alpha")));
    assert_eq!(alpha.deps["Beta"], uuid(0xbb));
    // Beta obeys the developed package's compat, not the registry maximum.
    assert_eq!(
        manifest.deps[&uuid(0xbb)].version,
        Some(Version::new(1, 5, 0))
    );
}

#[test]
fn pinned_entry_keeps_its_version_and_flag() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_version("2.0.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));
    env.write_manifest(&format!(
        "host_version = \"nothing\"\nproject_hash = \"nothing\"\n\n\
         [[deps.Alpha]]\nuuid = \"{}\"\nversion = \"1.0.0\"\npinned = true\n",
        uuid(0xaa)
    ));

    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    let alpha = &manifest.deps[&uuid(0xaa)];
    assert_eq!(alpha.version, Some(Version::new(1, 0, 0)));
    assert!(alpha.pinned);
}

#[test]
fn upgrade_levels_bound_movement() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_version("1.0.5")
            .with_version("1.1.0")
            .with_version("2.0.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));
    env.write_manifest(&format!(
        "host_version = \"nothing\"\nproject_hash = \"nothing\"\n\n\
         [[deps.Alpha]]\nuuid = \"{}\"\nversion = \"1.0.0\"\n",
        uuid(0xaa)
    ));
    let env = env.open();

    let fixed = resolve_at(&env, &[registry.open()], UpgradeLevel::Fixed).unwrap();
    assert_eq!(fixed.deps[&uuid(0xaa)].version, Some(Version::new(1, 0, 0)));

    let patch = resolve_at(&env, &[registry.open()], UpgradeLevel::Patch).unwrap();
    assert_eq!(patch.deps[&uuid(0xaa)].version, Some(Version::new(1, 0, 5)));

    let minor = resolve_at(&env, &[registry.open()], UpgradeLevel::Minor).unwrap();
    assert_eq!(minor.deps[&uuid(0xaa)].version, Some(Version::new(1, 1, 0)));

    let major = resolve_at(&env, &[registry.open()], UpgradeLevel::Major).unwrap();
    assert_eq!(major.deps[&uuid(0xaa)].version, Some(Version::new(2, 0, 0)));
}

#[test]
fn resolution_is_deterministic_and_writes_identically() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_dep("1", "Beta", uuid(0xbb)),
    );
    registry.add_package(
        &MockPackage::new("Beta", uuid(0xbb))
            .with_version("2.0.0")
            .with_version("2.1.0"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let first = resolve(&env.open(), &[registry.open()]).unwrap();
    let second = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(first, second);

    let out_a = TestEnv::new();
    let out_b = TestEnv::new();
    first
        .write(&out_a.path().join("Manifest.toml"))
        .unwrap();
    second
        .write(&out_b.path().join("Manifest.toml"))
        .unwrap();
    assert_eq!(out_a.manifest_text(), out_b.manifest_text());
}

#[test]
fn registries_union_versions_for_a_shared_uuid() {
    let mut first = TestRegistry::new("General", uuid(0x1000));
    first.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));
    let mut second = TestRegistry::new("Extras", uuid(0x2000));
    second.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.1.0"));

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let manifest = resolve(&env.open(), &[first.open(), second.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 1, 0))
    );
}

#[test]
fn tree_hash_disagreement_between_registries_fails() {
    let mut first = TestRegistry::new("General", uuid(0x1000));
    first.add_package(
        &MockPackage::new("Alpha", uuid(0xaa)).with_version_tree("1.0.0", &hex::encode([1u8; 20])),
    );
    let mut second = TestRegistry::new("Extras", uuid(0x2000));
    second.add_package(
        &MockPackage::new("Alpha", uuid(0xaa)).with_version_tree("1.0.0", &hex::encode([2u8; 20])),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let err = resolve(&env.open(), &[first.open(), second.open()]).unwrap_err();
    assert!(matches!(err, Error::TreeHashConflict { .. }));
}

#[test]
fn extra_specs_by_name_resolve_or_reject_ambiguity() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));

    let env = TestEnv::new();
    env.write_project("");

    let extra = [PackageSpec {
        name: Some("Alpha".to_string()),
        ..PackageSpec::default()
    }];
    let manifest = resolve_environment(
        &env.open(),
        &[registry.open()],
        &extra,
        host(),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
    .unwrap();
    assert!(manifest.deps.contains_key(&uuid(0xaa)));

    // Two registries claiming the name with different uuids is ambiguous.
    let mut fork = TestRegistry::new("Forks", uuid(0x2000));
    fork.add_package(&MockPackage::new("Alpha", uuid(0xab)).with_version("9.0.0"));
    let err = resolve_environment(
        &env.open(),
        &[registry.open(), fork.open()],
        &extra,
        host(),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, Error::AmbiguousName(name) if name == "Alpha"));
}

#[test]
fn stdlib_deps_resolve_as_host_shipped_nodes() {
    let logging = uuid(0x5117);
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_dep("1", "Logging", logging),
    );

    let stdlibs = BTreeMap::from([(
        logging,
        StdlibInfo {
            name: "Logging".to_string(),
            version: Some(Version::new(1, 10, 0)),
            deps: BTreeMap::new(),
        },
    )]);

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let manifest = resolve_environment(
        &env.open(),
        &[registry.open()],
        &[],
        host(),
        &stdlibs,
        UpgradeLevel::Major,
        false,
    )
    .unwrap();
    assert_eq!(manifest.deps[&logging].name, "Logging");
    assert_eq!(
        manifest.deps[&logging].version,
        Some(Version::new(1, 10, 0))
    );
    assert_eq!(manifest.deps[&uuid(0xaa)].deps["Logging"], logging);
}

#[test]
fn host_compat_gates_candidate_versions() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_version("2.0.0")
            .with_compat("2", "julia", "1.11"),
    );

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    // Host 1.10 cannot take Alpha 2 (needs julia ^1.11), so 1.0.0 wins.
    let manifest = resolve(&env.open(), &[registry.open()]).unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 0, 0))
    );

    // On a newer host the same registries give Alpha 2.
    let manifest = resolve_environment(
        &env.open(),
        &[registry.open()],
        &[],
        Version::new(1, 11, 2),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
    .unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(2, 0, 0))
    );
}

#[test]
fn written_manifest_reopens_to_a_valid_environment() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(
        &MockPackage::new("Alpha", uuid(0xaa))
            .with_version("1.0.0")
            .with_dep("1", "Beta", uuid(0xbb)),
    );
    registry.add_package(&MockPackage::new("Beta", uuid(0xbb)).with_version("2.0.0"));

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let mut opened = env.open();
    let manifest = resolve(&opened, &[registry.open()]).unwrap();
    opened.manifest = Some(manifest);
    opened.write().unwrap();

    let reopened = env.open();
    let manifest = reopened.manifest.unwrap();
    assert_eq!(manifest.deps.len(), 2);
    assert_eq!(manifest.host_version, Some(host()));
    assert!(manifest.project_hash.is_some());
}
