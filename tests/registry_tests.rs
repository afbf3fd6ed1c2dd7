//! Registry behavior across multiple registries and failure modes.

mod test_utils;

use std::collections::BTreeMap;

use carton::{resolve_environment, Error, UpgradeLevel, Version};
use test_utils::{uuid, MockPackage, TestEnv, TestRegistry};

fn host() -> Version {
    Version::new(1, 10, 0)
}

#[test]
fn names_are_looked_up_across_registries() {
    let mut general = TestRegistry::new("General", uuid(0x1000));
    general.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));
    let mut forks = TestRegistry::new("Forks", uuid(0x2000));
    forks.add_package(&MockPackage::new("Alpha", uuid(0xab)).with_version("1.0.0"));

    let general = general.open();
    let forks = forks.open();
    assert_eq!(general.uuids_for_name("Alpha"), vec![uuid(0xaa)]);
    assert_eq!(forks.uuids_for_name("Alpha"), vec![uuid(0xab)]);
    assert!(general.uuids_for_name("Missing").is_empty());
}

#[test]
fn corrupt_package_files_fail_the_operation_instead_of_being_skipped() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));
    std::fs::write(registry.path().join("A/Alpha/Versions.toml"), "garbage = [").unwrap();

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let err = resolve_environment(
        &env.open(),
        &[registry.open()],
        &[],
        host(),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
}

#[test]
fn lazy_loading_leaves_unqueried_packages_untouched() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));
    registry.add_package(&MockPackage::new("Broken", uuid(0xbb)).with_version("1.0.0"));
    // Corrupt a package the resolve never needs.
    std::fs::write(registry.path().join("B/Broken/Versions.toml"), "garbage = [").unwrap();

    let env = TestEnv::new();
    env.write_project(&format!("[deps]\nAlpha = \"{}\"\n", uuid(0xaa)));

    let manifest = resolve_environment(
        &env.open(),
        &[registry.open()],
        &[],
        host(),
        &BTreeMap::new(),
        UpgradeLevel::Major,
        false,
    )
    .unwrap();
    assert_eq!(
        manifest.deps[&uuid(0xaa)].version,
        Some(Version::new(1, 0, 0))
    );
}

#[test]
fn tree_info_is_read_when_present() {
    let mut registry = TestRegistry::new("General", uuid(0x1000));
    registry.add_package(&MockPackage::new("Alpha", uuid(0xaa)).with_version("1.0.0"));
    let tree = hex::encode([3u8; 20]);
    std::fs::write(
        registry.path().join(".tree_info.toml"),
        format!("git-tree-sha1 = \"{tree}\"\n"),
    )
    .unwrap();

    let opened = registry.open();
    assert_eq!(opened.tree_info.unwrap().to_string(), tree);
}

#[test]
fn registry_requires_its_index_fields() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("Registry.toml"),
        "name = \"General\"\nrepo = \"https://example.com\"\n",
    )
    .unwrap();
    let err = carton::Registry::open_with_cache(dir.path(), false).unwrap_err();
    assert!(matches!(err, Error::MissingField { .. }));
}
