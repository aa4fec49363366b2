use super::*;

fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn resolver() -> ConfigResolver {
    ConfigResolver::new("/work/blinky")
}

#[test]
fn test_ice40_defaults() {
    let cfg = resolver().resolve("ice40", &BTreeMap::new()).unwrap();

    assert_eq!(cfg.family.name, "ice40");
    assert_eq!(cfg.device, "up5k");
    assert_eq!(cfg.package, "sg48");
    assert_eq!(cfg.top, "top");
    assert_eq!(cfg.project, "blinky");
    assert_eq!(cfg.programmer, "iceprog");
    assert_eq!(cfg.constraints, PathBuf::from("constraints/pins.pcf"));
    assert!(ConfigKey::ALL.iter().all(|k| cfg.origin(*k) == Layer::Default));
}

#[test]
fn test_device_override_keeps_package() {
    let cfg = resolver().resolve("ice40", &overrides(&[("device", "hx8k")])).unwrap();

    assert_eq!(cfg.device, "hx8k");
    assert_eq!(cfg.package, "sg48");
    assert_eq!(cfg.origin(ConfigKey::Device), Layer::Override);
    assert_eq!(cfg.origin(ConfigKey::Package), Layer::Default);
}

#[test]
fn test_single_override_changes_only_its_field() {
    let base = resolver().resolve("ice40", &BTreeMap::new()).unwrap();

    for key in ConfigKey::ALL {
        let value = match key {
            ConfigKey::Device => "hx1k",
            ConfigKey::Package => "uwg30",
            ConfigKey::Programmer => "openFPGALoader",
            _ => "custom_value",
        };
        let cfg = resolver().resolve("ice40", &overrides(&[(key.name(), value)])).unwrap();
        for other in ConfigKey::ALL {
            if other == key {
                assert_eq!(cfg.get(*other), value, "key {}", key);
            } else {
                assert_eq!(cfg.get(*other), base.get(*other), "{} changed by {}", other, key);
            }
        }
    }
}

#[test]
fn test_unknown_override_key_is_rejected() {
    let err = resolver()
        .resolve("ice40", &overrides(&[("devcie", "hx8k")]))
        .unwrap_err();
    assert_eq!(err, ConfigError::UnknownKey { key: "devcie".into() });
}

#[test]
fn test_unknown_family_fails_fast() {
    let err = resolver().resolve("virtex7", &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFamily { ref family, .. } if family == "virtex7"));
}

#[test]
fn test_device_outside_family_is_rejected() {
    let err = resolver().resolve("ecp5", &overrides(&[("device", "up5k")])).unwrap_err();
    assert_eq!(err, ConfigError::UnknownDevice { family: "ecp5".into(), device: "up5k".into() });

    let err = resolver().resolve("ice40", &overrides(&[("package", "CABGA381")])).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownPackage { .. }));
}

#[test]
fn test_explicit_incompatible_pair_is_rejected() {
    let err = resolver()
        .resolve("ice40", &overrides(&[("device", "hx8k"), ("package", "sg48")]))
        .unwrap_err();
    assert_eq!(err, ConfigError::IncompatiblePackage {
        device: "hx8k".into(),
        package: "sg48".into(),
    });
}

#[test]
fn test_names_are_canonicalized() {
    let cfg = resolver()
        .resolve("ECP5", &overrides(&[("device", "45K"), ("package", "cabga554")]))
        .unwrap();
    assert_eq!(cfg.family.name, "ecp5");
    assert_eq!(cfg.device, "45k");
    assert_eq!(cfg.package, "CABGA554");
}

#[test]
fn test_precedence_default_persisted_override() {
    let mut persisted = ProjectConfig::default();
    persisted.set("family", "ice40");
    persisted.set("device", "hx8k");
    persisted.set("package", "ct256");
    persisted.set("top", "blinky");

    let resolver = resolver().with_persisted(persisted);
    let cfg = resolver.resolve("ice40", &overrides(&[("top", "counter")])).unwrap();

    assert_eq!(cfg.device, "hx8k");
    assert_eq!(cfg.origin(ConfigKey::Device), Layer::Persisted);
    assert_eq!(cfg.package, "ct256");
    assert_eq!(cfg.top, "counter");
    assert_eq!(cfg.origin(ConfigKey::Top), Layer::Override);
    assert_eq!(cfg.testbench, "top_tb");
    assert_eq!(cfg.origin(ConfigKey::Testbench), Layer::Default);
}

#[test]
fn test_persisted_unknown_key_is_rejected() {
    let mut persisted = ProjectConfig::default();
    persisted.set("pakage", "sg48");

    let err = resolver().with_persisted(persisted).resolve("ice40", &BTreeMap::new()).unwrap_err();
    assert_eq!(err, ConfigError::UnknownKey { key: "pakage".into() });
}

#[test]
fn test_persisted_device_of_other_family_is_ignored() {
    let mut persisted = ProjectConfig::default();
    persisted.set("family", "ice40");
    persisted.set("device", "hx8k");
    persisted.set("rtl_dir", "src");

    let cfg = resolver().with_persisted(persisted).resolve("ecp5", &BTreeMap::new()).unwrap();
    assert_eq!(cfg.device, "85k");
    assert_eq!(cfg.rtl_dir, PathBuf::from("src"));
}

#[test]
fn test_family_override_must_match() {
    assert!(resolver().resolve("ice40", &overrides(&[("family", "ICE40")])).is_ok());
    let err = resolver().resolve("ice40", &overrides(&[("family", "ecp5")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_programmer_must_be_supported() {
    let cfg = resolver()
        .resolve("ice40", &overrides(&[("programmer", "openFPGALoader")]))
        .unwrap();
    assert_eq!(cfg.tool_name(ToolRole::Programmer), Some("openFPGALoader"));

    let err = resolver().resolve("ecp5", &overrides(&[("programmer", "iceprog")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "programmer"));
}

#[test]
fn test_invalid_names_are_rejected() {
    let err = resolver().resolve("ice40", &overrides(&[("top", "9lives")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "top"));

    let err = resolver().resolve("ice40", &overrides(&[("testbench", "  ")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_dashed_keys_are_accepted() {
    let cfg = resolver().resolve("ice40", &overrides(&[("rtl-dir", "hdl")])).unwrap();
    assert_eq!(cfg.rtl_dir, PathBuf::from("hdl"));
}

#[test]
fn test_project_file_roundtrip_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    assert_eq!(ProjectConfig::load(dir.path()).unwrap(), None);

    let mut persisted = ProjectConfig::default();
    persisted.set("family", "ecp5");
    persisted.set("board", "orangecrab");
    persisted.save(dir.path()).unwrap();

    let resolver = ConfigResolver::load(dir.path()).unwrap();
    assert_eq!(resolver.default_family(), "ecp5");
    let cfg = resolver.resolve(resolver.default_family(), &BTreeMap::new()).unwrap();
    assert_eq!(cfg.board, "orangecrab");
    assert_eq!(cfg.origin(ConfigKey::Board), Layer::Persisted);
}

#[test]
fn test_malformed_project_file() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(ProjectConfig::path(dir.path()), "device: [up5k, hx8k]\n").unwrap();

    let err = ConfigResolver::load(dir.path()).err().unwrap();
    assert!(matches!(err, ConfigError::Persisted { .. }));
}

#[test]
fn test_debug_output_names_family() {
    let cfg = ConfigResolver::new("/work/blinky").resolve("ecp5", &BTreeMap::new()).unwrap();
    let text = format!("{:?}", cfg);
    assert!(text.contains("name: \"ecp5\""));
    assert!(text.contains("DeviceInfo"));
}
