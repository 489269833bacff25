use super::*;

#[test]
fn app_name_accepts_typical_names() {
    for name in ["cam", "audioService", "my-app_2", "a.b"] {
        let parsed = AppName::parse(name).expect("name should parse");
        assert_eq!(parsed.as_str(), name);
    }
}

#[test]
fn app_name_rejects_marker_like_and_malformed_names() {
    for name in ["", ".new.cam", "has/slash", "sp ace", "ünicode"] {
        let err = AppName::parse(name).expect_err("name must be rejected");
        assert_eq!(err.code(), ResultCode::BadParameter, "name: {name:?}");
    }
    let long = "a".repeat(MAX_APP_NAME_BYTES + 1);
    assert!(AppName::parse(&long).is_err());
    let exact = "a".repeat(MAX_APP_NAME_BYTES);
    assert!(AppName::parse(&exact).is_ok());
}

#[test]
fn content_hash_rejects_staging_name_and_punctuation() {
    assert!(ContentHash::parse("0123abcdef").is_ok());
    assert!(ContentHash::parse("unpack").is_err());
    assert!(ContentHash::parse("../etc").is_err());
    assert!(ContentHash::parse(&"f".repeat(MAX_HASH_BYTES + 1)).is_err());
}

#[test]
fn system_name_parses_well_known_and_numbered_dirs() {
    assert_eq!(SystemName::parse("current"), Some(SystemName::Current));
    assert_eq!(SystemName::parse("unpack"), Some(SystemName::Unpack));
    assert_eq!(SystemName::parse("12"), Some(SystemName::Numbered(12)));
    assert_eq!(SystemName::parse("-1"), None);
    assert_eq!(SystemName::parse("+3"), None);
    assert_eq!(SystemName::parse("old"), None);
    assert_eq!(SystemName::Numbered(7).to_string(), "7");
}

#[test]
fn path_builder_appends_validated_components() {
    let path = PathBuilder::new("/legato")
        .push("systems")
        .and_then(|builder| builder.push("current"))
        .expect("components must be accepted")
        .build();
    assert_eq!(path, std::path::PathBuf::from("/legato/systems/current"));
}

#[test]
fn path_builder_rejects_escapes_instead_of_truncating() {
    for component in ["", ".", "..", "a/b", "nul\0"] {
        let err = PathBuilder::new("/base")
            .push(component)
            .expect_err("component must be rejected");
        assert_eq!(err.code(), ResultCode::BadParameter);
    }

    let err = PathBuilder::new("/base")
        .push_relative(std::path::Path::new("../outside"))
        .expect_err("parent traversal must be rejected");
    assert_eq!(err.code(), ResultCode::BadParameter);

    let mut builder = PathBuilder::new("/base");
    let component = "x".repeat(MAX_COMPONENT_BYTES);
    let mut overflowed = false;
    for _ in 0..20 {
        match builder.push(&component) {
            Ok(next) => builder = next,
            Err(err) => {
                assert_eq!(err.code(), ResultCode::BadParameter);
                overflowed = true;
                break;
            }
        }
    }
    assert!(overflowed, "path length limit must be enforced");
}

#[test]
fn push_relative_skips_current_dir_components() {
    let path = PathBuilder::new("/base")
        .push_relative(std::path::Path::new("./a/./b"))
        .expect("relative path should be accepted")
        .build();
    assert_eq!(path, std::path::PathBuf::from("/base/a/b"));
}

#[test]
fn marker_names_round_trip_through_prefix() {
    assert_eq!(MarkerKind::Upgrade.marker_name("cam"), ".new.cam");
    assert_eq!(MarkerKind::Removal.marker_name("cam"), ".del.cam");
    assert_eq!(
        MarkerKind::parse_marker_name(".del.cam"),
        Some((MarkerKind::Removal, "cam"))
    );
    assert_eq!(MarkerKind::parse_marker_name(".new."), None);
    assert_eq!(MarkerKind::parse_marker_name("cam"), None);
}

#[test]
fn outcome_and_error_map_to_result_codes() {
    assert_eq!(ResultCode::from(Outcome::AlreadyInstalled), ResultCode::Duplicate);
    assert_eq!(ResultCode::from(Outcome::Removed), ResultCode::Ok);
    let fatal = UpdateError::Fatal(anyhow::anyhow!("system dir vanished"));
    assert!(fatal.is_fatal());
    assert_eq!(ResultCode::from(&fatal), ResultCode::Fault);
    let fault: UpdateError = anyhow::anyhow!("rename failed").into();
    assert_eq!(fault.code(), ResultCode::Fault);
    assert!(!fault.is_fatal());
}

#[test]
fn empty_config_uses_defaults() {
    let config = EngineConfig::from_toml_str("").expect("empty config should parse");
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.root, std::path::PathBuf::from("/legato"));
    assert_eq!(config.labels.framework, "framework");
    assert_eq!(config.labels.read_protected, "imaRead");
    assert_eq!(
        config.hook_wrapper(),
        std::path::PathBuf::from("/legato/systems/current/bin/install-hook")
    );
    assert_eq!(
        config.bindings_reload_command(),
        vec![
            "/legato/systems/current/bin/sdir".to_string(),
            "load".to_string()
        ]
    );
    assert_eq!(
        config.config_tree_dir(),
        std::path::PathBuf::from("/legato/configTree")
    );
}

#[test]
fn config_overrides_are_applied() {
    let content = r#"
root = "/data/fw"
integrity_protection = true

[labels]
app_prefix = "app_"

[hooks]
wrapper = "/usr/bin/run-hook"

[bindings]
reload_command = ["/bin/true"]

[mounts]
mountinfo = "/tmp/mountinfo"
"#;
    let config = EngineConfig::from_toml_str(content).expect("config should parse");
    assert_eq!(config.root, std::path::PathBuf::from("/data/fw"));
    assert!(config.integrity_protection);
    assert!(!config.read_only);
    assert_eq!(config.labels.app_prefix, "app_");
    assert_eq!(config.labels.framework, "framework");
    assert_eq!(
        config.hook_wrapper(),
        std::path::PathBuf::from("/usr/bin/run-hook")
    );
    assert_eq!(config.bindings_reload_command(), vec!["/bin/true".to_string()]);
    assert_eq!(
        config.principals_dir(),
        std::path::PathBuf::from("/data/fw/principals")
    );
}

#[test]
fn config_rejects_invalid_labels_and_relative_root() {
    let err = EngineConfig::from_toml_str("[labels]\nframework = \"-bad\"\n")
        .expect_err("leading dash must be rejected");
    assert!(format!("{err:#}").contains("labels.framework"));

    let err = EngineConfig::from_toml_str("[labels]\nread_protected = \"a/b\"\n")
        .expect_err("slash must be rejected");
    assert!(format!("{err:#}").contains("labels.read_protected"));

    let err = EngineConfig::from_toml_str("root = \"relative\"\n")
        .expect_err("relative root must be rejected");
    assert!(err.to_string().contains("absolute"));

    let err = EngineConfig::from_toml_str("[bindings]\nreload_command = []\n")
        .expect_err("empty command must be rejected");
    assert!(err.to_string().contains("reload_command"));

    assert!(EngineConfig::from_toml_str("unknown_key = 1\n").is_err());
}

#[test]
fn validate_label_rules() {
    assert!(validate_label("app.cam").is_ok());
    assert!(validate_label("_").is_ok());
    for bad in ["", "-x", "a b", "a\"b", "a'b", "a\\b"] {
        assert!(validate_label(bad).is_err(), "label: {bad:?}");
    }
    assert!(validate_label(&"l".repeat(MAX_LABEL_BYTES + 1)).is_err());
}
