//! ---
//! imgpin_section: "01-core-functionality"
//! imgpin_subsection: "tests"
//! imgpin_type: "test"
//! imgpin_scope: "code"
//! imgpin_description: "Settings precedence across environment, config file and defaults."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use imgpin_common::{RestartMethod, Settings, SettingsError};
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("imgpin.json");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn environment_overrides_file_which_overrides_defaults() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
            "SERVICES_ROOT": "/from/file",
            "CACHE_DURATION": 60,
            "SERVICE_SNAPSHOT": false,
            "STOP_START_METHOD": "systemd-system"
        }"#,
    );
    let env = vec![
        ("IMGPIN_CONFIG_FILE".to_owned(), config.display().to_string()),
        ("IMGPIN_CACHE_DURATION".to_owned(), "120".to_owned()),
    ];

    let settings = Settings::from_vars(env, None).unwrap();
    assert_eq!(settings.services_root, PathBuf::from("/from/file"));
    assert_eq!(settings.cache_duration, Duration::from_secs(120));
    assert!(!settings.service_snapshot);
    assert_eq!(settings.stop_start_method, RestartMethod::SystemdSystem);
    assert_eq!(settings.registry_tool, "skopeo");
    assert_eq!(settings.config_file.as_deref(), Some(config.as_path()));
}

#[test]
fn explicit_config_path_wins_over_environment_path() {
    let dir = tempdir().unwrap();
    let chosen = write_config(dir.path(), r#"{"SERVICES_ROOT": "/chosen"}"#);
    let env = vec![(
        "IMGPIN_CONFIG_FILE".to_owned(),
        dir.path().join("absent.json").display().to_string(),
    )];

    let settings = Settings::from_vars(env, Some(&chosen)).unwrap();
    assert_eq!(settings.services_root, PathBuf::from("/chosen"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    let absent = dir.path().join("absent.json");
    let err = Settings::from_vars(Vec::<(String, String)>::new(), Some(&absent)).unwrap_err();
    assert!(matches!(err, SettingsError::ConfigFileMissing { .. }));
}

#[test]
fn config_file_rejects_unknown_and_nested_settings() {
    let dir = tempdir().unwrap();
    let unknown = write_config(dir.path(), r#"{"SERVICES_ROOT": "/srv", "SERVICE_ROOT": "/typo"}"#);
    let err = Settings::from_vars(Vec::<(String, String)>::new(), Some(&unknown)).unwrap_err();
    match err {
        SettingsError::UnknownSetting { name, known, .. } => {
            assert_eq!(name, "SERVICE_ROOT");
            assert!(known.contains("SERVICES_ROOT"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let nested = write_config(dir.path(), r#"{"CONFIG_FILE": "/other.json"}"#);
    let err = Settings::from_vars(Vec::<(String, String)>::new(), Some(&nested)).unwrap_err();
    assert!(matches!(err, SettingsError::NestedConfigFile { .. }));
}

#[test]
fn config_file_must_hold_an_object() {
    let dir = tempdir().unwrap();
    let list = write_config(dir.path(), r#"["SERVICES_ROOT"]"#);
    let err = Settings::from_vars(Vec::<(String, String)>::new(), Some(&list)).unwrap_err();
    assert!(matches!(err, SettingsError::ConfigFileNotObject { .. }));

    let broken = write_config(dir.path(), "{ not json");
    let err = Settings::from_vars(Vec::<(String, String)>::new(), Some(&broken)).unwrap_err();
    assert!(matches!(err, SettingsError::ConfigFileParse { .. }));
}
