use std::io::Write;

use cmdbar_core::ScreenRect;
use cmdbar_desktop::config::{
    ConfigLoadError, MAX_CONFIG_BYTES, SavedConfig, load_config, load_config_from_path,
    save_config_with_retry,
};

#[test]
fn load_config_rejects_oversized_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("config.json");

    let mut file = std::fs::File::create(&path).expect("create config.json");
    file.write_all(&vec![b' '; (MAX_CONFIG_BYTES as usize) + 1024])
        .expect("write oversized config.json");
    drop(file);

    let err = load_config_from_path(&path).expect_err("oversized file should error");
    assert!(matches!(err, ConfigLoadError::TooLarge { .. }));
    assert!(err.to_string().contains("too large"), "unexpected error: {err}");
    assert_eq!(load_config(&path), SavedConfig::default());
}

#[test]
fn missing_or_corrupt_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let missing = dir.path().join("absent.json");
    assert_eq!(load_config(&missing), SavedConfig::default());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{ port: ").expect("write corrupt config");
    assert!(matches!(
        load_config_from_path(&corrupt),
        Err(ConfigLoadError::Parse(_))
    ));
    assert_eq!(load_config(&corrupt), SavedConfig::default());
}

#[test]
fn saved_config_reloads_unchanged() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("nested").join("config.json");
    let saved = SavedConfig {
        port: Some(4800),
        max_port_attempts: Some(5),
        screen: Some(ScreenRect::new(-1920, 0, 1920, 1080)),
        tick_ms: Some(100),
    };

    save_config_with_retry(&path, &saved).expect("save config");
    save_config_with_retry(&path, &saved).expect("overwrite config");

    assert_eq!(load_config_from_path(&path).expect("reload config"), saved);
    assert!(!path.with_extension("json.tmp").exists());
}
