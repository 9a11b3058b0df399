//! Integration tests for configuration loading

use geofence_engine::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[engine]
state_dir = "/var/lib/geofence"
tick_interval_ms = 250
sample_queue_depth = 64

[filter]
max_accuracy_m = 75.0
smoothing_window_ms = 2000
smoothing_alpha = 0.5

[detector]
exit_confirm_samples = 3
exit_debounce_ms = 15000
accuracy_margin_factor = 1.5
min_margin_m = 2.0
max_margin_m = 30.0

[dispatch]
retry_base_ms = 100
retry_max_ms = 5000

[metrics]
interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.state_dir(), "/var/lib/geofence");
    assert_eq!(config.tick_interval_ms(), 250);
    assert_eq!(config.sample_queue_depth(), 64);
    assert_eq!(config.max_accuracy_m(), 75.0);
    assert_eq!(config.smoothing_window_ms(), 2000);
    assert_eq!(config.smoothing_alpha(), 0.5);
    assert_eq!(config.exit_confirm_samples(), 3);
    assert_eq!(config.exit_debounce_ms(), 15_000);
    assert_eq!(config.accuracy_margin_factor(), 1.5);
    assert_eq!(config.min_margin_m(), 2.0);
    assert_eq!(config.max_margin_m(), 30.0);
    assert_eq!(config.retry_base_ms(), 100);
    assert_eq!(config.retry_max_ms(), 5000);
    assert_eq!(config.metrics_interval_secs(), 30);
}

#[test]
fn test_missing_sections_fall_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();

    temp_file
        .write_all(
            br#"
[detector]
exit_confirm_samples = 4
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.exit_confirm_samples(), 4);
    // Everything else is defaulted
    assert_eq!(config.state_dir(), "state");
    assert_eq!(config.max_accuracy_m(), 100.0);
    assert_eq!(config.exit_debounce_ms(), 30_000);
    assert_eq!(config.retry_base_ms(), 500);
}

#[test]
fn test_from_file_missing_file_is_error() {
    assert!(Config::from_file("/nonexistent/engine.toml").is_err());
}

#[test]
fn test_load_from_path_falls_back_to_defaults() {
    let config = Config::load_from_path("/nonexistent/engine.toml");
    assert_eq!(config.state_dir(), "state");
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_toml_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"not [valid toml").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}
