//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory for regions.json, membership.json, events.jsonl, cursor.json
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Engine tick period (dwell deadlines, dispatcher retry)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Bounded sample channel depth (backpressure)
    #[serde(default = "default_sample_queue_depth")]
    pub sample_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            sample_queue_depth: default_sample_queue_depth(),
        }
    }
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_sample_queue_depth() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Samples with worse reported accuracy are rejected
    #[serde(default = "default_max_accuracy_m")]
    pub max_accuracy_m: f64,
    /// Consecutive accepted samples closer together than this are smoothed
    #[serde(default = "default_smoothing_window_ms")]
    pub smoothing_window_ms: u64,
    /// Exponential smoothing coefficient (weight of the new sample)
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: default_max_accuracy_m(),
            smoothing_window_ms: default_smoothing_window_ms(),
            smoothing_alpha: default_smoothing_alpha(),
        }
    }
}

fn default_max_accuracy_m() -> f64 {
    100.0
}

fn default_smoothing_window_ms() -> u64 {
    5_000
}

fn default_smoothing_alpha() -> f64 {
    0.4
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Consecutive outside verdicts required to confirm an exit
    #[serde(default = "default_exit_confirm_samples")]
    pub exit_confirm_samples: u32,
    /// Exit confirms after this long outside even without a second sample
    #[serde(default = "default_exit_debounce_ms")]
    pub exit_debounce_ms: u64,
    /// Accuracy margin = clamp(factor * accuracy_m, min_margin_m, max_margin_m)
    #[serde(default = "default_accuracy_margin_factor")]
    pub accuracy_margin_factor: f64,
    #[serde(default = "default_min_margin_m")]
    pub min_margin_m: f64,
    #[serde(default = "default_max_margin_m")]
    pub max_margin_m: f64,
}

fn default_exit_confirm_samples() -> u32 {
    2
}

fn default_exit_debounce_ms() -> u64 {
    30_000
}

fn default_accuracy_margin_factor() -> f64 {
    1.0
}

fn default_min_margin_m() -> f64 {
    5.0
}

fn default_max_margin_m() -> f64 {
    50.0
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            exit_confirm_samples: default_exit_confirm_samples(),
            exit_debounce_ms: default_exit_debounce_ms(),
            accuracy_margin_factor: default_accuracy_margin_factor(),
            min_margin_m: default_min_margin_m(),
            max_margin_m: default_max_margin_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Initial retry backoff after a failed delivery
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { retry_base_ms: default_retry_base_ms(), retry_max_ms: default_retry_max_ms() }
    }
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    state_dir: String,
    tick_interval_ms: u64,
    sample_queue_depth: usize,
    max_accuracy_m: f64,
    smoothing_window_ms: u64,
    smoothing_alpha: f64,
    exit_confirm_samples: u32,
    exit_debounce_ms: u64,
    accuracy_margin_factor: f64,
    min_margin_m: f64,
    max_margin_m: f64,
    retry_base_ms: u64,
    retry_max_ms: u64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            sample_queue_depth: default_sample_queue_depth(),
            max_accuracy_m: default_max_accuracy_m(),
            smoothing_window_ms: default_smoothing_window_ms(),
            smoothing_alpha: default_smoothing_alpha(),
            exit_confirm_samples: default_exit_confirm_samples(),
            exit_debounce_ms: default_exit_debounce_ms(),
            accuracy_margin_factor: default_accuracy_margin_factor(),
            min_margin_m: default_min_margin_m(),
            max_margin_m: default_max_margin_m(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            state_dir: toml_config.engine.state_dir,
            tick_interval_ms: toml_config.engine.tick_interval_ms,
            sample_queue_depth: toml_config.engine.sample_queue_depth,
            max_accuracy_m: toml_config.filter.max_accuracy_m,
            smoothing_window_ms: toml_config.filter.smoothing_window_ms,
            smoothing_alpha: toml_config.filter.smoothing_alpha,
            exit_confirm_samples: toml_config.detector.exit_confirm_samples,
            exit_debounce_ms: toml_config.detector.exit_debounce_ms,
            accuracy_margin_factor: toml_config.detector.accuracy_margin_factor,
            min_margin_m: toml_config.detector.min_margin_m,
            max_margin_m: toml_config.detector.max_margin_m,
            retry_base_ms: toml_config.dispatch.retry_base_ms,
            retry_max_ms: toml_config.dispatch.retry_max_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load from an explicit path, falling back to defaults on failure
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e}. Using defaults.");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn state_dir(&self) -> &str {
        &self.state_dir
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn sample_queue_depth(&self) -> usize {
        self.sample_queue_depth
    }

    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }

    pub fn smoothing_window_ms(&self) -> u64 {
        self.smoothing_window_ms
    }

    pub fn smoothing_alpha(&self) -> f64 {
        self.smoothing_alpha
    }

    pub fn exit_confirm_samples(&self) -> u32 {
        self.exit_confirm_samples
    }

    pub fn exit_debounce_ms(&self) -> u64 {
        self.exit_debounce_ms
    }

    pub fn accuracy_margin_factor(&self) -> f64 {
        self.accuracy_margin_factor
    }

    pub fn min_margin_m(&self) -> f64 {
        self.min_margin_m
    }

    pub fn max_margin_m(&self) -> f64 {
        self.max_margin_m
    }

    pub fn retry_base_ms(&self) -> u64 {
        self.retry_base_ms
    }

    pub fn retry_max_ms(&self) -> u64 {
        self.retry_max_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.state_dir(), "state");
        assert_eq!(config.max_accuracy_m(), 100.0);
        assert_eq!(config.exit_confirm_samples(), 2);
        assert_eq!(config.exit_debounce_ms(), 30_000);
        assert_eq!(config.metrics_interval_secs(), 10);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["geofence-engine".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "geofence-engine".to_string(),
            "--config".to_string(),
            "config/site.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/site.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["geofence-engine".to_string(), "--config=config/other.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/other.toml");
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let parsed: TomlConfig = toml::from_str(
            r#"
[filter]
max_accuracy_m = 50.0
"#,
        )
        .unwrap();

        assert_eq!(parsed.filter.max_accuracy_m, 50.0);
        // Unset fields fall back to defaults
        assert_eq!(parsed.filter.smoothing_alpha, 0.4);
        assert_eq!(parsed.detector.exit_confirm_samples, 2);
        assert_eq!(parsed.engine.state_dir, "state");
    }
}
