//! Infrastructure - configuration, metrics, and durable state
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `storage` - Crash-consistent JSON state files

pub mod config;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use storage::{StateStore, StorageError};
