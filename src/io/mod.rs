//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `provider` - Inbound location-sample adapter (JSONL over an async reader)
//! - `dispatcher` - Durable outbound event queue with cursor-gated delivery

pub mod dispatcher;
pub mod provider;

// Re-export commonly used types
pub use dispatcher::{DispatchError, Dispatcher, StdoutConsumer, TransitionConsumer};
pub use provider::{pump_samples, run_stdin_provider};
