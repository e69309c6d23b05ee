//! # brume-server
//!
//! The brume relay server: configuration, listeners, session runtime,
//! HTTP API, and metrics. The binary in `main.rs` is a thin wrapper
//! around [`runtime::spawn`]; embedding and integration tests use the
//! same entry point.

pub mod config;
pub mod http;
pub mod metrics;
pub mod runtime;

pub use config::Config;
pub use runtime::{spawn, RelayHandle};
