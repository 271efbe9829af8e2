//! Telemetry setup for the webhook indexer.

/// Telemetry configuration.
pub mod config;

/// Global subscriber initialisation and graceful shutdown.
pub mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{TelemetryGuard, init_telemetry, shutdown_telemetry};
