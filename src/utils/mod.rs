//! Shared utilities: errors, logging helpers and retry policy.

pub mod error;
pub mod logging;
pub mod retry;
