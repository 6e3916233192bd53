//! Copyright 2026 PKI Toolkit Developers
//!
//! Logging entry point of the PKI toolkit.
//!
//! The crates of the workspace log through the `tracing` macros re-exported here, so that a
//! single dependency carries both the subscriber setup and the macros.

mod log_utils;

pub use log_utils::{log_init, try_log_init};
pub use tracing;
pub use tracing::{debug, error, info, trace, warn};
