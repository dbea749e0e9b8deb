//! AEI Relay Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared logging setup and error types for the AEI relay workspace.
//!
//! # Overview
//!
//! - **Logging**: `tracing` subscriber initialization driven by `LOG_*` environment variables
//! - **Error Handling**: `RelayError` and the `Result` alias used at crate boundaries
//!
//! # Example
//!
//! ```no_run
//! use aei_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{RelayError, Result};
