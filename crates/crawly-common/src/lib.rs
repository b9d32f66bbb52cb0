//! Crawly Common Library
//!
//! Shared error handling and logging for the crawly workspace.
//!
//! - **Error Handling**: [`CrawlyError`] and the [`Result`] alias
//! - **Logging**: [`logging::init_logging`] driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use crawly_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("processor booting");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

pub use error::{CrawlyError, Result};
