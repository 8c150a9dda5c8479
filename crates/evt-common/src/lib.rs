//! Event ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the event pipeline.
//!
//! - **Error Handling**: the stage error taxonomy ([`EtlError`])
//! - **Logging**: tracing subscriber setup
//! - **Checksums**: digests of staged artifacts
//! - **Types**: stages and artifact locations
//!
//! # Example
//!
//! ```no_run
//! use evt_common::checksum::compute_file_checksum;
//! use evt_common::Result;
//!
//! fn digest(path: &str) -> Result<String> {
//!     compute_file_checksum(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{EtlError, Result};
pub use types::{ArtifactKind, ArtifactLocation, Stage};
