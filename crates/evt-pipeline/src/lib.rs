//! Event batch ETL pipeline
//!
//! Moves one batch of event records from a shared file into a document
//! store collection, in three stages:
//!
//! - **fetch**: download the raw JSON batch into the staging directory
//! - **transform**: expand `metadata`, retype `timestamp` and `amount`, and
//!   stage the result as Parquet
//! - **load**: bulk insert the normalized rows after a liveness ping
//!
//! [`coordinator::PipelineCoordinator`] sequences the stages and applies the
//! retry policy.
//!
//! # Example
//!
//! ```no_run
//! use evt_pipeline::config::PipelineConfig;
//! use evt_pipeline::coordinator::PipelineCoordinator;
//! use evt_pipeline::store::MongoConnector;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let coordinator = PipelineCoordinator::new(config, MongoConnector::new())?;
//!     let report = coordinator.run().await;
//!     tracing::info!(state = %report.state, "Run finished");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod load;
pub mod source;
pub mod store;
pub mod transform;
pub mod variables;

pub use coordinator::{PipelineCoordinator, RunReport, RunState};
