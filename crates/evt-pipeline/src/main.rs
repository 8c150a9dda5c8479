//! evt-pipeline - run the event batch ETL once
//!
//! Takes no arguments; everything comes from `.env` and the environment.
//! Exits non-zero when the run ends `failed`.

use anyhow::Result;
use evt_common::logging::{init_logging, LogConfig};
use evt_pipeline::config::PipelineConfig;
use evt_pipeline::store::MongoConnector;
use evt_pipeline::PipelineCoordinator;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("evt-pipeline")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::from_env()?;
    info!(
        staging_dir = %config.staging.dir().display(),
        database = %config.store.database,
        collection = %config.store.collection,
        max_retries = config.retry.max_retries,
        "Configuration loaded"
    );

    let coordinator = PipelineCoordinator::new(config, MongoConnector::new())?;
    let report = coordinator.run().await;

    info!(report = %serde_json::to_string(&report)?, "Run report");

    if !report.succeeded() {
        anyhow::bail!(
            "pipeline run {} failed: {}",
            report.run_id,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
