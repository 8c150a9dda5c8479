//! Transform stage: raw JSON batch to normalized Parquet artifact
//!
//! - **normalize**: metadata expansion, timestamp and amount retyping
//! - **columnar**: Arrow schema inference and Parquet I/O

pub mod columnar;
pub mod normalize;

pub use columnar::{read_parquet, to_record_batch, write_parquet, ColumnType};
pub use normalize::{normalize_batch, NormalizedBatch, NormalizedRecord};

use crate::config::StagingLayout;
use evt_common::checksum::compute_file_checksum;
use evt_common::{ArtifactKind, ArtifactLocation, EtlError, Result};
use tracing::{info, instrument};

/// Normalizes the staged raw batch into the staged columnar artifact
#[derive(Debug, Clone)]
pub struct Transformer {
    staging: StagingLayout,
}

impl Transformer {
    pub fn new(staging: StagingLayout) -> Self {
        Self { staging }
    }

    /// Read the raw artifact, normalize it and overwrite the normalized
    /// artifact. Nothing is written unless the whole batch normalizes.
    #[instrument(skip(self))]
    pub async fn transform(&self, raw: Option<&ArtifactLocation>) -> Result<ArtifactLocation> {
        let input = self.staging.resolve(ArtifactKind::Raw, raw)?;
        let output = self.staging.normalized_path();

        let bytes = tokio::fs::read(&input).await?;
        info!(path = %input.display(), bytes = bytes.len(), "Normalizing raw event batch");

        let written = output.clone();
        let (rows, digest) = tokio::task::spawn_blocking(move || -> Result<(usize, String)> {
            let batch = normalize_batch(&bytes)?;
            let record_batch = to_record_batch(&batch)?;
            if let Some(dir) = written.parent() {
                std::fs::create_dir_all(dir)?;
            }
            write_parquet(&written, &record_batch)?;
            Ok((batch.len(), compute_file_checksum(&written)?))
        })
        .await
        .map_err(|e| EtlError::Artifact(format!("transform task failed: {}", e)))??;

        info!(
            path = %output.display(),
            rows,
            sha256 = %digest,
            "Normalized batch staged"
        );

        Ok(ArtifactLocation::normalized(output))
    }

    pub fn staging(&self) -> &StagingLayout {
        &self.staging
    }
}
