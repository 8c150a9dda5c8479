//! Fetch stage: download the raw event batch into the staging directory

use crate::config::{SourceConfig, StagingLayout};
use crate::source::SourceFile;
use evt_common::checksum::StreamingChecksum;
use evt_common::{ArtifactLocation, EtlError, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// HTTP client for downloading the raw batch
pub struct Fetcher {
    client: Client,
    staging: StagingLayout,
    download_url_template: String,
}

impl Fetcher {
    pub fn new(staging: StagingLayout, source: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("evt-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtlError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, staging, source))
    }

    pub fn with_client(client: Client, staging: StagingLayout, source: &SourceConfig) -> Self {
        Self {
            client,
            staging,
            download_url_template: source.download_url_template.clone(),
        }
    }

    /// Download the file once and overwrite the raw artifact.
    ///
    /// The body is streamed to a sibling `.part` file and renamed over the
    /// raw artifact only once it is complete.
    #[instrument(skip(self), fields(file_id = %source))]
    pub async fn fetch(&self, source: &SourceFile) -> Result<ArtifactLocation> {
        let url = source.download_url(&self.download_url_template);
        tokio::fs::create_dir_all(self.staging.dir()).await?;

        info!(url = %url, "Downloading raw event batch");

        let response = self.client.get(&url).send().await.map_err(|e| {
            EtlError::transfer(e.status().map(|s| s.as_u16()), format!("GET {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::transfer(
                Some(status.as_u16()),
                format!("GET {} returned {}", url, status),
            ));
        }

        let target = self.staging.raw_path();
        let (bytes, digest) = stream_to_file(response, &target).await?;
        info!(
            path = %target.display(),
            bytes,
            sha256 = %digest,
            "Raw event batch staged"
        );

        Ok(ArtifactLocation::raw(target))
    }
}

/// Stream a response body into `target` via a sibling `.part` file, hashing
/// chunks as they are written. Returns the byte count and hex SHA-256.
async fn stream_to_file(response: Response, target: &Path) -> Result<(u64, String)> {
    let url = response.url().clone();
    let partial = target.with_extension("json.part");

    let mut file = tokio::fs::File::create(&partial).await?;
    let mut checksum = StreamingChecksum::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| EtlError::transfer(None, format!("reading body of {}: {}", url, e)))?;
        file.write_all(&chunk).await?;
        checksum.update(&chunk);
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, target).await?;

    Ok((checksum.bytes(), checksum.finalize()))
}
