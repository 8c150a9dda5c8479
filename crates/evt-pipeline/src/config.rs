//! Pipeline configuration
//!
//! Everything a run needs to know about where it reads, stages and writes
//! is carried by [`PipelineConfig`] and handed to the coordinator at
//! construction.

use evt_common::{ArtifactKind, ArtifactLocation, EtlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default staging directory, relative to the working directory.
pub const DEFAULT_STAGING_DIR: &str = "source";

/// File name of the raw artifact inside the staging directory.
pub const RAW_ARTIFACT_NAME: &str = "logs.json";

/// File name of the normalized artifact inside the staging directory.
pub const NORMALIZED_ARTIFACT_NAME: &str = "transformed.parquet";

/// Shared link of the event log file.
pub const DEFAULT_SOURCE: &str = "https://drive.google.com/file/d/1_4xzvaJW-HGj0mp0yp6pZFwQ7cpI-wb_";

/// Placeholder substituted with the file id in the download template.
pub const FILE_ID_PLACEHOLDER: &str = "{file_id}";

/// Direct-download URL template for shared files.
pub const DEFAULT_DOWNLOAD_URL_TEMPLATE: &str =
    "https://drive.google.com/uc?export=download&id={file_id}";

/// Target database name.
pub const DEFAULT_DATABASE: &str = "etl_db";

/// Target collection name.
pub const DEFAULT_COLLECTION: &str = "events";

/// Name of the connection-string setting, in the variable store and the environment.
pub const DEFAULT_CONNECTION_KEY: &str = "mongodb_conn_string";

/// Re-executions of a failed stage before the run fails.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Delay before a failed stage is re-executed (2 minutes).
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 120;

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub staging: StagingLayout,
    pub source: SourceConfig,
    pub store: StoreTarget,
    pub retry: RetryPolicy,

    /// JSON file backing the runtime variable store, if any
    pub variables_file: Option<PathBuf>,
}

/// Fixed locations of the staged artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingLayout {
    pub dir: PathBuf,
}

/// Where the raw batch comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// File id or shareable link
    pub source: String,
    pub download_url_template: String,
}

/// Database and collection receiving the documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTarget {
    pub database: String,
    pub collection: String,
    pub connection_key: String,
}

/// Which failures the coordinator retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Retry every failure regardless of kind
    #[default]
    All,
    /// Retry only failures classified as transient
    TransientOnly,
}

impl std::str::FromStr for RetryScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(RetryScope::All),
            "transient" | "transient_only" => Ok(RetryScope::TransientOnly),
            _ => Err(anyhow::anyhow!("Invalid retry scope: {}", s)),
        }
    }
}

/// Per-stage retry policy, applied uniformly to every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub scope: RetryScope,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            scope: RetryScope::All,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total executions a stage gets, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a failed attempt number `attempt` (1-based) may be retried
    pub fn should_retry(&self, attempt: u32, error: &EtlError) -> bool {
        if attempt >= self.max_attempts() {
            return false;
        }
        match self.scope {
            RetryScope::All => true,
            RetryScope::TransientOnly => error.is_transient(),
        }
    }
}

impl StagingLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn raw_path(&self) -> PathBuf {
        self.dir.join(RAW_ARTIFACT_NAME)
    }

    pub fn normalized_path(&self) -> PathBuf {
        self.dir.join(NORMALIZED_ARTIFACT_NAME)
    }

    /// Well-known path for an artifact kind
    pub fn path_for(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Raw => self.raw_path(),
            ArtifactKind::Normalized => self.normalized_path(),
        }
    }

    /// Path a consumer reads from: the handed-off location, or the
    /// well-known path when the producer returned nothing.
    pub fn resolve(&self, kind: ArtifactKind, handoff: Option<&ArtifactLocation>) -> Result<PathBuf> {
        match handoff {
            Some(location) if location.kind != kind => Err(EtlError::Configuration(format!(
                "expected {} artifact, got {}",
                kind, location
            ))),
            Some(location) if !location.path.as_os_str().is_empty() => Ok(location.path.clone()),
            _ => {
                let fallback = self.path_for(kind);
                debug!(kind = %kind, path = %fallback.display(), "No artifact handed off, using well-known path");
                Ok(fallback)
            },
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for StagingLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_DIR)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            download_url_template: DEFAULT_DOWNLOAD_URL_TEMPLATE.to_string(),
        }
    }
}

impl Default for StoreTarget {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            connection_key: DEFAULT_CONNECTION_KEY.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging: StagingLayout::default(),
            source: SourceConfig::default(),
            store: StoreTarget::default(),
            retry: RetryPolicy::default(),
            variables_file: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment and defaults.
    ///
    /// `.env` is not read here; the binary loads it once at startup.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = RetryPolicy::default();

        let config = PipelineConfig {
            staging: StagingLayout::new(
                lookup("EVT_STAGING_DIR").unwrap_or_else(|| DEFAULT_STAGING_DIR.to_string()),
            ),
            source: SourceConfig {
                source: lookup("EVT_SOURCE").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                download_url_template: lookup("EVT_DOWNLOAD_URL_TEMPLATE")
                    .unwrap_or_else(|| DEFAULT_DOWNLOAD_URL_TEMPLATE.to_string()),
            },
            store: StoreTarget {
                database: lookup("EVT_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                collection: lookup("EVT_COLLECTION")
                    .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
                connection_key: lookup("EVT_CONNECTION_KEY")
                    .unwrap_or_else(|| DEFAULT_CONNECTION_KEY.to_string()),
            },
            retry: RetryPolicy {
                max_retries: lookup("EVT_MAX_RETRIES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.max_retries),
                delay: lookup("EVT_RETRY_DELAY_SECS")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.delay),
                scope: match lookup("EVT_RETRY_SCOPE") {
                    Some(scope) => scope.parse()?,
                    None => defaults.scope,
                },
            },
            variables_file: lookup("EVT_VARIABLES_FILE").map(PathBuf::from),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.source.trim().is_empty() {
            anyhow::bail!("Source identifier cannot be empty");
        }

        if !self
            .source
            .download_url_template
            .contains(FILE_ID_PLACEHOLDER)
        {
            anyhow::bail!(
                "Download URL template must contain {} placeholder",
                FILE_ID_PLACEHOLDER
            );
        }

        if self.store.database.is_empty() {
            anyhow::bail!("Database name cannot be empty");
        }

        if self.store.collection.is_empty() {
            anyhow::bail!("Collection name cannot be empty");
        }

        if self.store.connection_key.is_empty() {
            anyhow::bail!("Connection string key cannot be empty");
        }

        Ok(())
    }
}
