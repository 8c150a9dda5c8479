//! Error types for the event pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the event pipeline
///
/// Every variant is stage-fatal: stages return it unhandled and the
/// coordinator decides whether the stage is retried.
#[derive(Error, Debug)]
pub enum EtlError {
    /// Remote source returned a non-2xx status or could not be reached
    #[error("Transfer error{}: {message}", fmt_status(.status))]
    Transfer {
        status: Option<u16>,
        message: String,
    },

    /// Malformed structured input or an unparseable field value
    #[error("Parse error: {0}")]
    Parse(String),

    /// An expected field is missing from the batch
    #[error("Schema error: {0}")]
    Schema(String),

    /// A required setting could not be resolved
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Liveness check against the document store failed
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Bulk insert into the document store failed
    #[error("Load error: {0}")]
    Load(String),

    /// A staged artifact could not be encoded or decoded
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn transfer(status: Option<u16>, message: impl Into<String>) -> Self {
        EtlError::Transfer {
            status,
            message: message.into(),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// A 4xx from the source is permanent; a 5xx or a failure to get any
    /// response at all is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            EtlError::Transfer { status, .. } => !matches!(status, Some(400..=499)),
            EtlError::Connectivity(_) | EtlError::Io(_) => true,
            EtlError::Parse(_)
            | EtlError::Schema(_)
            | EtlError::Configuration(_)
            | EtlError::Load(_)
            | EtlError::Artifact(_) => false,
        }
    }

    /// Short name of the error class, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Transfer { .. } => "transfer",
            EtlError::Parse(_) => "parse",
            EtlError::Schema(_) => "schema",
            EtlError::Configuration(_) => "configuration",
            EtlError::Connectivity(_) => "connectivity",
            EtlError::Load(_) => "load",
            EtlError::Artifact(_) => "artifact",
            EtlError::Io(_) => "io",
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::Parse(err.to_string())
    }
}
