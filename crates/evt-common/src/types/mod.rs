//! Common types shared by the pipeline stages

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Pipeline Types
// ============================================================================

/// One unit of work in the pipeline, with a single success/failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Extract, Stage::Transform, Stage::Load];

    pub fn as_str(&self) -> &str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extract" | "fetch" => Ok(Stage::Extract),
            "transform" => Ok(Stage::Transform),
            "load" => Ok(Stage::Load),
            _ => Err(anyhow::anyhow!("Invalid stage: {}", s)),
        }
    }
}

/// What a staged artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The fetched bytes, untouched
    Raw,
    /// The normalized batch in columnar form
    Normalized,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Raw => write!(f, "raw"),
            ArtifactKind::Normalized => write!(f, "normalized"),
        }
    }
}

/// Location of a staged artifact handed from one stage to the next.
///
/// Stages receive `Option<ArtifactLocation>`; `None` means the producer's
/// return value is unavailable (e.g. a resumed run) and the consumer falls
/// back to the well-known path for the kind it expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl ArtifactLocation {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn raw(path: impl Into<PathBuf>) -> Self {
        Self::new(ArtifactKind::Raw, path)
    }

    pub fn normalized(path: impl Into<PathBuf>) -> Self {
        Self::new(ArtifactKind::Normalized, path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} artifact at {}", self.kind, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ALL, [Stage::Extract, Stage::Transform, Stage::Load]);
        assert!(Stage::Extract < Stage::Load);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("Transform".parse::<Stage>().unwrap(), Stage::Transform);
        assert_eq!("fetch".parse::<Stage>().unwrap(), Stage::Extract);
        assert!("publish".parse::<Stage>().is_err());
    }
}
