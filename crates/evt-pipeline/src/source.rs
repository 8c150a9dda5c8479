//! Remote source identifiers

use crate::config::FILE_ID_PLACEHOLDER;

/// Opaque identifier of the remote file.
///
/// Built from either a bare file id or a shareable link of the form
/// `https://host/file/d/<id>/view`. No validation beyond extracting the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    file_id: String,
}

impl SourceFile {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
        }
    }

    /// Extract the file id from a shareable link, or take the input as an id
    pub fn parse(link_or_id: &str) -> Self {
        let trimmed = link_or_id.trim().trim_end_matches('/');
        let file_id = match trimmed.split_once("/d/") {
            Some((_, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(rest),
            None => trimmed,
        };
        Self::new(file_id)
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Direct-download URL for this file
    pub fn download_url(&self, template: &str) -> String {
        template.replace(FILE_ID_PLACEHOLDER, &self.file_id)
    }
}

impl std::fmt::Display for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_id)
    }
}
