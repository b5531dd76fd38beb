//! Error types for plan and document decoding

use std::path::PathBuf;

/// Errors raised while loading or interpreting a plan document
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A required top-level section is absent (or empty)
    #[error("{section} node not defined in qualification file")]
    MissingSection {
        /// Name of the missing section, as spelled in the document
        section: String,
    },

    /// IO error while reading a document
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid JSON for the expected schema
    #[error("invalid document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PlanError {
    /// Create missing section error
    #[inline]
    pub fn missing_section(section: impl Into<String>) -> Self {
        Self::MissingSection {
            section: section.into(),
        }
    }

    /// Create IO error for path
    #[inline]
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create parse error for path
    #[inline]
    pub fn parse_error(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
