//! Error types for asset acquisition

use crate::kind::AssetKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Errors raised while acquiring an asset
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// Neither a local file nor a download produced the asset
    #[error("{kind} file '{reference}' does not exist.")]
    MissingAsset { kind: AssetKind, reference: String },

    /// IO error while placing the asset
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    /// Create missing asset error
    #[inline]
    pub fn missing(kind: AssetKind, reference: impl Into<String>) -> Self {
        Self::MissingAsset {
            kind,
            reference: reference.into(),
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

    /// Recover an owned error from one shared by the resolution cache
    ///
    /// Every waiter on a failed cache entry receives the same `Arc`; only the
    /// last holder gets the original back, the others get an equivalent copy.
    #[must_use]
    pub fn from_shared(shared: Arc<Self>) -> Self {
        Arc::try_unwrap(shared).unwrap_or_else(|shared| match shared.as_ref() {
            Self::MissingAsset { kind, reference } => Self::missing(*kind, reference.clone()),
            Self::Io { path, source } => Self::io_error(
                path.clone(),
                std::io::Error::new(source.kind(), source.to_string()),
            ),
        })
    }

    /// True for `MissingAsset`
    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingAsset { .. })
    }
}

/// Transport failure reported by a [`crate::Downloader`]
#[derive(Debug, Clone, thiserror::Error)]
#[error("download of {url} failed: {reason}")]
pub struct DownloadError {
    pub url: String,
    pub reason: String,
}

impl DownloadError {
    #[inline]
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_asset_display() {
        let err = AssetError::missing(AssetKind::ObservedData, "data/obs.csv");
        assert_eq!(err.to_string(), "Observed data file 'data/obs.csv' does not exist.");
        assert!(err.is_missing());
    }

    #[test]
    fn from_shared_copies_when_still_shared() {
        let shared = Arc::new(AssetError::missing(AssetKind::Snapshot, "p1.json"));
        let other = Arc::clone(&shared);

        let owned = AssetError::from_shared(shared);
        assert!(matches!(owned, AssetError::MissingAsset { ref reference, .. } if reference == "p1.json"));

        let last = AssetError::from_shared(other);
        assert!(last.is_missing());
    }
}
