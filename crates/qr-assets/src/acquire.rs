//! Asset acquisition
//!
//! An asset reference is resolved local-first:
//! 1. An existing file relative to the base folder wins
//! 2. An `http(s)` reference is downloaded once into
//!    `<output>/temp/downloads/<kind>/<host>/<path>`
//! 3. Anything else is a `MissingAsset`
//!
//! Copies keep the reference's relative folders below `<output>/<kind>/`, so
//! two sources sharing a file name never overwrite each other. Resolutions
//! and copies are memoized per `(reference, kind)` for the whole run.

use crate::cache::{AssetKey, ResolutionCache};
use crate::download::{download_location, remote_url, Downloader, HttpDownloader};
use crate::error::AssetError;
use crate::kind::AssetKind;
use reqwest::Url;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Folder below the temp folder that receives downloads
pub const DOWNLOADS_FOLDER: &str = "downloads";

/// Resolves plan references to local files and copies them into the output
#[derive(Clone)]
pub struct AssetAcquirer {
    output_folder: PathBuf,
    download_folder: PathBuf,
    downloader: Arc<dyn Downloader>,
    resolved: ResolutionCache<PathBuf>,
    copied: ResolutionCache<String>,
}

impl fmt::Debug for AssetAcquirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetAcquirer")
            .field("output_folder", &self.output_folder)
            .field("download_folder", &self.download_folder)
            .field("resolved", &self.resolved.stats())
            .finish_non_exhaustive()
    }
}

impl AssetAcquirer {
    /// Acquirer for `output_folder`, downloading with `downloader`
    #[must_use]
    pub fn new(output_folder: impl Into<PathBuf>, downloader: Arc<dyn Downloader>) -> Self {
        let output_folder = output_folder.into();
        let download_folder = output_folder.join("temp").join(DOWNLOADS_FOLDER);
        Self {
            output_folder,
            download_folder,
            downloader,
            resolved: ResolutionCache::default(),
            copied: ResolutionCache::default(),
        }
    }

    /// Acquirer downloading over HTTP(S)
    #[must_use]
    pub fn with_http(output_folder: impl Into<PathBuf>) -> Self {
        Self::new(output_folder, Arc::new(HttpDownloader::new()))
    }

    #[inline]
    #[must_use]
    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    #[inline]
    #[must_use]
    pub fn download_folder(&self) -> &Path {
        &self.download_folder
    }

    /// Resolve `reference` to an absolute local file
    ///
    /// # Errors
    /// - `AssetError::MissingAsset` if no local file exists and no download succeeded
    /// - `AssetError::Io` if the download folder cannot be created
    pub async fn acquire(
        &self,
        reference: &str,
        kind: AssetKind,
        base_folder: &Path,
    ) -> Result<PathBuf, AssetError> {
        self.resolved
            .try_get_or_resolve(
                AssetKey::new(reference, kind),
                self.resolve(reference, kind, base_folder),
            )
            .await
    }

    /// Acquire `reference` and copy it below `<output>/<kind folder>/`
    ///
    /// A local reference keeps its relative folders (`content/a/x.md` lands
    /// in `Content/content/a/x.md`); a remote one mirrors host and path. Returns the copy's path relative to the output root, always with `/`
    /// separators.
    ///
    /// # Errors
    /// - Any error of [`acquire`](Self::acquire)
    /// - `AssetError::Io` if the copy fails
    pub async fn copy_out(
        &self,
        reference: &str,
        kind: AssetKind,
        base_folder: &Path,
    ) -> Result<String, AssetError> {
        self.copied
            .try_get_or_resolve(
                AssetKey::new(reference, kind),
                self.copy(reference, kind, base_folder),
            )
            .await
    }

    async fn resolve(
        &self,
        reference: &str,
        kind: AssetKind,
        base_folder: &Path,
    ) -> Result<PathBuf, AssetError> {
        let local = absolutize(&base_folder.join(reference));
        if tokio::fs::try_exists(&local).await.unwrap_or(false) {
            debug!(reference, %kind, path = %local.display(), "Asset found locally");
            return Ok(local);
        }

        match remote_url(reference) {
            Some(url) => self.download(&url, reference, kind).await,
            None => Err(AssetError::missing(kind, reference)),
        }
    }

    async fn download(
        &self,
        url: &Url,
        reference: &str,
        kind: AssetKind,
    ) -> Result<PathBuf, AssetError> {
        let Some(location) = download_location(url) else {
            warn!(reference, %kind, "Remote reference has no file name");
            return Err(AssetError::missing(kind, reference));
        };

        let destination =
            absolutize(&self.download_folder.join(kind.folder_name()).join(location));
        create_parent(&destination).await?;

        match self.downloader.download(url, &destination).await {
            Ok(()) => {
                debug!(reference, %kind, path = %destination.display(), "Asset downloaded");
                Ok(destination)
            }
            Err(e) => {
                warn!(reference, %kind, error = %e, "Asset download failed");
                let _ = tokio::fs::remove_file(&destination).await;
                Err(AssetError::missing(kind, reference))
            }
        }
    }

    async fn copy(
        &self,
        reference: &str,
        kind: AssetKind,
        base_folder: &Path,
    ) -> Result<String, AssetError> {
        let source = self.acquire(reference, kind, base_folder).await?;
        let Some(location) = copy_location(reference) else {
            return Err(AssetError::missing(kind, reference));
        };

        let target = self.output_folder.join(kind.folder_name()).join(location);
        create_parent(&target).await?;
        if absolutize(&target) != source {
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| AssetError::io_error(&target, e))?;
        }

        relative_path(&self.output_folder, &target)
            .ok_or_else(|| AssetError::missing(kind, reference))
    }
}

/// Where a copy of `reference` lives below its kind folder
///
/// Remote references mirror their URL; local ones keep their normal path
/// components, dropping roots and `..`.
fn copy_location(reference: &str) -> Option<PathBuf> {
    if let Some(url) = remote_url(reference) {
        return download_location(&url);
    }
    let location: PathBuf = Path::new(reference)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    location.file_name().is_some().then_some(location)
}

async fn create_parent(path: &Path) -> Result<(), AssetError> {
    match path.parent() {
        Some(folder) => tokio::fs::create_dir_all(folder)
            .await
            .map_err(|e| AssetError::io_error(folder, e)),
        None => Ok(()),
    }
}

/// `path` relative to `root`, joined with `/` regardless of platform
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}
