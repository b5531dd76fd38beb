//! Asset acquisition for qualification runs
//!
//! Turns plan references (snapshots, observed data, content, intro files,
//! inputs) into local files:
//! - [`AssetAcquirer`]: local-first resolution with download fallback
//! - [`ResolutionCache`]: moka-backed memoization per `(reference, kind)`
//! - [`Downloader`]: transport seam, [`HttpDownloader`] in production

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod acquire;
pub mod cache;
pub mod download;
pub mod error;
pub mod kind;

pub use acquire::{relative_path, AssetAcquirer, DOWNLOADS_FOLDER};
pub use cache::{AssetKey, CacheStats, ResolutionCache};
pub use download::{download_location, remote_url, Downloader, HttpDownloader};
pub use error::{AssetError, DownloadError};
pub use kind::AssetKind;
pub use reqwest::Url;
