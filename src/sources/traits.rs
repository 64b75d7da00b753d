//! Collaborator interfaces consumed by the progress source adapters

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;

use crate::types::Link;

/// Event reported by an image fetch pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// The fetch started and is establishing a connection
    Connecting,
    /// Bytes arrived; `expected_length` is `None` when the size is unknown
    Progress {
        /// Bytes received so far
        bytes_read: u64,
        /// Total size of the resource, if known
        expected_length: Option<u64>,
    },
    /// The image was written to `file`
    Completed(PathBuf),
    /// The fetch failed
    Failed(String),
}

/// External image fetch pipeline
///
/// The returned stream must end after `Completed` or `Failed`. Dropping the
/// stream aborts the fetch.
pub trait ImageFetcher: Send + Sync {
    /// Start fetching `url`
    fn fetch(&self, url: &str) -> BoxStream<'static, FetchEvent>;
}

/// Resolves a video page link into a directly playable URL
#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// Return `link` with `resolved_video_url` populated
    ///
    /// # Errors
    ///
    /// Any error fails the job with a fetch failure.
    async fn resolve(&self, link: &Link) -> crate::Result<Link>;
}

/// Caching byte-stream provider for videos
///
/// Playback and downloads share the cache: a video streamed for playing is
/// already on disk when the user downloads it, and a download fills the cache
/// for later playback.
pub trait VideoCache: Send + Sync {
    /// Whether `url` is fully cached on disk
    fn is_cached(&self, url: &str) -> bool;

    /// Cached file reference (`file://` URL or absolute path) when `url` is
    /// cached, otherwise a pass-through proxy URL that caches while streaming
    fn proxy_url(&self, url: &str) -> String;
}
