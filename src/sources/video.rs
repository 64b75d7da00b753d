//! Video progress source
//!
//! Video bytes are always read through the cache's proxy URL, so a download
//! and a concurrent playback share one cache entry and one network transfer.

use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::emitter::JobEmitter;
use super::traits::VideoCache;
use crate::error::{Error, Result};
use crate::utils::{remove_temp_file, temp_file_path};

/// Downloads a resolved video link through a [`VideoCache`]
#[derive(Clone)]
pub struct VideoSource {
    cache: Arc<dyn VideoCache>,
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl VideoSource {
    /// Create a video source writing cache misses into `temp_dir`
    pub fn new(cache: Arc<dyn VideoCache>, client: reqwest::Client, temp_dir: PathBuf) -> Self {
        Self {
            cache,
            client,
            temp_dir,
        }
    }

    /// Run the download for the emitter's link to completion or cancellation.
    ///
    /// The temp file is removed on every path that does not hand it over in a
    /// `Downloaded` snapshot.
    pub async fn run(&self, mut emitter: JobEmitter) {
        if !emitter.connecting().await {
            return;
        }

        let url = emitter.link().media_url().to_string();
        let cached = self.cache.is_cached(&url);
        let proxy = self.cache.proxy_url(&url);

        if cached {
            match cached_file_path(&proxy) {
                Ok(path) => {
                    tracing::debug!(url = %url, path = %path.display(), "video served from cache");
                    emitter.downloaded(path).await;
                }
                Err(e) => {
                    tracing::warn!(url = %url, proxy = %proxy, error = %e, "cached video has no local file");
                    emitter.fail_with(&e).await;
                }
            }
            return;
        }

        let path = temp_file_path(&self.temp_dir, "video", &url);
        let cancel = emitter.cancel_token().clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.download(&mut emitter, &proxy, &path) => Some(result),
        };

        match outcome {
            Some(Ok(true)) => {
                if !emitter.downloaded(path.clone()).await {
                    remove_temp_file(&path).await;
                }
            }
            Some(Ok(false)) | None => {
                tracing::debug!(url = %url, "video download aborted");
                remove_temp_file(&path).await;
            }
            Some(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "video download failed");
                remove_temp_file(&path).await;
                emitter.fail_with(&e).await;
            }
        }
    }

    async fn download(&self, emitter: &mut JobEmitter, proxy: &str, path: &Path) -> Result<bool> {
        let response = self.client.get(proxy).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: proxy.to_string(),
                status: status.as_u16(),
            });
        }

        let expected = response.content_length();
        write_stream(emitter, response.bytes_stream(), expected, path).await
    }
}

/// Local file behind a cached proxy URL (`file://` URL or absolute path)
pub(crate) fn cached_file_path(proxy: &str) -> Result<PathBuf> {
    if let Ok(parsed) = url::Url::parse(proxy)
        && parsed.scheme() == "file"
    {
        return parsed
            .to_file_path()
            .map_err(|()| Error::InvalidUrl(proxy.to_string()));
    }

    let path = Path::new(proxy);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Err(Error::InvalidUrl(proxy.to_string()))
}

/// Write `stream` into `path`, reporting progress through `emitter`.
///
/// Returns `Ok(false)` when the emitter reports that the job is gone. A body
/// shorter than `expected` is an error.
pub(crate) async fn write_stream<S, B, E>(
    emitter: &mut JobEmitter,
    stream: S,
    expected: Option<u64>,
    path: &Path,
) -> Result<bool>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    Error: From<E>,
{
    let mut stream = std::pin::pin!(stream.map_err(Error::from));
    let mut file = tokio::fs::File::create(path).await?;
    let mut bytes_read: u64 = 0;

    while let Some(chunk) = stream.try_next().await? {
        let chunk = chunk.as_ref();
        file.write_all(chunk).await?;
        bytes_read += chunk.len() as u64;
        if !emitter.progress(bytes_read, expected).await {
            return Ok(false);
        }
    }
    file.flush().await?;

    if let Some(expected) = expected
        && bytes_read < expected
    {
        return Err(Error::Fetch(format!(
            "stream ended after {} of {} bytes",
            bytes_read, expected
        )));
    }
    Ok(true)
}
