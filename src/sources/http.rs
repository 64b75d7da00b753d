//! Built-in HTTP image fetcher

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use super::traits::{FetchEvent, ImageFetcher};
use crate::utils::temp_file_path;

/// Fetches images over HTTP into files under a temp directory
///
/// Each fetch is a lazy stream: nothing happens until it is polled, and
/// dropping it mid-transfer aborts the request and removes the partial file.
#[derive(Clone, Debug)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl HttpImageFetcher {
    /// Create a fetcher using `client` and writing into `temp_dir`
    pub fn new(client: reqwest::Client, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            temp_dir: temp_dir.into(),
        }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> BoxStream<'static, FetchEvent> {
        let start = FetchState::Start {
            client: self.client.clone(),
            url: url.to_string(),
            path: temp_file_path(&self.temp_dir, "image", url),
        };

        stream::unfold(start, |state| async move {
            match state {
                FetchState::Start { client, url, path } => {
                    Some((FetchEvent::Connecting, FetchState::Request { client, url, path }))
                }
                FetchState::Request { client, url, path } => {
                    let response = match client.get(&url).send().await {
                        Ok(response) => response,
                        Err(e) => return Some(failed(format!("request failed: {}", e))),
                    };
                    let status = response.status();
                    if !status.is_success() {
                        return Some(failed(format!(
                            "unexpected HTTP status {} for {}",
                            status.as_u16(),
                            url
                        )));
                    }

                    let file = match PartialFile::create(path).await {
                        Ok(file) => file,
                        Err(e) => return Some(failed(format!("failed to create file: {}", e))),
                    };
                    let expected_length = response.content_length();
                    Some((
                        FetchEvent::Progress {
                            bytes_read: 0,
                            expected_length,
                        },
                        FetchState::Downloading {
                            file,
                            body: response.bytes_stream().boxed(),
                            bytes_read: 0,
                            expected_length,
                        },
                    ))
                }
                FetchState::Downloading {
                    mut file,
                    mut body,
                    mut bytes_read,
                    expected_length,
                } => match body.next().await {
                    Some(Ok(chunk)) => {
                        if let Err(e) = file.write(&chunk).await {
                            return Some(failed(format!("write error: {}", e)));
                        }
                        bytes_read += chunk.len() as u64;
                        Some((
                            FetchEvent::Progress {
                                bytes_read,
                                expected_length,
                            },
                            FetchState::Downloading {
                                file,
                                body,
                                bytes_read,
                                expected_length,
                            },
                        ))
                    }
                    Some(Err(e)) => Some(failed(format!("body read failed: {}", e))),
                    None => match file.finish().await {
                        Ok(path) => Some((FetchEvent::Completed(path), FetchState::Finished)),
                        Err(e) => Some(failed(format!("failed to flush file: {}", e))),
                    },
                },
                FetchState::Finished => None,
            }
        })
        .boxed()
    }
}

fn failed(message: String) -> (FetchEvent, FetchState) {
    (FetchEvent::Failed(message), FetchState::Finished)
}

enum FetchState {
    Start {
        client: reqwest::Client,
        url: String,
        path: PathBuf,
    },
    Request {
        client: reqwest::Client,
        url: String,
        path: PathBuf,
    },
    Downloading {
        file: PartialFile,
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        bytes_read: u64,
        expected_length: Option<u64>,
    },
    Finished,
}

/// File that is removed on drop unless [`PartialFile::finish`] succeeds
struct PartialFile {
    file: tokio::fs::File,
    path: PathBuf,
    keep: bool,
}

impl PartialFile {
    async fn create(path: PathBuf) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            file,
            path,
            keep: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await
    }

    async fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        self.keep = true;
        Ok(self.path.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial image file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial image file")
            }
        }
    }
}
