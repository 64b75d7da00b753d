//! Image progress source

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::emitter::JobEmitter;
use super::traits::{FetchEvent, ImageFetcher};
use crate::types::FailureReason;
use crate::utils::remove_temp_file;

/// Translates an [`ImageFetcher`] event stream into job snapshots
#[derive(Clone)]
pub struct ImageSource {
    fetcher: Arc<dyn ImageFetcher>,
    scratch_dir: PathBuf,
}

impl ImageSource {
    /// Create a source; completed files inside `scratch_dir` are discarded
    /// when the job is cancelled before they are handed over
    pub fn new(fetcher: Arc<dyn ImageFetcher>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Run the fetch for the emitter's link to completion or cancellation
    pub async fn run(&self, mut emitter: JobEmitter) {
        if !emitter.connecting().await {
            return;
        }

        let url = emitter.link().original_url.clone();
        let cancel = emitter.cancel_token().clone();
        let mut events = self.fetcher.fetch(&url);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(url = %url, "image fetch aborted");
                    return;
                }
                event = events.next() => event,
            };

            match event {
                Some(FetchEvent::Connecting) => {
                    if !emitter.connecting().await {
                        return;
                    }
                }
                Some(FetchEvent::Progress {
                    bytes_read,
                    expected_length,
                }) => {
                    if !emitter.progress(bytes_read, expected_length).await {
                        return;
                    }
                }
                Some(FetchEvent::Completed(file)) => {
                    drop(events);
                    if !emitter.downloaded(file.clone()).await {
                        self.discard(&file).await;
                    }
                    return;
                }
                Some(FetchEvent::Failed(message)) => {
                    tracing::warn!(url = %url, error = %message, "image fetch failed");
                    emitter.failed(FailureReason::Fetch, message).await;
                    return;
                }
                None => {
                    emitter
                        .failed(FailureReason::Fetch, "image fetch ended without a result")
                        .await;
                    return;
                }
            }
        }
    }

    async fn discard(&self, file: &Path) {
        if file.starts_with(&self.scratch_dir) {
            remove_temp_file(file).await;
        }
    }
}
