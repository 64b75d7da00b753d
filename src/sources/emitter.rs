//! Job emitter - the write side of a per-link update channel

use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::{DownloadJob, FailureReason, Link, now_millis};

/// Percent complete as `floor(100 * bytes_read / expected_length)`.
///
/// Returns `None` when the length is unknown or zero, and when the read is
/// already complete: 100% is only ever reported by the terminal snapshot.
///
/// # Examples
///
/// ```
/// use media_dl::sources::progress_percent;
///
/// assert_eq!(progress_percent(500, Some(1000)), Some(50));
/// assert_eq!(progress_percent(999, Some(1000)), Some(99));
/// assert_eq!(progress_percent(1000, Some(1000)), None);
/// assert_eq!(progress_percent(10, None), None);
/// ```
#[must_use]
pub fn progress_percent(bytes_read: u64, expected_length: Option<u64>) -> Option<u8> {
    let expected = expected_length.filter(|len| *len > 0)?;
    if bytes_read >= expected {
        return None;
    }
    Some((u128::from(bytes_read) * 100 / u128::from(expected)) as u8)
}

/// Emits the snapshots of one link's download into its pipeline.
///
/// The emitter enforces the adapter contract:
/// - `Connecting` is sent once, before any `InFlight` update
/// - `InFlight` updates are only sent when the rounded percentage increases
/// - the terminal methods consume the emitter, so nothing follows them
/// - after cancellation nothing is sent at all
///
/// Every non-terminal method returns `false` once the adapter should stop.
pub struct JobEmitter {
    link: Link,
    tx: mpsc::Sender<DownloadJob>,
    cancel: CancellationToken,
    connecting_since: Option<i64>,
    in_flight_since: Option<i64>,
    last_percent: Option<u8>,
}

impl JobEmitter {
    /// Create an emitter for `link` sending into `tx`
    pub fn new(link: Link, tx: mpsc::Sender<DownloadJob>, cancel: CancellationToken) -> Self {
        Self {
            link,
            tx,
            cancel,
            connecting_since: None,
            in_flight_since: None,
            last_percent: None,
        }
    }

    /// The link snapshots are emitted for
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Token cancelled when the job is cancelled
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the job was cancelled or its pipeline is gone
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    async fn send(&self, job: DownloadJob) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            sent = self.tx.send(job) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Report that work has started (sent at most once)
    pub async fn connecting(&mut self) -> bool {
        if self.connecting_since.is_some() {
            return !self.is_cancelled();
        }
        let now = now_millis();
        self.connecting_since = Some(now);
        self.send(DownloadJob::connecting(self.link.clone(), now))
            .await
    }

    /// Report bytes read so far.
    ///
    /// Stays in `Connecting` while the expected length is unknown, and skips
    /// updates that do not raise the rounded percentage.
    pub async fn progress(&mut self, bytes_read: u64, expected_length: Option<u64>) -> bool {
        if !self.connecting().await {
            return false;
        }
        let Some(percent) = progress_percent(bytes_read, expected_length) else {
            return !self.is_cancelled();
        };
        if self.last_percent.is_some_and(|last| percent <= last) {
            return !self.is_cancelled();
        }
        self.last_percent = Some(percent);
        let since = *self.in_flight_since.get_or_insert_with(now_millis);
        self.send(DownloadJob::in_flight(self.link.clone(), percent, since))
            .await
    }

    /// Finish with the downloaded file
    pub async fn downloaded(self, file: PathBuf) -> bool {
        let job = DownloadJob::downloaded(self.link.clone(), file, now_millis());
        self.send(job).await
    }

    /// Finish with a failure
    pub async fn failed(self, reason: FailureReason, message: impl Into<String>) -> bool {
        let job = DownloadJob::failed(self.link.clone(), reason, message, now_millis());
        self.send(job).await
    }

    /// Finish with a failure classified from `err`
    pub async fn fail_with(self, err: &Error) -> bool {
        self.failed(err.failure_reason(), err.to_string()).await
    }
}
