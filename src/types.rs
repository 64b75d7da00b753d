//! Core types for media-dl

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// A remote media resource to be downloaded.
///
/// Identity is the original URL: two links with the same `original_url` are
/// equal even if only one of them has been resolved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    /// URL the link was created from (stable identity key)
    pub original_url: String,
    /// Whether the link points at a video
    pub is_video: bool,
    /// Direct playable URL, populated by a video resolver before download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_video_url: Option<String>,
}

impl Link {
    /// Create a link to an image
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            original_url: url.into(),
            is_video: false,
            resolved_video_url: None,
        }
    }

    /// Create a link to a video that still needs resolving
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            original_url: url.into(),
            is_video: true,
            resolved_video_url: None,
        }
    }

    /// Return a copy of this link with its playable video URL filled in
    #[must_use]
    pub fn with_resolved_video_url(mut self, url: impl Into<String>) -> Self {
        self.resolved_video_url = Some(url.into());
        self
    }

    /// URL the media bytes are actually fetched from.
    ///
    /// Videos use the resolved URL when present; images always use the original.
    pub fn media_url(&self) -> &str {
        match (&self.resolved_video_url, self.is_video) {
            (Some(resolved), true) => resolved,
            _ => &self.original_url,
        }
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.original_url == other.original_url
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.original_url.hash(state);
    }
}

/// Lifecycle state of a download job.
///
/// Variants are declared in lifecycle order, so `Ord` compares progress
/// through the lifecycle (`Queued < Connecting < InFlight < terminal`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a pipeline slot
    Queued,
    /// Adapter started work, progress indeterminate
    Connecting,
    /// Bytes are flowing and the expected length is known
    InFlight,
    /// Finished successfully
    Downloaded,
    /// Finished with an error
    Failed,
}

impl JobState {
    /// Whether no further updates can follow this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Downloaded | JobState::Failed)
    }
}

/// Failure classification surfaced to the presentation layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Network error, timeout, non-2xx response or resolver failure
    Fetch,
    /// Storage access denied
    Permission,
    /// Local I/O failure other than a permission problem
    Storage,
    /// Broken invariant caught at the pipeline boundary
    Internal,
}

impl FailureReason {
    /// Whether resubmitting the same link can reasonably succeed.
    ///
    /// Permission failures need user action first, so the presentation layer
    /// should suggest fixing the permission instead of offering a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::Permission)
    }
}

/// Details attached to a failed job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Classification of the failure
    pub reason: FailureReason,
    /// Human-readable description
    pub message: String,
}

/// Immutable snapshot of one link's download lifecycle.
///
/// A state transition produces a new snapshot; snapshots are never mutated
/// after they are emitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    /// The link being downloaded
    pub link: Link,
    /// Current lifecycle state
    pub state: JobState,
    /// Progress in percent (0-100), only meaningful in `InFlight`
    pub progress_percent: u8,
    /// Unix timestamp in milliseconds of the transition into `state`
    pub timestamp_millis: i64,
    /// Downloaded file, present only when `state` is `Downloaded`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<PathBuf>,
    /// Failure details, present only when `state` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl DownloadJob {
    fn new(link: Link, state: JobState, timestamp_millis: i64) -> Self {
        Self {
            link,
            state,
            progress_percent: 0,
            timestamp_millis,
            result_file: None,
            failure: None,
        }
    }

    /// Snapshot for a freshly accepted link
    pub fn queued(link: Link, timestamp_millis: i64) -> Self {
        Self::new(link, JobState::Queued, timestamp_millis)
    }

    /// Snapshot for an adapter that started work
    pub fn connecting(link: Link, timestamp_millis: i64) -> Self {
        Self::new(link, JobState::Connecting, timestamp_millis)
    }

    /// Snapshot carrying download progress (clamped to 100)
    pub fn in_flight(link: Link, progress_percent: u8, timestamp_millis: i64) -> Self {
        Self {
            progress_percent: progress_percent.min(100),
            ..Self::new(link, JobState::InFlight, timestamp_millis)
        }
    }

    /// Terminal snapshot for a finished download
    pub fn downloaded(link: Link, file: PathBuf, timestamp_millis: i64) -> Self {
        Self {
            progress_percent: 100,
            result_file: Some(file),
            ..Self::new(link, JobState::Downloaded, timestamp_millis)
        }
    }

    /// Terminal snapshot for a failed download
    pub fn failed(
        link: Link,
        reason: FailureReason,
        message: impl Into<String>,
        timestamp_millis: i64,
    ) -> Self {
        Self {
            failure: Some(Failure {
                reason,
                message: message.into(),
            }),
            ..Self::new(link, JobState::Failed, timestamp_millis)
        }
    }

    /// Identity key of the job (the link's original URL)
    pub fn url(&self) -> &str {
        &self.link.original_url
    }

    /// Whether this snapshot ends the job's lifecycle
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Downloaded file, if the job finished successfully
    pub fn result_file(&self) -> Option<&Path> {
        self.result_file.as_deref()
    }
}

/// Current wall-clock time as Unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Why a visible notification was withdrawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The user cancelled an in-progress download
    Download,
    /// The user dismissed a finished or failed notification
    Notification,
}

/// Event published to subscribers (the presentation layer)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new snapshot for a link; render or re-render its notification
    Updated(DownloadJob),

    /// A link's notification should be cleared
    Withdrawn {
        /// Original URL of the link
        url: String,
        /// What triggered the withdrawal
        reason: CancelReason,
    },

    /// Every tracked job has finished downloading; the host may release resources
    AllFinished,

    /// The downloader has shut down
    Shutdown,
}
