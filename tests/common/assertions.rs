//! Custom test assertions for integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;
use media_dl::{Event, Failure, JobState};
use tokio::sync::broadcast;

/// Result of waiting for a link to reach a terminal state
#[derive(Debug)]
pub enum WaitResult {
    /// Download finished at the given path
    Downloaded(PathBuf),
    /// Download failed
    Failed(Failure),
    /// Timeout waiting for a terminal state
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for the link identified by `url` to reach DOWNLOADED or FAILED
///
/// # Arguments
/// * `events` - Receiver subscribed before the link was enqueued
/// * `url` - Original URL of the link
/// * `timeout` - Maximum time to wait
pub async fn wait_for_terminal(
    events: &mut broadcast::Receiver<Event>,
    url: &str,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Updated(job)) if job.url() == url && job.is_terminal() => {
                    return match (job.state, job.result_file, job.failure) {
                        (JobState::Downloaded, Some(file), _) => WaitResult::Downloaded(file),
                        (_, _, Some(failure)) => WaitResult::Failed(failure),
                        (state, _, _) => panic!("terminal job in {:?} without details", state),
                    };
                }
                Ok(_) => {
                    // Other events, continue waiting
                    continue;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return WaitResult::ChannelClosed;
                }
            }
        }
    })
    .await;

    match result {
        Ok(wait_result) => wait_result,
        Err(_) => WaitResult::Timeout,
    }
}

/// Collect all events until timeout or predicate is satisfied
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Assert that all expected files exist in a directory
pub fn assert_files_exist(dir: &Path, expected_files: &[&str]) {
    for file in expected_files {
        let path = dir.join(file);
        assert!(path.exists(), "Expected file not found: {}", path.display());
    }
}

/// Assert that a directory holds no entries
pub fn assert_dir_empty(dir: &Path) {
    let entries: Vec<_> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert!(
        entries.is_empty(),
        "Expected {} to be empty, found {:?}",
        dir.display(),
        entries
    );
}
