//! Shared test helpers: fake collaborators and downloader construction.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::Config;
use crate::downloader::{Collaborators, MediaDownloader};
use crate::error::{Error, Result};
use crate::relocate::FileRelocator;
use crate::sources::{FetchEvent, ImageFetcher, VideoCache, VideoResolver};
use crate::types::{DownloadJob, Event, Link};

/// Upper bound for any single wait in orchestrator tests
pub(crate) const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test-side end of one fetch started by [`ControlledImageFetcher`]
pub(crate) struct FetchHandle {
    pub(crate) url: String,
    pub(crate) events: mpsc::UnboundedSender<FetchEvent>,
}

impl FetchHandle {
    /// Push an event into the fetch stream; false once the stream was dropped
    pub(crate) fn send(&self, event: FetchEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Finish the fetch with a file written under `dir`
    pub(crate) fn complete_in(&self, dir: &Path) -> PathBuf {
        let file = crate::utils::temp_file_path(dir, "fake", &self.url);
        std::fs::write(&file, b"fake media").unwrap();
        self.send(FetchEvent::Completed(file.clone()));
        file
    }
}

/// Image fetcher whose streams are driven by the test
pub(crate) struct ControlledImageFetcher {
    started: mpsc::UnboundedSender<FetchHandle>,
    calls: Arc<AtomicUsize>,
}

impl ControlledImageFetcher {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FetchHandle>, Arc<AtomicUsize>) {
        let (started, handles) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                started,
                calls: Arc::clone(&calls),
            },
            handles,
            calls,
        )
    }
}

impl ImageFetcher for ControlledImageFetcher {
    fn fetch(&self, url: &str) -> BoxStream<'static, FetchEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.started.send(FetchHandle {
            url: url.to_string(),
            events,
        });
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// Image fetcher that completes immediately with a small file in `dir`
pub(crate) struct InstantImageFetcher {
    pub(crate) dir: PathBuf,
}

impl ImageFetcher for InstantImageFetcher {
    fn fetch(&self, url: &str) -> BoxStream<'static, FetchEvent> {
        let file = crate::utils::temp_file_path(&self.dir, "fake", url);
        if let Err(e) = std::fs::write(&file, vec![0u8; 1024]) {
            return stream::iter(vec![FetchEvent::Failed(e.to_string())]).boxed();
        }
        stream::iter(vec![
            FetchEvent::Connecting,
            FetchEvent::Progress {
                bytes_read: 512,
                expected_length: Some(1024),
            },
            FetchEvent::Progress {
                bytes_read: 1024,
                expected_length: Some(1024),
            },
            FetchEvent::Completed(file),
        ])
        .boxed()
    }
}

/// Image fetcher that always reports a failure
pub(crate) struct FailingImageFetcher;

impl ImageFetcher for FailingImageFetcher {
    fn fetch(&self, _url: &str) -> BoxStream<'static, FetchEvent> {
        stream::iter(vec![
            FetchEvent::Connecting,
            FetchEvent::Failed("HTTP 500".to_string()),
        ])
        .boxed()
    }
}

/// Image fetcher that panics for URLs containing "boom", else defers to `inner`
pub(crate) struct PanickingImageFetcher {
    pub(crate) inner: InstantImageFetcher,
}

impl ImageFetcher for PanickingImageFetcher {
    fn fetch(&self, url: &str) -> BoxStream<'static, FetchEvent> {
        if url.contains("boom") {
            return stream::iter(vec![FetchEvent::Connecting])
                .map(|_| -> FetchEvent { panic!("fetcher exploded") })
                .boxed();
        }
        self.inner.fetch(url)
    }
}

/// Resolver mapping `https://host/watch/<id>` to `https://cdn.example.com/<id>.mp4`
pub(crate) struct FakeResolver {
    pub(crate) fail: bool,
}

#[async_trait]
impl VideoResolver for FakeResolver {
    async fn resolve(&self, link: &Link) -> Result<Link> {
        if self.fail {
            return Err(Error::Resolve("no playable stream".to_string()));
        }
        let id = link
            .original_url
            .rsplit('/')
            .next()
            .unwrap_or("video")
            .to_string();
        Ok(link
            .clone()
            .with_resolved_video_url(format!("https://cdn.example.com/{}.mp4", id)))
    }
}

/// Video cache holding a fixed set of files
#[derive(Default)]
pub(crate) struct FakeVideoCache {
    pub(crate) files: HashMap<String, PathBuf>,
}

impl VideoCache for FakeVideoCache {
    fn is_cached(&self, url: &str) -> bool {
        self.files.contains_key(url)
    }

    fn proxy_url(&self, url: &str) -> String {
        match self.files.get(url) {
            Some(path) => url::Url::from_file_path(path)
                .map(|u| u.to_string())
                .unwrap_or_else(|()| path.display().to_string()),
            None => url.to_string(),
        }
    }
}

/// Relocator that is never allowed to write
pub(crate) struct DeniedRelocator;

#[async_trait]
impl FileRelocator for DeniedRelocator {
    async fn relocate(&self, _file: &Path, suggested_name: &str) -> Result<PathBuf> {
        Err(Error::PermissionDenied {
            path: PathBuf::from("/protected").join(suggested_name),
        })
    }
}

/// Relocator that holds every call until released, then defers to `inner`
pub(crate) struct GatedRelocator {
    pub(crate) inner: crate::relocate::DirectoryRelocator,
    pub(crate) started: mpsc::UnboundedSender<()>,
    pub(crate) release: Arc<tokio::sync::Notify>,
    pub(crate) finished: mpsc::UnboundedSender<PathBuf>,
}

#[async_trait]
impl FileRelocator for GatedRelocator {
    async fn relocate(&self, file: &Path, suggested_name: &str) -> Result<PathBuf> {
        let _ = self.started.send(());
        self.release.notified().await;
        let target = self.inner.relocate(file, suggested_name).await?;
        let _ = self.finished.send(target.clone());
        Ok(target)
    }
}

/// Config rooted in `root` with short windows for fast tests
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.max_concurrent_downloads = 3;
    config.events.update_interval = Duration::from_millis(20);
    config.events.intake_interval = Duration::from_millis(10);
    config
}

/// Helper to create a test MediaDownloader using `fetcher` for images.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    fetcher: Arc<dyn ImageFetcher>,
) -> (MediaDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let downloader = build_downloader(config, |c| c.with_image_fetcher(fetcher)).await;
    (downloader, temp_dir)
}

/// Build a downloader from `config`, adjusting the default collaborators
pub(crate) async fn build_downloader(
    config: Config,
    adjust: impl FnOnce(Collaborators) -> Collaborators,
) -> MediaDownloader {
    let collaborators = adjust(Collaborators::from_config(&config).unwrap());
    MediaDownloader::with_collaborators(config, collaborators)
        .await
        .unwrap()
}

/// Next event, failing the test after [`EVENT_TIMEOUT`]
pub(crate) async fn next_event(events: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect `url`'s snapshots up to and including its terminal one
pub(crate) async fn updates_until_terminal(
    events: &mut broadcast::Receiver<Event>,
    url: &str,
) -> Vec<DownloadJob> {
    let mut jobs = Vec::new();
    loop {
        if let Event::Updated(job) = next_event(events).await
            && job.url() == url
        {
            let terminal = job.is_terminal();
            jobs.push(job);
            if terminal {
                return jobs;
            }
        }
    }
}

/// Wait for the first snapshot of `url` matching `predicate`
pub(crate) async fn wait_for_update(
    events: &mut broadcast::Receiver<Event>,
    url: &str,
    predicate: impl Fn(&DownloadJob) -> bool,
) -> DownloadJob {
    loop {
        if let Event::Updated(job) = next_event(events).await
            && job.url() == url
            && predicate(&job)
        {
            return job;
        }
    }
}

/// Wait for the next fetch the downloader starts
pub(crate) async fn next_fetch(handles: &mut mpsc::UnboundedReceiver<FetchHandle>) -> FetchHandle {
    tokio::time::timeout(EVENT_TIMEOUT, handles.recv())
        .await
        .expect("timed out waiting for fetch")
        .expect("fetcher dropped")
}

/// Every event received within `window`
pub(crate) async fn events_within(
    events: &mut broadcast::Receiver<Event>,
    window: Duration,
) -> Vec<Event> {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        received.push(event);
    }
    received
}
