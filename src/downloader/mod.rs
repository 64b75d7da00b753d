//! Core downloader implementation split into focused submodules.
//!
//! The `MediaDownloader` handle and its methods are organized by domain:
//! - [`control`] - Enqueue, cancellation and introspection requests
//! - [`controller`] - The single-owner control loop (dedup registry, intake
//!   pacing, visible-notification table)
//! - [`pipeline`] - Per-link download pipeline (adapter selection, rate
//!   limiting, relocation, failure containment)
//! - [`lifecycle`] - Aggregate completion tracking and shutdown coordination

mod control;
mod controller;
mod lifecycle;
mod pipeline;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::relocate::{DirectoryRelocator, FileRelocator};
use crate::sources::{
    HttpImageFetcher, ImageFetcher, ImageSource, NoVideoCache, PassthroughResolver, VideoCache,
    VideoResolver, VideoSource,
};
use crate::types::Event;

use controller::{Command, Controller};
use lifecycle::IdleTracker;
use pipeline::PipelineShared;

/// External collaborators the pipelines delegate to
///
/// [`Collaborators::from_config`] wires the built-in implementations; swap
/// individual pieces with the `with_*` methods.
#[derive(Clone)]
pub struct Collaborators {
    /// Image fetch pipeline
    pub image_fetcher: Arc<dyn ImageFetcher>,
    /// Resolves video links to playable URLs
    pub video_resolver: Arc<dyn VideoResolver>,
    /// Caching byte-stream provider for videos
    pub video_cache: Arc<dyn VideoCache>,
    /// Moves finished downloads into user-visible storage
    pub relocator: Arc<dyn FileRelocator>,
    /// HTTP client used for video proxy streams
    pub http_client: reqwest::Client,
}

impl Collaborators {
    /// Built-in collaborators: HTTP image fetcher, pass-through resolver, no
    /// video cache, and a relocator targeting `download_dir`
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = config.http.build_client()?;
        Ok(Self {
            image_fetcher: Arc::new(HttpImageFetcher::new(
                http_client.clone(),
                config.temp_dir().clone(),
            )),
            video_resolver: Arc::new(PassthroughResolver),
            video_cache: Arc::new(NoVideoCache),
            relocator: Arc::new(DirectoryRelocator::new(
                config.download_dir().clone(),
                config.download.file_collision,
            )),
            http_client,
        })
    }

    /// Replace the image fetcher
    #[must_use]
    pub fn with_image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.image_fetcher = fetcher;
        self
    }

    /// Replace the video resolver
    #[must_use]
    pub fn with_video_resolver(mut self, resolver: Arc<dyn VideoResolver>) -> Self {
        self.video_resolver = resolver;
        self
    }

    /// Replace the video cache
    #[must_use]
    pub fn with_video_cache(mut self, cache: Arc<dyn VideoCache>) -> Self {
        self.video_cache = cache;
        self
    }

    /// Replace the file relocator
    #[must_use]
    pub fn with_relocator(mut self, relocator: Arc<dyn FileRelocator>) -> Self {
        self.relocator = relocator;
        self
    }
}

/// Main downloader handle (cloneable - every clone talks to the same control loop)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Command channel into the control loop
    pub(crate) command_tx: mpsc::Sender<Command>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Mirrors the all-finished state maintained by the control loop
    pub(crate) idle_rx: watch::Receiver<bool>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
}

impl MediaDownloader {
    /// Create a new MediaDownloader with the built-in collaborators
    ///
    /// This validates the configuration, creates the download and temp
    /// directories, and spawns the control loop on the current runtime.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators).await
    }

    /// Create a new MediaDownloader with injected collaborators
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        // Ensure download and temp directories exist
        create_dir(config.download_dir(), "download").await?;
        create_dir(config.temp_dir(), "temp").await?;

        let (event_tx, _rx) = broadcast::channel(config.events.channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(config.events.channel_capacity);

        let shared = Arc::new(PipelineShared {
            image: ImageSource::new(collaborators.image_fetcher, config.temp_dir().clone()),
            video: VideoSource::new(
                collaborators.video_cache,
                collaborators.http_client,
                config.temp_dir().clone(),
            ),
            resolver: collaborators.video_resolver,
            relocator: collaborators.relocator,
            limit: match config.download.max_concurrent_downloads {
                0 => None,
                permits => Some(Arc::new(tokio::sync::Semaphore::new(permits))),
            },
            temp_dir: config.temp_dir().clone(),
            update_interval: config.events.update_interval,
        });

        let (idle, idle_rx) = IdleTracker::new(event_tx.clone());
        let controller = Controller::new(
            command_rx,
            command_tx.downgrade(),
            event_tx.clone(),
            shared,
            idle,
            config.events.intake_interval,
        );
        tokio::spawn(controller.run());

        tracing::info!(
            download_dir = %config.download_dir().display(),
            max_concurrent = config.download.max_concurrent_downloads,
            "Media downloader started"
        );

        Ok(Self {
            command_tx,
            event_tx,
            idle_rx,
            config: Arc::new(config),
        })
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than `channel_capacity`
    /// events, it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, Event, MediaDownloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             if let Event::Updated(job) = event {
    ///                 println!("{} -> {:?}", job.url(), job.state);
    ///             }
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a stream; lagged events are skipped
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "Event subscriber lagged");
                None
            }
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

async fn create_dir(path: &std::path::Path, label: &str) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to create {} directory '{}': {}",
                label,
                path.display(),
                e
            ),
        ))
    })
}
