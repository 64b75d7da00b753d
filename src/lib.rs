//! # media-dl
//!
//! Background download orchestration for media (images, videos) referenced by links.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, the presentation layer subscribes to events
//! - **Deduplicating** - A URL is never downloaded twice concurrently
//! - **Cancellable** - A cancelled download stops emitting immediately
//! - **Rate-limited** - Progress updates per link are coalesced so notification
//!   renderers are never flooded, and terminal updates are never dropped
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, Event, Link, MediaDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = MediaDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             match event {
//!                 Event::Updated(job) => println!("{}: {:?}", job.url(), job.state),
//!                 Event::AllFinished => println!("all downloads finished"),
//!                 _ => {}
//!             }
//!         }
//!     });
//!
//!     downloader.enqueue(Link::image("https://i.example.com/cat.png")).await?;
//!     downloader.wait_until_idle().await?;
//!     downloader.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Minimum-interval gating for progress updates
pub mod rate_gate;
/// Moving finished downloads into user-visible storage
pub mod relocate;
/// Progress source adapters and their collaborators
pub mod sources;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction};
pub use downloader::{Collaborators, MediaDownloader};
pub use error::{Error, Result};
pub use relocate::{DirectoryRelocator, FileRelocator};
pub use sources::{ImageFetcher, VideoCache, VideoResolver};
pub use types::{CancelReason, DownloadJob, Event, Failure, FailureReason, JobState, Link};

/// Helper function to run the downloader until its work is done.
///
/// Waits until every tracked download has finished or a termination signal
/// arrives, whichever comes first, and then calls the downloader's `shutdown()`.
///
/// - **Unix:** listens for SIGTERM and Ctrl+C (SIGINT).
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, Link, MediaDownloader, run_until_idle};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(Config::default()).await?;
///     downloader.enqueue(Link::video("https://v.example.com/clip.mp4")).await?;
///
///     // Returns once the download finished, or on Ctrl+C
///     run_until_idle(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_until_idle(downloader: MediaDownloader) -> Result<()> {
    tokio::select! {
        idle = downloader.wait_until_idle() => {
            if let Err(e) = idle {
                tracing::warn!(error = %e, "Stopped waiting for downloads");
            }
        }
        _ = wait_for_signal() => {}
    }
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments; Ctrl+C still works there
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
