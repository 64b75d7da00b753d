//! Download control - enqueue, cancel, dismiss and introspection.
//!
//! Every request is forwarded to the control loop, so concurrent callers are
//! serialized there and never race on the dedup registry.

use tokio::sync::oneshot;

use super::MediaDownloader;
use super::controller::Command;
use crate::error::{Error, Result};
use crate::types::{CancelReason, DownloadJob, Link};

impl MediaDownloader {
    /// Start downloading a link
    ///
    /// A `Queued` snapshot is published as soon as the link passes intake
    /// pacing, and the pipeline starts right after. A link whose URL is
    /// already being downloaded is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the downloader has shut down.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// downloader.enqueue(Link::image("https://i.example.com/cat.png")).await?;
    /// downloader
    ///     .enqueue(Link::video("https://v.example.com/watch/42"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(&self, link: Link) -> Result<()> {
        self.send(Command::Enqueue(link)).await
    }

    /// Cancel an in-progress download
    ///
    /// The pipeline is stopped, no further snapshots for the link are
    /// published, and its notification is withdrawn with
    /// [`Event::Withdrawn`](crate::Event::Withdrawn). Cancelling a link that
    /// already finished only withdraws its notification; cancelling an
    /// untracked link does nothing.
    pub async fn cancel(&self, link: &Link) -> Result<()> {
        self.send(Command::Cancel {
            url: link.original_url.clone(),
            reason: CancelReason::Download,
        })
        .await
    }

    /// Dismiss a link's notification
    ///
    /// Same effect as [`cancel`](Self::cancel); used when the user dismisses a
    /// finished or failed result rather than a running download.
    pub async fn cancel_notification(&self, link: &Link) -> Result<()> {
        self.send(Command::Cancel {
            url: link.original_url.clone(),
            reason: CancelReason::Notification,
        })
        .await
    }

    /// Whether a download for `url` is accepted and not yet finished
    pub async fn is_downloading(&self, url: &str) -> Result<bool> {
        self.request(|reply| Command::IsDownloading {
            url: url.to_string(),
            reply,
        })
        .await
    }

    /// Latest snapshot of every visible download, oldest transition first
    pub async fn snapshot(&self) -> Result<Vec<DownloadJob>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Resolves once the control loop has handled every earlier command
    pub(crate) async fn barrier(&self) -> Result<()> {
        self.request(|reply| Command::Barrier { reply }).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| Error::ShuttingDown)
    }
}
