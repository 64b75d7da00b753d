//! Aggregate completion tracking and shutdown coordination.

use tokio::sync::{broadcast, oneshot, watch};

use super::MediaDownloader;
use super::controller::Command;
use crate::error::{Error, Result};
use crate::types::Event;

/// Edge detector for the "all downloads finished" state
///
/// Owned by the control loop. The state starts out finished (nothing is
/// tracked), and [`Event::AllFinished`] is emitted once per transition from
/// unfinished to finished.
pub(crate) struct IdleTracker {
    finished: bool,
    idle_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<Event>,
}

impl IdleTracker {
    pub(crate) fn new(event_tx: broadcast::Sender<Event>) -> (Self, watch::Receiver<bool>) {
        let (idle_tx, idle_rx) = watch::channel(true);
        (
            Self {
                finished: true,
                idle_tx,
                event_tx,
            },
            idle_rx,
        )
    }

    /// Record the current aggregate state, signalling on the finishing edge
    pub(crate) fn update(&mut self, finished: bool) {
        if finished == self.finished {
            return;
        }
        self.finished = finished;
        self.idle_tx.send_replace(finished);

        if finished {
            tracing::info!("All downloads finished");
            self.event_tx.send(Event::AllFinished).ok();
        } else {
            tracing::debug!("Downloads pending");
        }
    }
}

impl MediaDownloader {
    /// Wait until every tracked download has finished
    ///
    /// Links enqueued through this handle before the call are taken into
    /// account. Returns immediately when nothing is tracked. A failed job that
    /// is still shown keeps the downloader busy until its notification is
    /// dismissed with [`cancel_notification`](Self::cancel_notification).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the downloader shuts down first.
    pub async fn wait_until_idle(&self) -> Result<()> {
        self.barrier().await?;
        let mut idle = self.idle_rx.clone();
        idle.wait_for(|finished| *finished)
            .await
            .map_err(|_| Error::ShuttingDown)?;
        Ok(())
    }

    /// Whether every tracked download has finished, as last reported
    pub fn is_idle(&self) -> bool {
        *self.idle_rx.borrow()
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting commands and drops queued links
    /// 2. Cancels all running pipelines (their temp files are removed)
    /// 3. Waits for pipelines to unwind, aborting them after a timeout
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Calling it again after the downloader has stopped is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown { reply }).await.is_err() {
            tracing::debug!("Downloader already shut down");
            return Ok(());
        }
        // A dropped reply means another shutdown finished first
        done.await.ok();
        Ok(())
    }
}
