//! The control loop: sole owner of the dedup registry and the visible table.
//!
//! Every mutation of shared download state happens here, serialized through
//! one command channel. Pipelines never touch the tables directly; they report
//! snapshots as [`Command::Update`] tagged with the generation they were
//! started with, and updates from cancelled or superseded pipelines are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::lifecycle::IdleTracker;
use super::pipeline::{PipelineContext, PipelineShared, run_pipeline};
use crate::rate_gate::RateGate;
use crate::types::{CancelReason, DownloadJob, Event, JobState, Link, now_millis};

/// How long shutdown waits for pipelines to unwind before aborting them
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests handled by the control loop
pub(crate) enum Command {
    /// Accept a link unless it is already being downloaded
    Enqueue(Link),
    /// Stop a link's pipeline and withdraw its notification
    Cancel {
        /// Original URL of the link
        url: String,
        /// Which user action triggered the cancellation
        reason: CancelReason,
    },
    /// Snapshot reported by a pipeline
    Update {
        /// Generation the reporting pipeline was started with
        generation: u64,
        /// The snapshot
        job: DownloadJob,
    },
    /// Dedup registry membership query
    IsDownloading {
        url: String,
        reply: oneshot::Sender<bool>,
    },
    /// Copy of the visible table
    Snapshot {
        reply: oneshot::Sender<Vec<DownloadJob>>,
    },
    /// Answered once every earlier command has been handled
    Barrier { reply: oneshot::Sender<()> },
    /// Cancel everything and stop the loop
    Shutdown { reply: oneshot::Sender<()> },
}

struct ActivePipeline {
    generation: u64,
    cancel: CancellationToken,
}

pub(crate) struct Controller {
    rx: mpsc::Receiver<Command>,
    /// Weak so the loop ends once every handle and pipeline is gone
    weak_tx: mpsc::WeakSender<Command>,
    event_tx: broadcast::Sender<Event>,
    shared: Arc<PipelineShared>,
    /// URLs accepted and not yet terminal or cancelled (intake included)
    registry: HashSet<String>,
    active: HashMap<String, ActivePipeline>,
    intake: VecDeque<Link>,
    intake_gate: RateGate,
    /// Most recent snapshot per URL, as last shown to the sink
    visible: HashMap<String, DownloadJob>,
    idle: IdleTracker,
    pipelines: JoinSet<()>,
    shutdown: CancellationToken,
    next_generation: u64,
}

impl Controller {
    pub(crate) fn new(
        rx: mpsc::Receiver<Command>,
        weak_tx: mpsc::WeakSender<Command>,
        event_tx: broadcast::Sender<Event>,
        shared: Arc<PipelineShared>,
        idle: IdleTracker,
        intake_interval: Duration,
    ) -> Self {
        Self {
            rx,
            weak_tx,
            event_tx,
            shared,
            registry: HashSet::new(),
            active: HashMap::new(),
            intake: VecDeque::new(),
            intake_gate: RateGate::new(intake_interval),
            visible: HashMap::new(),
            idle,
            pipelines: JoinSet::new(),
            shutdown: CancellationToken::new(),
            next_generation: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let intake_at = self.intake_gate.opens_at();

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        tracing::debug!("All downloader handles dropped, stopping control loop");
                        self.shutdown().await;
                        return;
                    }
                },
                _ = tokio::time::sleep_until(intake_at), if !self.intake.is_empty() => {
                    self.admit_next();
                }
                Some(joined) = self.pipelines.join_next(), if !self.pipelines.is_empty() => {
                    if let Err(e) = joined
                        && e.is_panic()
                    {
                        tracing::error!(error = %e, "Download pipeline task panicked");
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(link) => self.enqueue(link),
            Command::Cancel { url, reason } => self.cancel(&url, reason),
            Command::Update { generation, job } => self.apply_update(generation, job),
            Command::IsDownloading { url, reply } => {
                let _ = reply.send(self.registry.contains(&url));
            }
            Command::Snapshot { reply } => {
                let mut jobs: Vec<DownloadJob> = self.visible.values().cloned().collect();
                jobs.sort_by(|a, b| {
                    a.timestamp_millis
                        .cmp(&b.timestamp_millis)
                        .then_with(|| a.url().cmp(b.url()))
                });
                let _ = reply.send(jobs);
            }
            Command::Barrier { reply } => {
                let _ = reply.send(());
            }
            // Handled by the loop before dispatch
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn enqueue(&mut self, link: Link) {
        if self.registry.contains(&link.original_url) {
            tracing::warn!(url = %link.original_url, "Ignoring ongoing download");
            return;
        }

        tracing::info!(
            url = %link.original_url,
            is_video = link.is_video,
            "Accepted download"
        );
        self.registry.insert(link.original_url.clone());
        self.intake.push_back(link);
        self.refresh_idle();
    }

    /// Start the oldest accepted link; called when the intake gate opens
    fn admit_next(&mut self) {
        let Some(link) = self.intake.pop_front() else {
            return;
        };
        self.intake_gate.pass(Instant::now());

        let Some(commands) = self.weak_tx.upgrade() else {
            // No handle can observe the job any more
            self.registry.remove(&link.original_url);
            self.refresh_idle();
            return;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = self.shutdown.child_token();
        self.active.insert(
            link.original_url.clone(),
            ActivePipeline {
                generation,
                cancel: cancel.clone(),
            },
        );

        self.publish(DownloadJob::queued(link.clone(), now_millis()));

        tracing::debug!(
            url = %link.original_url,
            generation,
            queued = self.intake.len(),
            "Starting download pipeline"
        );
        self.pipelines.spawn(run_pipeline(PipelineContext {
            link,
            generation,
            cancel,
            commands,
            shared: Arc::clone(&self.shared),
        }));
    }

    fn cancel(&mut self, url: &str, reason: CancelReason) {
        let was_tracked = self.registry.remove(url);
        if let Some(pipeline) = self.active.remove(url) {
            pipeline.cancel.cancel();
        }
        self.intake.retain(|link| link.original_url != url);

        if self.visible.remove(url).is_some() {
            tracing::info!(url = %url, reason = ?reason, "Withdrawing download notification");
            self.emit(Event::Withdrawn {
                url: url.to_string(),
                reason,
            });
        } else if !was_tracked {
            tracing::debug!(url = %url, "Cancel for untracked link ignored");
        }

        self.refresh_idle();
    }

    fn apply_update(&mut self, generation: u64, job: DownloadJob) {
        let current = self
            .active
            .get(job.url())
            .is_some_and(|pipeline| pipeline.generation == generation);
        if !current {
            tracing::debug!(
                url = %job.url(),
                generation,
                state = ?job.state,
                "Discarding update from stale pipeline"
            );
            return;
        }

        if job.is_terminal() {
            self.registry.remove(job.url());
            self.active.remove(job.url());
            match (&job.state, &job.failure) {
                (JobState::Failed, Some(failure)) => tracing::warn!(
                    url = %job.url(),
                    reason = ?failure.reason,
                    error = %failure.message,
                    "Download failed"
                ),
                _ => tracing::info!(
                    url = %job.url(),
                    file = ?job.result_file(),
                    "Download finished"
                ),
            }
        }

        self.publish(job);
    }

    fn publish(&mut self, job: DownloadJob) {
        self.visible.insert(job.url().to_string(), job.clone());
        self.emit(Event::Updated(job));
        self.refresh_idle();
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine
        self.event_tx.send(event).ok();
    }

    fn refresh_idle(&mut self) {
        let finished = self.intake.is_empty()
            && self
                .visible
                .values()
                .all(|job| job.state == JobState::Downloaded);
        self.idle.update(finished);
    }

    async fn shutdown(&mut self) {
        tracing::info!(
            active = self.active.len(),
            queued = self.intake.len(),
            "Initiating graceful shutdown"
        );

        self.rx.close();
        self.shutdown.cancel();
        self.active.clear();
        self.intake.clear();
        self.registry.clear();

        let pipelines = &mut self.pipelines;
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while pipelines.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Timeout waiting for pipelines to stop, aborting them");
            self.pipelines.abort_all();
            while self.pipelines.join_next().await.is_some() {}
        }

        self.emit(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
    }
}
