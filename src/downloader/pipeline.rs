//! Per-link download pipeline.
//!
//! ```text
//! slot permit -> [resolve] -> adapter --mpsc--> throttle -> [relocate] -> control loop
//! ```
//!
//! The adapter and the throttle stage run concurrently on the pipeline task.
//! Errors become `Failed` snapshots and a panic anywhere in the pipeline is
//! caught here, so nothing escapes into the control loop.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::controller::Command;
use crate::error::Error;
use crate::rate_gate::throttle;
use crate::relocate::FileRelocator;
use crate::sources::{ImageSource, JobEmitter, VideoResolver, VideoSource};
use crate::types::{DownloadJob, FailureReason, JobState, Link, now_millis};
use crate::utils::{file_name_from_url, remove_temp_file};

/// Buffer between an adapter and its throttle stage
const UPDATE_BUFFER: usize = 32;

/// Collaborators and settings shared by every pipeline
pub(crate) struct PipelineShared {
    pub(crate) image: ImageSource,
    pub(crate) video: VideoSource,
    pub(crate) resolver: Arc<dyn VideoResolver>,
    pub(crate) relocator: Arc<dyn FileRelocator>,
    /// Pipeline slots; `None` means unbounded
    pub(crate) limit: Option<Arc<Semaphore>>,
    /// Files under this directory belong to the downloader and are removed
    /// once relocated
    pub(crate) temp_dir: PathBuf,
    pub(crate) update_interval: Duration,
}

/// Everything one pipeline run needs
pub(crate) struct PipelineContext {
    pub(crate) link: Link,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) shared: Arc<PipelineShared>,
}

/// Run one link's pipeline to its terminal snapshot or cancellation
pub(crate) async fn run_pipeline(ctx: PipelineContext) {
    let outcome = AssertUnwindSafe(drive(&ctx)).catch_unwind().await;

    if let Err(panic) = outcome {
        let message = panic_message(panic.as_ref());
        tracing::error!(
            url = %ctx.link.original_url,
            panic = %message,
            "Download pipeline panicked"
        );
        let job = DownloadJob::failed(
            ctx.link.clone(),
            FailureReason::Internal,
            format!("internal error: {}", message),
            now_millis(),
        );
        report(&ctx, job).await;
    }

    tracing::debug!(url = %ctx.link.original_url, generation = ctx.generation, "Pipeline finished");
}

async fn drive(ctx: &PipelineContext) {
    let shared = &ctx.shared;

    let _permit = match &shared.limit {
        Some(limit) => tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            permit = Arc::clone(limit).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
        },
        None => None,
    };

    let link = if ctx.link.is_video {
        let resolved = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            resolved = resolve(ctx) => resolved,
        };
        match resolved {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(url = %ctx.link.original_url, error = %e, "Video resolution failed");
                let job = DownloadJob::failed(
                    ctx.link.clone(),
                    FailureReason::Fetch,
                    e.to_string(),
                    now_millis(),
                );
                report(ctx, job).await;
                return;
            }
        }
    } else {
        ctx.link.clone()
    };

    let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
    let emitter = JobEmitter::new(link.clone(), tx, ctx.cancel.clone());

    let produce = async {
        if link.is_video {
            shared.video.run(emitter).await;
        } else {
            shared.image.run(emitter).await;
        }
    };
    let consume = throttle(rx, shared.update_interval, |job| deliver(ctx, job));

    tokio::join!(produce, consume);
}

/// Resolve the playable URL, keeping the link's identity
async fn resolve(ctx: &PipelineContext) -> crate::Result<Link> {
    let resolved = ctx.shared.resolver.resolve(&ctx.link).await?;
    let playable = resolved
        .resolved_video_url
        .ok_or_else(|| Error::Resolve("resolver returned no playable URL".to_string()))?;
    Ok(ctx.link.clone().with_resolved_video_url(playable))
}

/// Forward a throttled snapshot, relocating finished downloads first
async fn deliver(ctx: &PipelineContext, job: DownloadJob) -> bool {
    let job = if job.state == JobState::Downloaded {
        if ctx.cancel.is_cancelled() {
            discard_owned(ctx, job.result_file()).await;
            return false;
        }
        let job = relocate(ctx, job).await;
        if ctx.cancel.is_cancelled() {
            if let Some(target) = job.result_file() {
                tracing::debug!(
                    url = %job.link.original_url,
                    file = %target.display(),
                    "Download cancelled during relocation, removing copy"
                );
                remove_temp_file(target).await;
            }
            return false;
        }
        job
    } else {
        job
    };
    report(ctx, job).await
}

async fn relocate(ctx: &PipelineContext, job: DownloadJob) -> DownloadJob {
    let Some(source) = job.result_file.clone() else {
        return DownloadJob::failed(
            job.link,
            FailureReason::Internal,
            "downloaded job has no file",
            now_millis(),
        );
    };

    let suggested_name = file_name_from_url(job.link.media_url());
    let relocated = ctx.shared.relocator.relocate(&source, &suggested_name).await;
    discard_owned(ctx, Some(&source)).await;

    match relocated {
        Ok(target) => DownloadJob::downloaded(job.link, target, job.timestamp_millis),
        Err(e) => {
            tracing::error!(
                url = %job.link.original_url,
                file = %source.display(),
                error = %e,
                "Failed to relocate download"
            );
            DownloadJob::failed(job.link, e.failure_reason(), e.to_string(), now_millis())
        }
    }
}

/// Remove a file only if it lives in the downloader's temp directory
async fn discard_owned(ctx: &PipelineContext, file: Option<&std::path::Path>) {
    if let Some(file) = file
        && file.starts_with(&ctx.shared.temp_dir)
    {
        remove_temp_file(file).await;
    }
}

/// Send a snapshot to the control loop unless the job was cancelled
async fn report(ctx: &PipelineContext, job: DownloadJob) -> bool {
    let command = Command::Update {
        generation: ctx.generation,
        job,
    };
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => false,
        sent = ctx.commands.send(command) => sent.is_ok(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "pipeline panicked".to_string()
    }
}
