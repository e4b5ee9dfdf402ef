//! Upscale worker: a spawned task owning the model registry, driven by
//! commands and reporting events over channels.
//!
//! Jobs run sequentially. While a job is in flight the worker keeps
//! servicing `Cancel` and `Shutdown`, so cancellation takes effect
//! between tiles instead of after the whole job. Every `Upscale`
//! command produces exactly one terminal event (`Complete`, `Failed`,
//! or `Cancelled`), never more, never zero.

use std::collections::VecDeque;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::UpscaleError;
use crate::pipeline::{run_upscale, PipelineOptions};
use crate::registry::TierRegistry;
use crate::types::{EnhancementTier, OutputImage, SourceImage};

#[derive(Debug)]
pub enum WorkerCommand {
    /// Load and warm up the model for a tier ahead of the first job.
    Prepare { tier: EnhancementTier },
    /// Run one upscale job. The tier's model is loaded lazily if
    /// `Prepare` was never sent.
    Upscale {
        job_id: Uuid,
        tier: EnhancementTier,
        source: SourceImage,
        options: PipelineOptions,
    },
    /// Cancel the in-flight job, if any. A no-op when idle.
    Cancel,
    /// Drop cached models without stopping the worker.
    ReleaseModels,
    /// Release everything and stop the worker task.
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerEvent {
    /// The tier's model is loaded and warmed up.
    Ready { tier: EnhancementTier },
    /// `Prepare` failed; the tier stays unloaded.
    PrepareFailed {
        tier: EnhancementTier,
        error: UpscaleError,
    },
    /// Advisory per-tile progress for the in-flight job.
    Progress {
        job_id: Uuid,
        percent: u8,
        message: String,
    },
    /// Terminal: the job finished and this is its full output image.
    Complete { job_id: Uuid, image: OutputImage },
    /// Terminal: the job failed; no partial output is delivered.
    Failed {
        job_id: Uuid,
        error: UpscaleError,
    },
    /// Terminal: the job was cancelled before completion.
    Cancelled { job_id: Uuid },
}

/// Host-side handle: command sender, event receiver, and the task join
/// handle for clean shutdown.
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) -> Result<(), UpscaleError> {
        self.commands
            .send(command)
            .map_err(|_| UpscaleError::Pipeline(anyhow::anyhow!("worker task is gone")))
    }

    /// Next event, or `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Request shutdown and wait for the worker task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        let _ = self.join.await;
    }
}

/// Spawn the worker task owning `registry`.
pub fn spawn_worker(registry: TierRegistry) -> WorkerHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let join = tokio::spawn(worker_loop(registry, command_rx, event_tx));

    WorkerHandle {
        commands: command_tx,
        events: event_rx,
        join,
    }
}

async fn worker_loop(
    mut registry: TierRegistry,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let (cancel_tx, _) = watch::channel(false);
    // Commands that arrive mid-job (other than Cancel/Shutdown) are
    // deferred here and serviced in arrival order once the job ends.
    let mut pending: VecDeque<WorkerCommand> = VecDeque::new();
    info!("Upscale worker started");

    loop {
        let command = match pending.pop_front() {
            Some(command) => command,
            None => match commands.recv().await {
                Some(command) => command,
                None => break,
            },
        };
        match command {
            WorkerCommand::Prepare { tier } => {
                let event = match registry.ensure_loaded(tier) {
                    Ok(()) => WorkerEvent::Ready { tier },
                    Err(error) => WorkerEvent::PrepareFailed { tier, error },
                };
                let _ = events.send(event);
            }
            WorkerCommand::Upscale {
                job_id,
                tier,
                source,
                options,
            } => {
                // send_replace updates the flag even with no live receivers.
                cancel_tx.send_replace(false);
                let shutdown = run_job(
                    &mut registry,
                    &mut commands,
                    &mut pending,
                    &events,
                    &cancel_tx,
                    job_id,
                    tier,
                    source,
                    options,
                )
                .await;
                if shutdown {
                    break;
                }
            }
            WorkerCommand::Cancel => {
                debug!("Cancel received while idle; ignoring");
            }
            WorkerCommand::ReleaseModels => {
                registry.release_all();
            }
            WorkerCommand::Shutdown => break,
        }
    }

    registry.release_all();
    info!("Upscale worker stopped");
}

/// Run one job to its terminal event, servicing `Cancel`/`Shutdown`
/// concurrently. Returns `true` when shutdown was requested mid-job.
#[allow(clippy::too_many_arguments)]
async fn run_job(
    registry: &mut TierRegistry,
    commands: &mut mpsc::UnboundedReceiver<WorkerCommand>,
    pending: &mut VecDeque<WorkerCommand>,
    events: &mpsc::UnboundedSender<WorkerEvent>,
    cancel_tx: &watch::Sender<bool>,
    job_id: Uuid,
    tier: EnhancementTier,
    source: SourceImage,
    options: PipelineOptions,
) -> bool {
    if let Err(error) = registry.ensure_loaded(tier) {
        let _ = events.send(WorkerEvent::Failed { job_id, error });
        return false;
    }
    let Some(model) = registry.get_mut(tier) else {
        let _ = events.send(WorkerEvent::Failed {
            job_id,
            error: UpscaleError::Pipeline(anyhow::anyhow!(
                "model for tier {tier} vanished after load"
            )),
        });
        return false;
    };

    info!(%job_id, %tier, width = source.width(), height = source.height(), "Job started");

    let cancel_rx = cancel_tx.subscribe();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let mut shutdown = false;
    let mut commands_closed = false;

    let result = {
        let job = run_upscale(&source, model, &options, Some(&progress_tx), &cancel_rx);
        tokio::pin!(job);
        loop {
            tokio::select! {
                result = &mut job => break result,
                progress = progress_rx.recv() => {
                    if let Some(event) = progress {
                        let _ = events.send(WorkerEvent::Progress {
                            job_id,
                            percent: event.percent,
                            message: event.message,
                        });
                    }
                }
                command = commands.recv(), if !commands_closed => match command {
                    Some(WorkerCommand::Cancel) => {
                        info!(%job_id, "Cancellation requested");
                        cancel_tx.send_replace(true);
                    }
                    Some(WorkerCommand::Shutdown) => {
                        cancel_tx.send_replace(true);
                        shutdown = true;
                    }
                    None => {
                        cancel_tx.send_replace(true);
                        shutdown = true;
                        commands_closed = true;
                    }
                    Some(other) => {
                        debug!(?other, "Command deferred until the current job ends");
                        pending.push_back(other);
                    }
                },
            }
        }
    };

    // Flush progress emitted by the final tiles before the terminal event.
    drop(progress_tx);
    while let Some(event) = progress_rx.recv().await {
        let _ = events.send(WorkerEvent::Progress {
            job_id,
            percent: event.percent,
            message: event.message,
        });
    }

    let terminal = match result {
        Ok(image) => {
            info!(%job_id, "Job complete");
            WorkerEvent::Complete { job_id, image }
        }
        Err(UpscaleError::Cancelled) => {
            info!(%job_id, "Job cancelled");
            WorkerEvent::Cancelled { job_id }
        }
        Err(error) => {
            warn!(%job_id, %error, "Job failed");
            WorkerEvent::Failed { job_id, error }
        }
    };
    let _ = events.send(terminal);

    shutdown
}
