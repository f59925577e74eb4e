// src/processor/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use super::core::{CoreCommand, ProcessorCore};
use super::hooks::Hooks;
use super::job_runner::{run_job, JobSettings};
use super::{JobOutcome, ProcessorEvent, ProcessorSnapshot, RequestId, RunId, TranscodeResult};
use crate::blob::BlobStore;
use crate::errors::{FfqueueError, Result};
use crate::lifecycle::LifecycleManager;
use crate::queue::Job;

/// How a caller waits for its request.
#[derive(Debug)]
pub enum Responder {
    /// Plain acknowledgement (enqueue, clear, drain).
    Ack(oneshot::Sender<()>),
    /// Outcome of a transcode request.
    Transcode(oneshot::Sender<Result<Option<TranscodeResult>>>),
}

/// Messages flowing into the runtime from handles, the lifecycle manager and
/// job runners.
#[derive(Debug)]
pub enum Inbound {
    /// Internal event with nobody waiting on it.
    Event(ProcessorEvent),
    /// Caller request; `responder` is answered once the core decides.
    Request {
        event: ProcessorEvent,
        responder: Responder,
    },
}

impl From<ProcessorEvent> for Inbound {
    fn from(event: ProcessorEvent) -> Self {
        Inbound::Event(event)
    }
}

/// Drives the core in response to inbound messages and runs dispatched jobs
/// against the engine owned by the lifecycle manager.
///
/// This is an IO shell around `ProcessorCore`, which contains all the queue
/// semantics. It is the only consumer of the inbound channel and therefore
/// the only place that dequeues.
pub struct ProcessorRuntime {
    core: ProcessorCore,
    inbound_rx: mpsc::Receiver<Inbound>,
    /// Weak so that dropping every handle closes the channel.
    inbound_tx: mpsc::WeakSender<Inbound>,
    lifecycle: Arc<LifecycleManager>,
    blobs: Arc<BlobStore>,
    hooks: Hooks,
    settings: JobSettings,
    rethrow_errors: bool,
    pending: HashMap<RequestId, Responder>,
    state_tx: watch::Sender<ProcessorSnapshot>,
}

impl fmt::Debug for ProcessorRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRuntime")
            .field("core", &self.core)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ProcessorRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: ProcessorCore,
        inbound_rx: mpsc::Receiver<Inbound>,
        inbound_tx: mpsc::WeakSender<Inbound>,
        lifecycle: Arc<LifecycleManager>,
        blobs: Arc<BlobStore>,
        hooks: Hooks,
        settings: JobSettings,
        rethrow_errors: bool,
        state_tx: watch::Sender<ProcessorSnapshot>,
    ) -> Self {
        Self {
            core,
            inbound_rx,
            inbound_tx,
            lifecycle,
            blobs,
            hooks,
            settings,
            rethrow_errors,
            pending: HashMap::new(),
            state_tx,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `Inbound` messages.
    /// - Feeds them into the core and publishes the resulting snapshot.
    /// - Executes commands returned by the core (run jobs, notify, reply).
    pub async fn run(mut self) -> Result<()> {
        info!("processor runtime started");

        loop {
            let inbound = match self.inbound_rx.recv().await {
                Some(m) => m,
                None => {
                    info!("processor channel closed; exiting");
                    break;
                }
            };

            let event = match inbound {
                Inbound::Event(event) => event,
                Inbound::Request { event, responder } => {
                    if let Some(id) = event.request_id() {
                        self.pending.insert(id, responder);
                    }
                    event
                }
            };

            trace!(?event, "processor received event");

            let step = self.core.step(event);

            // Publish before answering so callers see their own change.
            self.state_tx.send_replace(self.core.snapshot());

            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!("core requested exit; stopping processor");
                break;
            }
        }

        // Anyone still waiting observes `ProcessorClosed` through the dropped
        // responders.
        self.pending.clear();
        info!("processor runtime exiting");
        Ok(())
    }

    /// Execute a single command from the core.
    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Execute { run_id, job } => self.spawn_job(run_id, job),
            CoreCommand::Completed {
                result,
                queue,
                request,
            } => {
                self.hooks.complete(&result, queue.as_deref());
                if let Some(request) = request {
                    self.respond(request, Ok(Some(result)));
                }
            }
            CoreCommand::Failed { error, request } => {
                error!(error = %error, "transcoding error");
                self.hooks.error(&error);
                if let Some(request) = request {
                    let reply = if self.rethrow_errors { Err(error) } else { Ok(None) };
                    self.respond(request, reply);
                }
            }
            CoreCommand::Progress(progress) => {
                self.hooks
                    .progress(progress.percent, progress.elapsed_seconds);
            }
            CoreCommand::Ack(request) | CoreCommand::Nothing(request) => {
                self.respond(request, Ok(None));
            }
            CoreCommand::Reject { request, error } => {
                debug!(request, error = %error, "request rejected");
                self.respond(request, Err(error));
            }
            CoreCommand::Revoke(results) => {
                for result in results {
                    self.blobs.revoke(result.output.url());
                }
            }
        }
    }

    fn respond(&mut self, request: RequestId, reply: Result<Option<TranscodeResult>>) {
        let delivered = match self.pending.remove(&request) {
            Some(Responder::Ack(tx)) => {
                if let Err(e) = reply {
                    debug!(request, error = %e, "acknowledged request carried an error");
                }
                tx.send(()).is_ok()
            }
            Some(Responder::Transcode(tx)) => tx.send(reply).is_ok(),
            None => {
                warn!(request, "no caller registered for request");
                return;
            }
        };
        if !delivered {
            debug!(request, "caller went away before the reply");
        }
    }

    /// Run one job in its own Tokio task and report back with `JobFinished`.
    fn spawn_job(&mut self, run_id: RunId, job: Job) {
        let Some(tx) = self.inbound_tx.upgrade() else {
            warn!(run_id, "processor is shutting down; not starting job");
            return;
        };

        let engine = self.lifecycle.engine();
        let settings = self.settings.clone();
        let blobs = Arc::clone(&self.blobs);
        let label = job.label().to_string();

        tokio::spawn(async move {
            let runner = tokio::spawn(async move {
                run_job(engine.as_ref(), &job, &settings, &blobs).await
            });

            let outcome = match runner.await {
                Ok(Ok(result)) => JobOutcome::Completed(result),
                Ok(Err(e)) => JobOutcome::Failed(e),
                Err(join_err) => {
                    error!(job = %label, run_id, error = %join_err, "job runner aborted");
                    JobOutcome::Failed(FfqueueError::Other(anyhow::anyhow!(
                        "job runner aborted: {join_err}"
                    )))
                }
            };

            if tx
                .send(ProcessorEvent::JobFinished { run_id, outcome }.into())
                .await
                .is_err()
            {
                debug!(job = %label, run_id, "processor gone before job completion was reported");
            }
        });
    }
}
