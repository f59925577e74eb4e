// src/processor/handle.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::ProcessorCore;
use super::hooks::Hooks;
use super::runtime::{Inbound, ProcessorRuntime, Responder};
use super::{ProcessorConfig, ProcessorEvent, ProcessorSnapshot, Progress, RequestId, TranscodeResult};
use crate::backend::EngineFactory;
use crate::blob::BlobStore;
use crate::errors::{FfqueueError, Result};
use crate::lifecycle::LifecycleManager;
use crate::queue::{Job, SourceBlob};
use crate::types::EngineState;

/// Entry point for starting a processor.
#[derive(Debug)]
pub struct Processor;

impl Processor {
    /// Spawn the runtime on the current Tokio runtime and return a handle to it.
    ///
    /// With `auto_init` the engine starts loading in the background; failures
    /// are logged and `load()` may be called again.
    pub fn spawn(factory: EngineFactory, config: ProcessorConfig, hooks: Hooks) -> ProcessorHandle {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let lifecycle = Arc::new(LifecycleManager::new(
            factory,
            config.locations.clone(),
            tx.downgrade(),
        ));
        let blobs = Arc::new(BlobStore::new());

        let core = ProcessorCore::new(config.options);
        let (state_tx, state_rx) = watch::channel(core.snapshot());

        let runtime = ProcessorRuntime::new(
            core,
            rx,
            tx.downgrade(),
            Arc::clone(&lifecycle),
            Arc::clone(&blobs),
            hooks,
            config.job.clone(),
            config.rethrow_errors,
            state_tx,
        );
        let task = tokio::spawn(runtime.run());

        if config.auto_init {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                if let Err(e) = lifecycle.load().await {
                    warn!(error = %e, "automatic engine load failed");
                }
            });
        }

        ProcessorHandle {
            tx,
            lifecycle,
            blobs,
            state_rx,
            next_request: Arc::new(AtomicU64::new(1)),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Cloneable handle used to drive a running processor.
#[derive(Debug, Clone)]
pub struct ProcessorHandle {
    tx: mpsc::Sender<Inbound>,
    lifecycle: Arc<LifecycleManager>,
    blobs: Arc<BlobStore>,
    state_rx: watch::Receiver<ProcessorSnapshot>,
    next_request: Arc<AtomicU64>,
    task: Arc<Mutex<Option<JoinHandle<Result<()>>>>>,
}

impl ProcessorHandle {
    // ---------------------------------------------------------------------
    // Engine lifecycle
    // ---------------------------------------------------------------------

    /// Load the engine. No-op while loading or loaded.
    ///
    /// On return the processor has observed the resulting state.
    pub async fn load(&self) -> Result<()> {
        self.ensure_open()?;
        let outcome = self.lifecycle.load().await;
        self.barrier().await?;
        outcome
    }

    /// Replace the engine with a fresh, unloaded instance.
    ///
    /// Clears the queue, result history and progress. A job still in flight
    /// is discarded when it finishes: its output is revoked, no hook fires and
    /// a caller waiting on it receives `EngineNotLoaded`.
    pub async fn unload(&self) -> Result<()> {
        self.ensure_open()?;
        let outcome = self.lifecycle.unload().await;
        self.barrier().await?;
        outcome
    }

    pub fn engine_state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub fn loaded(&self) -> bool {
        self.lifecycle.loaded()
    }

    pub fn loading(&self) -> bool {
        self.lifecycle.loading()
    }

    // ---------------------------------------------------------------------
    // Queue
    // ---------------------------------------------------------------------

    /// Append a job for `source`. Runs right away in automatic mode when the
    /// engine is loaded and idle.
    pub async fn add_to_queue(
        &self,
        source: SourceBlob,
        id: Option<String>,
        args: Vec<String>,
    ) -> Result<()> {
        self.enqueue(Job::new(source, id, args)).await
    }

    pub async fn enqueue(&self, job: Job) -> Result<()> {
        debug!(job = %job.label(), "adding job to queue");
        self.acked(|request| ProcessorEvent::JobQueued { request, job })
            .await
    }

    /// Drop every job that has not started. The current job is unaffected.
    pub async fn clear_queue(&self) -> Result<()> {
        self.acked(|request| ProcessorEvent::QueueCleared { request })
            .await
    }

    pub fn queue(&self) -> Vec<Job> {
        self.state_rx.borrow().queue.clone()
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run `job`, or the queue head when `None`, and wait for its outcome.
    ///
    /// Waits behind a running job. Returns `Ok(None)` when there was nothing
    /// to run, or when the job failed and errors are not returned to callers.
    pub async fn transcode(&self, job: Option<Job>) -> Result<Option<TranscodeResult>> {
        let (tx, rx) = oneshot::channel();
        let request = self.next_request();
        self.send(Inbound::Request {
            event: ProcessorEvent::TranscodeRequested { request, job },
            responder: Responder::Transcode(tx),
        })
        .await?;
        rx.await.map_err(|_| FfqueueError::ProcessorClosed)?
    }

    /// Run the queue until it is empty, also when automatic draining is off.
    pub async fn drain(&self) -> Result<()> {
        self.acked(|request| ProcessorEvent::DrainRequested { request })
            .await
    }

    pub fn transcoding(&self) -> bool {
        self.state_rx.borrow().transcoding
    }

    pub fn current_item(&self) -> Option<Job> {
        self.state_rx.borrow().current.clone()
    }

    // ---------------------------------------------------------------------
    // Telemetry and history
    // ---------------------------------------------------------------------

    pub fn progress(&self) -> Progress {
        self.state_rx.borrow().progress
    }

    pub fn results(&self) -> Vec<TranscodeResult> {
        self.state_rx.borrow().results.clone()
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes a new snapshot after every processed event.
    pub fn subscribe(&self) -> watch::Receiver<ProcessorSnapshot> {
        self.state_rx.clone()
    }

    /// Wait until no job is running and the queue is empty.
    pub async fn wait_idle(&self) -> Result<ProcessorSnapshot> {
        let mut rx = self.state_rx.clone();
        let snapshot = rx
            .wait_for(|s| !s.transcoding && s.queue.is_empty())
            .await
            .map_err(|_| FfqueueError::ProcessorClosed)?;
        Ok(snapshot.clone())
    }

    /// Store that resolves result URLs to their bytes.
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Stop the runtime and wait for it to exit. Idempotent.
    ///
    /// Waiting `transcode()` callers receive `ProcessorClosed`. The engine is
    /// left as is; call `unload()` first to release it.
    pub async fn shutdown(&self) -> Result<()> {
        if self
            .tx
            .send(Inbound::Event(ProcessorEvent::ShutdownRequested))
            .await
            .is_err()
        {
            debug!("processor already stopped");
        }

        let task = self.task.lock().await.take();
        match task {
            Some(task) => {
                let outcome = task
                    .await
                    .map_err(|e| FfqueueError::Other(anyhow::anyhow!("processor task failed: {e}")))?;
                info!("processor stopped");
                outcome
            }
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn next_request(&self) -> RequestId {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.tx.is_closed() {
            return Err(FfqueueError::ProcessorClosed);
        }
        Ok(())
    }

    async fn send(&self, inbound: Inbound) -> Result<()> {
        self.tx
            .send(inbound)
            .await
            .map_err(|_| FfqueueError::ProcessorClosed)
    }

    async fn acked(&self, make: impl FnOnce(RequestId) -> ProcessorEvent) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let event = make(self.next_request());
        self.send(Inbound::Request {
            event,
            responder: Responder::Ack(tx),
        })
        .await?;
        rx.await.map_err(|_| FfqueueError::ProcessorClosed)
    }

    async fn barrier(&self) -> Result<()> {
        self.acked(|request| ProcessorEvent::Barrier { request })
            .await
    }
}
