// src/processor/mod.rs

//! Queue-serialized job processor.
//!
//! This module ties together:
//! - the FIFO job queue and the single "current" job slot
//! - the per-job mount/exec/read/cleanup protocol
//! - the runtime event loop that reacts to:
//!   - caller requests (enqueue, clear, transcode, drain)
//!   - engine state changes and progress from the lifecycle manager
//!   - job completions
//!   - shutdown
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; callers use [`ProcessorHandle`].

use crate::backend::EngineLocations;
use crate::blob::ResourceHandle;
use crate::config::ConfigFile;
use crate::errors::FfqueueError;
use crate::queue::{Job, SourceBlob};
use crate::types::EngineState;

/// Identifies a caller request awaiting an answer from the runtime.
pub type RequestId = u64;

/// Identifies one execution of one job.
pub type RunId = u64;

/// Progress of the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// 0..=100
    pub percent: u8,
    pub elapsed_seconds: u64,
}

impl Progress {
    /// Scale a raw engine report (`ratio` 0.0..=1.0, nanoseconds).
    pub fn from_engine(ratio: f64, time_ns: u64) -> Self {
        let percent = if ratio.is_finite() {
            (ratio * 100.0).round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        let elapsed_seconds = (time_ns as f64 / 1_000_000_000.0).round() as u64;
        Self {
            percent,
            elapsed_seconds,
        }
    }
}

/// Durable record of one successfully completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    pub id: Option<String>,
    pub output: ResourceHandle,
    pub source: SourceBlob,
}

/// How a dispatched job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(TranscodeResult),
    Failed(FfqueueError),
}

/// Events consumed by the core.
#[derive(Debug)]
pub enum ProcessorEvent {
    /// Append a job to the queue.
    JobQueued { request: RequestId, job: Job },
    /// Drop every queued job that has not started.
    QueueCleared { request: RequestId },
    /// Run one job: the given one, or the queue head.
    TranscodeRequested {
        request: RequestId,
        job: Option<Job>,
    },
    /// Drain the queue once, even when automatic draining is off.
    DrainRequested { request: RequestId },
    /// Answered once every earlier event has been applied.
    Barrier { request: RequestId },
    /// Lifecycle manager moved the engine to a new state.
    EngineStateChanged(EngineState),
    /// The engine instance was swapped for a fresh one (unload).
    EngineReplaced,
    /// Raw progress from the engine.
    ProgressReported { ratio: f64, time_ns: u64 },
    /// A dispatched job finished.
    JobFinished { run_id: RunId, outcome: JobOutcome },
    /// Graceful shutdown requested.
    ShutdownRequested,
}

impl ProcessorEvent {
    /// The request this event answers to, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ProcessorEvent::JobQueued { request, .. }
            | ProcessorEvent::QueueCleared { request }
            | ProcessorEvent::TranscodeRequested { request, .. }
            | ProcessorEvent::DrainRequested { request }
            | ProcessorEvent::Barrier { request } => Some(*request),
            _ => None,
        }
    }
}

/// Point-in-time view of the processor, published after every event.
#[derive(Debug, Clone, Default)]
pub struct ProcessorSnapshot {
    pub engine_state: EngineState,
    pub queue: Vec<Job>,
    pub current: Option<Job>,
    pub transcoding: bool,
    pub progress: Progress,
    pub results: Vec<TranscodeResult>,
}

/// Options read by the pure core.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    /// Dequeue and run the head whenever the engine is loaded and idle.
    pub auto_transcode: bool,
    /// Include the remaining queue in completion notifications.
    pub queue_aware_callbacks: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            auto_transcode: true,
            queue_aware_callbacks: false,
        }
    }
}

/// Full processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub options: ProcessorOptions,
    pub job: JobSettings,
    pub locations: EngineLocations,
    /// Return job errors to `transcode()` callers after `on_error` ran.
    pub rethrow_errors: bool,
    /// Kick off `load()` as soon as the processor is spawned.
    pub auto_init: bool,
    pub channel_capacity: usize,
}

impl ProcessorConfig {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let engine = cfg.engine();
        let queue = cfg.queue();
        let output = cfg.output();
        Self {
            options: ProcessorOptions {
                auto_transcode: queue.auto_transcode,
                queue_aware_callbacks: queue.queue_aware_callbacks,
            },
            job: JobSettings {
                input_dir: output.input_dir.clone(),
                output_file: output.file_name.clone(),
                mime_type: output.mime_type.clone(),
                mount_kind: output.mount_kind,
            },
            locations: EngineLocations::resolve(
                &engine.base_path,
                &engine.core,
                engine.wasm.as_deref(),
                engine.worker.as_deref(),
            ),
            rethrow_errors: queue.rethrow_errors,
            auto_init: engine.auto_init,
            channel_capacity: queue.channel_capacity,
        }
    }
}

pub mod core;
pub mod handle;
pub mod hooks;
pub mod job_runner;
pub mod runtime;

pub use self::core::{CoreCommand, CoreStep, ProcessorCore};
pub use handle::{Processor, ProcessorHandle};
pub use hooks::Hooks;
pub use job_runner::JobSettings;
pub use runtime::{Inbound, ProcessorRuntime, Responder};
