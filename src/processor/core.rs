// src/processor/core.rs

//! Pure core state machine of the job processor.
//!
//! This module contains a synchronous, deterministic "core" that consumes
//! [`ProcessorEvent`]s and produces:
//! - an updated core state (queue, current job, results, progress)
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`processor::runtime::ProcessorRuntime`) is responsible
//! for running jobs against the engine, invoking hooks and answering callers.
//!
//! The core owns the mutual-exclusion rule: a job is only dispatched when no
//! other job is current, so at most one `Execute` is outstanding at any time.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::{
    JobOutcome, ProcessorEvent, ProcessorOptions, ProcessorSnapshot, Progress, RequestId, RunId,
    TranscodeResult,
};
use crate::errors::FfqueueError;
use crate::queue::{Job, JobQueue};
use crate::types::EngineState;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Run this job against the engine and report back with `JobFinished`.
    Execute { run_id: RunId, job: Job },
    /// A job succeeded; notify hooks and the waiting caller, if any.
    Completed {
        result: TranscodeResult,
        queue: Option<Vec<Job>>,
        request: Option<RequestId>,
    },
    /// A job failed; notify hooks and the waiting caller, if any.
    Failed {
        error: FfqueueError,
        request: Option<RequestId>,
    },
    /// Progress of the current job changed.
    Progress(Progress),
    /// The request was applied.
    Ack(RequestId),
    /// The request cannot be served.
    Reject {
        request: RequestId,
        error: FfqueueError,
    },
    /// A transcode request found no job to run.
    Nothing(RequestId),
    /// These results were dropped from history; release their handles.
    Revoke(Vec<TranscodeResult>),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// The job currently executing.
#[derive(Debug, Clone)]
struct ActiveJob {
    run_id: RunId,
    job: Job,
    request: Option<RequestId>,
    /// The engine instance this run started on has since been replaced.
    orphaned: bool,
}

/// Transcode request that arrived while another job was running.
#[derive(Debug)]
struct ParkedRequest {
    request: RequestId,
    job: Option<Job>,
}

#[derive(Debug)]
pub struct ProcessorCore {
    options: ProcessorOptions,
    engine_state: EngineState,
    queue: JobQueue,
    current: Option<ActiveJob>,
    parked: VecDeque<ParkedRequest>,
    results: Vec<TranscodeResult>,
    progress: Progress,
    /// Set by an explicit drain request; cleared once the queue runs dry.
    drain_once: bool,
    next_run_id: RunId,
}

impl ProcessorCore {
    pub fn new(options: ProcessorOptions) -> Self {
        Self {
            options,
            engine_state: EngineState::Unloaded,
            queue: JobQueue::new(),
            current: None,
            parked: VecDeque::new(),
            results: Vec::new(),
            progress: Progress::default(),
            drain_once: false,
            next_run_id: 1,
        }
    }

    pub fn transcoding(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.current.as_ref().map(|a| &a.job)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn results(&self) -> &[TranscodeResult] {
        &self.results
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine_state
    }

    pub fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            engine_state: self.engine_state,
            queue: self.queue.snapshot(),
            current: self.current_job().cloned(),
            transcoding: self.transcoding(),
            progress: self.progress,
            results: self.results.clone(),
        }
    }

    /// Handle a single event, updating core state and returning the resulting
    /// commands for the IO shell.
    pub fn step(&mut self, event: ProcessorEvent) -> CoreStep {
        let mut commands = Vec::new();

        match event {
            ProcessorEvent::JobQueued { request, job } => {
                self.queue.push_back(job);
                commands.push(CoreCommand::Ack(request));
            }
            ProcessorEvent::QueueCleared { request } => {
                self.queue.clear();
                commands.push(CoreCommand::Ack(request));
            }
            ProcessorEvent::TranscodeRequested { request, job } => {
                self.handle_transcode_request(request, job, &mut commands);
            }
            ProcessorEvent::DrainRequested { request } => {
                self.drain_once = true;
                commands.push(CoreCommand::Ack(request));
            }
            ProcessorEvent::Barrier { request } => {
                commands.push(CoreCommand::Ack(request));
            }
            ProcessorEvent::EngineStateChanged(state) => {
                debug!(from = %self.engine_state, to = %state, "engine state changed");
                self.engine_state = state;
            }
            ProcessorEvent::EngineReplaced => {
                self.handle_engine_replaced(&mut commands);
            }
            ProcessorEvent::ProgressReported { ratio, time_ns } => {
                self.handle_progress(ratio, time_ns, &mut commands);
            }
            ProcessorEvent::JobFinished { run_id, outcome } => {
                self.handle_job_finished(run_id, outcome, &mut commands);
            }
            ProcessorEvent::ShutdownRequested => {
                for parked in self.parked.drain(..) {
                    commands.push(CoreCommand::Reject {
                        request: parked.request,
                        error: FfqueueError::ProcessorClosed,
                    });
                }
                return CoreStep {
                    commands,
                    keep_running: false,
                };
            }
        }

        self.schedule(&mut commands);

        CoreStep {
            commands,
            keep_running: true,
        }
    }

    fn handle_transcode_request(
        &mut self,
        request: RequestId,
        job: Option<Job>,
        commands: &mut Vec<CoreCommand>,
    ) {
        if !self.engine_state.is_loaded() {
            debug!(request, state = %self.engine_state, "transcode requested without a loaded engine");
            commands.push(CoreCommand::Reject {
                request,
                error: FfqueueError::EngineNotLoaded,
            });
            return;
        }

        if self.current.is_some() {
            debug!(request, "engine busy; parking transcode request");
        }
        // Every request goes through the parked list so arrival order holds;
        // `schedule` serves it right away when the engine is idle.
        self.parked.push_back(ParkedRequest { request, job });
    }

    fn handle_engine_replaced(&mut self, commands: &mut Vec<CoreCommand>) {
        let dropped = self.queue.clear();
        let results = std::mem::take(&mut self.results);
        info!(
            dropped_jobs = dropped,
            dropped_results = results.len(),
            "engine replaced; clearing queue, results and progress"
        );

        if !results.is_empty() {
            commands.push(CoreCommand::Revoke(results));
        }
        self.progress = Progress::default();
        self.drain_once = false;

        if let Some(active) = self.current.as_mut() {
            debug!(run_id = active.run_id, "in-flight run now belongs to a replaced engine");
            active.orphaned = true;
        }

        for parked in self.parked.drain(..) {
            commands.push(CoreCommand::Reject {
                request: parked.request,
                error: FfqueueError::EngineNotLoaded,
            });
        }
    }

    fn handle_progress(&mut self, ratio: f64, time_ns: u64, commands: &mut Vec<CoreCommand>) {
        if !matches!(self.current, Some(ActiveJob { orphaned: false, .. })) {
            // Progress belongs to a live job; stray reports are dropped.
            return;
        }
        // Every engine report is forwarded, repeats included.
        self.progress = Progress::from_engine(ratio, time_ns);
        commands.push(CoreCommand::Progress(self.progress));
    }

    fn handle_job_finished(
        &mut self,
        run_id: RunId,
        outcome: JobOutcome,
        commands: &mut Vec<CoreCommand>,
    ) {
        let active = match self.current.take() {
            Some(active) if active.run_id == run_id => active,
            other => {
                warn!(run_id, "completion for a run that is not current; ignoring");
                self.current = other;
                return;
            }
        };

        if active.orphaned {
            self.finish_orphaned(active, outcome, commands);
            return;
        }

        match outcome {
            JobOutcome::Completed(result) => {
                info!(job = %active.job.label(), run_id, "job completed");
                self.results.push(result.clone());
                let queue = self
                    .options
                    .queue_aware_callbacks
                    .then(|| self.queue.snapshot());
                commands.push(CoreCommand::Completed {
                    result,
                    queue,
                    request: active.request,
                });
            }
            JobOutcome::Failed(error) => {
                warn!(job = %active.job.label(), run_id, error = %error, "job failed");
                commands.push(CoreCommand::Failed {
                    error,
                    request: active.request,
                });
            }
        }
    }

    /// A run that outlived its engine leaves no trace in the new lifecycle.
    fn finish_orphaned(
        &mut self,
        active: ActiveJob,
        outcome: JobOutcome,
        commands: &mut Vec<CoreCommand>,
    ) {
        info!(job = %active.job.label(), run_id = active.run_id, "discarding run of a replaced engine");
        if let JobOutcome::Completed(result) = outcome {
            commands.push(CoreCommand::Revoke(vec![result]));
        }
        if let Some(request) = active.request {
            commands.push(CoreCommand::Reject {
                request,
                error: FfqueueError::EngineNotLoaded,
            });
        }
    }

    /// Start the next job if the engine is loaded and idle.
    ///
    /// Parked transcode requests go first, in arrival order; then the queue
    /// head when automatic (or one-shot) draining is on.
    fn schedule(&mut self, commands: &mut Vec<CoreCommand>) {
        if self.current.is_some() || !self.engine_state.is_loaded() {
            return;
        }

        while let Some(parked) = self.parked.pop_front() {
            let job = parked.job.or_else(|| self.queue.pop_front());
            match job {
                Some(job) => {
                    self.dispatch(job, Some(parked.request), commands);
                    return;
                }
                None => commands.push(CoreCommand::Nothing(parked.request)),
            }
        }

        if !(self.options.auto_transcode || self.drain_once) {
            return;
        }

        match self.queue.pop_front() {
            Some(job) => self.dispatch(job, None, commands),
            None => self.drain_once = false,
        }
    }

    fn dispatch(&mut self, job: Job, request: Option<RequestId>, commands: &mut Vec<CoreCommand>) {
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        info!(job = %job.label(), run_id, "dispatching job");

        self.progress = Progress::default();
        commands.push(CoreCommand::Progress(self.progress));
        self.current = Some(ActiveJob {
            run_id,
            job: job.clone(),
            request,
            orphaned: false,
        });
        commands.push(CoreCommand::Execute { run_id, job });
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::blob::BlobStore;
    use crate::queue::SourceBlob;

    fn job(id: &str) -> Job {
        Job::new(
            SourceBlob::from_bytes(format!("{id}.mp4"), vec![0u8]),
            Some(id.to_string()),
            vec!["-c:v".into(), "libx264".into()],
        )
    }

    fn loaded_core(options: ProcessorOptions) -> ProcessorCore {
        let mut core = ProcessorCore::new(options);
        core.step(ProcessorEvent::EngineStateChanged(EngineState::Loaded));
        core
    }

    fn manual() -> ProcessorOptions {
        ProcessorOptions {
            auto_transcode: false,
            queue_aware_callbacks: false,
        }
    }

    fn result_for(job: &Job) -> TranscodeResult {
        let store = BlobStore::new();
        TranscodeResult {
            id: job.id().map(String::from),
            output: store.register(Bytes::from_static(&[1, 2, 3]), "video/mp4"),
            source: job.source().clone(),
        }
    }

    fn executed(step: &CoreStep) -> Vec<(RunId, String)> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Execute { run_id, job } => Some((*run_id, job.label().to_string())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn enqueue_without_drain_keeps_order_and_runs_nothing() {
        let mut core = loaded_core(manual());
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            let step = core.step(ProcessorEvent::JobQueued {
                request: i as u64,
                job: job(id),
            });
            assert!(executed(&step).is_empty());
        }
        let ids: Vec<_> = core.queue().snapshot().iter().map(|j| j.label().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!core.transcoding());
    }

    #[test]
    fn auto_mode_dispatches_head_when_loaded() {
        let mut core = ProcessorCore::new(ProcessorOptions::default());
        let step = core.step(ProcessorEvent::JobQueued {
            request: 1,
            job: job("a"),
        });
        assert!(executed(&step).is_empty(), "engine not loaded yet");

        let step = core.step(ProcessorEvent::EngineStateChanged(EngineState::Loaded));
        assert_eq!(executed(&step), vec![(1, "a".to_string())]);
        assert!(core.transcoding());
        assert!(core.queue().is_empty());
    }

    #[test]
    fn auto_mode_runs_one_at_a_time() {
        let mut core = loaded_core(ProcessorOptions::default());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        let step = core.step(ProcessorEvent::JobQueued { request: 2, job: job("b") });
        assert!(executed(&step).is_empty());
        assert_eq!(core.queue().len(), 1);

        let a = job("a");
        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        assert_eq!(executed(&step), vec![(2, "b".to_string())]);
        assert_eq!(core.results().len(), 1);
    }

    #[test]
    fn transcode_without_loaded_engine_is_rejected() {
        let mut core = ProcessorCore::new(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        let step = core.step(ProcessorEvent::TranscodeRequested { request: 2, job: None });

        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::Reject { request: 2, error: FfqueueError::EngineNotLoaded }]
        ));
        assert_eq!(core.queue().len(), 1, "nothing dequeued");
    }

    #[test]
    fn transcode_on_empty_queue_reports_nothing() {
        let mut core = loaded_core(manual());
        let step = core.step(ProcessorEvent::TranscodeRequested { request: 7, job: None });
        assert!(matches!(step.commands.as_slice(), [CoreCommand::Nothing(7)]));
    }

    #[test]
    fn explicit_job_leaves_queue_alone() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("queued") });
        let step = core.step(ProcessorEvent::TranscodeRequested {
            request: 2,
            job: Some(job("explicit")),
        });
        assert_eq!(executed(&step), vec![(1, "explicit".to_string())]);
        assert_eq!(core.queue().len(), 1);
    }

    #[test]
    fn busy_requests_are_parked_until_idle() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::JobQueued { request: 2, job: job("b") });

        let step = core.step(ProcessorEvent::TranscodeRequested { request: 3, job: None });
        assert_eq!(executed(&step), vec![(1, "a".to_string())]);

        let step = core.step(ProcessorEvent::TranscodeRequested { request: 4, job: None });
        assert!(executed(&step).is_empty(), "second request waits");
        assert_eq!(core.queue().len(), 1, "head is taken at dispatch, not at request");

        let a = job("a");
        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        assert_eq!(executed(&step), vec![(2, "b".to_string())]);
        assert!(matches!(
            step.commands.first(),
            Some(CoreCommand::Completed { request: Some(3), .. })
        ));
    }

    #[test]
    fn failure_clears_current_and_keeps_queue() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::JobQueued { request: 2, job: job("b") });
        core.step(ProcessorEvent::TranscodeRequested { request: 3, job: None });

        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Failed(FfqueueError::engine("exec", "boom")),
        });

        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::Failed { request: Some(3), .. }]
        ));
        assert!(!core.transcoding());
        assert_eq!(core.queue().len(), 1);
        assert!(core.results().is_empty());
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut core = loaded_core(ProcessorOptions::default());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });

        let a = job("a");
        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 42,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        assert!(step.commands.is_empty());
        assert!(core.transcoding());
        assert!(core.results().is_empty());
    }

    #[test]
    fn drain_request_runs_queue_in_manual_mode_once() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        let step = core.step(ProcessorEvent::DrainRequested { request: 2 });
        assert_eq!(executed(&step), vec![(1, "a".to_string())]);

        let a = job("a");
        core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });

        // Queue ran dry, so the one-shot drain is over.
        let step = core.step(ProcessorEvent::JobQueued { request: 3, job: job("b") });
        assert!(executed(&step).is_empty());
    }

    #[test]
    fn cleared_queue_drains_to_nothing() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::QueueCleared { request: 2 });
        let step = core.step(ProcessorEvent::DrainRequested { request: 3 });
        assert!(executed(&step).is_empty());
        assert!(core.results().is_empty());
    }

    #[test]
    fn progress_is_attributed_to_current_job_only() {
        let mut core = loaded_core(ProcessorOptions::default());
        let step = core.step(ProcessorEvent::ProgressReported {
            ratio: 0.5,
            time_ns: 1_000_000_000,
        });
        assert!(step.commands.is_empty());
        assert_eq!(core.progress(), Progress::default());

        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        let step = core.step(ProcessorEvent::ProgressReported {
            ratio: 0.5,
            time_ns: 1_000_000_000,
        });
        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::Progress(Progress { percent: 50, elapsed_seconds: 1 })]
        ));
    }

    #[test]
    fn queue_aware_completion_carries_remaining_queue() {
        let mut core = loaded_core(ProcessorOptions {
            auto_transcode: false,
            queue_aware_callbacks: true,
        });
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::JobQueued { request: 2, job: job("b") });
        core.step(ProcessorEvent::TranscodeRequested { request: 3, job: None });

        let a = job("a");
        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        match step.commands.first() {
            Some(CoreCommand::Completed { queue: Some(q), .. }) => {
                assert_eq!(q.len(), 1);
                assert_eq!(q[0].label(), "b");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn engine_replacement_clears_state_and_rejects_parked() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::JobQueued { request: 2, job: job("b") });
        core.step(ProcessorEvent::TranscodeRequested { request: 3, job: None });
        let a = job("a");
        core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        core.step(ProcessorEvent::TranscodeRequested { request: 4, job: None });
        core.step(ProcessorEvent::TranscodeRequested { request: 5, job: Some(job("x")) });

        core.step(ProcessorEvent::EngineStateChanged(EngineState::Unloaded));
        let step = core.step(ProcessorEvent::EngineReplaced);

        assert!(core.queue().is_empty());
        assert!(core.results().is_empty());
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Revoke(r) if r.len() == 1)));
        assert!(step
            .commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Reject { request: 5, .. })));
        // The in-flight job keeps its slot until it reports back.
        assert!(core.transcoding());
    }

    #[test]
    fn run_outliving_its_engine_is_discarded() {
        let mut core = loaded_core(manual());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::TranscodeRequested { request: 2, job: None });

        core.step(ProcessorEvent::EngineStateChanged(EngineState::Unloaded));
        core.step(ProcessorEvent::EngineReplaced);
        core.step(ProcessorEvent::EngineStateChanged(EngineState::Loaded));

        let step = core.step(ProcessorEvent::ProgressReported {
            ratio: 0.5,
            time_ns: 1_000_000_000,
        });
        assert!(step.commands.is_empty(), "old run no longer reports progress");

        let a = job("a");
        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Completed(result_for(&a)),
        });
        assert!(matches!(
            step.commands.as_slice(),
            [
                CoreCommand::Revoke(r),
                CoreCommand::Reject { request: 2, error: FfqueueError::EngineNotLoaded },
            ] if r.len() == 1
        ));
        assert!(!core.transcoding());
        assert!(core.results().is_empty());
    }

    #[test]
    fn failed_run_of_replaced_engine_fires_no_hooks() {
        let mut core = loaded_core(ProcessorOptions::default());
        core.step(ProcessorEvent::JobQueued { request: 1, job: job("a") });
        core.step(ProcessorEvent::EngineReplaced);

        let step = core.step(ProcessorEvent::JobFinished {
            run_id: 1,
            outcome: JobOutcome::Failed(FfqueueError::engine("exec", "killed")),
        });
        assert!(step.commands.is_empty());
        assert!(!core.transcoding());
    }

    #[test]
    fn every_progress_report_is_forwarded() {
        let mut core = loaded_core(manual());
        let step = core.step(ProcessorEvent::TranscodeRequested {
            request: 1,
            job: Some(job("a")),
        });
        assert!(matches!(
            step.commands.as_slice(),
            [CoreCommand::Progress(p), CoreCommand::Execute { .. }] if *p == Progress::default()
        ));

        for _ in 0..2 {
            let step = core.step(ProcessorEvent::ProgressReported {
                ratio: 0.25,
                time_ns: 2_000_000_000,
            });
            assert!(matches!(
                step.commands.as_slice(),
                [CoreCommand::Progress(Progress { percent: 25, elapsed_seconds: 2 })]
            ));
        }
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let mut core = loaded_core(manual());
        let step = core.step(ProcessorEvent::ShutdownRequested);
        assert!(!step.keep_running);
    }
}
