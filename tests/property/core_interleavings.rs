use std::collections::HashSet;

use bytes::Bytes;
use ffqueue::blob::BlobStore;
use ffqueue::errors::FfqueueError;
use ffqueue::processor::{
    CoreCommand, JobOutcome, ProcessorCore, ProcessorEvent, ProcessorOptions, RunId,
    TranscodeResult,
};
use ffqueue::queue::Job;
use ffqueue::types::EngineState;
use ffqueue_test_utils::builders::JobBuilder;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Clear,
    Transcode,
    TranscodeExplicit,
    Drain,
    Finish(bool),
    Progress(u8),
    Load,
    Unload,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Enqueue),
        1 => Just(Op::Clear),
        2 => Just(Op::Transcode),
        1 => Just(Op::TranscodeExplicit),
        1 => Just(Op::Drain),
        4 => any::<bool>().prop_map(Op::Finish),
        1 => (0u8..=100).prop_map(Op::Progress),
        2 => Just(Op::Load),
        1 => Just(Op::Unload),
    ]
}

/// What the IO shell would observe while driving the core.
#[derive(Default)]
struct Model {
    running: Option<(RunId, Job)>,
    executed: HashSet<String>,
    /// Sequence numbers of queued jobs, in the order they were dispatched.
    dequeued: Vec<usize>,
    results: usize,
    next_job: usize,
    next_request: u64,
}

impl Model {
    fn request(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    fn job(&mut self, prefix: &str) -> Job {
        self.next_job += 1;
        JobBuilder::new(&format!("{prefix}{}", self.next_job)).build()
    }
}

fn apply(
    model: &mut Model,
    core: &mut ProcessorCore,
    event: ProcessorEvent,
) -> Result<(), TestCaseError> {
    let step = core.step(event);
    prop_assert!(step.keep_running);

    for command in step.commands {
        match command {
            CoreCommand::Execute { run_id, job } => {
                prop_assert!(model.running.is_none(), "two jobs dispatched at once");
                let id = job.id().unwrap_or_default().to_string();
                prop_assert!(model.executed.insert(id.clone()), "{} ran twice", id);
                if let Some(seq) = id.strip_prefix('q') {
                    model.dequeued.push(seq.parse().unwrap());
                }
                model.running = Some((run_id, job));
            }
            CoreCommand::Completed { .. } => model.results += 1,
            CoreCommand::Revoke(_) => model.results = 0,
            _ => {}
        }
    }

    prop_assert_eq!(core.transcoding(), model.running.is_some());
    prop_assert_eq!(core.results().len(), model.results);
    Ok(())
}

proptest! {
    #[test]
    fn core_serializes_jobs_for_any_interleaving(
        auto_transcode in any::<bool>(),
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        let blobs = BlobStore::new();
        let mut core = ProcessorCore::new(ProcessorOptions {
            auto_transcode,
            queue_aware_callbacks: false,
        });
        let mut model = Model::default();

        for op in ops {
            let event = match op {
                Op::Enqueue => {
                    let request = model.request();
                    ProcessorEvent::JobQueued { request, job: model.job("q") }
                }
                Op::Clear => ProcessorEvent::QueueCleared { request: model.request() },
                Op::Transcode => ProcessorEvent::TranscodeRequested {
                    request: model.request(),
                    job: None,
                },
                Op::TranscodeExplicit => {
                    let request = model.request();
                    ProcessorEvent::TranscodeRequested { request, job: Some(model.job("x")) }
                }
                Op::Drain => ProcessorEvent::DrainRequested { request: model.request() },
                Op::Finish(ok) => {
                    let Some((run_id, job)) = model.running.take() else {
                        continue;
                    };
                    let outcome = if ok {
                        JobOutcome::Completed(TranscodeResult {
                            id: job.id().map(String::from),
                            output: blobs.register(Bytes::from_static(&[1, 2, 3]), "video/mp4"),
                            source: job.source().clone(),
                        })
                    } else {
                        JobOutcome::Failed(FfqueueError::engine("exec", "boom"))
                    };
                    ProcessorEvent::JobFinished { run_id, outcome }
                }
                Op::Progress(percent) => ProcessorEvent::ProgressReported {
                    ratio: f64::from(percent) / 100.0,
                    time_ns: 0,
                },
                Op::Load => ProcessorEvent::EngineStateChanged(EngineState::Loaded),
                Op::Unload => {
                    apply(&mut model, &mut core, ProcessorEvent::EngineStateChanged(EngineState::Unloaded))?;
                    ProcessorEvent::EngineReplaced
                }
            };
            apply(&mut model, &mut core, event)?;
        }

        // Queued jobs leave the queue in insertion order.
        prop_assert!(model.dequeued.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn queue_preserves_insertion_order(count in 0usize..30) {
        let mut core = ProcessorCore::new(ProcessorOptions::default());
        let mut model = Model::default();
        let mut expected = Vec::new();
        for _ in 0..count {
            let job = model.job("q");
            expected.push(job.label().to_string());
            let request = model.request();
            apply(&mut model, &mut core, ProcessorEvent::JobQueued { request, job })?;
        }
        let labels: Vec<_> = core.queue().snapshot().iter().map(|j| j.label().to_string()).collect();
        prop_assert_eq!(labels, expected);
    }
}
