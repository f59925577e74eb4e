use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, Semaphore};

use ffqueue::backend::{
    EngineEvent, EngineFactory, EngineFuture, EngineLocations, FileData, SharedEngine,
    TranscodeEngine,
};
use ffqueue::errors::FfqueueError;
use ffqueue::queue::SourceBlob;
use ffqueue::types::MountKind;

/// One engine call as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load,
    CreateDir(String),
    Mount {
        kind: MountKind,
        names: Vec<String>,
        path: String,
    },
    Unmount(String),
    DeleteDir(String),
    Exec(Vec<String>),
    ReadFile(String),
    Terminate,
}

/// What the fake does when called. Shared by every instance of a factory.
#[derive(Debug, Clone, Default)]
pub struct FakeBehaviour {
    /// `load` fails with this message.
    pub fail_load: Option<String>,
    /// `mount` fails with this message.
    pub fail_mount: Option<String>,
    /// `exec` fails when the mounted source has one of these names.
    pub fail_exec_for: HashSet<String>,
    /// `terminate` fails with this message.
    pub fail_terminate: Option<String>,
    /// Progress reports emitted at the start of every exec.
    pub progress: Vec<(f64, u64)>,
    /// Time every exec takes after emitting progress.
    pub exec_delay: Duration,
    /// When set, every exec waits for a permit before finishing.
    pub gate: Option<Arc<Semaphore>>,
    /// Returned by `read_file`; defaults to bytes `[1, 2, 3]`.
    pub output: Option<FileData>,
}

impl FakeBehaviour {
    pub fn failing_exec_for(mut self, name: &str) -> Self {
        self.fail_exec_for.insert(name.to_string());
        self
    }

    pub fn with_progress(mut self, reports: &[(f64, u64)]) -> Self {
        self.progress = reports.to_vec();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Observations shared by every fake instance of one factory.
#[derive(Debug, Default)]
pub struct Probe {
    /// `(instance index, call)` in call order.
    calls: Mutex<Vec<(usize, Call)>>,
    instances: AtomicUsize,
    active_execs: AtomicUsize,
    max_active_execs: AtomicUsize,
}

impl Probe {
    pub fn calls(&self) -> Vec<(usize, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, instance: usize) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(i, _)| *i == instance)
            .map(|(_, c)| c)
            .collect()
    }

    /// Number of instances created so far (the first has index 0).
    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Load))
    }

    pub fn terminate_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Terminate))
    }

    /// Input paths of every exec, in order.
    pub fn exec_inputs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(_, c)| match c {
                Call::Exec(args) => args
                    .iter()
                    .position(|a| a == "-i")
                    .and_then(|i| args.get(i + 1).cloned()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of execs that overlapped.
    pub fn max_concurrent_execs(&self) -> usize {
        self.max_active_execs.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|(_, c)| pred(c)).count()
    }

    fn record(&self, instance: usize, call: Call) {
        self.calls.lock().unwrap().push((instance, call));
    }
}

/// In-memory `TranscodeEngine` that records every call.
pub struct FakeEngine {
    index: usize,
    behaviour: FakeBehaviour,
    probe: Arc<Probe>,
    events: broadcast::Sender<EngineEvent>,
    mounted: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new(behaviour: FakeBehaviour, probe: Arc<Probe>) -> Self {
        let index = probe.instances.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(64);
        Self {
            index,
            behaviour,
            probe,
            events,
            mounted: Mutex::new(Vec::new()),
        }
    }

    /// Factory producing fresh fakes that report into one probe.
    pub fn factory(behaviour: FakeBehaviour) -> (EngineFactory, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let shared = Arc::clone(&probe);
        let factory: EngineFactory = Arc::new(move || {
            Arc::new(FakeEngine::new(behaviour.clone(), Arc::clone(&shared))) as SharedEngine
        });
        (factory, probe)
    }

    fn record(&self, call: Call) {
        self.probe.record(self.index, call);
    }
}

impl TranscodeEngine for FakeEngine {
    fn load<'a>(&'a self, _locations: &'a EngineLocations) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Load);
            tokio::task::yield_now().await;
            match &self.behaviour.fail_load {
                Some(msg) => Err(FfqueueError::EngineInit(msg.clone())),
                None => Ok(()),
            }
        })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::CreateDir(path.to_string()));
            Ok(())
        })
    }

    fn mount<'a>(
        &'a self,
        kind: MountKind,
        files: Vec<SourceBlob>,
        path: &'a str,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let names: Vec<String> = files.iter().map(|f| f.name().to_string()).collect();
            self.record(Call::Mount {
                kind,
                names: names.clone(),
                path: path.to_string(),
            });
            if let Some(msg) = &self.behaviour.fail_mount {
                return Err(FfqueueError::engine("mount", msg.clone()));
            }
            *self.mounted.lock().unwrap() = names;
            Ok(())
        })
    }

    fn unmount<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Unmount(path.to_string()));
            self.mounted.lock().unwrap().clear();
            Ok(())
        })
    }

    fn delete_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::DeleteDir(path.to_string()));
            Ok(())
        })
    }

    fn exec(&self, args: Vec<String>) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.record(Call::Exec(args));

            let active = self.probe.active_execs.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe
                .max_active_execs
                .fetch_max(active, Ordering::SeqCst);

            let _ = self.events.send(EngineEvent::Log {
                message: "fake exec started".to_string(),
            });
            for &(ratio, time_ns) in &self.behaviour.progress {
                let _ = self.events.send(EngineEvent::Progress { ratio, time_ns });
            }
            if !self.behaviour.exec_delay.is_zero() {
                tokio::time::sleep(self.behaviour.exec_delay).await;
            }
            if let Some(gate) = &self.behaviour.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            self.probe.active_execs.fetch_sub(1, Ordering::SeqCst);

            let mounted = self.mounted.lock().unwrap().clone();
            if let Some(name) = mounted
                .iter()
                .find(|n| self.behaviour.fail_exec_for.contains(*n))
            {
                return Err(FfqueueError::engine("exec", format!("cannot decode {name}")));
            }
            Ok(())
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> EngineFuture<'a, FileData> {
        Box::pin(async move {
            self.record(Call::ReadFile(path.to_string()));
            Ok(self
                .behaviour
                .output
                .clone()
                .unwrap_or_else(|| FileData::Binary(Bytes::from_static(&[1, 2, 3]))))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn terminate(&self) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            self.record(Call::Terminate);
            match &self.behaviour.fail_terminate {
                Some(msg) => Err(FfqueueError::EngineTerminate(msg.clone())),
                None => Ok(()),
            }
        })
    }
}
