#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ffqueue::processor::Hooks;

pub use ffqueue_test_utils::{init_tracing, spawn_fake, with_timeout};

/// One hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Complete {
        id: Option<String>,
        url: String,
        queue: Option<Vec<String>>,
    },
    Error(String),
    Progress(u8, u64),
}

/// Records every hook invocation in order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hooks(&self) -> Hooks {
        let complete = Arc::clone(&self.seen);
        let error = Arc::clone(&self.seen);
        let progress = Arc::clone(&self.seen);
        Hooks::new()
            .on_complete(move |result, queue| {
                complete.lock().unwrap().push(Seen::Complete {
                    id: result.id.clone(),
                    url: result.output.url().to_string(),
                    queue: queue.map(|q| {
                        q.iter().map(|j| j.label().to_string()).collect()
                    }),
                });
            })
            .on_error(move |err| {
                error.lock().unwrap().push(Seen::Error(err.to_string()));
            })
            .on_progress(move |percent, seconds| {
                progress.lock().unwrap().push(Seen::Progress(percent, seconds));
            })
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn completed_ids(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Complete { id, .. } => Some(id.unwrap_or_default()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<(u8, u64)> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Progress(p, t) => Some((p, t)),
                _ => None,
            })
            .collect()
    }
}

/// Poll `cond` until it holds (bounded by `with_timeout`).
pub async fn eventually(cond: impl Fn() -> bool) {
    with_timeout(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
