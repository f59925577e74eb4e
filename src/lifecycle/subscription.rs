// src/lifecycle/subscription.rs

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backend::{EngineEvent, SharedEngine};
use crate::processor::{Inbound, ProcessorEvent};

/// Forwards one engine instance's events for as long as it is alive.
///
/// Log lines go to `tracing` under the `ffqueue::engine` target; progress is
/// posted to the processor. Dropping the subscription stops the forwarding
/// task, so a replaced instance can no longer report into the processor.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn(engine: &SharedEngine, notifier: mpsc::WeakSender<Inbound>) -> Self {
        let mut events = engine.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::Log { message }) => {
                        debug!(target: "ffqueue::engine", "{message}");
                    }
                    Ok(EngineEvent::Progress { ratio, time_ns }) => {
                        trace!(ratio, time_ns, "engine progress");
                        let Some(tx) = notifier.upgrade() else {
                            break;
                        };
                        let event = ProcessorEvent::ProgressReported { ratio, time_ns };
                        if tx.send(Inbound::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("engine subscription ended");
        });
        Self { task }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
