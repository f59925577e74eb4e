// src/processor/hooks.rs

//! Caller supplied callbacks, configured once when the processor is spawned.
//!
//! Hooks run on the processor's event loop, so they must return quickly.

use std::fmt;

use super::TranscodeResult;
use crate::errors::FfqueueError;
use crate::queue::Job;

pub type CompleteHook = Box<dyn Fn(&TranscodeResult, Option<&[Job]>) + Send + Sync>;
pub type ErrorHook = Box<dyn Fn(&FfqueueError) + Send + Sync>;
pub type ProgressHook = Box<dyn Fn(u8, u64) + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
    on_progress: Option<ProgressHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with each result; the remaining queue is passed when
    /// `queue_aware_callbacks` is enabled.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&TranscodeResult, Option<&[Job]>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&FfqueueError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called with `(percent, elapsed_seconds)` of the current job.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(u8, u64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub(crate) fn complete(&self, result: &TranscodeResult, queue: Option<&[Job]>) {
        if let Some(ref hook) = self.on_complete {
            hook(result, queue);
        }
    }

    pub(crate) fn error(&self, error: &FfqueueError) {
        if let Some(ref hook) = self.on_error {
            hook(error);
        }
    }

    pub(crate) fn progress(&self, percent: u8, seconds: u64) {
        if let Some(ref hook) = self.on_progress {
            hook(percent, seconds);
        }
    }
}
