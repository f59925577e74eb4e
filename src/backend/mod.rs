// src/backend/mod.rs

//! Pluggable transcoding engine abstraction.
//!
//! The processor talks to a `TranscodeEngine` instead of a concrete binary.
//! This makes it easy to swap in a fake engine in tests while keeping the
//! production implementation in [`process`].
//!
//! - [`FfmpegProcessEngine`] drives a local `ffmpeg` executable and backs the
//!   engine's virtual filesystem with a private working directory.
//! - Tests provide their own `TranscodeEngine` that records calls and returns
//!   canned output.
//!
//! Engine events (`log`, `progress`) are instance scoped: a replacement
//! instance has its own event stream, see `lifecycle::Subscription`.

pub mod process;
pub mod progress;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::errors::Result;
use crate::queue::SourceBlob;
use crate::types::MountKind;

pub use process::FfmpegProcessEngine;

/// Boxed future returned by every engine call.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Shared handle to the current engine instance.
pub type SharedEngine = Arc<dyn TranscodeEngine>;

/// Creates fresh, unloaded engine instances (initially and on every unload).
pub type EngineFactory = Arc<dyn Fn() -> SharedEngine + Send + Sync>;

/// Notifications emitted by a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One line of engine log output.
    Log { message: String },
    /// Fractional progress (0.0..=1.0) of the current exec, plus elapsed
    /// media time in nanoseconds.
    Progress { ratio: f64, time_ns: u64 },
}

/// Output of `read_file`: engines may hand back text instead of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Binary(Bytes),
    Text(String),
}

impl FileData {
    /// Normalize to bytes; text is UTF-8 encoded.
    pub fn into_bytes(self) -> Bytes {
        match self {
            FileData::Binary(bytes) => bytes,
            FileData::Text(text) => Bytes::from(text.into_bytes()),
        }
    }
}

/// Local locations of the engine's resources.
///
/// `core` is mandatory; `wasm` and `worker` are only meaningful for engines
/// split across several artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLocations {
    pub core: PathBuf,
    pub wasm: Option<PathBuf>,
    pub worker: Option<PathBuf>,
}

impl EngineLocations {
    /// Resolve artifact names against a base directory.
    pub fn resolve(
        base: impl AsRef<Path>,
        core: &str,
        wasm: Option<&str>,
        worker: Option<&str>,
    ) -> Self {
        let base = base.as_ref();
        Self {
            core: base.join(core),
            wasm: wasm.map(|w| base.join(w)),
            worker: worker.map(|w| base.join(w)),
        }
    }
}

/// Capability surface of the external, single-instance transcoding engine.
///
/// Implementations must be safe to share behind an `Arc`; the processor only
/// ever issues one job's calls at a time.
pub trait TranscodeEngine: Send + Sync {
    /// Initialise the engine from local resources.
    fn load<'a>(&'a self, locations: &'a EngineLocations) -> EngineFuture<'a, ()>;

    /// Create a directory in the engine's virtual filesystem.
    fn create_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()>;

    /// Bind the given sources into `path`.
    fn mount<'a>(
        &'a self,
        kind: MountKind,
        files: Vec<SourceBlob>,
        path: &'a str,
    ) -> EngineFuture<'a, ()>;

    fn unmount<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()>;

    fn delete_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()>;

    /// Run the engine with an ordered argument list.
    fn exec(&self, args: Vec<String>) -> EngineFuture<'_, ()>;

    fn read_file<'a>(&'a self, path: &'a str) -> EngineFuture<'a, FileData>;

    /// Subscribe to this instance's log/progress events.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Release every resource held by the instance.
    fn terminate(&self) -> EngineFuture<'_, ()>;
}
