// src/backend/process.rs

//! `TranscodeEngine` backed by a local `ffmpeg` executable.
//!
//! The engine's virtual filesystem is a private temporary directory: virtual
//! paths such as `/input/clip.mkv` or `output.mp4` are resolved beneath it,
//! and `exec` runs ffmpeg with that directory as its working directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use super::progress::ProgressTracker;
use super::{EngineEvent, EngineFuture, EngineLocations, FileData, TranscodeEngine};
use crate::errors::{FfqueueError, Result};
use crate::queue::{BlobContents, SourceBlob};
use crate::types::MountKind;

/// Arguments placed before the caller's argv on every exec.
const FIXED_ARGS: &[&str] = &[
    "-hide_banner",
    "-nostdin",
    "-y",
    "-progress",
    "pipe:1",
    "-nostats",
];

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Inner {
    binary: Option<PathBuf>,
    workdir: Option<TempDir>,
    /// Virtual mount point -> host files placed there by `mount`.
    mounts: HashMap<String, Vec<PathBuf>>,
    /// Cancels the exec in flight, if any.
    running: Option<oneshot::Sender<()>>,
    terminated: bool,
}

#[derive(Debug)]
pub struct FfmpegProcessEngine {
    inner: Mutex<Inner>,
    events: broadcast::Sender<EngineEvent>,
}

impl Default for FfmpegProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegProcessEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine; events are best effort.
        let _ = self.events.send(event);
    }

    fn root(&self) -> Result<PathBuf> {
        let inner = self.lock();
        if inner.terminated {
            return Err(FfqueueError::EngineNotLoaded);
        }
        inner
            .workdir
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .ok_or(FfqueueError::EngineNotLoaded)
    }

    fn resolve(&self, virtual_path: &str) -> Result<PathBuf> {
        host_path(&self.root()?, virtual_path)
    }

    async fn load_inner(&self, locations: &EngineLocations) -> Result<()> {
        {
            let inner = self.lock();
            if inner.terminated {
                return Err(FfqueueError::EngineInit(
                    "instance was terminated; create a new one".to_string(),
                ));
            }
            if inner.binary.is_some() {
                return Err(FfqueueError::EngineInit("engine already loaded".to_string()));
            }
        }

        let core = &locations.core;
        tokio::fs::metadata(core)
            .await
            .map_err(|e| FfqueueError::EngineInit(format!("{}: {e}", core.display())))?;

        let output = Command::new(core)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FfqueueError::EngineInit(format!("probing {}: {e}", core.display())))?;

        if !output.status.success() {
            return Err(FfqueueError::EngineInit(format!(
                "{} -version exited with {}",
                core.display(),
                output.status
            )));
        }

        let banner = String::from_utf8_lossy(&output.stdout);
        if let Some(first) = banner.lines().next() {
            self.emit(EngineEvent::Log {
                message: first.to_string(),
            });
        }

        let workdir = tempfile::Builder::new()
            .prefix("ffqueue-")
            .tempdir()
            .map_err(|e| FfqueueError::EngineInit(format!("creating working directory: {e}")))?;

        info!(
            core = %core.display(),
            workdir = %workdir.path().display(),
            "ffmpeg engine loaded"
        );

        let mut inner = self.lock();
        inner.binary = Some(core.clone());
        inner.workdir = Some(workdir);
        Ok(())
    }

    async fn mount_inner(
        &self,
        kind: MountKind,
        files: Vec<SourceBlob>,
        path: &str,
    ) -> Result<()> {
        let dir = self.resolve(path)?;
        if self.lock().mounts.contains_key(path) {
            return Err(FfqueueError::engine("mount", format!("{path} is already mounted")));
        }

        let mut placed = Vec::with_capacity(files.len());
        for blob in &files {
            let target = host_path(&dir, blob.name())?;
            let res = match blob.contents() {
                BlobContents::Memory(bytes) => tokio::fs::write(&target, bytes).await,
                BlobContents::File(src) => tokio::fs::copy(src, &target).await.map(|_| ()),
            };
            if let Err(e) = res {
                // Undo partial mounts so the directory can still be deleted.
                for p in &placed {
                    let _ = tokio::fs::remove_file(p).await;
                }
                return Err(FfqueueError::engine("mount", format!("{}: {e}", blob.name())));
            }
            placed.push(target);
        }

        debug!(%kind, path, files = placed.len(), "mounted sources");
        self.lock().mounts.insert(path.to_string(), placed);
        Ok(())
    }

    async fn unmount_inner(&self, path: &str) -> Result<()> {
        let placed = self
            .lock()
            .mounts
            .remove(path)
            .ok_or_else(|| FfqueueError::engine("unmount", format!("{path} is not mounted")))?;

        for file in placed {
            tokio::fs::remove_file(&file)
                .await
                .map_err(|e| FfqueueError::engine("unmount", format!("{}: {e}", file.display())))?;
        }
        Ok(())
    }

    async fn exec_inner(&self, args: Vec<String>) -> Result<()> {
        let root = self.root()?;
        let binary = self
            .lock()
            .binary
            .clone()
            .ok_or(FfqueueError::EngineNotLoaded)?;

        debug!(?args, "exec");

        let mut child = Command::new(&binary)
            .args(FIXED_ARGS)
            .args(&args)
            .current_dir(&root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FfqueueError::engine("exec", format!("spawning ffmpeg: {e}")))?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.lock().running = Some(cancel_tx);

        let tracker = Arc::new(Mutex::new(ProgressTracker::new()));

        let stderr_task = child.stderr.take().map(|stderr| {
            let events = self.events.clone();
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut t) = tracker.lock() {
                        t.observe_stderr(&line);
                    }
                    let _ = events.send(EngineEvent::Log { message: line });
                }
            })
        });

        let stdout_task = child.stdout.take().map(|stdout| {
            let events = self.events.clone();
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let event = match tracker.lock() {
                        Ok(mut t) => t.observe_progress(&line),
                        Err(_) => None,
                    };
                    if let Some(event) = event {
                        let _ = events.send(event);
                    }
                }
            })
        });

        let outcome = tokio::select! {
            status = child.wait() => exit_outcome(status),
            _ = &mut cancel_rx => {
                info!("exec cancelled; killing ffmpeg");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill ffmpeg on cancellation");
                }
                Err(FfqueueError::engine("exec", "terminated while running"))
            }
        };

        self.lock().running = None;

        // Drain the readers so the final progress/log lines are delivered.
        for task in [stderr_task, stdout_task].into_iter().flatten() {
            let _ = task.await;
        }

        outcome
    }

    async fn terminate_inner(&self) -> Result<()> {
        let (running, workdir) = {
            let mut inner = self.lock();
            inner.terminated = true;
            inner.binary = None;
            inner.mounts.clear();
            (inner.running.take(), inner.workdir.take())
        };

        if let Some(cancel) = running {
            let _ = cancel.send(());
        }

        if let Some(dir) = workdir {
            let path = dir.path().to_path_buf();
            dir.close()
                .map_err(|e| FfqueueError::EngineTerminate(format!("{}: {e}", path.display())))?;
        }

        info!("ffmpeg engine terminated");
        Ok(())
    }
}

impl TranscodeEngine for FfmpegProcessEngine {
    fn load<'a>(&'a self, locations: &'a EngineLocations) -> EngineFuture<'a, ()> {
        Box::pin(self.load_inner(locations))
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.resolve(path)?;
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| FfqueueError::engine("createDir", format!("{path}: {e}")))
        })
    }

    fn mount<'a>(
        &'a self,
        kind: MountKind,
        files: Vec<SourceBlob>,
        path: &'a str,
    ) -> EngineFuture<'a, ()> {
        Box::pin(self.mount_inner(kind, files, path))
    }

    fn unmount<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(self.unmount_inner(path))
    }

    fn delete_dir<'a>(&'a self, path: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.resolve(path)?;
            tokio::fs::remove_dir(&dir)
                .await
                .map_err(|e| FfqueueError::engine("deleteDir", format!("{path}: {e}")))
        })
    }

    fn exec(&self, args: Vec<String>) -> EngineFuture<'_, ()> {
        Box::pin(self.exec_inner(args))
    }

    fn read_file<'a>(&'a self, path: &'a str) -> EngineFuture<'a, FileData> {
        Box::pin(async move {
            let file = self.resolve(path)?;
            let data = tokio::fs::read(&file)
                .await
                .map_err(|e| FfqueueError::engine("readFile", format!("{path}: {e}")))?;
            Ok(FileData::Binary(Bytes::from(data)))
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn terminate(&self) -> EngineFuture<'_, ()> {
        Box::pin(self.terminate_inner())
    }
}

/// Map a virtual path onto the host, below `root`.
///
/// Absolute and relative virtual paths are both rooted at `root`; parent
/// components are rejected.
fn host_path(root: &Path, virtual_path: &str) -> Result<PathBuf> {
    let rel = Path::new(virtual_path.trim_start_matches('/'));
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(FfqueueError::InvalidPath(virtual_path.to_string())),
        }
    }
    Ok(root.join(rel))
}

/// Turn the result of waiting on ffmpeg into the exec outcome.
///
/// Never returns early, so the caller always clears the running slot and
/// drains the output readers.
fn exit_outcome(status: std::io::Result<std::process::ExitStatus>) -> Result<()> {
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            Err(FfqueueError::engine("exec", format!("ffmpeg exited with code {code}")))
        }
        Err(e) => Err(FfqueueError::engine("exec", format!("waiting for ffmpeg: {e}"))),
    }
}
