use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Lifecycle state of the single engine instance.
///
/// - `Unloaded`: fresh instance, nothing initialised.
/// - `Loading`: `load()` is in flight; further loads are no-ops.
/// - `Loaded`: the engine accepts filesystem and exec calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
}

impl EngineState {
    pub fn is_loaded(self) -> bool {
        self == EngineState::Loaded
    }

    pub fn is_loading(self) -> bool {
        self == EngineState::Loading
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loading => "loading",
            EngineState::Loaded => "loaded",
        };
        f.write_str(s)
    }
}

/// Filesystem type used when mounting sources into the engine.
///
/// Only `WorkerFs` (read-only view of caller supplied files) is used by the
/// job runner today; `MemFs` is accepted by engines that can copy into RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    #[default]
    WorkerFs,
    MemFs,
}

impl FromStr for MountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "workerfs" => Ok(MountKind::WorkerFs),
            "memfs" => Ok(MountKind::MemFs),
            other => Err(format!(
                "invalid mount kind: {other} (expected \"workerfs\" or \"memfs\")"
            )),
        }
    }
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::WorkerFs => f.write_str("WORKERFS"),
            MountKind::MemFs => f.write_str("MEMFS"),
        }
    }
}
