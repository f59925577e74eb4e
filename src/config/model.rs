// src/config/model.rs

use std::path::PathBuf;

use serde::Deserialize;

use crate::types::MountKind;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// base_path = "/usr/bin"
/// core = "ffmpeg"
/// auto_init = true
///
/// [queue]
/// auto_transcode = true
///
/// [output]
/// file_name = "output.mp4"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub output: OutputSection,
}

/// `[engine]` section: where the engine lives and whether to load it eagerly.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Directory holding the engine artifacts.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Core artifact (for the process engine: the `ffmpeg` executable).
    #[serde(default = "default_core")]
    pub core: String,

    #[serde(default)]
    pub wasm: Option<String>,

    #[serde(default)]
    pub worker: Option<String>,

    /// Start loading as soon as the processor is spawned.
    #[serde(default = "default_true")]
    pub auto_init: bool,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("/usr/bin")
}

fn default_core() -> String {
    "ffmpeg".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            core: default_core(),
            wasm: None,
            worker: None,
            auto_init: true,
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Drain the queue automatically whenever the engine is idle.
    #[serde(default = "default_true")]
    pub auto_transcode: bool,

    /// Pass the remaining queue to `on_complete`.
    #[serde(default)]
    pub queue_aware_callbacks: bool,

    /// Return job errors to `transcode()` callers after `on_error` ran.
    #[serde(default = "default_true")]
    pub rethrow_errors: bool,

    /// Capacity of the processor's inbound channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            auto_transcode: true,
            queue_aware_callbacks: false,
            rethrow_errors: true,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// `[output]` section: fixed paths and output type of every job.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    /// Engine directory sources are mounted into. Reused by every job.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Output file name passed as the last engine argument.
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// MIME type attached to result handles.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    #[serde(default)]
    pub mount_kind: MountKind,
}

fn default_input_dir() -> String {
    "/input".to_string()
}

fn default_file_name() -> String {
    "output.mp4".to_string()
}

fn default_mime_type() -> String {
    "video/mp4; codecs=avc1.42E01E,mp4a.40.2".to_string()
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            file_name: default_file_name(),
            mime_type: default_mime_type(),
            mount_kind: MountKind::default(),
        }
    }
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    raw: RawConfigFile,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self { raw }
    }

    pub fn engine(&self) -> &EngineSection {
        &self.raw.engine
    }

    pub fn queue(&self) -> &QueueSection {
        &self.raw.queue
    }

    pub fn output(&self) -> &OutputSection {
        &self.raw.output
    }
}

impl ConfigFile {
    /// Settings for `Processor::spawn`.
    pub fn processor_config(&self) -> crate::processor::ProcessorConfig {
        crate::processor::ProcessorConfig::from_config(self)
    }
}
