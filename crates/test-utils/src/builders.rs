#![allow(dead_code)]

use bytes::Bytes;
use ffqueue::backend::EngineLocations;
use ffqueue::processor::{JobSettings, ProcessorConfig, ProcessorOptions};
use ffqueue::queue::{Job, SourceBlob};

/// Builder for `Job` to simplify test setup.
pub struct JobBuilder {
    name: String,
    data: Bytes,
    id: Option<String>,
    args: Vec<String>,
}

impl JobBuilder {
    /// In-memory source named `name`, with the id set to `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"),
            id: Some(name.to_string()),
            args: vec!["-codec".to_string(), "copy".to_string()],
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn build(self) -> Job {
        Job::new(
            SourceBlob::from_bytes(self.name, self.data),
            self.id,
            self.args,
        )
    }
}

/// Builder for `ProcessorConfig`.
///
/// Defaults: automatic draining, no auto init, errors returned to callers.
pub struct ConfigBuilder {
    config: ProcessorConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig {
                options: ProcessorOptions::default(),
                job: JobSettings::default(),
                locations: EngineLocations::resolve("/opt/engine", "ffmpeg", None, None),
                rethrow_errors: true,
                auto_init: false,
                channel_capacity: 64,
            },
        }
    }

    pub fn manual(mut self) -> Self {
        self.config.options.auto_transcode = false;
        self
    }

    pub fn queue_aware(mut self) -> Self {
        self.config.options.queue_aware_callbacks = true;
        self
    }

    pub fn rethrow_errors(mut self, val: bool) -> Self {
        self.config.rethrow_errors = val;
        self
    }

    pub fn auto_init(mut self) -> Self {
        self.config.auto_init = true;
        self
    }

    pub fn channel_capacity(mut self, val: usize) -> Self {
        self.config.channel_capacity = val;
        self
    }

    pub fn build(self) -> ProcessorConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
