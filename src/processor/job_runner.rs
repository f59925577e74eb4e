// src/processor/job_runner.rs

//! Execution of a single job against the engine.
//!
//! Protocol, identical for queued and explicit jobs:
//! 1. create the input directory
//! 2. mount the job's source into it
//! 3. `exec(["-i", <input>, <args...>, <output>])`
//! 4. read the output back as bytes and register it as a blob
//! 5. always unmount and delete the input directory
//!
//! The input directory is a fixed path reused by every job. That is only
//! sound because the core never dispatches two jobs at once.

use tracing::{debug, info, warn};

use super::TranscodeResult;
use crate::backend::TranscodeEngine;
use crate::blob::BlobStore;
use crate::errors::Result;
use crate::queue::Job;
use crate::types::MountKind;

/// Fixed paths and output type shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub input_dir: String,
    pub output_file: String,
    pub mime_type: String,
    pub mount_kind: MountKind,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            input_dir: "/input".to_string(),
            output_file: "output.mp4".to_string(),
            mime_type: "video/mp4; codecs=avc1.42E01E,mp4a.40.2".to_string(),
            mount_kind: MountKind::WorkerFs,
        }
    }
}

impl JobSettings {
    /// Engine path of the job's mounted input.
    pub fn input_path(&self, job: &Job) -> String {
        format!(
            "{}/{}",
            self.input_dir.trim_end_matches('/'),
            job.source().name()
        )
    }

    /// Full engine argv for `job`.
    pub fn argv(&self, job: &Job) -> Vec<String> {
        let mut argv = Vec::with_capacity(job.args().len() + 3);
        argv.push("-i".to_string());
        argv.push(self.input_path(job));
        argv.extend(job.args().iter().cloned());
        argv.push(self.output_file.clone());
        argv
    }
}

/// Run `job` to completion. Cleanup always happens; cleanup failures are
/// logged and never replace the job's own outcome.
pub async fn run_job(
    engine: &dyn TranscodeEngine,
    job: &Job,
    settings: &JobSettings,
    blobs: &BlobStore,
) -> Result<TranscodeResult> {
    info!(job = %job.label(), "starting job");

    let outcome = execute(engine, job, settings, blobs).await;
    cleanup(engine, job, settings).await;

    match outcome {
        Ok(ref result) => info!(
            job = %job.label(),
            url = %result.output.url(),
            bytes = result.output.data().len(),
            "job produced output"
        ),
        Err(ref e) => warn!(job = %job.label(), error = %e, "job execution error"),
    }

    outcome
}

async fn execute(
    engine: &dyn TranscodeEngine,
    job: &Job,
    settings: &JobSettings,
    blobs: &BlobStore,
) -> Result<TranscodeResult> {
    engine.create_dir(&settings.input_dir).await?;
    engine
        .mount(
            settings.mount_kind,
            vec![job.source().clone()],
            &settings.input_dir,
        )
        .await?;

    let argv = settings.argv(job);
    debug!(job = %job.label(), ?argv, "exec");
    engine.exec(argv).await?;

    let data = engine.read_file(&settings.output_file).await?.into_bytes();
    let output = blobs.register(data, &settings.mime_type);

    Ok(TranscodeResult {
        id: job.id().map(String::from),
        output,
        source: job.source().clone(),
    })
}

async fn cleanup(engine: &dyn TranscodeEngine, job: &Job, settings: &JobSettings) {
    if let Err(e) = engine.unmount(&settings.input_dir).await {
        warn!(job = %job.label(), error = %e, "failed to unmount input directory");
    }
    if let Err(e) = engine.delete_dir(&settings.input_dir).await {
        warn!(job = %job.label(), error = %e, "failed to delete input directory");
    }
}
