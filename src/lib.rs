// src/lib.rs

pub mod backend;
pub mod blob;
pub mod cli;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::backend::{EngineFactory, FfmpegProcessEngine, SharedEngine};
use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate, load_or_default, ConfigFile};
use crate::errors::FfqueueError;
use crate::processor::{Hooks, Processor, ProcessorConfig, ProcessorHandle, TranscodeResult};
use crate::queue::{Job, SourceBlob};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the processor and its ffmpeg engine
/// - queueing every input and waiting for the results
/// - writing outputs to disk
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = match &args.config {
        Some(path) => load_and_validate(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => load_or_default(default_config_path()).context("loading ffqueue.toml")?,
    };

    let mut pcfg = cfg.processor_config();
    if args.manual {
        pcfg.options.auto_transcode = false;
    }
    // The engine is loaded explicitly below so load errors abort the run.
    pcfg.auto_init = false;

    let jobs = build_jobs(&args);

    if args.dry_run {
        print_dry_run(&cfg, &pcfg, &jobs);
        return Ok(());
    }

    let failures = Arc::new(AtomicUsize::new(0));
    let hooks = cli_hooks(Arc::clone(&failures));

    let factory: EngineFactory =
        Arc::new(|| Arc::new(FfmpegProcessEngine::new()) as SharedEngine);
    let handle = Processor::spawn(factory, pcfg.clone(), hooks);

    // Ctrl-C → graceful shutdown.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received; shutting down");
            if let Err(e) = handle.shutdown().await {
                error!(error = %e, "shutdown failed");
            }
        });
    }

    handle.load().await.context("loading engine")?;

    let total = jobs.len();
    for job in jobs {
        handle.enqueue(job).await?;
    }

    if pcfg.options.auto_transcode {
        handle.wait_idle().await?;
    } else {
        run_manually(&handle).await?;
    }

    let extension = output_extension(&cfg.output().file_name);
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let results = handle.results();
    for (result, path) in results.iter().zip(output_paths(&args.out_dir, &results, extension)) {
        std::fs::write(&path, result.output.data())
            .with_context(|| format!("writing {}", path.display()))?;
        println!("{}", path.display());
    }

    handle.unload().await.context("unloading engine")?;
    handle.shutdown().await?;

    let failed = failures.load(Ordering::SeqCst);
    if failed > 0 {
        anyhow::bail!("{failed} of {total} job(s) failed");
    }
    Ok(())
}

/// Run the queue head until the queue is empty, one request at a time.
async fn run_manually(handle: &ProcessorHandle) -> Result<()> {
    while !handle.queue().is_empty() {
        match handle.transcode(None).await {
            Ok(Some(result)) => {
                debug!(job_id = ?result.id, "manual transcode finished");
            }
            Ok(None) => {}
            Err(FfqueueError::ProcessorClosed) => {
                anyhow::bail!("processor stopped before the queue was drained");
            }
            // Nothing can be dequeued without an engine.
            Err(FfqueueError::EngineNotLoaded) => {
                anyhow::bail!("engine unloaded before the queue was drained");
            }
            // Already reported through the error hook.
            Err(_) => {}
        }
    }
    Ok(())
}

fn build_jobs(args: &CliArgs) -> Vec<Job> {
    let job_args = args.job_args();
    args.inputs
        .iter()
        .map(|path| {
            let source = SourceBlob::from_path(path);
            let id = source.name().to_string();
            Job::new(source, Some(id), job_args.clone())
        })
        .collect()
}

fn cli_hooks(failures: Arc<AtomicUsize>) -> Hooks {
    Hooks::new()
        .on_complete(|result, _queue| {
            info!(
                job_id = result.id.as_deref().unwrap_or("<none>"),
                url = result.output.url(),
                bytes = result.output.data().len(),
                "transcode finished"
            );
        })
        .on_error(move |err| {
            failures.fetch_add(1, Ordering::SeqCst);
            error!(error = %err, "transcode failed");
        })
        .on_progress(|percent, elapsed| {
            info!(percent, elapsed_seconds = elapsed, "progress");
        })
}

fn output_extension(file_name: &str) -> &str {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
}

fn output_stem(result: &TranscodeResult) -> &str {
    let name = result.id.as_deref().unwrap_or(result.source.name());
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
}

/// `<out_dir>/<stem of the job id>.<ext>`, one path per result.
///
/// Results sharing a stem get `-2`, `-3`, ... appended so no output
/// overwrites another.
fn output_paths(out_dir: &Path, results: &[TranscodeResult], extension: &str) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    results
        .iter()
        .map(|result| {
            let stem = output_stem(result);
            let mut file_name = format!("{stem}.{extension}");
            let mut n = 2;
            while !taken.insert(file_name.clone()) {
                file_name = format!("{stem}-{n}.{extension}");
                n += 1;
            }
            out_dir.join(file_name)
        })
        .collect()
}

/// Simple dry-run output: effective config and the engine argv per input.
fn print_dry_run(cfg: &ConfigFile, pcfg: &ProcessorConfig, jobs: &[Job]) {
    println!("ffqueue dry-run");
    println!("  engine.core = {}", pcfg.locations.core.display());
    if let Some(ref wasm) = pcfg.locations.wasm {
        println!("  engine.wasm = {}", wasm.display());
    }
    if let Some(ref worker) = pcfg.locations.worker {
        println!("  engine.worker = {}", worker.display());
    }
    println!("  queue.auto_transcode = {}", pcfg.options.auto_transcode);
    println!(
        "  queue.queue_aware_callbacks = {}",
        pcfg.options.queue_aware_callbacks
    );
    println!("  queue.rethrow_errors = {}", pcfg.rethrow_errors);
    println!("  output.input_dir = {}", cfg.output().input_dir);
    println!("  output.file_name = {}", cfg.output().file_name);
    println!("  output.mime_type = {}", cfg.output().mime_type);
    println!("  output.mount_kind = {}", cfg.output().mount_kind);
    println!();

    println!("jobs ({}):", jobs.len());
    for job in jobs {
        println!("  - {}", job.label());
        println!("      argv: {}", pcfg.job.argv(job).join(" "));
    }

    debug!("dry-run complete (no execution)");
}
