// tests/error_handling.rs

mod common;

use std::io::Write;

use common::{eventually, init_tracing, spawn_fake, with_timeout, Recorder};
use ffqueue::config::load_and_validate;
use ffqueue::errors::FfqueueError;
use ffqueue::types::EngineState;
use ffqueue_test_utils::builders::{ConfigBuilder, JobBuilder};
use ffqueue_test_utils::fake_engine::{Call, FakeBehaviour};
use tempfile::NamedTempFile;

#[tokio::test]
async fn exec_failure_reaches_on_error_and_the_caller() {
    init_tracing();

    let recorder = Recorder::new();
    let (handle, probe) = spawn_fake(
        FakeBehaviour::default().failing_exec_for("bad.mp4"),
        ConfigBuilder::new().manual().build(),
        recorder.hooks(),
    );
    handle.load().await.unwrap();

    for name in ["bad.mp4", "next1.mp4", "next2.mp4"] {
        handle.enqueue(JobBuilder::new(name).build()).await.unwrap();
    }

    let err = handle.transcode(None).await.unwrap_err();
    assert!(matches!(
        &err,
        FfqueueError::Engine { op: "exec", message } if message == "cannot decode bad.mp4"
    ));
    eventually(|| !recorder.errors().is_empty()).await;
    assert_eq!(recorder.errors(), vec![err.to_string()]);

    assert!(!handle.transcoding());
    let remaining: Vec<_> = handle.queue().iter().map(|j| j.label().to_string()).collect();
    assert_eq!(remaining, vec!["next1.mp4", "next2.mp4"]);
    assert!(handle.results().is_empty());

    // Cleanup still ran, and nothing was read back.
    let calls = probe.calls_of(0);
    assert!(calls.contains(&Call::Unmount("/input".to_string())));
    assert!(calls.contains(&Call::DeleteDir("/input".to_string())));
    assert!(!calls.iter().any(|c| matches!(c, Call::ReadFile(_))));

    // The processor keeps going.
    let next = handle.transcode(None).await.unwrap().unwrap();
    assert_eq!(next.id.as_deref(), Some("next1.mp4"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failures_resolve_to_none_when_errors_are_not_returned() {
    init_tracing();

    let recorder = Recorder::new();
    let (handle, _probe) = spawn_fake(
        FakeBehaviour::default().failing_exec_for("bad.mp4"),
        ConfigBuilder::new().manual().rethrow_errors(false).build(),
        recorder.hooks(),
    );
    handle.load().await.unwrap();

    let outcome = handle
        .transcode(Some(JobBuilder::new("bad.mp4").build()))
        .await
        .unwrap();
    assert!(outcome.is_none());
    eventually(|| recorder.errors().len() == 1).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_job_in_automatic_mode_does_not_stop_the_queue() {
    init_tracing();

    let recorder = Recorder::new();
    let (handle, probe) = spawn_fake(
        FakeBehaviour::default().failing_exec_for("b.mp4"),
        ConfigBuilder::new().build(),
        recorder.hooks(),
    );
    handle.load().await.unwrap();

    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        handle.enqueue(JobBuilder::new(name).build()).await.unwrap();
    }
    with_timeout(handle.wait_idle()).await.unwrap();
    eventually(|| recorder.completed_ids().len() == 2 && recorder.errors().len() == 1).await;

    assert_eq!(probe.exec_inputs().len(), 3, "failed jobs are not retried");
    assert_eq!(recorder.completed_ids(), vec!["a.mp4", "c.mp4"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn mount_failure_skips_exec() {
    init_tracing();

    let behaviour = FakeBehaviour {
        fail_mount: Some("no space".to_string()),
        ..FakeBehaviour::default()
    };
    let (handle, probe) = spawn_fake(
        behaviour,
        ConfigBuilder::new().manual().build(),
        Recorder::new().hooks(),
    );
    handle.load().await.unwrap();

    let err = handle
        .transcode(Some(JobBuilder::new("a.mp4").build()))
        .await
        .unwrap_err();
    assert!(matches!(err, FfqueueError::Engine { op: "mount", .. }));
    assert!(probe.exec_inputs().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn transcode_without_a_loaded_engine_fails_fast() {
    init_tracing();

    let (handle, probe) = spawn_fake(
        FakeBehaviour::default(),
        ConfigBuilder::new().manual().build(),
        Recorder::new().hooks(),
    );
    handle.enqueue(JobBuilder::new("a.mp4").build()).await.unwrap();

    let err = handle.transcode(None).await.unwrap_err();
    assert!(matches!(err, FfqueueError::EngineNotLoaded));
    assert_eq!(handle.queue().len(), 1, "nothing was dequeued");
    assert!(probe.exec_inputs().is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn load_failure_leaves_engine_unloaded_and_allows_retry() {
    init_tracing();

    let behaviour = FakeBehaviour {
        fail_load: Some("ffmpeg not found".to_string()),
        ..FakeBehaviour::default()
    };
    let (handle, probe) = spawn_fake(
        behaviour,
        ConfigBuilder::new().build(),
        Recorder::new().hooks(),
    );

    let err = handle.load().await.unwrap_err();
    assert!(matches!(err, FfqueueError::EngineInit(msg) if msg == "ffmpeg not found"));
    assert_eq!(handle.engine_state(), EngineState::Unloaded);
    assert_eq!(handle.snapshot().engine_state, EngineState::Unloaded);

    assert!(handle.load().await.is_err());
    assert_eq!(probe.load_count(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn operations_after_shutdown_report_closed() {
    init_tracing();

    let (handle, _probe) = spawn_fake(
        FakeBehaviour::default(),
        ConfigBuilder::new().build(),
        Recorder::new().hooks(),
    );
    handle.shutdown().await.unwrap();
    handle.shutdown().await.unwrap();

    assert!(matches!(
        handle.enqueue(JobBuilder::new("a.mp4").build()).await,
        Err(FfqueueError::ProcessorClosed)
    ));
    assert!(matches!(
        handle.transcode(None).await,
        Err(FfqueueError::ProcessorClosed)
    ));
    assert!(matches!(handle.load().await, Err(FfqueueError::ProcessorClosed)));
}

#[test]
fn invalid_input_dir_is_a_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[output]
input_dir = "relative/dir"
"#
    )
    .unwrap();

    match load_and_validate(file.path()) {
        Err(FfqueueError::ConfigError(msg)) => assert!(msg.contains("input_dir")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[queue\nauto_transcode = yes").unwrap();

    assert!(matches!(
        load_and_validate(file.path()),
        Err(FfqueueError::TomlError(_))
    ));
}

#[test]
fn full_config_file_is_loaded() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[engine]
base_path = "/opt/ffmpeg"
core = "ffmpeg-6"
auto_init = false

[queue]
auto_transcode = false
queue_aware_callbacks = true
rethrow_errors = false

[output]
input_dir = "/media"
file_name = "out.webm"
mime_type = "video/webm"
mount_kind = "memfs"
"#
    )
    .unwrap();

    let cfg = load_and_validate(file.path()).unwrap();
    let pcfg = cfg.processor_config();
    assert_eq!(
        pcfg.locations.core,
        std::path::PathBuf::from("/opt/ffmpeg/ffmpeg-6")
    );
    assert!(!pcfg.auto_init);
    assert!(!pcfg.options.auto_transcode);
    assert!(pcfg.options.queue_aware_callbacks);
    assert!(!pcfg.rethrow_errors);
    assert_eq!(pcfg.job.input_dir, "/media");
    assert_eq!(pcfg.job.output_file, "out.webm");
    assert_eq!(pcfg.job.mount_kind, ffqueue::types::MountKind::MemFs);
}
