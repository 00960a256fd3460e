//! Integration tests for the Generation Coordinator
//!
//! Tests cover:
//! - Request coalescing
//! - Concurrency ceiling and priority admission
//! - Retry of transient failures
//! - Batch, stream and cancellation semantics

use crate::integration::test_utils::{test_config, MockBackend, ScriptedFailure, GENERATED_FILE};
use futures::StreamExt;
use scaffold::error::BackendError;
use scaffold::{GenerationCoordinator, GenerationRequest, RequestKey, TaskState};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn coordinator(backend: &MockBackend, max_concurrency: usize) -> GenerationCoordinator<MockBackend> {
    GenerationCoordinator::new(backend.clone(), test_config(max_concurrency))
}

#[tokio::test]
async fn test_same_key_coalesces_into_one_execution() {
    let backend = MockBackend::new().with_delay("/out/a", Duration::from_millis(50));
    let coordinator = coordinator(&backend, 5);

    let first = coordinator.submit(GenerationRequest::new("svc", "/out/a").with_variable("x", 1));
    let second = coordinator.submit(GenerationRequest::new("svc", "/out/a").with_variable("x", 2));
    assert_eq!(first.key(), second.key());
    assert_eq!(coordinator.stats().in_flight, 1);

    let (a, b) = tokio::join!(first, second);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(backend.compile_calls(), 1);
    assert_eq!(backend.materialize_calls(), 1);
}

#[tokio::test]
async fn test_end_to_end_single_backend_pair() {
    let backend = MockBackend::new().with_delay("/out/a", Duration::from_millis(20));
    let coordinator = coordinator(&backend, 1);
    let request = || {
        GenerationRequest::new("svc", "/out/a")
            .with_variable("x", 1)
            .with_priority(0)
    };

    let (a, b) = tokio::join!(coordinator.submit(request()), coordinator.submit(request()));

    assert!(a.success);
    assert_eq!(backend.compile_calls(), 1);
    assert_eq!(backend.materialize_calls(), 1);
    assert_eq!(a.generated_files, b.generated_files);
    assert_eq!(a.generated_files, vec![PathBuf::from("/out/a").join(GENERATED_FILE)]);
    assert_eq!(a.metadata["template_id"], json!("svc"));
    assert_eq!(a.metadata["attempts"], json!(1));
    assert_eq!(
        a.metadata["request_key"],
        json!(RequestKey::derive("svc", &PathBuf::from("/out/a")).to_hex())
    );
    assert!(a.duration.is_some());
}

#[tokio::test]
async fn test_running_tasks_never_exceed_ceiling() {
    let mut backend = MockBackend::new();
    for i in 0..6 {
        backend = backend.with_delay(format!("/out/{i}"), Duration::from_millis(40));
    }
    let coordinator = coordinator(&backend, 2);

    let handles: Vec<_> = (0..6)
        .map(|i| coordinator.submit(GenerationRequest::new("svc", format!("/out/{i}"))))
        .collect();
    let stats = coordinator.stats();
    assert_eq!(stats.running, 2);
    assert_eq!(stats.queued, 4);
    assert_eq!(stats.in_flight, 6);
    assert_eq!(stats.max_concurrency, 2);

    let results = futures::future::join_all(handles).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(backend.max_running(), 2);
    assert_eq!(coordinator.stats().running, 0);
}

#[tokio::test]
async fn test_queued_tasks_start_by_priority() {
    let backend = MockBackend::new().with_delay("/out/blocker", Duration::from_millis(60));
    let coordinator = coordinator(&backend, 1);

    let blocker = coordinator.submit(GenerationRequest::new("svc", "/out/blocker"));
    let queued: Vec<_> = [1, 5, 3]
        .iter()
        .map(|p| coordinator.submit(GenerationRequest::new("svc", format!("/out/p{p}")).with_priority(*p)))
        .collect();

    assert_eq!(coordinator.status(&blocker.key()), Some(TaskState::Running));
    assert_eq!(coordinator.status(&queued[0].key()), Some(TaskState::Queued));

    blocker.await;
    futures::future::join_all(queued).await;

    let order: Vec<PathBuf> = backend.started();
    assert_eq!(
        order,
        ["/out/blocker", "/out/p5", "/out/p3", "/out/p1"]
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>()
    );
    assert_eq!(
        coordinator.status(&RequestKey::derive("svc", &PathBuf::from("/out/p1"))),
        None
    );
}

#[tokio::test]
async fn test_transient_failure_retried_until_success() {
    let backend = MockBackend::new();
    backend.fail_times("/out/flaky", 2);
    let coordinator = coordinator(&backend, 5);

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/flaky")).await;
    assert!(result.success);
    assert_eq!(result.metadata["attempts"], json!(3));
    assert_eq!(backend.materialize_calls(), 3);
    assert_eq!(backend.compile_calls(), 1);
    assert_eq!(result.metadata["recovery_strategy"], json!("wait_for_backend"));
}

#[tokio::test]
async fn test_transient_failure_surfaced_after_bound() {
    let backend = MockBackend::new();
    backend.fail_times("/out/down", 3);
    let coordinator = coordinator(&backend, 5);

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/down")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("backend_fault"));
    assert_eq!(result.metadata["attempts"], json!(3));
    assert!(result.metadata["recovery"].as_str().is_some());
    assert_eq!(backend.materialize_calls(), 3);

    let stats = coordinator.recovery().statistics();
    assert_eq!(stats.total_attempts, 3);
}

#[tokio::test]
async fn test_no_cooldown_after_final_attempt() {
    let backend = MockBackend::new();
    backend.fail_times("/out/once", 1);
    let mut config = test_config(5);
    config.coordinator.max_retry_attempts = 1;
    config.recovery.backend_cooldown_ms = 30_000;
    let coordinator = GenerationCoordinator::new(backend.clone(), config);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.submit(GenerationRequest::new("svc", "/out/once")),
    )
    .await
    .expect("final failure should not wait out the backend cooldown");
    assert!(!result.success);
    assert_eq!(result.metadata["attempts"], json!(1));
    assert_eq!(result.metadata["recovery_strategy"], json!("wait_for_backend"));
    assert_eq!(result.metadata["recovery_succeeded"], json!(false));
}

#[tokio::test]
async fn test_cooldown_counts_toward_retry_delay() {
    let backend = MockBackend::new();
    backend.fail_times("/out/cool", 1);
    let mut config = test_config(5);
    config.coordinator.retry_delay_ms = 500;
    config.recovery.backend_cooldown_ms = 500;
    let coordinator = GenerationCoordinator::new(backend.clone(), config);

    let started = std::time::Instant::now();
    let result = coordinator.submit(GenerationRequest::new("svc", "/out/cool")).await;
    assert!(result.success);
    assert_eq!(result.metadata["attempts"], json!(2));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(900), "{:?}", elapsed);
}

#[tokio::test]
async fn test_permanent_failure_not_retried() {
    let backend = MockBackend::new();
    backend.fail_next(
        "/out/locked",
        ScriptedFailure::Error(BackendError::PermissionDenied("/out/locked".into())),
    );
    let coordinator = coordinator(&backend, 5);

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/locked")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("permission_error"));
    assert_eq!(backend.materialize_calls(), 1);
}

#[tokio::test]
async fn test_compile_failure_not_retried() {
    let backend = MockBackend::new().with_missing_template("ghost");
    let coordinator = coordinator(&backend, 5);

    let result = coordinator.submit(GenerationRequest::new("ghost", "/out/g")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("template_not_found"));
    assert_eq!(result.metadata["attempts"], json!(0));
    assert_eq!(backend.compile_calls(), 1);
    assert_eq!(backend.materialize_calls(), 0);
}

#[tokio::test]
async fn test_stream_yields_in_submission_order() {
    let backend = MockBackend::new().with_delay("/out/slow", Duration::from_millis(80));
    let coordinator = coordinator(&backend, 5);

    let results: Vec<_> = coordinator
        .stream(
            vec![
                GenerationRequest::new("svc", "/out/slow"),
                GenerationRequest::new("svc", "/out/fast"),
            ],
            2,
        )
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].output_path, PathBuf::from("/out/slow"));
    assert_eq!(results[1].output_path, PathBuf::from("/out/fast"));
    assert_eq!(
        backend.completed(),
        vec![PathBuf::from("/out/fast"), PathBuf::from("/out/slow")]
    );
    assert_eq!(backend.max_running(), 2);
}

#[tokio::test]
async fn test_stream_respects_local_limit_and_bypasses_queue() {
    let mut backend = MockBackend::new().with_delay("/out/blocker", Duration::from_millis(100));
    for i in 0..4 {
        backend = backend.with_delay(format!("/out/s{i}"), Duration::from_millis(10));
    }
    let coordinator = coordinator(&backend, 1);
    let blocker = coordinator.submit(GenerationRequest::new("svc", "/out/blocker"));

    let requests = (0..4)
        .map(|i| GenerationRequest::new("svc", format!("/out/s{i}")))
        .collect();
    let results: Vec<_> = coordinator.stream(requests, 1).collect().await;
    assert!(results.iter().all(|r| r.success));
    // streamed work finished while the shared slot was still occupied
    assert_eq!(coordinator.status(&blocker.key()), Some(TaskState::Running));
    assert!(blocker.await.success);
    assert!(backend.max_running() <= 2);
}

#[tokio::test]
async fn test_dropping_stream_aborts_unfinished_requests() {
    let backend = MockBackend::new().with_delay("/out/abandoned", Duration::from_millis(150));
    let coordinator = coordinator(&backend, 5);

    let mut stream = Box::pin(coordinator.stream(
        vec![
            GenerationRequest::new("svc", "/out/first"),
            GenerationRequest::new("svc", "/out/abandoned"),
        ],
        2,
    ));
    let first = stream.next().await.unwrap();
    assert!(first.success);
    drop(stream);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.completed(), vec![PathBuf::from("/out/first")]);
}

#[tokio::test]
async fn test_cancel_all_pending_leaves_running_task() {
    let backend = MockBackend::new().with_delay("/out/running", Duration::from_millis(60));
    let coordinator = coordinator(&backend, 1);

    let running = coordinator.submit(GenerationRequest::new("svc", "/out/running"));
    let pending: Vec<_> = (0..3)
        .map(|i| coordinator.submit(GenerationRequest::new("svc", format!("/out/q{i}"))))
        .collect();

    assert_eq!(coordinator.cancel_all_pending(), 3);
    assert_eq!(coordinator.stats().queued, 0);

    for result in futures::future::join_all(pending).await {
        assert!(!result.success);
        assert!(result.is_cancelled());
    }
    assert!(running.await.success);
    assert_eq!(backend.materialize_calls(), 1);
    assert_eq!(coordinator.cancel_all_pending(), 0);
}

#[tokio::test]
async fn test_batch_partial_failure_collects_everything() {
    let backend = MockBackend::new();
    backend.fail_next(
        "/out/bad",
        ScriptedFailure::Error(BackendError::PermissionDenied("/out/bad".into())),
    );
    let coordinator = coordinator(&backend, 5);

    let results = coordinator
        .submit_batch(
            vec![
                GenerationRequest::new("svc", "/out/good"),
                GenerationRequest::new("svc", "/out/bad"),
            ],
            true,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(!results[1].success);
}

#[tokio::test]
async fn test_batch_aborts_on_first_failure() {
    let backend = MockBackend::new().with_delay("/out/slow", Duration::from_millis(200));
    backend.fail_next(
        "/out/bad",
        ScriptedFailure::Error(BackendError::PermissionDenied("/out/bad".into())),
    );
    let coordinator = coordinator(&backend, 5);

    let started = std::time::Instant::now();
    let err = coordinator
        .submit_batch(
            vec![
                GenerationRequest::new("svc", "/out/slow"),
                GenerationRequest::new("svc", "/out/bad"),
            ],
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.failed.output_path, PathBuf::from("/out/bad"));
    assert!(started.elapsed() < Duration::from_millis(200));

    coordinator.await_all_in_flight().await;
    assert_eq!(backend.completed().len(), 2);
}

#[tokio::test]
async fn test_await_all_in_flight() {
    let mut backend = MockBackend::new();
    for i in 0..3 {
        backend = backend.with_delay(format!("/out/{i}"), Duration::from_millis(30 * (i + 1)));
    }
    let coordinator = coordinator(&backend, 2);
    for i in 0..3 {
        drop(coordinator.submit(GenerationRequest::new("svc", format!("/out/{i}"))));
    }

    coordinator.await_all_in_flight().await;
    assert_eq!(coordinator.stats().in_flight, 0);
    assert_eq!(backend.completed().len(), 3);

    // idle coordinator returns immediately
    tokio::time::timeout(Duration::from_millis(50), coordinator.await_all_in_flight())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_resubmit_after_completion_runs_again_from_cache() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend, 5);

    coordinator.submit(GenerationRequest::new("svc", "/out/again")).await;
    coordinator.submit(GenerationRequest::new("svc", "/out/again")).await;

    assert_eq!(backend.materialize_calls(), 2);
    assert_eq!(backend.compile_calls(), 1);
    assert_eq!(coordinator.cache().access_stats("svc").hits, 1);
}
