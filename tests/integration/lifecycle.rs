//! Integration tests for the per-request lifecycle
//!
//! Hooks around generation, variable validation, output conflicts and cleanup of
//! partial output.

use crate::integration::test_utils::{test_config, MockBackend, ScriptedFailure};
use parking_lot::Mutex;
use scaffold::error::HookError;
use scaffold::hooks::{ConditionalHook, FnHook, TimeoutHook};
use scaffold::{GenerationCoordinator, GenerationRequest, Hook, HookContext, HookResult, HookType, Variables};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn coordinator(backend: &MockBackend) -> GenerationCoordinator<MockBackend> {
    GenerationCoordinator::new(backend.clone(), test_config(5))
}

fn setting(name: &str, value: serde_json::Value) -> Variables {
    let mut vars = Variables::new();
    vars.insert(name.into(), value);
    vars
}

#[tokio::test]
async fn test_pre_hook_variables_reach_backend() {
    let backend = MockBackend::new().with_required_variables(&["name", "port"]);
    let coordinator = coordinator(&backend);
    coordinator.hooks().register(Arc::new(FnHook::new(
        "defaults",
        HookType::PreGeneration,
        |_ctx| async { Ok(HookResult::ok().with_variables(setting("port", json!(8080)))) },
    )));

    let result = coordinator
        .submit(GenerationRequest::new("svc", "/out/hooked").with_variable("name", "billing"))
        .await;

    assert!(result.success, "{:?}", result.message);
    let vars = backend.last_variables().unwrap();
    assert_eq!(vars["name"], json!("billing"));
    assert_eq!(vars["port"], json!(8080));
}

#[tokio::test]
async fn test_missing_variables_fail_validation() {
    let backend = MockBackend::new().with_required_variables(&["name", "port"]);
    let coordinator = coordinator(&backend);

    let result = coordinator
        .submit(GenerationRequest::new("svc", "/out/invalid").with_variable("name", "billing"))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("variable_validation_failed"));
    assert_eq!(result.message.as_deref(), Some("Missing required variables: port"));
    assert_eq!(backend.materialize_calls(), 0);
}

#[tokio::test]
async fn test_failing_pre_hook_stops_generation() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);
    coordinator.hooks().register(Arc::new(FnHook::new(
        "lint",
        HookType::PreGeneration,
        |_ctx| async { Err(HookError::Failed("lint config missing".into())) },
    )));

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/lint")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("hook_execution_error"));
    assert!(result.message.as_deref().unwrap().contains("lint config missing"));
    assert_eq!(backend.materialize_calls(), 0);
}

#[tokio::test]
async fn test_short_circuit_skips_generation_successfully() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);
    let skip: Arc<dyn Hook> = Arc::new(FnHook::new("up-to-date", HookType::PreGeneration, |_ctx| async {
        Ok(HookResult::stop("already generated"))
    }));

    let result = coordinator
        .submit(GenerationRequest::new("svc", "/out/skip").with_hook(skip))
        .await;
    assert!(result.success);
    assert_eq!(result.metadata["skipped_by_hook"], json!(true));
    assert_eq!(result.message.as_deref(), Some("already generated"));
    assert!(result.generated_files.is_empty());
    assert_eq!(backend.materialize_calls(), 0);
}

#[tokio::test]
async fn test_conditional_request_hook_and_post_hook_context() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);
    let seen: Arc<Mutex<Option<HookContext>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    coordinator.hooks().register(Arc::new(FnHook::new(
        "record",
        HookType::PostGeneration,
        move |ctx| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock() = Some(ctx);
                Ok(HookResult::ok())
            }
        },
    )));
    let never: Arc<dyn Hook> = Arc::new(FnHook::new("never", HookType::PreGeneration, |_ctx| async {
        Ok(HookResult::failure("should not run"))
    }));

    let result = coordinator
        .submit(
            GenerationRequest::new("svc", "/out/post")
                .with_variable("enabled", false)
                .with_hook(Arc::new(ConditionalHook::new(never, "{{enabled}}"))),
        )
        .await;

    assert!(result.success);
    let ctx = seen.lock().clone().unwrap();
    assert_eq!(ctx.variables["enabled"], json!(false));
    assert_eq!(ctx.metadata["generated_files"], json!(["/out/post/generated.txt"]));
}

#[tokio::test]
async fn test_post_hook_timeout_fails_result_but_keeps_files() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);
    let slow: Arc<dyn Hook> = Arc::new(FnHook::new("notify", HookType::PostGeneration, |_ctx| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(HookResult::ok())
    }));
    coordinator
        .hooks()
        .register(Arc::new(TimeoutHook::new(slow, Duration::from_millis(10))));

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/slow-post")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("hook_execution_error"));
    assert_eq!(result.generated_files.len(), 1);
}

#[tokio::test]
async fn test_post_hook_failure_recorded_by_recovery() {
    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);
    coordinator.hooks().register(Arc::new(FnHook::new(
        "publish",
        HookType::PostGeneration,
        |_ctx| async { Err(HookError::Failed("registry unreachable".into())) },
    )));

    let result = coordinator.submit(GenerationRequest::new("svc", "/out/publish")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("hook_execution_error"));
    assert_eq!(result.metadata["recovery_succeeded"], json!(false));

    let stats = coordinator.recovery().statistics();
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(
        serde_json::to_value(&stats.by_error_kind).unwrap(),
        json!({"HookExecutionError": 1})
    );
    let records = coordinator.recovery().history();
    let context = records[0].context.as_ref().unwrap();
    assert_eq!(context.metadata["generated_files"], json!(["/out/publish/generated.txt"]));
}

#[tokio::test]
async fn test_existing_output_conflicts_unless_forced() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("project");
    std::fs::create_dir_all(&output).unwrap();
    std::fs::write(output.join("README.md"), "mine").unwrap();

    let backend = MockBackend::new();
    let coordinator = coordinator(&backend);

    let result = coordinator.submit(GenerationRequest::new("svc", &output)).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("output_path_conflict"));
    assert_eq!(backend.materialize_calls(), 0);

    let forced = coordinator
        .submit(GenerationRequest::new("svc", &output).with_force(true))
        .await;
    assert!(forced.success);
}

#[tokio::test]
async fn test_partial_output_removed_before_retry() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("partial");
    let backend = MockBackend::new();
    backend.fail_next(&output, ScriptedFailure::PartialWrite);
    let coordinator = coordinator(&backend);

    let result = coordinator.submit(GenerationRequest::new("svc", &output)).await;

    assert!(result.success);
    assert_eq!(result.metadata["attempts"], json!(2));
    assert!(!output.join("partial.txt").exists());
    assert_eq!(result.metadata["recovery_strategy"], json!("ensure_output_directory"));
    assert_eq!(result.metadata["recovery_succeeded"], json!(true));
}

#[tokio::test]
async fn test_partial_output_removed_on_final_failure() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("broken");
    let backend = MockBackend::new();
    for _ in 0..3 {
        backend.fail_next(&output, ScriptedFailure::PartialWrite);
    }
    let coordinator = coordinator(&backend);

    let result = coordinator.submit(GenerationRequest::new("svc", &output)).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some("file_system_error"));
    assert!(!output.join("partial.txt").exists());
}
