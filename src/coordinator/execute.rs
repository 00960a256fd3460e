//! Lifecycle of a single request: compile through the cache, pre hooks, variable
//! validation, conflict check, materialize with retry, post hooks.

use super::CoordinatorInner;
use crate::backend::GeneratorBackend;
use crate::error::GenerationError;
use crate::hooks::pipeline::panic_message;
use crate::hooks::{HookContext, HookType};
use crate::recovery::strategy::RETRY_PENDING;
use crate::recovery::RecoveryReport;
use crate::types::{GenerationRequest, GenerationResult, Variables};
use futures::FutureExt;
use serde_json::{json, Value};
use std::io::ErrorKind as IoErrorKind;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Everything known about a request once it stops executing
struct Outcome {
    result: Result<Completed, GenerationError>,
    attempts: u32,
    recovery: Option<RecoveryReport>,
}

enum Completed {
    Generated {
        files: Vec<PathBuf>,
        post_hook_failure: Option<String>,
    },
    Skipped {
        message: Option<String>,
    },
}

impl<B: GeneratorBackend> CoordinatorInner<B> {
    /// Execute a request, turning a panic anywhere in the lifecycle into a failed result
    pub(crate) async fn execute_guarded(&self, request: &GenerationRequest) -> GenerationResult {
        match AssertUnwindSafe(self.execute(request)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let error = GenerationError::Unknown(format!("generation panicked: {}", panic_message(payload)));
                error!(request_key = %request.key, error = %error, "Generation task panicked");
                GenerationResult::failed(request.output_path.clone(), &error)
                    .with_metadata("request_key", request.key.to_hex())
                    .with_metadata("template_id", request.template_id.clone())
            }
        }
    }

    pub(crate) async fn execute(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        debug!(
            request_key = %request.key,
            template_id = %request.template_id,
            output = %request.output_path.display(),
            "Generation started"
        );

        let mut outcome = self.run_stages(request).await;
        if let Err(error) = &outcome.result {
            if outcome.recovery.is_none() {
                let context = self.base_context(request, request.variables.clone());
                outcome.recovery = Some(self.recovery.intelligent_recover(error, Some(&context)).await);
            }
        }

        let duration = started.elapsed();
        let mut result = match outcome.result {
            Ok(Completed::Generated {
                files,
                post_hook_failure: None,
            }) => {
                info!(
                    request_key = %request.key,
                    template_id = %request.template_id,
                    files = files.len(),
                    attempts = outcome.attempts,
                    duration_ms = duration.as_millis(),
                    "Generation succeeded"
                );
                GenerationResult::succeeded(request.output_path.clone(), files)
            }
            Ok(Completed::Generated {
                files,
                post_hook_failure: Some(message),
            }) => {
                let error = post_hook_error(message);
                warn!(request_key = %request.key, error = %error, "Post-generation hooks failed");
                let mut failed = GenerationResult::failed(request.output_path.clone(), &error);
                failed.generated_files = files;
                failed
            }
            Ok(Completed::Skipped { message }) => {
                info!(request_key = %request.key, "Generation skipped by pre-generation hook");
                let skipped = GenerationResult::succeeded(request.output_path.clone(), Vec::new())
                    .with_metadata("skipped_by_hook", true);
                match message {
                    Some(message) => skipped.with_message(message),
                    None => skipped,
                }
            }
            Err(error) => {
                error!(
                    request_key = %request.key,
                    template_id = %request.template_id,
                    kind = %error.kind(),
                    attempts = outcome.attempts,
                    error = %error,
                    "Generation failed"
                );
                GenerationResult::failed(request.output_path.clone(), &error)
            }
        };

        if let Some(report) = &outcome.recovery {
            if let Some(strategy) = &report.strategy_used {
                result = result.with_metadata("recovery_strategy", strategy.clone());
            }
            result = result.with_metadata("recovery_succeeded", report.result.success);
        }
        result
            .with_metadata("request_key", request.key.to_hex())
            .with_metadata("template_id", request.template_id.clone())
            .with_metadata("attempts", outcome.attempts)
            .with_duration(duration)
    }

    fn base_context(&self, request: &GenerationRequest, variables: Variables) -> HookContext {
        let mut context = HookContext::new(request.template_id.clone(), request.output_path.clone(), variables);
        context
            .metadata
            .insert("request_key".into(), json!(request.key.to_hex()));
        context
            .metadata
            .insert("priority".into(), json!(request.priority));
        context
    }

    async fn run_stages(&self, request: &GenerationRequest) -> Outcome {
        let not_attempted = |error: GenerationError| Outcome {
            result: Err(error),
            attempts: 0,
            recovery: None,
        };

        let artifact = match self.cache.get_or_compile(&request.template_id).await {
            Ok(artifact) => artifact,
            Err(e) => return not_attempted(e),
        };

        let mut pre_context = self.base_context(request, request.variables.clone());
        pre_context.metadata.insert(
            "template_metadata".into(),
            Value::Object(artifact.metadata.clone()),
        );
        let pre = self
            .hooks
            .run_with(HookType::PreGeneration, &pre_context, &request.hooks)
            .await;
        if !pre.success {
            return not_attempted(GenerationError::HookExecution {
                hook: HookType::PreGeneration.to_string(),
                message: pre.message.unwrap_or_else(|| "hook failed".to_string()),
            });
        }
        if !pre.should_continue {
            return Outcome {
                result: Ok(Completed::Skipped { message: pre.message }),
                attempts: 0,
                recovery: None,
            };
        }

        let mut variables = request.variables.clone();
        if let Some(modified) = pre.modified_variables {
            variables.extend(modified);
        }

        let missing: Vec<String> = artifact
            .variable_names
            .iter()
            .filter(|name| !variables.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return not_attempted(GenerationError::VariableValidation { missing });
        }

        if !request.force {
            if let Err(e) = check_output_conflict(&request.output_path).await {
                return not_attempted(e);
            }
        }

        let context = self.base_context(request, variables.clone());
        let max_attempts = self.config.max_retry_attempts.max(1);
        let mut attempts = 0;
        let mut last_report = None;
        let initial = OutputState::probe(&request.output_path).await;
        let files = loop {
            attempts += 1;
            let before = match OutputState::probe(&request.output_path).await {
                // created between attempts by our own recovery
                OutputState::EmptyDir if initial == OutputState::Absent => OutputState::Absent,
                state => state,
            };
            match self
                .backend
                .materialize(&artifact.handle, &request.output_path, &variables)
                .await
            {
                Ok(files) => break files,
                Err(backend_error) => {
                    remove_partial_output(backend_error.written_files(), &request.output_path, before).await;
                    let error = GenerationError::from(backend_error);
                    let will_retry = error.is_retryable() && attempts < max_attempts;

                    let mut recovery_context = context.clone();
                    recovery_context
                        .metadata
                        .insert(RETRY_PENDING.into(), json!(will_retry));
                    let recovery_started = Instant::now();
                    last_report = Some(
                        self.recovery
                            .intelligent_recover(&error, Some(&recovery_context))
                            .await,
                    );

                    if will_retry {
                        warn!(
                            request_key = %request.key,
                            attempt = attempts,
                            max_attempts,
                            error = %error,
                            "Transient generation failure, retrying"
                        );
                        // recovery time counts toward the retry delay
                        let delay = self.config.retry_delay().saturating_sub(recovery_started.elapsed());
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }
                    return Outcome {
                        result: Err(error),
                        attempts,
                        recovery: last_report,
                    };
                }
            }
        };

        let mut post_context = context;
        post_context.metadata.insert(
            "generated_files".into(),
            json!(files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()),
        );
        let post = self
            .hooks
            .run_with(HookType::PostGeneration, &post_context, &request.hooks)
            .await;
        let post_hook_failure = if post.success {
            None
        } else {
            let message = post.message.unwrap_or_else(|| "hook failed".to_string());
            let error = post_hook_error(message.clone());
            last_report = Some(self.recovery.intelligent_recover(&error, Some(&post_context)).await);
            Some(message)
        };

        Outcome {
            result: Ok(Completed::Generated {
                files,
                post_hook_failure,
            }),
            attempts,
            recovery: last_report,
        }
    }
}

/// An existing file, or an existing non-empty directory, is a conflict
async fn check_output_conflict(output_path: &Path) -> Result<(), GenerationError> {
    let metadata = match tokio::fs::metadata(output_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
        Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
            return Err(GenerationError::Permission(format!("{}: {}", output_path.display(), e)))
        }
        Err(e) => return Err(GenerationError::FileSystem(format!("{}: {}", output_path.display(), e))),
    };
    if !metadata.is_dir() {
        return Err(GenerationError::OutputPathConflict(output_path.to_path_buf()));
    }
    let mut entries = tokio::fs::read_dir(output_path)
        .await
        .map_err(|e| GenerationError::FileSystem(format!("{}: {}", output_path.display(), e)))?;
    match entries.next_entry().await {
        Ok(None) => Ok(()),
        Ok(Some(_)) => Err(GenerationError::OutputPathConflict(output_path.to_path_buf())),
        Err(e) => Err(GenerationError::FileSystem(format!("{}: {}", output_path.display(), e))),
    }
}

fn post_hook_error(message: String) -> GenerationError {
    GenerationError::HookExecution {
        hook: HookType::PostGeneration.to_string(),
        message,
    }
}

/// What was at the output path before an attempt started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    Absent,
    EmptyDir,
    Occupied,
}

impl OutputState {
    async fn probe(output_path: &Path) -> Self {
        match tokio::fs::read_dir(output_path).await {
            Ok(mut entries) => match entries.next_entry().await {
                Ok(None) => OutputState::EmptyDir,
                _ => OutputState::Occupied,
            },
            Err(e) if e.kind() == IoErrorKind::NotFound => OutputState::Absent,
            Err(_) => OutputState::Occupied,
        }
    }
}

/// Remove what a failed attempt wrote. Directories are only pruned when the output
/// path was absent or empty beforehand, since then the attempt created all of them.
async fn remove_partial_output(written: &[PathBuf], output_path: &Path, before: OutputState) {
    for path in written {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed partial output"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
        }
    }

    if before == OutputState::Occupied {
        return;
    }
    let root = output_path.to_path_buf();
    let remove_root = before == OutputState::Absent;
    if let Err(e) = tokio::task::spawn_blocking(move || prune_empty_dirs(&root, remove_root)).await {
        warn!(path = %output_path.display(), error = %e, "Failed to prune partial output directories");
    }
}

/// Remove every empty directory under `root`, deepest first
fn prune_empty_dirs(root: &Path, remove_root: bool) {
    let min_depth = if remove_root { 0 } else { 1 };
    let dirs = WalkDir::new(root)
        .min_depth(min_depth)
        .contents_first(true)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir());
    for entry in dirs {
        // non-empty directories still hold someone else's files
        if std::fs::remove_dir(entry.path()).is_ok() {
            debug!(path = %entry.path().display(), "Removed partial output directory");
        }
    }
}
