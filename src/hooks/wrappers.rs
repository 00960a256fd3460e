//! Wrapper hooks: conditional execution, deadlines and error recovery.
//!
//! Wrappers report the wrapped hook's name, type and priority, so they register and
//! unregister exactly like the hook they wrap.

use crate::error::HookError;
use crate::hooks::condition;
use crate::hooks::pipeline::execute_catching;
use crate::hooks::{Hook, HookContext, HookResult, HookType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the wrapped hook only when `condition` evaluates true over the context variables
pub struct ConditionalHook {
    inner: Arc<dyn Hook>,
    condition: String,
}

impl ConditionalHook {
    pub fn new(inner: Arc<dyn Hook>, condition: impl Into<String>) -> Self {
        Self {
            inner,
            condition: condition.into(),
        }
    }
}

#[async_trait]
impl Hook for ConditionalHook {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn hook_type(&self) -> HookType {
        self.inner.hook_type()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult, HookError> {
        if !condition::evaluate(&self.condition, &context.variables) {
            debug!(hook = self.name(), condition = %self.condition, "Condition false, skipping hook");
            return Ok(HookResult::ok().with_message(format!(
                "Skipped: condition '{}' not met",
                self.condition
            )));
        }
        self.inner.execute(context).await
    }
}

/// Fails with [`HookError::Timeout`] when the wrapped hook exceeds its deadline.
///
/// The wrapped hook runs on its own task and is not aborted on timeout, so its side
/// effects may still land after the failure has been reported.
pub struct TimeoutHook {
    inner: Arc<dyn Hook>,
    timeout: Duration,
}

impl TimeoutHook {
    pub fn new(inner: Arc<dyn Hook>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Hook for TimeoutHook {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn hook_type(&self) -> HookType {
        self.inner.hook_type()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult, HookError> {
        let inner = Arc::clone(&self.inner);
        let ctx = context.clone();
        let handle = tokio::spawn(async move { execute_catching(inner.as_ref(), &ctx).await });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(HookError::Panicked(join_err.to_string())),
            Err(_) => {
                warn!(
                    hook = self.name(),
                    timeout_ms = self.timeout.as_millis(),
                    "Hook timed out"
                );
                Err(HookError::Timeout {
                    hook: self.name().to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}

/// Recovery callback: receives the failing result, returns the replacement
pub type RecoveryFn = dyn Fn(HookResult) -> HookResult + Send + Sync;

/// Routes failures of the wrapped hook through a recovery function, or suppresses them
pub struct ErrorRecoveryHook {
    inner: Arc<dyn Hook>,
    recovery: Option<Arc<RecoveryFn>>,
    ignore_errors: bool,
}

impl ErrorRecoveryHook {
    pub fn new<F>(inner: Arc<dyn Hook>, recovery: F) -> Self
    where
        F: Fn(HookResult) -> HookResult + Send + Sync + 'static,
    {
        let recovery: Arc<RecoveryFn> = Arc::new(recovery);
        Self {
            inner,
            recovery: Some(recovery),
            ignore_errors: false,
        }
    }

    /// Turn every failure of `inner` into a success
    pub fn ignoring(inner: Arc<dyn Hook>) -> Self {
        Self {
            inner,
            recovery: None,
            ignore_errors: true,
        }
    }

    pub fn with_ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }
}

#[async_trait]
impl Hook for ErrorRecoveryHook {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn hook_type(&self) -> HookType {
        self.inner.hook_type()
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult, HookError> {
        let failing = match execute_catching(self.inner.as_ref(), context).await {
            Ok(result) if result.success => return Ok(result),
            Ok(result) => result,
            Err(e) => HookResult::failure(format!("Hook '{}' failed: {}", self.name(), e)),
        };

        if self.ignore_errors {
            debug!(
                hook = self.name(),
                message = failing.message.as_deref().unwrap_or(""),
                "Ignoring hook failure"
            );
            let mut suppressed = HookResult::ok();
            suppressed.message = failing.message.map(|m| format!("Ignored failure: {}", m));
            return Ok(suppressed);
        }

        match &self.recovery {
            Some(recover) => Ok(recover(failing)),
            None => Ok(failing),
        }
    }
}
