//! Hook System
//!
//! Named, prioritized extension points that run before and after generation. Hooks
//! receive a read-only [`HookContext`]; the only way to change variables is to return
//! them in [`HookResult::modified_variables`], which the pipeline merges in order.

use crate::error::HookError;
use crate::types::Variables;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub mod condition;
pub mod pipeline;
pub mod wrappers;

pub use pipeline::HookPipeline;
pub use wrappers::{ConditionalHook, ErrorRecoveryHook, RecoveryFn, TimeoutHook};

/// Priority assigned to hooks that don't override it
pub const DEFAULT_HOOK_PRIORITY: i32 = 100;

/// When a hook runs relative to generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookType {
    PreGeneration,
    PostGeneration,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookType::PreGeneration => f.write_str("pre_generation"),
            HookType::PostGeneration => f.write_str("post_generation"),
        }
    }
}

/// Read-only view of the generation event handed to every hook
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub template_id: String,
    pub output_path: PathBuf,
    pub variables: Variables,
    pub metadata: Variables,
}

impl HookContext {
    pub fn new(template_id: impl Into<String>, output_path: impl Into<PathBuf>, variables: Variables) -> Self {
        Self {
            template_id: template_id.into(),
            output_path: output_path.into(),
            variables,
            metadata: Variables::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookResult {
    pub success: bool,
    pub should_continue: bool,
    pub modified_variables: Option<Variables>,
    pub message: Option<String>,
}

impl Default for HookResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl HookResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            should_continue: true,
            modified_variables: None,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_continue: false,
            modified_variables: None,
            message: Some(message.into()),
        }
    }

    /// Successful result that stops the pipeline without signalling an error
    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_continue: false,
            modified_variables: None,
            message: Some(message.into()),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.modified_variables = Some(variables);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// True when the pipeline stopped early without failing
    pub fn is_short_circuit(&self) -> bool {
        self.success && !self.should_continue
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn hook_type(&self) -> HookType;

    /// Lower runs first
    fn priority(&self) -> i32 {
        DEFAULT_HOOK_PRIORITY
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult, HookError>;
}

type HookFn = dyn Fn(HookContext) -> BoxFuture<'static, Result<HookResult, HookError>> + Send + Sync;

/// Plain hook backed by an async closure
pub struct FnHook {
    name: String,
    hook_type: HookType,
    priority: i32,
    func: Arc<HookFn>,
}

impl FnHook {
    pub fn new<F, Fut>(name: impl Into<String>, hook_type: HookType, func: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HookResult, HookError>> + Send + 'static,
    {
        let func: Arc<HookFn> = Arc::new(move |ctx: HookContext| func(ctx).boxed());
        Self {
            name: name.into(),
            hook_type,
            priority: DEFAULT_HOOK_PRIORITY,
            func,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl Hook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn hook_type(&self) -> HookType {
        self.hook_type
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult, HookError> {
        (self.func)(context.clone()).await
    }
}

impl fmt::Debug for FnHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook")
            .field("name", &self.name)
            .field("hook_type", &self.hook_type)
            .field("priority", &self.priority)
            .finish()
    }
}
