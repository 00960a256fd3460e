//! Hook registry and ordered execution.

use crate::error::HookError;
use crate::hooks::{Hook, HookContext, HookResult, HookType};
use crate::types::Variables;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Registry of hooks keyed by type, each list sorted ascending by priority
#[derive(Default)]
pub struct HookPipeline {
    registry: RwLock<HashMap<HookType, Vec<Arc<dyn Hook>>>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. A hook with the same name and type is replaced.
    pub fn register(&self, hook: Arc<dyn Hook>) {
        let hook_type = hook.hook_type();
        let mut registry = self.registry.write();
        let hooks = registry.entry(hook_type).or_default();
        if let Some(pos) = hooks.iter().position(|h| h.name() == hook.name()) {
            warn!(hook = hook.name(), %hook_type, "Replacing registered hook");
            hooks.remove(pos);
        }
        debug!(hook = hook.name(), %hook_type, priority = hook.priority(), "Registered hook");
        hooks.push(hook);
        // stable: equal priorities keep registration order
        hooks.sort_by_key(|h| h.priority());
    }

    pub fn unregister(&self, name: &str, hook_type: HookType) -> bool {
        let mut registry = self.registry.write();
        let Some(hooks) = registry.get_mut(&hook_type) else {
            return false;
        };
        let before = hooks.len();
        hooks.retain(|h| h.name() != name);
        before != hooks.len()
    }

    /// Registered hooks of `hook_type` in execution order
    pub fn hooks(&self, hook_type: HookType) -> Vec<Arc<dyn Hook>> {
        self.registry
            .read()
            .get(&hook_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.registry.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run(&self, hook_type: HookType, context: &HookContext) -> HookResult {
        self.run_with(hook_type, context, &[]).await
    }

    /// Run registered hooks together with request-scoped `extra` hooks of the same type.
    /// Registered hooks come first among equal priorities.
    pub async fn run_with(
        &self,
        hook_type: HookType,
        context: &HookContext,
        extra: &[Arc<dyn Hook>],
    ) -> HookResult {
        let mut hooks = self.hooks(hook_type);
        let before = hooks.len();
        hooks.extend(extra.iter().filter(|h| h.hook_type() == hook_type).cloned());
        if hooks.len() != before {
            hooks.sort_by_key(|h| h.priority());
        }

        let mut accumulated = Variables::new();
        for hook in hooks {
            let started = Instant::now();
            let result = execute_guarded(hook.as_ref(), context).await;
            debug!(
                hook = hook.name(),
                %hook_type,
                success = result.success,
                should_continue = result.should_continue,
                duration_ms = started.elapsed().as_millis(),
                "Hook executed"
            );

            if !result.success {
                warn!(
                    hook = hook.name(),
                    %hook_type,
                    message = result.message.as_deref().unwrap_or(""),
                    "Hook failed, stopping pipeline"
                );
                return result;
            }
            if !result.should_continue {
                debug!(hook = hook.name(), %hook_type, "Hook requested pipeline stop");
                return result;
            }
            if let Some(vars) = result.modified_variables {
                accumulated.extend(vars);
            }
        }

        let mut result = HookResult::ok();
        if !accumulated.is_empty() {
            result.modified_variables = Some(accumulated);
        }
        result
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute a hook, folding returned errors and panics into the error channel
pub(crate) async fn execute_catching(hook: &dyn Hook, context: &HookContext) -> Result<HookResult, HookError> {
    match AssertUnwindSafe(hook.execute(context)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(HookError::Panicked(panic_message(payload))),
    }
}

/// Execute a hook, turning any error into a failed result
pub(crate) async fn execute_guarded(hook: &dyn Hook, context: &HookContext) -> HookResult {
    match execute_catching(hook, context).await {
        Ok(result) => result,
        Err(e) => HookResult::failure(format!("Hook '{}' failed: {}", hook.name(), e)),
    }
}
