//! Recovery strategies and the ordered strategy registry.

use crate::error::{ErrorKind, GenerationError, RecoveryError};
use crate::hooks::HookContext;
use crate::recovery::history::ErrorPattern;
use crate::types::Variables;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const WAIT_FOR_BACKEND: &str = "wait_for_backend";
pub const ENSURE_OUTPUT_DIRECTORY: &str = "ensure_output_directory";

/// Context metadata key: false when the failed attempt was the last one
pub const RETRY_PENDING: &str = "retry_pending";

/// Whether another attempt follows this recovery; assumed when the caller does not say
pub fn retry_pending(context: Option<&HookContext>) -> bool {
    context
        .and_then(|ctx| ctx.metadata.get(RETRY_PENDING))
        .and_then(|value| value.as_bool())
        .unwrap_or(true)
}

/// Structured view of a failure handed to strategies
#[derive(Debug, Clone, Serialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Variables,
}

impl ErrorClassification {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Variables::new(),
        }
    }
}

impl From<&GenerationError> for ErrorClassification {
    fn from(error: &GenerationError) -> Self {
        let mut classification = ErrorClassification::new(error.kind(), error.to_string());
        match error {
            GenerationError::OutputPathConflict(path) => {
                classification
                    .details
                    .insert("path".into(), json!(path.display().to_string()));
            }
            GenerationError::VariableValidation { missing } => {
                classification.details.insert("missing".into(), json!(missing));
            }
            GenerationError::HookExecution { hook, .. } => {
                classification.details.insert("hook".into(), json!(hook));
            }
            GenerationError::InvalidTemplateFormat { template_id, .. } => {
                classification
                    .details
                    .insert("template_id".into(), json!(template_id));
            }
            _ => {}
        }
        classification
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub message: String,
}

impl RecoveryResult {
    pub fn recovered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn no_strategy() -> Self {
        Self::failed("no strategy available")
    }
}

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, kind: ErrorKind) -> bool;

    async fn recover(
        &self,
        error: &ErrorClassification,
        context: Option<&HookContext>,
    ) -> Result<RecoveryResult, RecoveryError>;
}

/// Backs off before the coordinator's next attempt against a struggling backend
pub struct WaitForBackend {
    cooldown: Duration,
}

impl WaitForBackend {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }
}

#[async_trait]
impl RecoveryStrategy for WaitForBackend {
    fn name(&self) -> &str {
        WAIT_FOR_BACKEND
    }

    fn can_handle(&self, kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::BackendFault | ErrorKind::Timeout)
    }

    async fn recover(
        &self,
        error: &ErrorClassification,
        context: Option<&HookContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        if !retry_pending(context) {
            return Ok(RecoveryResult::failed("No further attempt, cooldown skipped"));
        }
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }
        Ok(RecoveryResult::recovered(format!(
            "Waited {}ms after {}",
            self.cooldown.as_millis(),
            error.kind
        )))
    }
}

/// Recreates the output directory so a file system failure can be retried
#[derive(Debug, Default)]
pub struct EnsureOutputDirectory;

#[async_trait]
impl RecoveryStrategy for EnsureOutputDirectory {
    fn name(&self) -> &str {
        ENSURE_OUTPUT_DIRECTORY
    }

    fn can_handle(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::FileSystemError
    }

    async fn recover(
        &self,
        _error: &ErrorClassification,
        context: Option<&HookContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let context = context.ok_or_else(|| RecoveryError::MissingContext(self.name().to_string()))?;
        if !retry_pending(Some(context)) {
            return Ok(RecoveryResult::failed("No further attempt, output directory left alone"));
        }
        tokio::fs::create_dir_all(&context.output_path).await?;
        Ok(RecoveryResult::recovered(format!(
            "Ensured output directory {}",
            context.output_path.display()
        )))
    }
}

/// Strategies in registration order
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(strategy = strategy.name(), "Registered recovery strategy");
        self.strategies.write().push(strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RecoveryStrategy>> {
        self.strategies
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Try each capable strategy in order; the first success wins
    pub async fn try_recover(
        &self,
        error: &ErrorClassification,
        context: Option<&HookContext>,
    ) -> RecoveryResult {
        let strategies = self.strategies.read().clone();
        for strategy in strategies.iter().filter(|s| s.can_handle(error.kind)) {
            match run_strategy(strategy.as_ref(), error, context).await {
                result if result.success => return result,
                result => debug!(strategy = strategy.name(), message = %result.message, "Strategy did not recover"),
            }
        }
        RecoveryResult::no_strategy()
    }
}

/// Run one strategy; its errors count as an unsuccessful attempt
pub(crate) async fn run_strategy(
    strategy: &dyn RecoveryStrategy,
    error: &ErrorClassification,
    context: Option<&HookContext>,
) -> RecoveryResult {
    match strategy.recover(error, context).await {
        Ok(result) => result,
        Err(e) => {
            warn!(strategy = strategy.name(), error = %e, "Recovery strategy errored");
            RecoveryResult::failed(e.to_string())
        }
    }
}

/// Chooses the strategy the pattern-aware layer runs for a failure
pub trait StrategySelector: Send + Sync {
    fn select(&self, kind: ErrorKind, pattern: &ErrorPattern) -> Option<String>;
}

/// Fixed error-kind to strategy mapping; ignores the pattern
#[derive(Debug, Clone)]
pub struct StaticStrategySelector {
    mapping: HashMap<ErrorKind, String>,
}

impl StaticStrategySelector {
    pub fn empty() -> Self {
        Self {
            mapping: HashMap::new(),
        }
    }

    pub fn with_mapping(mut self, kind: ErrorKind, strategy: impl Into<String>) -> Self {
        self.mapping.insert(kind, strategy.into());
        self
    }
}

impl Default for StaticStrategySelector {
    fn default() -> Self {
        Self::empty()
            .with_mapping(ErrorKind::BackendFault, WAIT_FOR_BACKEND)
            .with_mapping(ErrorKind::Timeout, WAIT_FOR_BACKEND)
            .with_mapping(ErrorKind::FileSystemError, ENSURE_OUTPUT_DIRECTORY)
    }
}

impl StrategySelector for StaticStrategySelector {
    fn select(&self, kind: ErrorKind, _pattern: &ErrorPattern) -> Option<String> {
        self.mapping.get(&kind).cloned()
    }
}
