//! Error Recovery
//!
//! Two layers: an ordered [`StrategyRegistry`] tried first-success-wins, and the
//! pattern-aware [`RecoveryManager`] that records every failure, derives an
//! [`ErrorPattern`] for it, runs the selected strategy and records the outcome.
//! Recovery is best effort; the coordinator still owns the retry decision.

use crate::clock::{Clock, SystemClock};
use crate::error::GenerationError;
use crate::hooks::HookContext;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod history;
pub mod strategy;

pub use history::{DailyRecoveryRate, ErrorPattern, ErrorRecoveryRecord, RecoveryHistory, RecoveryStatistics};
pub use strategy::{
    EnsureOutputDirectory, ErrorClassification, RecoveryResult, RecoveryStrategy, StaticStrategySelector,
    StrategyRegistry, StrategySelector, WaitForBackend,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Trailing window used when computing error patterns
    #[serde(default = "default_pattern_window_secs")]
    pub pattern_window_secs: u64,

    /// History records kept before the oldest are pruned
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Pause applied by the wait_for_backend strategy
    #[serde(default = "default_backend_cooldown_ms")]
    pub backend_cooldown_ms: u64,
}

fn default_pattern_window_secs() -> u64 {
    30 * 60
}

fn default_max_history() -> usize {
    1000
}

fn default_backend_cooldown_ms() -> u64 {
    250
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pattern_window_secs: default_pattern_window_secs(),
            max_history: default_max_history(),
            backend_cooldown_ms: default_backend_cooldown_ms(),
        }
    }
}

impl RecoveryConfig {
    pub fn pattern_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pattern_window_secs.min(i64::MAX as u64) as i64)
    }

    pub fn backend_cooldown(&self) -> Duration {
        Duration::from_millis(self.backend_cooldown_ms)
    }
}

/// Outcome of one pattern-aware recovery attempt
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub result: RecoveryResult,
    pub pattern: ErrorPattern,
    pub strategy_used: Option<String>,
}

pub struct RecoveryManager {
    registry: StrategyRegistry,
    selector: Box<dyn StrategySelector>,
    history: Mutex<RecoveryHistory>,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    /// Manager with no strategies registered
    pub fn new(config: RecoveryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RecoveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: StrategyRegistry::new(),
            selector: Box::new(StaticStrategySelector::default()),
            history: Mutex::new(RecoveryHistory::new(config.max_history)),
            clock,
            config,
        }
    }

    /// Manager with `wait_for_backend` and `ensure_output_directory` registered
    pub fn with_default_strategies(config: RecoveryConfig, clock: Arc<dyn Clock>) -> Self {
        let manager = Self::with_clock(config, clock);
        manager.register_strategy(Arc::new(WaitForBackend::new(manager.config.backend_cooldown())));
        manager.register_strategy(Arc::new(EnsureOutputDirectory));
        manager
    }

    pub fn with_selector(mut self, selector: impl StrategySelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        self.registry.register_strategy(strategy);
    }

    pub async fn try_recover(&self, error: &GenerationError, context: Option<&HookContext>) -> RecoveryResult {
        self.registry
            .try_recover(&ErrorClassification::from(error), context)
            .await
    }

    /// Record the failure, compute its pattern, run the selected strategy and record the outcome
    pub async fn intelligent_recover(
        &self,
        error: &GenerationError,
        context: Option<&HookContext>,
    ) -> RecoveryReport {
        let classification = ErrorClassification::from(error);
        let (id, pattern) = {
            let now = self.clock.now();
            let mut history = self.history.lock();
            let id = history.append(classification.clone(), context.cloned(), now);
            let pattern = history.pattern(classification.kind, now, self.config.pattern_window());
            (id, pattern)
        };

        let strategy = self
            .selector
            .select(classification.kind, &pattern)
            .and_then(|name| self.registry.get(&name))
            .filter(|s| s.can_handle(classification.kind));

        let (result, strategy_used) = match strategy {
            Some(strategy) => {
                let result = strategy::run_strategy(strategy.as_ref(), &classification, context).await;
                (result, Some(strategy.name().to_string()))
            }
            None => (RecoveryResult::no_strategy(), None),
        };

        self.history
            .lock()
            .record_outcome(id, strategy_used.clone(), result.clone());

        if pattern.is_recurring {
            info!(
                kind = %classification.kind,
                frequency = pattern.frequency_in_window,
                success_rate = pattern.recent_success_rate,
                "Recurring error pattern"
            );
        }
        debug!(
            kind = %classification.kind,
            strategy = strategy_used.as_deref().unwrap_or("none"),
            recovered = result.success,
            "Recovery attempt finished"
        );

        RecoveryReport {
            result,
            pattern,
            strategy_used,
        }
    }

    pub fn statistics(&self) -> RecoveryStatistics {
        let now = self.clock.now();
        self.history.lock().statistics(now)
    }

    pub fn prune_history(&self, max_records: usize) -> usize {
        self.history.lock().prune(max_records)
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Snapshot of the retained records, oldest first
    pub fn history(&self) -> Vec<ErrorRecoveryRecord> {
        self.history.lock().records().cloned().collect()
    }
}
