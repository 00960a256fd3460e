//! Recovery history, error patterns and statistics.

use crate::error::ErrorKind;
use crate::hooks::HookContext;
use crate::recovery::strategy::{ErrorClassification, RecoveryResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecoveryRecord {
    pub id: u64,
    pub error: ErrorClassification,
    pub timestamp: DateTime<Utc>,
    pub context: Option<HookContext>,
    /// None until the recovery attempt finishes
    pub result: Option<RecoveryResult>,
    pub strategy: Option<String>,
}

impl ErrorRecoveryRecord {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn recovered(&self) -> Option<bool> {
        self.result.as_ref().map(|result| result.success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPattern {
    pub kind: ErrorKind,
    pub frequency_in_window: usize,
    pub recent_success_rate: f64,
    pub is_recurring: bool,
}

impl ErrorPattern {
    pub fn empty(kind: ErrorKind) -> Self {
        Self {
            kind,
            frequency_in_window: 0,
            recent_success_rate: 0.0,
            is_recurring: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecoveryRate {
    pub date: NaiveDate,
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatistics {
    pub total_attempts: usize,
    pub successful: usize,
    pub success_rate: f64,
    pub by_error_kind: BTreeMap<ErrorKind, usize>,
    pub strategy_successes: BTreeMap<String, usize>,
    /// Oldest day first, ending today
    pub daily_trend: Vec<DailyRecoveryRate>,
}

const TREND_DAYS: i64 = 7;

/// Recurring once more than this many same-kind failures land in the window
const RECURRING_THRESHOLD: usize = 2;

fn rate(successes: usize, attempts: usize) -> f64 {
    if attempts == 0 {
        0.0
    } else {
        successes as f64 / attempts as f64
    }
}

#[derive(Debug)]
pub struct RecoveryHistory {
    records: VecDeque<ErrorRecoveryRecord>,
    next_id: u64,
    max_records: usize,
}

impl RecoveryHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            next_id: 0,
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ErrorRecoveryRecord> {
        self.records.iter()
    }

    /// Append a record and return its id, pruning past the configured cap
    pub fn append(
        &mut self,
        error: ErrorClassification,
        context: Option<HookContext>,
        now: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(ErrorRecoveryRecord {
            id,
            error,
            timestamp: now,
            context,
            result: None,
            strategy: None,
        });
        self.prune(self.max_records);
        id
    }

    pub fn record_outcome(&mut self, id: u64, strategy: Option<String>, result: RecoveryResult) {
        if let Some(record) = self.records.iter_mut().rev().find(|r| r.id == id) {
            record.strategy = strategy;
            record.result = Some(result);
        }
    }

    /// Same-kind records in the trailing `window` ending at `now`
    pub fn pattern(&self, kind: ErrorKind, now: DateTime<Utc>, window: Duration) -> ErrorPattern {
        let since = now - window;
        let in_window: Vec<&ErrorRecoveryRecord> = self
            .records
            .iter()
            .filter(|r| r.kind() == kind && r.timestamp >= since && r.timestamp <= now)
            .collect();
        let finished: Vec<bool> = in_window.iter().filter_map(|r| r.recovered()).collect();
        let successes = finished.iter().filter(|ok| **ok).count();

        ErrorPattern {
            kind,
            frequency_in_window: in_window.len(),
            recent_success_rate: rate(successes, finished.len()),
            is_recurring: in_window.len() > RECURRING_THRESHOLD,
        }
    }

    /// Drop the oldest records beyond `max_records`; returns how many were dropped
    pub fn prune(&mut self, max_records: usize) -> usize {
        let excess = self.records.len().saturating_sub(max_records);
        self.records.drain(..excess);
        excess
    }

    pub fn statistics(&self, now: DateTime<Utc>) -> RecoveryStatistics {
        let total_attempts = self.records.len();
        let successful = self
            .records
            .iter()
            .filter(|r| r.recovered() == Some(true))
            .count();

        let mut by_error_kind = BTreeMap::new();
        let mut strategy_successes = BTreeMap::new();
        for record in &self.records {
            *by_error_kind.entry(record.kind()).or_insert(0) += 1;
            if let (Some(strategy), Some(true)) = (&record.strategy, record.recovered()) {
                *strategy_successes.entry(strategy.clone()).or_insert(0) += 1;
            }
        }

        let today = now.date_naive();
        let daily_trend = (0..TREND_DAYS)
            .rev()
            .map(|days_ago| {
                let date = today - Duration::days(days_ago);
                let day: Vec<&ErrorRecoveryRecord> = self
                    .records
                    .iter()
                    .filter(|r| r.timestamp.date_naive() == date)
                    .collect();
                let successes = day.iter().filter(|r| r.recovered() == Some(true)).count();
                DailyRecoveryRate {
                    date,
                    attempts: day.len(),
                    successes,
                    success_rate: rate(successes, day.len()),
                }
            })
            .collect();

        RecoveryStatistics {
            total_attempts,
            successful,
            success_rate: rate(successful, total_attempts),
            by_error_kind,
            strategy_successes,
            daily_trend,
        }
    }
}
