//! Artifact Cache
//!
//! Memoizes compiled template handles per template id. Entries expire a fixed TTL after
//! compilation; when the cache is full, expired entries are evicted first and then the
//! least recently used, a quarter of capacity at a time.

use crate::backend::GeneratorBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::GenerationError;
use crate::types::Variables;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifacts older than this are recompiled
pub const DEFAULT_TTL_SECS: u64 = 2 * 60 * 60;
pub const DEFAULT_MAX_SIZE: usize = 50;
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

/// Minimum number of templates `warm_up` selects
const WARM_UP_MIN: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of compiled artifacts kept
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Seconds after compilation before an artifact expires
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Share of `max_size` evicted when the cache is full
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_eviction_fraction() -> f64 {
    DEFAULT_EVICTION_FRACTION
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            ttl_secs: default_ttl_secs(),
            eviction_fraction: default_eviction_fraction(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }

    /// Number of entries removed per eviction pass: ceil(max_size * fraction), at least one
    pub fn eviction_batch(&self) -> usize {
        ((self.max_size as f64 * self.eviction_fraction).ceil() as usize).max(1)
    }
}

/// Compiled template handle owned by the cache
pub struct CompiledArtifact<H> {
    pub template_id: String,
    pub handle: Arc<H>,
    pub metadata: Variables,
    pub variable_names: Vec<String>,
    pub compiled_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl<H> CompiledArtifact<H> {
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.compiled_at > ttl
    }
}

impl<H> Clone for CompiledArtifact<H> {
    fn clone(&self) -> Self {
        Self {
            template_id: self.template_id.clone(),
            handle: Arc::clone(&self.handle),
            metadata: self.metadata.clone(),
            variable_names: self.variable_names.clone(),
            compiled_at: self.compiled_at,
            last_accessed: self.last_accessed,
        }
    }
}

impl<H> fmt::Debug for CompiledArtifact<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("template_id", &self.template_id)
            .field("variable_names", &self.variable_names)
            .field("compiled_at", &self.compiled_at)
            .field("last_accessed", &self.last_accessed)
            .finish()
    }
}

/// Per-template access counters; only reset by [`ArtifactCache::clear`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheAccessStats {
    pub hits: u64,
    pub misses: u64,
    pub precompiles: u64,
}

impl CacheAccessStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses + self.precompiles
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expired_count: usize,
    pub per_template: BTreeMap<String, CacheAccessStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmUpSummary {
    pub selected: Vec<String>,
    pub compiled: usize,
    pub failed: Vec<(String, String)>,
}

struct CacheState<H> {
    entries: HashMap<String, CompiledArtifact<H>>,
    stats: HashMap<String, CacheAccessStats>,
    evictions: u64,
}

impl<H> Default for CacheState<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            stats: HashMap::new(),
            evictions: 0,
        }
    }
}

pub struct ArtifactCache<B: GeneratorBackend> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    state: Mutex<CacheState<B::Handle>>,
}

impl<B: GeneratorBackend> ArtifactCache<B> {
    pub fn new(backend: Arc<B>, config: CacheConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<B>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached artifact for `template_id`, compiling it on a miss or after expiry
    pub async fn get_or_compile(
        &self,
        template_id: &str,
    ) -> Result<CompiledArtifact<B::Handle>, GenerationError> {
        let ttl = self.config.ttl();
        {
            let now = self.clock.now();
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let stats = state.stats.entry(template_id.to_string()).or_default();
            match state.entries.get_mut(template_id) {
                Some(entry) if !entry.is_expired_at(now, ttl) => {
                    entry.last_accessed = now.max(entry.compiled_at);
                    stats.hits += 1;
                    debug!(template_id, "Artifact cache hit");
                    return Ok(entry.clone());
                }
                Some(_) => {
                    stats.misses += 1;
                    debug!(template_id, "Artifact expired, recompiling");
                }
                None => {
                    stats.misses += 1;
                    debug!(template_id, "Artifact cache miss");
                }
            }
        }

        let compiled = self.backend.compile(template_id).await.map_err(|e| {
            warn!(template_id, error = %e, "Template compilation failed");
            GenerationError::from(e)
        })?;

        let now = self.clock.now();
        let artifact = CompiledArtifact {
            template_id: template_id.to_string(),
            handle: Arc::new(compiled.handle),
            metadata: compiled.metadata,
            variable_names: compiled.variable_names,
            compiled_at: now,
            last_accessed: now,
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state
            .stats
            .entry(template_id.to_string())
            .or_default()
            .precompiles += 1;
        state.entries.remove(template_id);
        if state.entries.len() >= self.config.max_size {
            let evicted = Self::evict(&mut state.entries, now, ttl, self.config.eviction_batch());
            state.evictions += evicted as u64;
        }
        state
            .entries
            .insert(template_id.to_string(), artifact.clone());
        debug!(template_id, size = state.entries.len(), "Cached compiled artifact");

        Ok(artifact)
    }

    /// Remove `count` entries: expired first, then least recently accessed
    fn evict(
        entries: &mut HashMap<String, CompiledArtifact<B::Handle>>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        count: usize,
    ) -> usize {
        let mut candidates: Vec<(bool, DateTime<Utc>, String)> = entries
            .values()
            .map(|a| (a.is_expired_at(now, ttl), a.last_accessed, a.template_id.clone()))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut removed = 0;
        for (expired, _, id) in candidates.into_iter().take(count) {
            entries.remove(&id);
            removed += 1;
            debug!(template_id = %id, expired, "Evicted artifact");
        }
        info!(removed, remaining = entries.len(), "Artifact cache eviction");
        removed
    }

    /// Precompile the most frequently used of `candidate_ids`, tolerating failures
    pub async fn warm_up(&self, candidate_ids: &[String]) -> WarmUpSummary {
        let keep = (candidate_ids.len() * 7 / 10)
            .max(WARM_UP_MIN)
            .min(candidate_ids.len());
        let selected: Vec<String> = {
            let state = self.state.lock();
            let mut ranked: Vec<(u64, &String)> = candidate_ids
                .iter()
                .map(|id| (state.stats.get(id).map(|s| s.total()).unwrap_or(0), id))
                .collect();
            ranked.sort_by(|a, b| b.0.cmp(&a.0));
            ranked.into_iter().take(keep).map(|(_, id)| id.clone()).collect()
        };

        let outcomes = join_all(selected.iter().map(|id| self.get_or_compile(id))).await;

        let mut summary = WarmUpSummary {
            selected: selected.clone(),
            ..Default::default()
        };
        for (id, outcome) in selected.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => summary.compiled += 1,
                Err(e) => {
                    warn!(template_id = %id, error = %e, "Warm-up compile failed");
                    summary.failed.push((id, e.to_string()));
                }
            }
        }
        info!(
            selected = summary.selected.len(),
            compiled = summary.compiled,
            failed = summary.failed.len(),
            "Artifact cache warm-up finished"
        );
        summary
    }

    /// Drop every entry and every counter
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::default();
        debug!("Artifact cache cleared");
    }

    /// Drop one entry, keeping its counters
    pub fn invalidate(&self, template_id: &str) -> bool {
        self.state.lock().entries.remove(template_id).is_some()
    }

    /// True when a non-expired artifact is cached for `template_id`
    pub fn contains(&self, template_id: &str) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .get(template_id)
            .map(|a| !a.is_expired_at(now, self.config.ttl()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn access_stats(&self, template_id: &str) -> CacheAccessStats {
        self.state
            .lock()
            .stats
            .get(template_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> CacheStatistics {
        let now = self.clock.now();
        let ttl = self.config.ttl();
        let state = self.state.lock();
        let hits: u64 = state.stats.values().map(|s| s.hits).sum();
        let misses: u64 = state.stats.values().map(|s| s.misses).sum();
        let total = hits + misses;
        CacheStatistics {
            size: state.entries.len(),
            max_size: self.config.max_size,
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            evictions: state.evictions,
            expired_count: state
                .entries
                .values()
                .filter(|a| a.is_expired_at(now, ttl))
                .count(),
            per_template: state
                .stats
                .iter()
                .map(|(id, s)| (id.clone(), *s))
                .collect(),
        }
    }
}
