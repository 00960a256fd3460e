//! Generation Coordinator
//!
//! Owns the request lifecycle: coalescing by [`RequestKey`], admission control with a
//! concurrency ceiling and a priority queue, batch and streaming submission, and
//! cancellation of queued work. A task moves `Queued -> Running -> terminal` and the
//! in-flight map only ever holds the first two states.

use crate::backend::GeneratorBackend;
use crate::cache::ArtifactCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ScaffoldConfig;
use crate::error::{BatchError, GenerationError};
use crate::hooks::HookPipeline;
use crate::recovery::RecoveryManager;
use crate::types::{GenerationRequest, GenerationResult, RequestKey};
use futures::future::{join_all, try_join_all};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify, Semaphore};
use tracing::{debug, info, warn};

mod execute;
mod queue;

use queue::PendingQueue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Tasks allowed to run at once; the rest wait in the priority queue
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Attempts per request for transient failures, including the first
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Fixed delay between attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn of_result(result: &GenerationResult) -> Self {
        if result.success {
            TaskState::Succeeded
        } else if result.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Failed
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub in_flight: usize,
    pub queued: usize,
    pub running: usize,
    pub max_concurrency: usize,
}

type ResultSender = oneshot::Sender<Arc<GenerationResult>>;

struct InFlightEntry {
    state: TaskState,
    output_path: PathBuf,
    waiters: Vec<ResultSender>,
    created_at: Instant,
}

#[derive(Default)]
struct CoordinatorState {
    in_flight: HashMap<RequestKey, InFlightEntry>,
    queue: PendingQueue,
    running: usize,
}

pub(crate) struct CoordinatorInner<B: GeneratorBackend> {
    backend: Arc<B>,
    cache: Arc<ArtifactCache<B>>,
    hooks: Arc<HookPipeline>,
    recovery: Arc<RecoveryManager>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    idle: Notify,
}

/// Resolves to the shared result of a submitted request.
///
/// Every caller coalesced onto the same key receives the same `Arc`.
pub struct GenerationHandle {
    key: RequestKey,
    output_path: PathBuf,
    rx: oneshot::Receiver<Arc<GenerationResult>>,
}

impl GenerationHandle {
    pub fn key(&self) -> RequestKey {
        self.key
    }
}

impl Future for GenerationHandle {
    type Output = Arc<GenerationResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                let error = GenerationError::Unknown("generation task ended without a result".to_string());
                Poll::Ready(Arc::new(
                    GenerationResult::failed(self.output_path.clone(), &error)
                        .with_metadata("request_key", self.key.to_hex()),
                ))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Aborts the spawned task when dropped
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct GenerationCoordinator<B: GeneratorBackend> {
    inner: Arc<CoordinatorInner<B>>,
}

impl<B: GeneratorBackend> Clone for GenerationCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: GeneratorBackend> GenerationCoordinator<B> {
    /// Build a coordinator with a fresh cache, hook registry and recovery manager
    pub fn new(backend: B, config: ScaffoldConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, config: ScaffoldConfig, clock: Arc<dyn Clock>) -> Self {
        let backend = Arc::new(backend);
        let cache = Arc::new(ArtifactCache::with_clock(
            Arc::clone(&backend),
            config.cache.clone(),
            Arc::clone(&clock),
        ));
        let recovery = Arc::new(RecoveryManager::with_default_strategies(config.recovery.clone(), clock));
        Self::from_parts(backend, cache, Arc::new(HookPipeline::new()), recovery, config.coordinator)
    }

    /// Assemble a coordinator from components the caller already owns
    pub fn from_parts(
        backend: Arc<B>,
        cache: Arc<ArtifactCache<B>>,
        hooks: Arc<HookPipeline>,
        recovery: Arc<RecoveryManager>,
        config: CoordinatorConfig,
    ) -> Self {
        info!(
            max_concurrency = config.max_concurrency,
            max_retry_attempts = config.max_retry_attempts,
            "Generation coordinator created"
        );
        Self {
            inner: Arc::new(CoordinatorInner {
                backend,
                cache,
                hooks,
                recovery,
                config,
                state: Mutex::new(CoordinatorState::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<ArtifactCache<B>> {
        &self.inner.cache
    }

    pub fn hooks(&self) -> &Arc<HookPipeline> {
        &self.inner.hooks
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.inner.recovery
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Submit a request. Must be called from within a Tokio runtime.
    ///
    /// A request whose key is already in flight joins that task instead of starting another.
    pub fn submit(&self, request: GenerationRequest) -> GenerationHandle {
        let key = request.key;
        let output_path = request.output_path.clone();
        let (tx, rx) = oneshot::channel();
        let handle = GenerationHandle {
            key,
            output_path: output_path.clone(),
            rx,
        };

        let start = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.in_flight.get_mut(&key) {
                entry.waiters.push(tx);
                debug!(
                    request_key = %key,
                    waiters = entry.waiters.len(),
                    state = %entry.state,
                    "Coalesced request onto in-flight task"
                );
                return handle;
            }

            let admit = state.running < self.inner.config.max_concurrency.max(1);
            state.in_flight.insert(
                key,
                InFlightEntry {
                    state: if admit { TaskState::Running } else { TaskState::Queued },
                    output_path,
                    waiters: vec![tx],
                    created_at: Instant::now(),
                },
            );
            if admit {
                state.running += 1;
                Some(request)
            } else {
                debug!(
                    request_key = %key,
                    priority = request.priority,
                    queued = state.queue.len() + 1,
                    "At capacity, queued request"
                );
                state.queue.push(request);
                None
            }
        };

        if let Some(request) = start {
            Arc::clone(&self.inner).spawn_task(request);
        }
        handle
    }

    /// Submit every request and wait for them.
    ///
    /// Without `allow_partial_failure` the first failure is returned as soon as it
    /// resolves; the remaining tasks keep running.
    pub async fn submit_batch(
        &self,
        requests: Vec<GenerationRequest>,
        allow_partial_failure: bool,
    ) -> Result<Vec<Arc<GenerationResult>>, BatchError> {
        let handles: Vec<GenerationHandle> = requests.into_iter().map(|r| self.submit(r)).collect();
        debug!(count = handles.len(), allow_partial_failure, "Submitted batch");

        if allow_partial_failure {
            return Ok(join_all(handles).await);
        }
        try_join_all(handles.into_iter().map(|handle| async move {
            let result = handle.await;
            if result.success {
                Ok(result)
            } else {
                Err(BatchError { failed: result })
            }
        }))
        .await
    }

    /// Lazily run `requests` with at most `max_concurrency` executing at once.
    ///
    /// Bypasses the shared queue and in-flight map. Results come out in submission
    /// order, so a slow early request holds back faster later ones. Dropping the
    /// stream aborts any of its requests still executing.
    pub fn stream(
        &self,
        requests: Vec<GenerationRequest>,
        max_concurrency: usize,
    ) -> impl Stream<Item = Arc<GenerationResult>> + Send + 'static {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let inner = Arc::clone(&self.inner);
        let buffer = requests.len().max(1);

        stream::iter(requests)
            .map(move |request| {
                let inner = Arc::clone(&inner);
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let output_path = request.output_path.clone();
                    let mut task = AbortOnDrop(tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        inner.execute_guarded(&request).await
                    }));
                    match (&mut task.0).await {
                        Ok(result) => Arc::new(result),
                        Err(e) => Arc::new(GenerationResult::failed(
                            output_path,
                            &GenerationError::Unknown(format!("stream task failed: {}", e)),
                        )),
                    }
                }
            })
            .buffered(buffer)
    }

    /// Resolve every queued task as cancelled; running tasks are untouched
    pub fn cancel_all_pending(&self) -> usize {
        let (cancelled, idle) = {
            let mut state = self.inner.state.lock();
            let drained = state.queue.drain();
            let cancelled: Vec<(RequestKey, InFlightEntry)> = drained
                .into_iter()
                .filter_map(|task| state.in_flight.remove(&task.key).map(|entry| (task.key, entry)))
                .collect();
            (cancelled, state.in_flight.is_empty())
        };

        let count = cancelled.len();
        for (key, entry) in cancelled {
            let result = Arc::new(
                GenerationResult::cancelled(entry.output_path.clone())
                    .with_metadata("request_key", key.to_hex())
                    .with_metadata("attempts", 0),
            );
            for waiter in entry.waiters {
                let _ = waiter.send(Arc::clone(&result));
            }
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
        if count > 0 {
            info!(cancelled = count, "Cancelled pending generation tasks");
        }
        count
    }

    /// Wait until no task is queued or running
    pub async fn await_all_in_flight(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.state.lock().in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock();
        CoordinatorStats {
            in_flight: state.in_flight.len(),
            queued: state.queue.len(),
            running: state.running,
            max_concurrency: self.inner.config.max_concurrency,
        }
    }

    /// State of an in-flight task; `None` once it has finished or was never submitted
    pub fn status(&self, key: &RequestKey) -> Option<TaskState> {
        self.inner.state.lock().in_flight.get(key).map(|e| e.state)
    }
}

impl<B: GeneratorBackend> CoordinatorInner<B> {
    /// Run `request` and then keep pulling queued tasks into the same slot until the queue is empty
    fn spawn_task(self: Arc<Self>, request: GenerationRequest) {
        tokio::spawn(async move {
            let mut next = Some(request);
            while let Some(request) = next.take() {
                let key = request.key;
                let result = Arc::new(self.execute_guarded(&request).await);
                next = self.complete(key, result);
            }
        });
    }

    /// Deliver `result` to every waiter and hand the slot to the next queued task, if any
    fn complete(&self, key: RequestKey, result: Arc<GenerationResult>) -> Option<GenerationRequest> {
        let (entry, next, idle) = {
            let mut state = self.state.lock();
            let entry = state.in_flight.remove(&key);
            let next = match state.queue.pop() {
                Some(task) => {
                    if let Some(queued) = state.in_flight.get_mut(&task.key) {
                        queued.state = TaskState::Running;
                    }
                    Some(task.request)
                }
                None => {
                    state.running = state.running.saturating_sub(1);
                    None
                }
            };
            (entry, next, state.in_flight.is_empty())
        };

        match entry {
            Some(entry) => {
                let state = TaskState::of_result(&result);
                info!(
                    request_key = %key,
                    state = %state,
                    waiters = entry.waiters.len(),
                    elapsed_ms = entry.created_at.elapsed().as_millis(),
                    "Generation task finished"
                );
                for waiter in entry.waiters {
                    let _ = waiter.send(Arc::clone(&result));
                }
            }
            None => warn!(request_key = %key, "Finished task missing from in-flight map"),
        }

        if idle {
            self.idle.notify_waiters();
        }
        next
    }
}
