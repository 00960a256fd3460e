//! Scaffold: generation-request pipeline for project scaffolding
//!
//! Coalesces duplicate requests, bounds concurrency behind a priority queue, caches
//! compiled templates, runs pre/post generation hooks and classifies failures for
//! retry and recovery. Template semantics live behind [`backend::GeneratorBackend`].

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod recovery;
pub mod types;

pub use backend::{CompiledTemplate, DirectoryBackend, GeneratorBackend};
pub use cache::{ArtifactCache, CacheConfig, CompiledArtifact};
pub use config::{ConfigLoader, ScaffoldConfig};
pub use coordinator::{CoordinatorConfig, CoordinatorStats, GenerationCoordinator, GenerationHandle, TaskState};
pub use error::{BackendError, ErrorKind, GenerationError, HookError};
pub use hooks::{Hook, HookContext, HookPipeline, HookResult, HookType};
pub use recovery::{RecoveryConfig, RecoveryManager};
pub use types::{GenerationRequest, GenerationResult, RequestKey, Variables};
