//! Generator Backend Abstraction
//!
//! The pipeline never interprets templates itself. A backend compiles a template
//! identifier into a reusable handle and later materializes that handle into files.
//! The handle type is an associated type, so the coordinator and cache stay fully
//! typed over whichever backend they were built with.

use crate::error::BackendError;
use crate::types::Variables;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub mod directory;

pub use directory::DirectoryBackend;

/// Output of a successful compile
#[derive(Debug, Clone)]
pub struct CompiledTemplate<H> {
    pub handle: H,
    /// Variables the template requires at materialization time
    pub variable_names: Vec<String>,
    pub metadata: Variables,
}

impl<H> CompiledTemplate<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            variable_names: Vec::new(),
            metadata: Variables::new(),
        }
    }
}

#[async_trait]
pub trait GeneratorBackend: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Compile a template into a reusable handle
    async fn compile(
        &self,
        template_id: &str,
    ) -> Result<CompiledTemplate<Self::Handle>, BackendError>;

    /// Write the files for `handle` under `output_path`, returning the paths written
    async fn materialize(
        &self,
        handle: &Self::Handle,
        output_path: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, BackendError>;
}
