//! Request and result types shared across the pipeline.

use crate::error::GenerationError;
use crate::hooks::Hook;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Template variables and free-form metadata
pub type Variables = serde_json::Map<String, Value>;

/// Deterministic identity of a generation request: blake3(template_id, output_path)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey([u8; 32]);

impl RequestKey {
    pub fn derive(template_id: &str, output_path: &Path) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(template_id.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(output_path.to_string_lossy().as_bytes());
        RequestKey(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", &self.to_hex()[..12])
    }
}

/// Generation request. Immutable once built.
#[derive(Clone)]
pub struct GenerationRequest {
    pub key: RequestKey,
    pub template_id: String,
    pub output_path: PathBuf,
    pub variables: Variables,
    /// Higher values are scheduled first
    pub priority: i32,
    /// Request-scoped hooks, run together with the registered ones
    pub hooks: Vec<Arc<dyn Hook>>,
    /// Allow writing into an existing, non-empty output location
    pub force: bool,
}

impl GenerationRequest {
    pub fn new(template_id: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        let template_id = template_id.into();
        let output_path = output_path.into();
        Self {
            key: RequestKey::derive(&template_id, &output_path),
            template_id,
            output_path,
            variables: Variables::new(),
            priority: 0,
            hooks: Vec::new(),
            force: false,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("key", &self.key)
            .field("template_id", &self.template_id)
            .field("output_path", &self.output_path)
            .field("variables", &self.variables)
            .field("priority", &self.priority)
            .field(
                "hooks",
                &self.hooks.iter().map(|h| h.name().to_string()).collect::<Vec<_>>(),
            )
            .field("force", &self.force)
            .finish()
    }
}

/// Outcome of one generation request, shared by every coalesced caller
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub generated_files: Vec<PathBuf>,
    pub message: Option<String>,
    pub duration: Option<Duration>,
    pub metadata: Variables,
}

impl GenerationResult {
    pub fn succeeded(output_path: PathBuf, generated_files: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            output_path,
            generated_files,
            message: None,
            duration: None,
            metadata: Variables::new(),
        }
    }

    /// Failure result carrying the error kind and recovery hint
    pub fn failed(output_path: PathBuf, error: &GenerationError) -> Self {
        let mut metadata = Variables::new();
        metadata.insert("error_kind".into(), Value::from(error.kind().as_str()));
        metadata.insert("recovery".into(), Value::from(error.recovery_hint()));
        Self {
            success: false,
            output_path,
            generated_files: Vec::new(),
            message: Some(error.to_string()),
            duration: None,
            metadata,
        }
    }

    pub fn cancelled(output_path: PathBuf) -> Self {
        let mut metadata = Variables::new();
        metadata.insert("cancelled".into(), Value::Bool(true));
        Self {
            success: false,
            output_path,
            generated_files: Vec::new(),
            message: Some("Generation cancelled before it started".to_string()),
            duration: None,
            metadata,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.metadata.get("error_kind").and_then(Value::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.metadata
            .get("cancelled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
