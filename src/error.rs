//! Error types for the scaffold generation pipeline.
//!
//! `GenerationError` is the classified failure that flows through the coordinator and
//! the recovery subsystem. Every variant maps onto exactly one [`ErrorKind`] from the
//! closed taxonomy; the kind decides whether the coordinator retries.

use crate::types::GenerationResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Closed error taxonomy. Kinds, not type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    TemplateNotFound,
    InvalidTemplateFormat,
    FileSystemError,
    PermissionError,
    OutputPathConflict,
    VariableValidationFailed,
    BackendFault,
    HookExecutionError,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::TemplateNotFound,
        ErrorKind::InvalidTemplateFormat,
        ErrorKind::FileSystemError,
        ErrorKind::PermissionError,
        ErrorKind::OutputPathConflict,
        ErrorKind::VariableValidationFailed,
        ErrorKind::BackendFault,
        ErrorKind::HookExecutionError,
        ErrorKind::Timeout,
        ErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TemplateNotFound => "template_not_found",
            ErrorKind::InvalidTemplateFormat => "invalid_template_format",
            ErrorKind::FileSystemError => "file_system_error",
            ErrorKind::PermissionError => "permission_error",
            ErrorKind::OutputPathConflict => "output_path_conflict",
            ErrorKind::VariableValidationFailed => "variable_validation_failed",
            ErrorKind::BackendFault => "backend_fault",
            ErrorKind::HookExecutionError => "hook_execution_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Transient kinds are retried by the coordinator up to its attempt bound.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::BackendFault | ErrorKind::FileSystemError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified generation failure
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid template format for '{template_id}': {reason}")]
    InvalidTemplateFormat { template_id: String, reason: String },

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Output path already exists: {}", .0.display())]
    OutputPathConflict(PathBuf),

    #[error("Missing required variables: {}", .missing.join(", "))]
    VariableValidation { missing: Vec<String> },

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Hook '{hook}' failed: {message}")]
    HookExecution { hook: String, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Unknown(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            GenerationError::InvalidTemplateFormat { .. } => ErrorKind::InvalidTemplateFormat,
            GenerationError::FileSystem(_) => ErrorKind::FileSystemError,
            GenerationError::Permission(_) => ErrorKind::PermissionError,
            GenerationError::OutputPathConflict(_) => ErrorKind::OutputPathConflict,
            GenerationError::VariableValidation { .. } => ErrorKind::VariableValidationFailed,
            GenerationError::Backend(_) => ErrorKind::BackendFault,
            GenerationError::HookExecution { .. } => ErrorKind::HookExecutionError,
            GenerationError::Timeout(_) => ErrorKind::Timeout,
            GenerationError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Check if the coordinator should attempt this generation again
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }

    /// Short suggestion shown to the user alongside the failure message
    pub fn recovery_hint(&self) -> &'static str {
        match self.kind() {
            ErrorKind::TemplateNotFound => "Check the template identifier and that the template is installed.",
            ErrorKind::InvalidTemplateFormat => "Fix the template definition and try again.",
            ErrorKind::FileSystemError => "Check that the output location is writable and has free space.",
            ErrorKind::PermissionError => "Choose an output location you have write access to.",
            ErrorKind::OutputPathConflict => "Remove the existing output or re-run with force enabled.",
            ErrorKind::VariableValidationFailed => "Provide values for every variable the template declares.",
            ErrorKind::BackendFault => "The generator backend failed repeatedly; try again later.",
            ErrorKind::HookExecutionError => "Inspect or disable the failing hook.",
            ErrorKind::Timeout => "Increase the timeout or investigate the slow step.",
            ErrorKind::Unknown => "Re-run with SCAFFOLD_LOG=debug for details.",
        }
    }
}

/// Errors reported by a generator backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template format for '{template_id}': {reason}")]
    InvalidFormat { template_id: String, reason: String },

    #[error("Backend fault: {0}")]
    Fault(String),

    #[error("Partial write ({} files written): {message}", .written.len())]
    PartialWrite { message: String, written: Vec<PathBuf> },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl BackendError {
    /// Files the backend managed to write before failing
    pub fn written_files(&self) -> &[PathBuf] {
        match self {
            BackendError::PartialWrite { written, .. } => written,
            _ => &[],
        }
    }
}

impl From<BackendError> for GenerationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(id) => GenerationError::TemplateNotFound(id),
            BackendError::InvalidFormat {
                template_id,
                reason,
            } => GenerationError::InvalidTemplateFormat {
                template_id,
                reason,
            },
            BackendError::Fault(msg) => GenerationError::Backend(msg),
            BackendError::PartialWrite { message, .. } => GenerationError::FileSystem(message),
            BackendError::PermissionDenied(msg) => GenerationError::Permission(msg),
        }
    }
}

/// Errors raised by hook implementations
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("Hook '{hook}' timed out after {}ms", .after.as_millis())]
    Timeout { hook: String, after: Duration },

    #[error("Hook panicked: {0}")]
    Panicked(String),
}

/// Errors raised while executing a recovery strategy
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Recovery strategy '{0}' requires a generation context")]
    MissingContext(String),

    #[error("Recovery strategy failed: {0}")]
    StrategyFailed(String),

    #[error("Recovery I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A batch aborted on its first failure
#[derive(Debug, Clone, Error)]
#[error("Batch generation aborted for {}: {}", .failed.output_path.display(), .failed.message.as_deref().unwrap_or("generation failed"))]
pub struct BatchError {
    pub failed: Arc<GenerationResult>,
}

/// Setup errors (configuration, logging)
#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ScaffoldError {
    fn from(err: config::ConfigError) -> Self {
        ScaffoldError::Config(err.to_string())
    }
}
