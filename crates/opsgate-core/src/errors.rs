//! Error taxonomy for the opsgate core.
//!
//! Startup-class errors (`PolicyError`) are fatal and escape to the binary,
//! which exits non-zero. Everything else is converted into a response
//! envelope at the dispatcher or engine boundary and never crosses it.

use thiserror::Error;

/// Policy loading or validation failure. Fatal at startup.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy load failed: {0}")]
    Load(String),

    #[error("policy validation failed: {0}")]
    Validation(String),
}

/// A tool argument object (or a tool's declared schema) failed validation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SchemaError {
    /// Tool the schema belongs to, for diagnostics.
    pub tool: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// A security policy violation, e.g. a path escaping its designated root.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path traversal detected: '{attempted}' resolves outside root '{root}'")]
    PathTraversal { attempted: String, root: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl SecurityError {
    /// Violation kind recorded in the audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityError::PathTraversal { .. } => "path_traversal",
            SecurityError::InvalidPath(_) => "path_validation_error",
        }
    }
}
