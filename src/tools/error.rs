//! Error taxonomy: registration, invocation, and failures raised inside tool bodies.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::auth::redact_secrets;

/// Longest tool-failure cause shown in user-facing text.
const MAX_CAUSE_CHARS: usize = 200;

/// One offending input field and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "'{}' {}", self.field, self.message)
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A tool's input schema could not be built.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema for {input} is not serializable: {source}")]
    Serialize {
        input: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("schema for {input} does not compile: {message}")]
    Compile { input: &'static str, message: String },
}

/// Failure raised by tool body code.
#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("{} has been modified since it was last read", .path.display())]
    ConcurrentModification { path: PathBuf },
    #[error("{} has not been read yet; read it before writing to it", .path.display())]
    NotReadYet { path: PathBuf },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl ToolFailure {
    #[inline]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Outcome of a failed `ExecutionEngine::invoke`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),
    #[error("invalid input for '{tool}': {}", join_fields(.errors))]
    InvalidInput {
        tool: String,
        errors: Vec<FieldError>,
    },
    #[error("permission denied for '{tool}'{}", cancelled_suffix(.cancelled))]
    PermissionDenied { tool: String, cancelled: bool },
    #[error("'{tool}' was cancelled")]
    Cancelled { tool: String },
    #[error("'{tool}': {} was modified since it was last read; read it again before writing", .path.display())]
    ConcurrentModification { tool: String, path: PathBuf },
    #[error("'{tool}' failed: {}", display_cause(.cause))]
    ToolExecution {
        tool: String,
        #[source]
        cause: ToolFailure,
    },
}

impl ToolError {
    /// Name of the tool involved.
    pub fn tool(&self) -> &str {
        match self {
            Self::ToolNotFound(tool)
            | Self::InvalidInput { tool, .. }
            | Self::PermissionDenied { tool, .. }
            | Self::Cancelled { tool }
            | Self::ConcurrentModification { tool, .. }
            | Self::ToolExecution { tool, .. } => tool,
        }
    }

    /// Cancellation is an expected terminal state, not a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. } | Self::PermissionDenied { cancelled: true, .. }
        )
    }

    /// Classify a tool-body failure for `tool`.
    pub fn from_failure(tool: &str, failure: ToolFailure) -> Self {
        match failure {
            ToolFailure::ConcurrentModification { path } => Self::ConcurrentModification {
                tool: tool.to_string(),
                path,
            },
            cause => Self::ToolExecution {
                tool: tool.to_string(),
                cause,
            },
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn cancelled_suffix(cancelled: &bool) -> &'static str {
    if *cancelled {
        " (cancelled while awaiting approval)"
    } else {
        ""
    }
}

/// Redacted, truncated cause text.
fn display_cause(cause: &ToolFailure) -> String {
    let text = redact_secrets(&cause.to_string());
    if text.chars().count() <= MAX_CAUSE_CHARS {
        return text;
    }
    let mut out: String = text.chars().take(MAX_CAUSE_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_names_tool_and_field() {
        let err = ToolError::InvalidInput {
            tool: "memory_write".into(),
            errors: vec![
                FieldError::new("file_path", "is required"),
                FieldError::new("content", "must be a string"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("memory_write"));
        assert!(text.contains("'file_path' is required"));
        assert!(text.contains("'content' must be a string"));
    }

    #[test]
    fn execution_error_truncates_and_redacts() {
        let key = "sk-ant-REDACTED";
        let long = format!("auth failed for {key}: {}", "x".repeat(500));
        let err = ToolError::from_failure("bash", ToolFailure::msg(long));
        let text = err.to_string();
        assert!(text.starts_with("'bash' failed: "));
        assert!(!text.contains(key));
        assert!(text.ends_with('…'));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn execution_error_redacts_registered_key() {
        let key = "AKIAzyxwvutsrqponmlkjihgfedcba9876543210";
        crate::auth::register_secret(key);
        let err = ToolError::from_failure("bash", ToolFailure::msg(format!("401 with key {key}")));
        let text = err.to_string();
        assert!(!text.contains(key));
        assert_eq!(
            text,
            format!("'bash' failed: 401 with key …{}", crate::auth::normalize_api_key(key))
        );
    }

    #[test]
    fn concurrent_modification_is_lifted() {
        let err = ToolError::from_failure(
            "file_write",
            ToolFailure::ConcurrentModification {
                path: PathBuf::from("notes.txt"),
            },
        );
        assert!(matches!(err, ToolError::ConcurrentModification { .. }));
        assert_eq!(err.tool(), "file_write");
        assert!(!err.is_cancelled());
    }
}
