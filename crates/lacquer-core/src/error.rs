//! Error types shared by every Lacquer crate.
//!
//! Every variant carries enough structured context (step id, attempt,
//! block/transport name) to satisfy the "surface with step context" policy
//! from the engine's error handling design. Variants map directly onto the
//! error kinds described there: `ParseError`/`SchemaError`,
//! `ValidationError`, `ExpressionError`, `BlockRuntimeError`, `ModelError`,
//! `ToolError`, `TransportError`, `CancelledError`/`DeadlineExceeded`.

use thiserror::Error;

/// Result alias used throughout the Lacquer workspace.
pub type Result<T> = std::result::Result<T, LacquerError>;

/// Primary error type for workflow parsing, validation and execution.
#[derive(Debug, Error)]
pub enum LacquerError {
    /// Malformed workflow or block YAML. Never retried.
    #[error("failed to parse {file}: {message}")]
    ParseError {
        file: String,
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    /// A workflow or block file violates the expected shape. Never retried.
    #[error("schema error in {file}: {message}")]
    SchemaError { file: String, message: String },

    /// A typed input, enum, required-field, or range violation. Never retried.
    #[error("validation error: {message}")]
    ValidationError { message: String },

    /// An expression referenced an undefined path in a context where that
    /// is fatal (a required output binding, a condition on a required
    /// step, a prompt template). Fatal for the step that raised it.
    #[error("expression error in step '{step_id}': {message}")]
    ExpressionError { step_id: String, message: String },

    /// A script/container/native block body failed: non-zero exit,
    /// unparsable stderr, or a structured `{error: {...}}` payload.
    /// Retryable per the step's `max_retries`.
    #[error("block '{block_name}' failed (step '{step_id}'): {message}")]
    BlockRuntimeError {
        step_id: String,
        block_name: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// Model provider HTTP failure, rate limit, or tool-loop depth
    /// exceeded. Retryable per `max_retries`.
    #[error("model error (agent '{agent}', step '{step_id}'): {message}")]
    ModelError {
        step_id: String,
        agent: String,
        message: String,
        /// Honors a provider's `Retry-After` hint, if present.
        retry_after: Option<std::time::Duration>,
    },

    /// A tool invocation failed. Non-transport tool errors are fed back to
    /// the model as a tool result rather than failing the step.
    #[error("tool '{tool_name}' failed: {message}")]
    ToolError {
        tool_name: String,
        message: String,
        /// True when the failure is a transport-level fault rather than a
        /// reported application error; callers should fail the step.
        transport_fault: bool,
    },

    /// MCP connection lost or block process died. Retried at the
    /// transport layer (reconnect); surfaced if unrecoverable.
    #[error("transport error ({transport}): {message}")]
    TransportError {
        transport: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The run's cancellation token fired. Never retried.
    #[error("run '{run_id}' was cancelled")]
    CancelledError { run_id: String },

    /// A step or run deadline elapsed. Never retried.
    #[error("deadline exceeded for step '{step_id}' after {elapsed_ms}ms")]
    DeadlineExceeded { step_id: String, elapsed_ms: u64 },

    /// A block registry lookup or dispatch failure that doesn't map to a
    /// runtime failure above (not found, missing input, enum mismatch,
    /// unregistered runtime).
    #[error("block registry error: {message}")]
    BlockRegistryError { message: String },

    /// Workflow outputs (or a scope's outputs) were written more than once.
    #[error("workflow outputs already set for run '{run_id}'")]
    OutputsAlreadySet { run_id: String },

    /// I/O failure reading workflow/block files or spawning processes.
    #[error("I/O error: {message}")]
    IoError {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl From<serde_json::Error> for LacquerError {
    fn from(error: serde_json::Error) -> Self {
        LacquerError::SchemaError {
            file: "<json>".to_string(),
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for LacquerError {
    fn from(error: std::io::Error) -> Self {
        LacquerError::IoError {
            message: error.to_string(),
            source: Some(error),
        }
    }
}

impl LacquerError {
    /// True for error kinds the scheduler's retry policy should act on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LacquerError::BlockRuntimeError { .. }
                | LacquerError::ModelError { .. }
                | LacquerError::TransportError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        let e = LacquerError::BlockRuntimeError {
            step_id: "s".into(),
            block_name: "b".into(),
            message: "boom".into(),
            exit_code: Some(1),
        };
        assert!(e.is_retryable());

        let e = LacquerError::ValidationError {
            message: "bad".into(),
        };
        assert!(!e.is_retryable());

        let e = LacquerError::CancelledError {
            run_id: "r1".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let e = LacquerError::ExpressionError {
            step_id: "analyze".into(),
            message: "undefined reference".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("analyze"));
        assert!(msg.contains("undefined reference"));
    }
}
