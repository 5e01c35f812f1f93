//! Worker error taxonomy.
//!
//! Every variant is terminal: the controller never retries, it maps the
//! error straight to a result record and an exit code (see [`WorkerError::error_code`]
//! and [`WorkerError::exit_code`]).

use thiserror::Error;

/// Errors that can terminate a worker run.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration failed to parse or validate.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Human-readable description of what was wrong.
        message: String,
    },

    /// The root command was empty.
    #[error("root command is empty")]
    MissingRootCommand,

    /// A step, subcall, depth, or wall-clock budget was exhausted.
    #[error("{message}")]
    LimitExceeded {
        /// Description of which budget was exceeded.
        message: String,
    },

    /// The sandbox validator rejected emitted code, or a helper was
    /// called with illegal arguments.
    #[error("{message}")]
    SandboxViolation {
        /// Description of the violation.
        message: String,
    },

    /// The root or subcall CLI returned non-zero, timed out, or could
    /// not be spawned.
    #[error("{message}")]
    ModelInvocationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Any other unexpected failure.
    #[error("{message}")]
    WorkerFailure {
        /// Description of the failure.
        message: String,
    },
}

impl WorkerError {
    /// The stable error code surfaced in the result record's `error_code` field.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::MissingRootCommand => "missing_root_command",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::SandboxViolation { .. } => "sandbox_violation",
            Self::ModelInvocationFailed { .. } => "model_invocation_failed",
            Self::WorkerFailure { .. } => "worker_failure",
        }
    }

    /// The process exit code this error maps to.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig { .. } | Self::MissingRootCommand | Self::LimitExceeded { .. } => 2,
            Self::SandboxViolation { .. }
            | Self::ModelInvocationFailed { .. }
            | Self::WorkerFailure { .. } => 1,
        }
    }

    /// Shorthand for a [`WorkerError::LimitExceeded`] with a formatted message.
    pub fn limit(message: impl Into<String>) -> Self {
        Self::LimitExceeded {
            message: message.into(),
        }
    }

    /// Shorthand for a [`WorkerError::SandboxViolation`] with a formatted message.
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::SandboxViolation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`WorkerError::ModelInvocationFailed`] with a formatted message.
    pub fn model_invocation(message: impl Into<String>) -> Self {
        Self::ModelInvocationFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_and_exit_code_pairing() {
        let cases: Vec<(WorkerError, &str, i32)> = vec![
            (
                WorkerError::InvalidConfig {
                    message: "bad".to_string(),
                },
                "invalid_config",
                2,
            ),
            (WorkerError::MissingRootCommand, "missing_root_command", 2),
            (WorkerError::limit("steps exhausted"), "limit_exceeded", 2),
            (WorkerError::sandbox("import rejected"), "sandbox_violation", 1),
            (
                WorkerError::model_invocation("timed out"),
                "model_invocation_failed",
                1,
            ),
            (
                WorkerError::WorkerFailure {
                    message: "panic".to_string(),
                },
                "worker_failure",
                1,
            ),
        ];

        for (err, code, exit) in cases {
            assert_eq!(err.error_code(), code);
            assert_eq!(err.exit_code(), exit);
        }
    }
}
