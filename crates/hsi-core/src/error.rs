//! Error types for hsi-core
//!
//! Protocol anomalies are not errors; they become infractions and events.
//! These variants cover the conditions that stop a `process` call.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the inspector
#[derive(Debug, Error)]
pub enum InspectError {
    /// Internal state contradicts itself
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// The flow's session slot holds data of another type
    #[error("Flow data slot holds foreign data")]
    FlowDataMismatch,

    /// Per-test-case output file could not be opened
    #[error("Cannot open test output {path}: {source}")]
    TestOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A recorded test input script is malformed
    #[error("Test input line {line}: {message}")]
    TestInput { line: usize, message: String },

    /// Writing diagnostics failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InspectError {
    /// Programming errors: the inspector reached a state it cannot be in
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            InspectError::InvariantViolation(_) | InspectError::FlowDataMismatch
        )
    }

    /// Diagnostic output problems, fatal only for test runs
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            InspectError::TestOutput { .. } | InspectError::TestInput { .. } | InspectError::Io(_)
        )
    }
}

/// Result type for inspector operations
pub type InspectResult<T> = std::result::Result<T, InspectError>;
