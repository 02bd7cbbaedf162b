//! Error types for the orchestrator.
//!
//! Every failure the core can report maps onto one of a small number of
//! kinds. Per-target errors are collected into batch reports; only
//! infrastructure errors abort an operation as a whole.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsafe path, unsafe archive member or invalid artifact signature
    #[error("validation failed: {0}")]
    Validation(String),

    /// A required external program is not installed
    #[error("required tool is not available: {0}")]
    DependencyMissing(String),

    /// External program exited unsuccessfully or produced no output
    #[error("{tool} failed (exit code {code:?}): {detail}")]
    ProcessFailure { tool: String, code: Option<i32>, detail: String },

    /// Bounded wait exceeded
    #[error("{tool} did not finish within {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },

    /// Lockout active for the target
    #[error("too many failed attempts, wait {} seconds", .wait.as_secs().max(1))]
    RateLimited { wait: Duration },

    /// The user declined a prompt
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying filesystem failure
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    pub fn io_at(action: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { context: format!("{action} {}", path.display()), source }
    }

    /// Short message suitable for a dialog or notification.
    ///
    /// Tool diagnostics are left out; they have already been logged.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::DependencyMissing(tool) => format!("{tool} is not installed"),
            Self::ProcessFailure { tool, .. } => format!("{tool} failed"),
            Self::Timeout { tool, .. } => format!("{tool} timed out"),
            Self::RateLimited { wait } => format!("Too many failed attempts. Wait {} seconds.", wait.as_secs().max(1)),
            Self::Cancelled => "Cancelled".to_owned(),
            Self::Io { context, .. } => context.clone(),
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Path-carrying failure used inside batch reports.
#[derive(Debug)]
pub struct ItemError {
    pub path: PathBuf,
    pub error: Error,
}
