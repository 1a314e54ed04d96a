use std::fmt;

use thiserror::Error;

/// Typed classification of a driver failure, derived from SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connectivity,
    Permission,
    MissingDatabase,
    DuplicateObject,
    UndefinedObject,
    IntegrityViolation,
    Other,
}

impl FailureKind {
    /// Failures that abort the whole flow instead of a single step.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FailureKind::Connectivity | FailureKind::Permission | FailureKind::MissingDatabase
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Connectivity => "connectivity",
            FailureKind::Permission => "permission",
            FailureKind::MissingDatabase => "missing_database",
            FailureKind::DuplicateObject => "duplicate_object",
            FailureKind::UndefinedObject => "undefined_object",
            FailureKind::IntegrityViolation => "integrity_violation",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum DbInfraError {
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error("cannot connect to {target} ({kind}): {message}")]
    Connect {
        target: String,
        kind: FailureKind,
        message: String,
    },
    #[error("{step} failed ({kind}): {message}")]
    Statement {
        step: String,
        kind: FailureKind,
        message: String,
    },
    #[error("bulk loader error: {message}")]
    Loader { message: String },
    #[error("bulk loader exited with {status}: {stderr}")]
    LoaderFailed { status: String, stderr: String },
    #[error("precondition failed: {message}")]
    Precondition { message: String },
    #[error("cancelled after {after}")]
    Cancelled { after: String },
    #[error("schema evolution finished with {} failed step(s): {}", .failed.len(), .failed.join("; "))]
    Evolution { failed: Vec<String> },
}

impl DbInfraError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Connect { kind, .. } | Self::Statement { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when this error should stop the current flow outright.
    pub fn is_fatal(&self) -> bool {
        self.kind().map_or(true, FailureKind::is_fatal)
    }
}
