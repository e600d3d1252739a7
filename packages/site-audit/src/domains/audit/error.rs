use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::parameters::ParameterError;

/// Errors that stop a collection phase.
///
/// Per-item, per-principal and per-link failures never surface here; they
/// are logged and counted where they happen.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The job's cancellation token fired
    #[error("collection cancelled")]
    Cancelled,

    #[error("invalid audit parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    /// A phase with no "continue" semantics failed
    #[error("{phase} failed for {target}")]
    Phase {
        phase: &'static str,
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl CollectionError {
    pub fn phase(phase: &'static str, target: impl Into<String>, source: anyhow::Error) -> Self {
        CollectionError::Phase {
            phase,
            target: target.into(),
            source,
        }
    }

    /// Classify a failed remote or storage call. Failures observed after the
    /// token fired count as cancellation.
    pub fn from_call(
        cancel: &CancellationToken,
        phase: &'static str,
        target: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        if cancel.is_cancelled() {
            CollectionError::Cancelled
        } else {
            Self::phase(phase, target, source)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CollectionError::Cancelled)
    }
}
