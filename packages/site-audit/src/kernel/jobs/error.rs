//! Typed errors surfaced by the job service.

use thiserror::Error;

use super::job::LifecycleError;
use super::registry::NotSupportedError;
use crate::domains::audit::ParameterError;

#[derive(Debug, Error)]
pub enum JobError {
    /// Request rejected at the boundary
    #[error("invalid request: {0}")]
    Validation(#[from] ParameterError),

    /// Illegal state transition
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    NotSupported(#[from] NotSupportedError),

    /// Another audit for the same site is pending or running
    #[error("site {site_url} already has an active audit job: {job_id}")]
    Conflict { site_url: String, job_id: String },

    #[error("job storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl JobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, JobError::Conflict { .. })
    }
}
