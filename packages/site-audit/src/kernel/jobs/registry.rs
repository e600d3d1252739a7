//! Executor registry.
//!
//! Maps a [`JobType`] to the [`JobExecutor`] that runs it. The job service
//! resolves the executor before creating a job, so an unregistered type
//! never produces a persisted job.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::job::{Job, JobType};
use super::state::ProgressUpdate;

/// Receives progress reports from a running executor.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, update: ProgressUpdate);
}

/// Outcome of a failed execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job's cancellation token fired.
    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Runs one job type.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Returns the job's result document on success.
    async fn execute(
        &self,
        cancel: CancellationToken,
        job: &Job,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<serde_json::Value>, ExecutionError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no executor registered for job type '{0}'")]
pub struct NotSupportedError(pub JobType);

/// Thread-safe job type → executor table.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<JobType, Arc<dyn JobExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for a job type.
    pub fn register(&self, job_type: JobType, executor: Arc<dyn JobExecutor>) {
        self.executors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_type, executor);
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn JobExecutor>, NotSupportedError> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_type)
            .cloned()
            .ok_or(NotSupportedError(job_type))
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}
