//! Job testing utilities.
//!
//! In-memory job store and closure-backed executors. Also usable by
//! single-process deployments that do not need Postgres.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::job::{Job, JobStatus, JobType};
use super::job_store::JobStore;
use super::registry::{ExecutionError, JobExecutor, ProgressReporter};
use super::state::ProgressUpdate;
use crate::domains::audit::AuditRunId;

// ============================================================================
// InMemoryJobStore
// ============================================================================

/// Job store over a `RwLock<HashMap>`.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    audit_runs: RwLock<Vec<(AuditRunId, String, String)>>,
    next_audit_run: AtomicI64,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_audit_runs: AtomicBool,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            audit_runs: RwLock::new(Vec::new()),
            next_audit_run: AtomicI64::new(1),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            fail_audit_runs: AtomicBool::new(false),
        }
    }

    /// Number of successful `save_job` and `save_job_if_active` writes.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// `(run id, site url, job id)` for every run created.
    pub fn audit_runs(&self) -> Vec<(AuditRunId, String, String)> {
        self.audit_runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make subsequent `save_job` calls fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_audit_run` calls fail.
    pub fn set_fail_audit_runs(&self, fail: bool) {
        self.fail_audit_runs.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a stored job directly.
    pub fn insert(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), job);
    }

    fn filtered(&self, keep: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| keep(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("job store unavailable"));
        }
        self.insert(job.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_job_if_active(&self, job: &Job) -> Result<bool> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("job store unavailable"));
        }
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        match jobs.get(&job.id) {
            Some(stored) if stored.is_active() => {
                jobs.insert(job.id.clone(), job.clone());
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.filtered(|_| true))
    }

    async fn list_jobs_by_type(&self, job_type: JobType) -> Result<Vec<Job>> {
        Ok(self.filtered(|j| j.job_type == job_type))
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self.filtered(|j| j.status == status))
    }

    async fn create_audit_run(&self, site_url: &str, job_id: &str) -> Result<AuditRunId> {
        if self.fail_audit_runs.load(Ordering::SeqCst) {
            return Err(anyhow!("audit run table unavailable"));
        }
        let id = self.next_audit_run.fetch_add(1, Ordering::SeqCst);
        self.audit_runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, site_url.to_string(), job_id.to_string()));
        Ok(id)
    }
}

// ============================================================================
// FnExecutor
// ============================================================================

type ExecuteFn = Box<
    dyn Fn(CancellationToken, Job) -> BoxFuture<'static, Result<Option<serde_json::Value>, ExecutionError>>
        + Send
        + Sync,
>;

/// Executor backed by a closure, optionally reporting canned progress first.
pub struct FnExecutor {
    execute: ExecuteFn,
    updates: Vec<ProgressUpdate>,
}

impl FnExecutor {
    pub fn new<F, Fut>(execute: F) -> Self
    where
        F: Fn(CancellationToken, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<serde_json::Value>, ExecutionError>> + Send + 'static,
    {
        Self {
            execute: Box::new(move |cancel, job| execute(cancel, job).boxed()),
            updates: Vec::new(),
        }
    }

    /// Report these updates before running the closure.
    pub fn with_progress(mut self, updates: Vec<ProgressUpdate>) -> Self {
        self.updates = updates;
        self
    }

    /// Executor that waits for cancellation and reports it.
    pub fn until_cancelled() -> Self {
        Self::new(|cancel, _job| async move {
            cancel.cancelled().await;
            Err(ExecutionError::Cancelled)
        })
    }
}

#[async_trait]
impl JobExecutor for FnExecutor {
    async fn execute(
        &self,
        cancel: CancellationToken,
        job: &Job,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<serde_json::Value>, ExecutionError> {
        for update in &self.updates {
            progress.report(update.clone()).await;
        }
        (self.execute)(cancel, job.clone()).await
    }
}
