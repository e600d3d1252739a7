//! Job service: creates, runs, cancels and reports on background jobs.
//!
//! Each started job runs on its own Tokio task. The only state shared across
//! jobs is the job-id → cancellation-token map and the event bus subscriber
//! lists. A job's in-memory copy is mutated only by its own task; progress
//! callbacks run inline on that task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};
use typed_builder::TypedBuilder;

use super::error::JobError;
use super::events::{EventBus, JobCancelled, JobCompleted, JobFailed, SiteAuditCompleted};
use super::factory::JobFactory;
use super::job::{Job, JobContext, JobStatus, JobType};
use super::job_store::JobStore;
use super::registry::{ExecutionError, ExecutorRegistry, JobExecutor, ProgressReporter};
use super::state::ProgressUpdate;
use crate::common::same_site;
use crate::domains::audit::{validate_site_url, AuditParameters};
use crate::kernel::notify::Notifier;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct SiteAuditRequest {
    pub site_url: String,
    #[builder(default, setter(strip_option))]
    pub target_item: Option<String>,
    /// Overrides for the service defaults. An invalid set is ignored.
    #[builder(default, setter(strip_option))]
    pub parameters: Option<AuditParameters>,
}

#[derive(Debug, Clone)]
pub enum JobRequest {
    SiteAudit(SiteAuditRequest),
}

impl JobRequest {
    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::SiteAudit(_) => JobType::SiteAudit,
        }
    }
}

impl From<SiteAuditRequest> for JobRequest {
    fn from(request: SiteAuditRequest) -> Self {
        JobRequest::SiteAudit(request)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Cancellation handle for one running job.
#[derive(Clone, Default)]
struct RunHandle {
    token: CancellationToken,
    /// Set by `cancel_job`, which then owns the `cancelled` write.
    cancel_requested: Arc<AtomicBool>,
}

impl RunHandle {
    fn cancelled_by_request(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

type TokenMap = Arc<RwLock<HashMap<String, RunHandle>>>;

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    factory: JobFactory,
    running: TokenMap,
    span: Span,
}

impl JobService {
    /// `defaults` are the validated parameters applied to every new audit.
    pub fn new(
        store: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
        defaults: AuditParameters,
    ) -> Self {
        let span = tracing::info_span!("job_service");
        Self {
            store,
            registry: Arc::new(ExecutorRegistry::new()),
            events: EventBus::new(tracing::info_span!(parent: &span, "event_bus")),
            notifier,
            factory: JobFactory::new(defaults),
            running: Arc::new(RwLock::new(HashMap::new())),
            span,
        }
    }

    /// Use `span` as the parent of every log line and job task.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn register_executor(&self, job_type: JobType, executor: Arc<dyn JobExecutor>) {
        self.registry.register(job_type, executor);
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    pub fn on_job_completed<F, Fut>(&self, handler: F)
    where
        F: Fn(JobCompleted) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.on_job_completed(handler);
    }

    pub fn on_job_failed<F, Fut>(&self, handler: F)
    where
        F: Fn(JobFailed) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.on_job_failed(handler);
    }

    pub fn on_job_cancelled<F, Fut>(&self, handler: F)
    where
        F: Fn(JobCancelled) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.on_job_cancelled(handler);
    }

    pub fn on_site_audit_completed<F, Fut>(&self, handler: F)
    where
        F: Fn(SiteAuditCompleted) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.on_site_audit_completed(handler);
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Create, persist and launch a job. Returns as soon as the job's task
    /// is spawned.
    pub async fn start_job(&self, request: impl Into<JobRequest>) -> Result<Job, JobError> {
        let request = request.into();
        let executor = self.registry.get(request.job_type())?;

        let job = match request {
            JobRequest::SiteAudit(request) => self.prepare_site_audit(request).await?,
        };

        self.store
            .save_job(&job)
            .await
            .map_err(JobError::Storage)?;

        info!(parent: &self.span, job_id = %job.id, job_type = %job.job_type, site_url = %job.site_url(), "Job created");
        self.notify_jobs_changed().await;
        self.notify_job(&job).await;

        // Registered before spawning so a cancel that races the task start
        // still reaches it.
        let handle = RunHandle::default();
        self.running
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), handle.clone());

        let span = tracing::info_span!(parent: &self.span, "job_run", job_id = %job.id);
        let service = self.clone();
        let task_job = job.clone();
        tokio::spawn(
            async move { service.run_job(task_job, executor, handle).await }.instrument(span),
        );

        Ok(job)
    }

    /// Cancel a job. Signals the running task (if any) and records the
    /// `cancelled` transition immediately without waiting for the task.
    ///
    /// Only one terminal write per job succeeds. If the run finishes first,
    /// the cancel is rejected as a lifecycle error; if something else already
    /// cancelled it, the stored job is returned.
    pub async fn cancel_job(&self, id: &str) -> Result<Job, JobError> {
        let mut job = self.load(id).await?;
        job.cancel()?;

        let handle = self
            .running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned();
        if let Some(handle) = handle {
            handle.cancel_requested.store(true, Ordering::SeqCst);
            handle.token.cancel();
        }

        let written = self
            .store
            .save_job_if_active(&job)
            .await
            .map_err(JobError::Storage)?;
        if !written {
            let mut current = self.load(id).await?;
            if current.status == JobStatus::Cancelled {
                return Ok(current);
            }
            current.cancel()?;
            return Err(JobError::Storage(anyhow!(
                "job {} changed while it was being cancelled",
                id
            )));
        }

        info!(parent: &self.span, job_id = %job.id, "Job cancelled");
        self.notify_job(&job).await;
        self.notify_jobs_changed().await;
        self.events
            .publish_job_cancelled(JobCancelled { job: job.clone() });

        Ok(job)
    }

    /// Inject a progress update outside an executor callback.
    ///
    /// Rejected with a lifecycle error once the job is terminal, including
    /// when it finishes while the update is being written. For a job that is
    /// still running, the executor's next report replaces the injected
    /// progress.
    pub async fn update_job_progress(
        &self,
        id: &str,
        update: ProgressUpdate,
    ) -> Result<Job, JobError> {
        let mut job = self.load(id).await?;
        job.apply_progress(&update)?;
        let written = self
            .store
            .save_job_if_active(&job)
            .await
            .map_err(JobError::Storage)?;
        if !written {
            let mut current = self.load(id).await?;
            current.apply_progress(&update)?;
            return Err(JobError::Storage(anyhow!(
                "job {} changed while its progress was being updated",
                id
            )));
        }
        self.notify_job(&job).await;
        Ok(job)
    }

    /// Signal every running job to stop.
    pub fn shutdown(&self) {
        let running = self.running.read().unwrap_or_else(|e| e.into_inner());
        info!(parent: &self.span, count = running.len(), "Cancelling running jobs");
        for handle in running.values() {
            handle.token.cancel();
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get_job(&self, id: &str) -> Result<Job, JobError> {
        self.load(id).await
    }

    pub async fn list_all_jobs(&self) -> Result<Vec<Job>, JobError> {
        self.store.list_jobs().await.map_err(JobError::Storage)
    }

    pub async fn list_jobs_by_type(&self, job_type: JobType) -> Result<Vec<Job>, JobError> {
        self.store
            .list_jobs_by_type(job_type)
            .await
            .map_err(JobError::Storage)
    }

    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobError> {
        self.store
            .list_jobs_by_status(status)
            .await
            .map_err(JobError::Storage)
    }

    /// Whether a cancellation token is registered for the job.
    pub fn is_running(&self, id: &str) -> bool {
        self.running
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn running_count(&self) -> usize {
        self.running.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn load(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .get_job(id)
            .await
            .map_err(JobError::Storage)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    async fn prepare_site_audit(&self, request: SiteAuditRequest) -> Result<Job, JobError> {
        let site_url = validate_site_url(&request.site_url)?;

        // Linear scan over all site audits.
        let active = self
            .store
            .list_jobs_by_type(JobType::SiteAudit)
            .await
            .map_err(JobError::Storage)?
            .into_iter()
            .find(|j| j.is_active() && same_site(j.site_url(), &site_url));
        if let Some(existing) = active {
            warn!(parent: &self.span, site_url = %site_url, existing_job = %existing.id, "Rejecting duplicate audit request");
            return Err(JobError::Conflict {
                site_url,
                job_id: existing.id,
            });
        }

        let mut job = self.factory.site_audit(site_url, request.target_item);

        if let Some(parameters) = request.parameters {
            match parameters.validate() {
                Ok(valid) => {
                    let JobContext::SiteAudit(ctx) = &mut job.context;
                    ctx.parameters = valid;
                }
                Err(e) => {
                    warn!(parent: &self.span, job_id = %job.id, error = %e, "Ignoring invalid audit parameters, keeping defaults");
                }
            }
        }

        Ok(job)
    }

    async fn run_job(self, mut job: Job, executor: Arc<dyn JobExecutor>, handle: RunHandle) {
        let _registration = TokenRegistration {
            running: self.running.clone(),
            job_id: job.id.clone(),
        };
        let token = handle.token.clone();

        if token.is_cancelled() {
            debug!(job_id = %job.id, "Job cancelled before it started");
            self.reconcile_cancelled(job, &handle).await;
            return;
        }

        if let Err(e) = job.start() {
            error!(job_id = %job.id, error = %e, "Failed to start job");
            return;
        }

        if job.job_type == JobType::SiteAudit {
            match self.store.create_audit_run(job.site_url(), &job.id).await {
                Ok(run_id) => {
                    if let Err(e) = job.attach_audit_run(run_id) {
                        error!(job_id = %job.id, error = %e, "Failed to attach audit run");
                    }
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to create audit run");
                    if job.fail(format!("Failed to create audit run: {:#}", e)).is_ok() {
                        self.finish(job).await;
                    }
                    return;
                }
            }
        }

        if token.is_cancelled() {
            debug!(job_id = %job.id, "Job cancelled before execution");
            self.reconcile_cancelled(job, &handle).await;
            return;
        }

        info!(job_id = %job.id, audit_run_id = ?job.audit_run_id, "Job running");
        self.persist(&job).await;
        self.notify_job(&job).await;

        let snapshot = job.clone();
        let reporter = RunProgress {
            job: Mutex::new(job),
            service: &self,
            cancel: token.clone(),
        };
        let outcome = executor.execute(token.clone(), &snapshot, &reporter).await;
        let mut job = reporter.into_job();

        if token.is_cancelled() {
            self.reconcile_cancelled(job, &handle).await;
            return;
        }

        let transition = match outcome {
            Ok(result) => job.complete(result),
            Err(ExecutionError::Cancelled) => job.cancel(),
            Err(ExecutionError::Failed(e)) => {
                warn!(job_id = %job.id, error = %e, "Job failed");
                job.fail(format!("{:#}", e))
            }
        };

        match transition {
            Ok(()) => self.finish(job).await,
            Err(e) => error!(job_id = %job.id, error = %e, "Illegal terminal transition"),
        }
    }

    /// The token fired. When `cancel_job` fired it, `cancel_job` records the
    /// transition. Otherwise (shutdown) the run loop records it.
    async fn reconcile_cancelled(&self, mut job: Job, handle: &RunHandle) {
        if handle.cancelled_by_request() {
            debug!(job_id = %job.id, "Cancellation recorded by request");
            return;
        }

        if job.cancel().is_ok() {
            self.finish(job).await;
        }
    }

    /// Persist a terminal job, notify, and publish its lifecycle event.
    /// Does nothing when another path already finished the stored job.
    async fn finish(&self, job: Job) {
        match self.store.save_job_if_active(&job).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, status = %job.status, "Job already finished, dropping transition");
                return;
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to persist job"),
        }
        self.notify_job(&job).await;
        self.notify_jobs_changed().await;

        match job.status {
            JobStatus::Completed => {
                info!(job_id = %job.id, "Job completed");
                let site_audit = match (&job.context, job.audit_run_id) {
                    (JobContext::SiteAudit(ctx), Some(audit_run_id)) => Some(SiteAuditCompleted {
                        job_id: job.id.clone(),
                        site_url: ctx.site_url.clone(),
                        audit_run_id,
                        stats: job.state.stats,
                    }),
                    _ => None,
                };

                self.events.publish_job_completed(JobCompleted { job });
                if let Some(event) = site_audit {
                    self.events.publish_site_audit_completed(event);
                    if let Err(e) = self.notifier.sites_changed().await {
                        warn!(error = %e, "Failed to notify site change");
                    }
                }
            }
            JobStatus::Failed => {
                let error = job.error.clone().unwrap_or_default();
                self.events.publish_job_failed(JobFailed { job, error });
            }
            JobStatus::Cancelled => {
                info!(job_id = %job.id, "Job cancelled");
                self.events.publish_job_cancelled(JobCancelled { job });
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
    }

    /// Write an active job. Skipped once the stored job is terminal.
    async fn persist(&self, job: &Job) {
        match self.store.save_job_if_active(job).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, "Stored job is terminal, skipping write"),
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to persist job"),
        }
    }

    async fn notify_job(&self, job: &Job) {
        if let Err(e) = self.notifier.job_updated(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to notify job update");
        }
    }

    async fn notify_jobs_changed(&self) {
        if let Err(e) = self.notifier.jobs_changed().await {
            warn!(error = %e, "Failed to notify job list change");
        }
    }
}

/// Removes the job's token from the running map when the run loop exits,
/// including on panic.
struct TokenRegistration {
    running: TokenMap,
    job_id: String,
}

impl Drop for TokenRegistration {
    fn drop(&mut self) {
        self.running
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Progress callback handed to executors. Applies, persists and notifies
/// inline on the job's own task.
struct RunProgress<'a> {
    job: Mutex<Job>,
    service: &'a JobService,
    cancel: CancellationToken,
}

impl RunProgress<'_> {
    fn into_job(self) -> Job {
        self.job.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProgressReporter for RunProgress<'_> {
    async fn report(&self, update: ProgressUpdate) {
        let snapshot = {
            let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = job.apply_progress(&update) {
                warn!(error = %e, "Dropping progress update");
                return;
            }
            job.clone()
        };

        // Once cancelled, the cancellation path owns the stored row.
        if self.cancel.is_cancelled() {
            return;
        }

        self.service.persist(&snapshot).await;
        self.service.notify_job(&snapshot).await;
    }
}
