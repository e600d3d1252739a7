//! Test harness for integration testing.
//!
//! Every test gets fresh in-memory collaborators: job store, audit
//! repository and a recording notifier. `postgres_store` hands out a
//! migrated Postgres store when `TEST_DATABASE_URL` is set.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use site_audit::domains::audit::testing::{FakeSharePointClient, InMemoryAuditRepository};
use site_audit::domains::audit::{AuditParameters, SiteAuditExecutor};
use site_audit::kernel::jobs::testing::InMemoryJobStore;
use site_audit::kernel::jobs::{
    Job, JobService, JobType, PostgresJobStore, ProgressReporter, ProgressUpdate,
};
use site_audit::kernel::RecordingNotifier;
use test_context::AsyncTestContext;

/// How long `wait_for_terminal` polls before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness that owns the in-memory collaborators of one test.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let service = ctx.service(FakeSharePointClient::new());
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub store: Arc<InMemoryJobStore>,
    pub repo: Arc<InMemoryAuditRepository>,
    pub notifier: Arc<RecordingNotifier>,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
    }

    async fn teardown(self) {
        // In-memory state is dropped with the harness
    }
}

impl TestHarness {
    pub fn new() -> Self {
        // Respect RUST_LOG; try_init() tolerates repeated calls.
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        Self {
            store: Arc::new(InMemoryJobStore::new()),
            repo: Arc::new(InMemoryAuditRepository::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    /// Job service with the site-audit executor wired to `client`.
    pub fn service(&self, client: FakeSharePointClient) -> JobService {
        self.service_with(Arc::new(client), AuditParameters::default())
    }

    pub fn service_with(
        &self,
        client: Arc<FakeSharePointClient>,
        defaults: AuditParameters,
    ) -> JobService {
        let service = JobService::new(self.store.clone(), self.notifier.clone(), defaults);
        service.register_executor(
            JobType::SiteAudit,
            Arc::new(SiteAuditExecutor::new(client, self.repo.clone())),
        );
        service
    }

    /// Poll the store until the job reaches a terminal status and its task
    /// has released its cancellation token.
    pub async fn wait_for_terminal(&self, service: &JobService, job_id: &str) -> Job {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = service.get_job(job_id).await.expect("job should exist");
            if job.status.is_terminal() && !service.is_running(job_id) {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} still {} after {:?}", job_id, job.status, WAIT_TIMEOUT);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `check` holds for the stored job.
    pub async fn wait_until(
        &self,
        service: &JobService,
        job_id: &str,
        check: impl Fn(&Job) -> bool,
    ) -> Job {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let job = service.get_job(job_id).await.expect("job should exist");
            if check(&job) {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} never reached the expected state", job_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for spawned event handlers to run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Migrated Postgres job store, or `None` when `TEST_DATABASE_URL` is unset.
pub async fn postgres_store() -> Result<Option<PostgresJobStore>> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };
    let store = PostgresJobStore::connect(&url)
        .await
        .context("Failed to connect to test database")?;
    store.migrate().await?;
    Ok(Some(store))
}

/// Progress reporter that keeps every update.
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = Vec::new();
        for update in self.updates() {
            if stages.last() != Some(&update.stage) {
                stages.push(update.stage);
            }
        }
        stages
    }
}

#[async_trait]
impl ProgressReporter for RecordingProgress {
    async fn report(&self, update: ProgressUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}
