//! Job persistence.
//!
//! `PostgresJobStore` keeps one row per job in `audit_jobs`. The progress
//! document is stored as TEXT so an empty value can be decoded to the
//! default state; context and result are JSONB.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::job::{Job, JobContext, JobStatus, JobType};
use super::state::JobState;
use crate::domains::audit::AuditRunId;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace the job row.
    async fn save_job(&self, job: &Job) -> Result<()>;
    /// Replace the job row only while the stored job is pending or running.
    /// Returns `false` when the stored job is missing or already terminal.
    async fn save_job_if_active(&self, job: &Job) -> Result<bool>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;
    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn list_jobs_by_type(&self, job_type: JobType) -> Result<Vec<Job>>;
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
    /// Open a new audit run for a site and return its id.
    async fn create_audit_run(&self, site_url: &str, job_id: &str) -> Result<AuditRunId>;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const JOB_COLUMNS: &str = "id, job_type, status, audit_run_id, created_at, started_at, \
     completed_at, updated_at, state, context, result, error";

#[derive(FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    status: String,
    audit_run_id: Option<i64>,
    created_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    state: Option<String>,
    context: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let job_type: JobType = row.job_type.parse().map_err(anyhow::Error::msg)?;
        let status: JobStatus = row.status.parse().map_err(anyhow::Error::msg)?;
        let state = JobState::from_document(row.state.as_deref().unwrap_or(""))
            .with_context(|| format!("Invalid state document for job {}", row.id))?;
        let context: JobContext = serde_json::from_value(row.context)
            .with_context(|| format!("Invalid context for job {}", row.id))?;

        Ok(Job {
            id: row.id,
            job_type,
            status,
            audit_run_id: row.audit_run_id,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            state,
            context,
            result: row.result,
            error: row.error,
        })
    }
}

fn decode_rows(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        let state = job.state.to_document()?;
        let context = serde_json::to_value(&job.context)?;

        sqlx::query(
            r#"
            INSERT INTO audit_jobs (
                id, job_type, status, audit_run_id, site_url, created_at, started_at,
                completed_at, updated_at, state, context, result, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                audit_run_id = EXCLUDED.audit_run_id,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                updated_at = EXCLUDED.updated_at,
                state = EXCLUDED.state,
                context = EXCLUDED.context,
                result = EXCLUDED.result,
                error = EXCLUDED.error
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.audit_run_id)
        .bind(job.site_url())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(state)
        .bind(context)
        .bind(&job.result)
        .bind(&job.error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save job {}", job.id))?;

        Ok(())
    }

    async fn save_job_if_active(&self, job: &Job) -> Result<bool> {
        let state = job.state.to_document()?;
        let context = serde_json::to_value(&job.context)?;

        let result = sqlx::query(
            r#"
            UPDATE audit_jobs
            SET status = $2,
                audit_run_id = $3,
                started_at = $4,
                completed_at = $5,
                updated_at = $6,
                state = $7,
                context = $8,
                result = $9,
                error = $10
            WHERE id = $1 AND status IN ($11, $12)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.audit_run_id)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(state)
        .bind(context)
        .bind(&job.result)
        .bind(&job.error)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update job {}", job.id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audit_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load job {}", id))?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audit_jobs ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list jobs")?;

        decode_rows(rows)
    }

    async fn list_jobs_by_type(&self, job_type: JobType) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audit_jobs WHERE job_type = $1 ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .bind(job_type.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {} jobs", job_type))?;

        decode_rows(rows)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM audit_jobs WHERE status = $1 ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {} jobs", status))?;

        decode_rows(rows)
    }

    async fn create_audit_run(&self, site_url: &str, job_id: &str) -> Result<AuditRunId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_runs (site_url, job_id, started_at)
            VALUES ($1, $2, NOW())
            RETURNING id
            "#,
        )
        .bind(site_url)
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to create audit run for {}", site_url))?;

        Ok(id)
    }
}
