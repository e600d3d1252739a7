//! Job model and lifecycle rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{JobState, ProgressUpdate};
use crate::domains::audit::{AuditParameters, AuditRunId};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SiteAudit,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SiteAudit => "site_audit",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "site_audit" => Ok(JobType::SiteAudit),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Pending or running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAuditContext {
    pub site_url: String,
    pub target_item: Option<String>,
    pub parameters: AuditParameters,
}

/// Type-specific payload. One variant per job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobContext {
    SiteAudit(SiteAuditContext),
}

impl JobContext {
    pub fn job_type(&self) -> JobType {
        match self {
            JobContext::SiteAudit(_) => JobType::SiteAudit,
        }
    }

    /// Site the job targets.
    pub fn site_url(&self) -> &str {
        match self {
            JobContext::SiteAudit(ctx) => &ctx.site_url,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} job {job_id} while it is {status}")]
    IllegalTransition {
        job_id: String,
        action: &'static str,
        status: JobStatus,
    },

    #[error("job {job_id} is already bound to audit run {existing}")]
    AuditRunAlreadySet {
        job_id: String,
        existing: AuditRunId,
    },
}

// ============================================================================
// Job
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub audit_run_id: Option<AuditRunId>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub state: JobState,
    pub context: JobContext,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Job {
    /// A pending job. Use [`JobFactory`](super::JobFactory) for fresh ids.
    pub fn new(id: String, context: JobContext, state: JobState, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: context.job_type(),
            status: JobStatus::Pending,
            audit_run_id: None,
            created_at: now,
            started_at: now,
            completed_at: None,
            updated_at: now,
            state,
            context,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn site_url(&self) -> &str {
        self.context.site_url()
    }

    /// `pending -> running`.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.status != JobStatus::Pending {
            return Err(self.illegal("start"));
        }

        let now = Utc::now();
        self.status = JobStatus::Running;
        self.started_at = now;
        self.updated_at = now;
        self.state = JobState::initial("initializing", now);
        self.state.push_message("Job started", now);
        Ok(())
    }

    pub fn complete(&mut self, result: Option<serde_json::Value>) -> Result<(), LifecycleError> {
        self.finish("complete", JobStatus::Completed, "Job completed")?;
        self.state.progress.percentage = 100.0;
        self.result = result;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let reason = reason.into();
        self.finish("fail", JobStatus::Failed, &format!("Job failed: {}", reason))?;
        self.error = Some(reason);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), LifecycleError> {
        self.finish("cancel", JobStatus::Cancelled, "Job cancelled")
    }

    /// Apply an executor progress report.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> Result<(), LifecycleError> {
        if !self.is_active() {
            return Err(self.illegal("update progress of"));
        }

        let now = Utc::now();
        self.state.apply(update, now);
        self.updated_at = now;
        Ok(())
    }

    /// Bind the job to its audit run. Allowed once.
    pub fn attach_audit_run(&mut self, audit_run_id: AuditRunId) -> Result<(), LifecycleError> {
        if let Some(existing) = self.audit_run_id {
            return Err(LifecycleError::AuditRunAlreadySet {
                job_id: self.id.clone(),
                existing,
            });
        }
        self.audit_run_id = Some(audit_run_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn finish(
        &mut self,
        action: &'static str,
        status: JobStatus,
        message: &str,
    ) -> Result<(), LifecycleError> {
        if !self.is_active() {
            return Err(self.illegal(action));
        }

        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.state.close_open_stage(now);
        self.state.push_message(message, now);
        Ok(())
    }

    fn illegal(&self, action: &'static str) -> LifecycleError {
        LifecycleError::IllegalTransition {
            job_id: self.id.clone(),
            action,
            status: self.status,
        }
    }
}
