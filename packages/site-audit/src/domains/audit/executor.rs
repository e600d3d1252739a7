//! Job executor for `site_audit` jobs.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Span};

use super::client::SharePointClient;
use super::error::CollectionError;
use super::pipeline::AuditCollector;
use super::repository::AuditRepository;
use crate::kernel::jobs::{ExecutionError, Job, JobContext, JobExecutor, ProgressReporter};

/// Runs the collection pipeline for the job's site under the audit run the
/// job service attached.
pub struct SiteAuditExecutor {
    client: Arc<dyn SharePointClient>,
    repo: Arc<dyn AuditRepository>,
    span: Span,
}

impl SiteAuditExecutor {
    pub fn new(client: Arc<dyn SharePointClient>, repo: Arc<dyn AuditRepository>) -> Self {
        Self {
            client,
            repo,
            span: tracing::info_span!("site_audit_executor"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[async_trait]
impl JobExecutor for SiteAuditExecutor {
    async fn execute(
        &self,
        cancel: CancellationToken,
        job: &Job,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<serde_json::Value>, ExecutionError> {
        let JobContext::SiteAudit(context) = &job.context;
        let audit_run_id = job
            .audit_run_id
            .ok_or_else(|| anyhow!("Job {} has no audit run", job.id))?;

        let collector = AuditCollector::with_span(
            self.client.clone(),
            self.repo.clone(),
            context.parameters,
            tracing::info_span!(parent: &self.span, "audit", job_id = %job.id),
        );

        let started = Instant::now();
        let outcome = collector
            .collect_site_data(&cancel, audit_run_id, &context.site_url, progress)
            .await;

        // Advisory only; the run is never aborted on it.
        let elapsed = started.elapsed();
        if elapsed > context.parameters.timeout() {
            warn!(
                job_id = %job.id,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = context.parameters.timeout_secs,
                "Site audit exceeded its configured timeout"
            );
        }

        match outcome {
            Ok(stats) => {
                info!(job_id = %job.id, site_url = %context.site_url, audit_run_id, "Site audit finished");
                Ok(Some(json!({
                    "site_url": context.site_url,
                    "audit_run_id": audit_run_id,
                    "target_item": context.target_item,
                    "stats": stats,
                })))
            }
            Err(CollectionError::Cancelled) => Err(ExecutionError::Cancelled),
            Err(e) => Err(ExecutionError::Failed(
                anyhow::Error::new(e).context(format!("Site audit of {} failed", context.site_url)),
            )),
        }
    }
}
