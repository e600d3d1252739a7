//! Job construction and identity generation.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use super::job::{Job, JobContext, JobType, SiteAuditContext};
use super::state::JobState;
use crate::domains::audit::AuditParameters;

const QUEUED_STAGE: &str = "queued";

/// Builds pending jobs with fresh identities.
#[derive(Debug, Clone, Default)]
pub struct JobFactory {
    defaults: AuditParameters,
}

impl JobFactory {
    /// `defaults` seed the parameters of every new site audit.
    pub fn new(defaults: AuditParameters) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> AuditParameters {
        self.defaults
    }

    pub fn site_audit(&self, site_url: impl Into<String>, target_item: Option<String>) -> Job {
        let context = JobContext::SiteAudit(SiteAuditContext {
            site_url: site_url.into(),
            target_item,
            parameters: self.defaults,
        });
        self.create(context)
    }

    pub fn create(&self, context: JobContext) -> Job {
        let now = Utc::now();
        let id = generate_id(context.job_type(), now);
        let mut state = JobState::initial(QUEUED_STAGE, now);
        state.progress.description = "Waiting to start".to_string();
        state.push_message("Job queued", now);
        Job::new(id, context, state, now)
    }
}

/// `{type}_{YYYYMMDDHHMMSS}_{8 hex}`, random part from the OS entropy source.
pub fn generate_id(job_type: JobType, now: DateTime<Utc>) -> String {
    generate_id_with(job_type, now, |buf| OsRng.try_fill_bytes(buf))
}

/// Same as [`generate_id`] with a caller-supplied entropy source. Falls back
/// to a timestamp-only id when the source fails.
pub fn generate_id_with<F, E>(job_type: JobType, now: DateTime<Utc>, fill: F) -> String
where
    F: FnOnce(&mut [u8]) -> Result<(), E>,
    E: Display,
{
    let mut bytes = [0u8; 4];
    match fill(&mut bytes) {
        Ok(()) => format!(
            "{}_{}_{}",
            job_type,
            now.format("%Y%m%d%H%M%S"),
            hex::encode(bytes)
        ),
        Err(e) => {
            warn!(job_type = %job_type, error = %e, "Entropy source failed, using timestamp-only job id");
            let nanos = now
                .timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
            format!("{}_{}", job_type, nanos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::JobStatus;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-05T14:07:09Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn id_has_type_timestamp_and_hex_suffix() {
        let id = generate_id(JobType::SiteAudit, fixed_now());
        let parts: Vec<&str> = id.rsplitn(3, '_').collect();

        assert!(id.starts_with("site_audit_20240305140709_"));
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn entropy_failure_falls_back_to_timestamp() {
        let now = fixed_now();
        let id = generate_id_with(JobType::SiteAudit, now, |_| Err("no entropy"));

        assert_eq!(
            id,
            format!("site_audit_{}", now.timestamp_nanos_opt().unwrap())
        );
    }

    #[test]
    fn consecutive_ids_differ() {
        let now = fixed_now();
        let a = generate_id(JobType::SiteAudit, now);
        let b = generate_id(JobType::SiteAudit, now);
        assert_ne!(a, b);
    }

    #[test]
    fn site_audit_job_is_pending_with_defaults() {
        let defaults = AuditParameters {
            batch_size: 500,
            ..Default::default()
        };
        let job = JobFactory::new(defaults).site_audit("https://contoso.sharepoint.com/sites/hr", None);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_type, JobType::SiteAudit);
        assert_eq!(job.state.progress.percentage, 0.0);
        assert_eq!(job.state.stage, "queued");
        assert!(job.completed_at.is_none());
        let JobContext::SiteAudit(ctx) = &job.context;
        assert_eq!(ctx.parameters.batch_size, 500);
    }
}
