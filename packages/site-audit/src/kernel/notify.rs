//! Notification sink for job and site changes.
//!
//! The job service calls these after every persisted change. A transport
//! (SSE, websocket) lives outside this crate.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::kernel::jobs::Job;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn job_updated(&self, job: &Job) -> anyhow::Result<()>;
    async fn jobs_changed(&self) -> anyhow::Result<()>;
    async fn sites_changed(&self) -> anyhow::Result<()>;
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn job_updated(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    async fn jobs_changed(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn sites_changed(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    JobUpdated { job_id: String, status: String },
    JobsChanged,
    SitesChanged,
}

/// Records notifications for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: RwLock<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Statuses seen in `job_updated` calls for one job, in order.
    pub fn statuses_for(&self, job_id: &str) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::JobUpdated { job_id: id, status } if id == job_id => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Notification) -> usize {
        self.notifications()
            .iter()
            .filter(|n| *n == wanted)
            .count()
    }

    fn record(&self, notification: Notification) {
        self.notifications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn job_updated(&self, job: &Job) -> anyhow::Result<()> {
        self.record(Notification::JobUpdated {
            job_id: job.id.clone(),
            status: job.status.to_string(),
        });
        Ok(())
    }

    async fn jobs_changed(&self) -> anyhow::Result<()> {
        self.record(Notification::JobsChanged);
        Ok(())
    }

    async fn sites_changed(&self) -> anyhow::Result<()> {
        self.record(Notification::SitesChanged);
        Ok(())
    }
}
