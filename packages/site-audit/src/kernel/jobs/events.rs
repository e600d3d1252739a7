//! In-process lifecycle events.
//!
//! One subscriber list per event kind. Publishing snapshots the list and
//! spawns one task per handler; a handler that errors or panics is logged
//! and never affects its siblings or the publisher. Delivery is at most
//! once per handler per publish, with no ordering across handlers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, warn, Instrument, Span};

use super::job::Job;
use super::state::JobStats;
use crate::domains::audit::AuditRunId;

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompleted {
    pub job: Job,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailed {
    pub job: Job,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCancelled {
    pub job: Job,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteAuditCompleted {
    pub job_id: String,
    pub site_url: String,
    pub audit_run_id: AuditRunId,
    pub stats: JobStats,
}

// ============================================================================
// Bus
// ============================================================================

type Handler<E> = Arc<dyn Fn(E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    job_completed: Vec<Handler<JobCompleted>>,
    job_failed: Vec<Handler<JobFailed>>,
    job_cancelled: Vec<Handler<JobCancelled>>,
    site_audit_completed: Vec<Handler<SiteAuditCompleted>>,
}

/// Publish/subscribe hub for job lifecycle events.
///
/// Cloning shares the subscriber lists. Subscribers are expected to be wired
/// once at startup; there is no unsubscribe. Publishing with at least one
/// subscriber must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Subscribers>>,
    span: Span,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(tracing::info_span!("event_bus"))
    }
}

impl EventBus {
    pub fn new(span: Span) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Subscribers::default())),
            span,
        }
    }

    pub fn on_job_completed<F, Fut>(&self, handler: F)
    where
        F: Fn(JobCompleted) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.write().job_completed.push(boxed(handler));
    }

    pub fn on_job_failed<F, Fut>(&self, handler: F)
    where
        F: Fn(JobFailed) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.write().job_failed.push(boxed(handler));
    }

    pub fn on_job_cancelled<F, Fut>(&self, handler: F)
    where
        F: Fn(JobCancelled) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.write().job_cancelled.push(boxed(handler));
    }

    pub fn on_site_audit_completed<F, Fut>(&self, handler: F)
    where
        F: Fn(SiteAuditCompleted) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.write().site_audit_completed.push(boxed(handler));
    }

    /// Returns the number of handlers dispatched.
    pub fn publish_job_completed(&self, event: JobCompleted) -> usize {
        let handlers = self.read().job_completed.clone();
        self.dispatch("job_completed", handlers, event)
    }

    pub fn publish_job_failed(&self, event: JobFailed) -> usize {
        let handlers = self.read().job_failed.clone();
        self.dispatch("job_failed", handlers, event)
    }

    pub fn publish_job_cancelled(&self, event: JobCancelled) -> usize {
        let handlers = self.read().job_cancelled.clone();
        self.dispatch("job_cancelled", handlers, event)
    }

    pub fn publish_site_audit_completed(&self, event: SiteAuditCompleted) -> usize {
        let handlers = self.read().site_audit_completed.clone();
        self.dispatch("site_audit_completed", handlers, event)
    }

    fn dispatch<E>(&self, kind: &'static str, handlers: Vec<Handler<E>>, event: E) -> usize
    where
        E: Clone + Send + 'static,
    {
        let count = handlers.len();

        for (index, handler) in handlers.into_iter().enumerate() {
            let event = event.clone();
            let task = async move {
                // The handler is invoked inside the guarded future so a panic
                // while building its future is caught too.
                let outcome = AssertUnwindSafe(async move { handler(event).await })
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(event = kind, handler = index, error = %e, "event handler failed");
                    }
                    Err(panic) => {
                        error!(
                            event = kind,
                            handler = index,
                            panic = %panic_message(panic.as_ref()),
                            "event handler panicked"
                        );
                    }
                }
            };

            tokio::spawn(task.instrument(self.span.clone()));
        }

        count
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Subscribers> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn boxed<E, F, Fut>(handler: F) -> Handler<E>
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| handler(event).boxed())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
