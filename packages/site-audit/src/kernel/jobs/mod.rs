//! Job infrastructure for background site audits.
//!
//! - [`JobService`] - creates, runs, cancels and queries jobs
//! - [`ExecutorRegistry`] - job type → [`JobExecutor`]
//! - [`JobFactory`] - fresh jobs with unique ids
//! - [`JobState`] - progress, stage timeline and stats document
//! - [`EventBus`] - terminal-transition events
//! - [`PostgresJobStore`] - database-backed [`JobStore`]
//!
//! # Architecture
//!
//! ```text
//! JobService.start_job(request)
//!     │
//!     ├─► ExecutorRegistry.get(job_type)
//!     ├─► JobFactory.create() + JobStore.save_job()
//!     └─► spawn run
//!             ├─► start + create audit run
//!             ├─► JobExecutor.execute(cancel, job, progress)
//!             │       └─► progress → JobState.apply() → save + notify
//!             └─► complete | fail | cancel → save + notify + EventBus
//! ```
//!
//! Executors live in their domains. This module only knows the contract.

mod error;
pub mod events;
mod factory;
mod job;
mod job_store;
mod registry;
mod service;
mod state;
pub mod testing;

pub use error::JobError;
pub use events::{EventBus, JobCancelled, JobCompleted, JobFailed, SiteAuditCompleted};
pub use factory::{generate_id, generate_id_with, JobFactory};
pub use job::{Job, JobContext, JobStatus, JobType, LifecycleError, SiteAuditContext};
pub use job_store::{JobStore, PostgresJobStore};
pub use registry::{
    ExecutionError, ExecutorRegistry, JobExecutor, NotSupportedError, ProgressReporter,
};
pub use service::{JobRequest, JobService, SiteAuditRequest};
pub use state::{
    JobState, JobStats, Progress, ProgressUpdate, StageTiming, StatusMessage, MAX_MESSAGES,
    STATE_VERSION, UNKNOWN_STAGE,
};
