//! Kernel module - job infrastructure and notification plumbing.

pub mod jobs;
pub mod notify;

pub use notify::{NoopNotifier, Notification, Notifier, RecordingNotifier};
