//! Rich progress document carried by every job.
//!
//! The document is persisted as one serialized blob. It is versioned, and an
//! empty document decodes to the default state so rows written before the
//! job started (or by older writers) still load.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATE_VERSION: u32 = 1;

/// Most recent status lines kept on a job.
pub const MAX_MESSAGES: usize = 10;

pub const UNKNOWN_STAGE: &str = "unknown";

// ============================================================================
// Document parts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub stage: String,
    pub description: String,
    /// 0-100
    pub percentage: f64,
    pub items_done: u64,
    pub items_total: u64,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            stage: UNKNOWN_STAGE.to_string(),
            description: String::new(),
            percentage: 0.0,
            items_done: 0,
            items_total: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub started: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl StageTiming {
    pub fn is_open(&self) -> bool {
        self.completed.is_none()
    }
}

/// Counters collected by a site audit. Only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStats {
    pub lists_found: u64,
    pub lists_processed: u64,
    pub lists_skipped: u64,
    pub items_found: u64,
    pub items_processed: u64,
    pub permissions_analyzed: u64,
    pub sharing_links_found: u64,
    pub errors: u64,
}

impl JobStats {
    /// Merge a newer snapshot without letting any counter go backwards.
    pub fn absorb(&mut self, other: &JobStats) {
        self.lists_found = self.lists_found.max(other.lists_found);
        self.lists_processed = self.lists_processed.max(other.lists_processed);
        self.lists_skipped = self.lists_skipped.max(other.lists_skipped);
        self.items_found = self.items_found.max(other.items_found);
        self.items_processed = self.items_processed.max(other.items_processed);
        self.permissions_analyzed = self.permissions_analyzed.max(other.permissions_analyzed);
        self.sharing_links_found = self.sharing_links_found.max(other.sharing_links_found);
        self.errors = self.errors.max(other.errors);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub at: DateTime<Utc>,
    pub text: String,
}

// ============================================================================
// Progress updates
// ============================================================================

/// One progress report from an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: String,
    pub description: String,
    pub percentage: f64,
    pub items_done: u64,
    pub items_total: u64,
    pub current_operation: Option<String>,
    pub current_item: Option<String>,
    pub stats: Option<JobStats>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(stage: impl Into<String>, description: impl Into<String>, percentage: f64) -> Self {
        Self {
            stage: stage.into(),
            description: description.into(),
            percentage,
            items_done: 0,
            items_total: 0,
            current_operation: None,
            current_item: None,
            stats: None,
            message: None,
        }
    }

    pub fn with_items(mut self, done: u64, total: u64) -> Self {
        self.items_done = done;
        self.items_total = total;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.current_operation = Some(operation.into());
        self
    }

    pub fn with_current_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }

    pub fn with_stats(mut self, stats: JobStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// JobState
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    pub version: u32,
    pub stage: String,
    pub current_operation: Option<String>,
    pub current_item: Option<String>,
    pub progress: Progress,
    pub timeline: Vec<StageTiming>,
    pub stats: JobStats,
    pub messages: VecDeque<StatusMessage>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stage: UNKNOWN_STAGE.to_string(),
            current_operation: None,
            current_item: None,
            progress: Progress::default(),
            timeline: Vec::new(),
            stats: JobStats::default(),
            messages: VecDeque::new(),
        }
    }
}

impl JobState {
    /// State with `stage` already open on the timeline.
    pub fn initial(stage: &str, now: DateTime<Utc>) -> Self {
        let mut state = Self::default();
        state.enter_stage(stage, now);
        state
    }

    /// Decode a persisted document. Empty input yields the default state.
    pub fn from_document(document: &str) -> Result<Self, serde_json::Error> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(document)
    }

    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Close the open timeline entry (if any) and open one for `stage`.
    pub fn enter_stage(&mut self, stage: &str, now: DateTime<Utc>) {
        let already_open = self
            .timeline
            .last()
            .map(|t| t.is_open() && t.stage == stage)
            .unwrap_or(false);
        if already_open {
            return;
        }

        self.close_open_stage(now);

        // Never start before the previous entry ended.
        let started = self
            .timeline
            .last()
            .and_then(|t| t.completed)
            .map(|c| c.max(now))
            .unwrap_or(now);

        self.timeline.push(StageTiming {
            stage: stage.to_string(),
            started,
            completed: None,
            duration_ms: None,
        });
        self.stage = stage.to_string();
        self.progress.stage = stage.to_string();
    }

    pub fn close_open_stage(&mut self, now: DateTime<Utc>) {
        if let Some(open) = self.timeline.last_mut().filter(|t| t.is_open()) {
            let completed = now.max(open.started);
            open.completed = Some(completed);
            open.duration_ms = Some((completed - open.started).num_milliseconds());
        }
    }

    /// Append a status line, evicting the oldest past [`MAX_MESSAGES`].
    pub fn push_message(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.messages.push_back(StatusMessage {
            at: now,
            text: text.into(),
        });
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    pub fn apply(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        if update.stage != self.stage {
            self.enter_stage(&update.stage, now);
        }

        self.progress.stage = update.stage.clone();
        self.progress.description = update.description.clone();
        self.progress.percentage = update.percentage.clamp(0.0, 100.0);
        self.progress.items_done = update.items_done;
        self.progress.items_total = update.items_total;

        if let Some(op) = &update.current_operation {
            self.current_operation = Some(op.clone());
        }
        if let Some(item) = &update.current_item {
            self.current_item = Some(item.clone());
        }
        if let Some(stats) = &update.stats {
            self.stats.absorb(stats);
        }
        if let Some(message) = &update.message {
            self.push_message(message.clone(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn empty_document_is_default_state() {
        let state = JobState::from_document("").unwrap();
        assert_eq!(state.stage, "unknown");
        assert_eq!(state.progress.percentage, 0.0);
        assert_eq!(state.version, STATE_VERSION);

        assert_eq!(JobState::from_document("   ").unwrap(), JobState::default());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let state = JobState::from_document(r#"{"stage":"lists"}"#).unwrap();
        assert_eq!(state.stage, "lists");
        assert!(state.timeline.is_empty());
        assert_eq!(state.version, STATE_VERSION);
    }

    #[test]
    fn document_round_trip_keeps_timeline() {
        let mut state = JobState::initial("initializing", t(0));
        state.apply(&ProgressUpdate::new("web", "Discovering web", 10.0), t(5));

        let restored = JobState::from_document(&state.to_document().unwrap()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn stage_change_closes_previous_entry() {
        let mut state = JobState::initial("initializing", t(0));
        state.apply(&ProgressUpdate::new("web", "Discovering web", 10.0), t(3));

        assert_eq!(state.timeline.len(), 2);
        assert_eq!(state.timeline[0].completed, Some(t(3)));
        assert_eq!(state.timeline[0].duration_ms, Some(3000));
        assert!(state.timeline[1].is_open());
        assert_eq!(state.stage, "web");
    }

    #[test]
    fn same_stage_updates_do_not_add_entries() {
        let mut state = JobState::initial("lists", t(0));
        state.apply(
            &ProgressUpdate::new("lists", "List 1 of 3", 30.0).with_items(1, 3),
            t(1),
        );
        state.apply(
            &ProgressUpdate::new("lists", "List 2 of 3", 46.0).with_items(2, 3),
            t(2),
        );

        assert_eq!(state.timeline.len(), 1);
        assert_eq!(state.progress.description, "List 2 of 3");
        assert_eq!(state.progress.items_done, 2);
    }

    #[test]
    fn stats_never_decrease() {
        let mut state = JobState::default();
        let high = JobStats {
            items_found: 10,
            errors: 2,
            ..Default::default()
        };
        let low = JobStats {
            items_found: 4,
            errors: 3,
            ..Default::default()
        };

        state.apply(&ProgressUpdate::new("items", "", 40.0).with_stats(high), t(0));
        state.apply(&ProgressUpdate::new("items", "", 41.0).with_stats(low), t(1));

        assert_eq!(state.stats.items_found, 10);
        assert_eq!(state.stats.errors, 3);
    }

    #[test]
    fn clock_skew_does_not_produce_overlap() {
        let mut state = JobState::initial("a", t(10));
        state.enter_stage("b", t(5));

        assert_eq!(state.timeline[0].completed, Some(t(10)));
        assert!(state.timeline[1].started >= t(10));
        assert_eq!(state.timeline[0].duration_ms, Some(0));
    }

    proptest! {
        #[test]
        fn messages_are_capped_fifo(count in 0usize..40) {
            let mut state = JobState::default();
            for i in 0..count {
                state.push_message(format!("msg {}", i), t(i as i64));
            }

            prop_assert!(state.messages.len() <= MAX_MESSAGES);
            prop_assert_eq!(state.messages.len(), count.min(MAX_MESSAGES));
            if count > 0 {
                let first_kept = count.saturating_sub(MAX_MESSAGES);
                prop_assert_eq!(&state.messages[0].text, &format!("msg {}", first_kept));
                prop_assert_eq!(
                    &state.messages.back().unwrap().text,
                    &format!("msg {}", count - 1)
                );
            }
        }

        #[test]
        fn timeline_entries_never_overlap(
            steps in proptest::collection::vec((0u8..4, -5i64..30), 1..30)
        ) {
            let stages = ["web", "permissions", "lists", "sharing"];
            let mut now = t(0);
            let mut state = JobState::initial("initializing", now);
            for (stage, delta) in steps {
                now += Duration::seconds(delta);
                state.apply(&ProgressUpdate::new(stages[stage as usize], "", 0.0), now);
            }
            state.close_open_stage(now);

            for pair in state.timeline.windows(2) {
                let prev_end = pair[0].completed.unwrap();
                prop_assert!(pair[0].started <= prev_end);
                prop_assert!(prev_end <= pair[1].started);
            }
            prop_assert!(state.timeline.iter().all(|t| !t.is_open()));
        }
    }
}
