//! Human-readable activity derived from consecutive snapshots
//!
//! Subscribers only ever receive full records. [`ActivityLog`] diffs each accepted snapshot
//! against the previous one and turns the difference into entries a UI can render as a feed.

use crate::types::{JobId, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of events an [`ActivityLog`] keeps
pub const DEFAULT_CAPACITY: usize = 200;

/// What changed between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivityEntry {
    /// Status moved; `from` is `None` for the first snapshot seen
    StatusChanged {
        /// Previous status
        from: Option<JobStatus>,
        /// New status
        to: JobStatus,
    },
    /// Counters advanced
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Newly fetched pages
        fetched_delta: u64,
        /// Newly extracted pages
        extracted_delta: u64,
        /// Newly saved pages
        saved_delta: u64,
        /// Newly failed pages
        failed_delta: u64,
    },
    /// The worker moved on to another URL
    Visited {
        /// The URL
        url: String,
    },
    /// A new error was reported
    Error {
        /// The error message
        message: String,
    },
}

/// One entry stamped with the snapshot it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Version of the snapshot that produced the entry
    pub version: u64,
    /// `updatedAt` of that snapshot
    pub at: DateTime<Utc>,
    /// What happened
    pub entry: ActivityEntry,
}

/// Bounded, newest-last activity feed for one job
#[derive(Debug, Clone)]
pub struct ActivityLog {
    capacity: usize,
    last: Option<JobRecord>,
    events: VecDeque<ActivityEvent>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    /// Create a log keeping at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            last: None,
            events: VecDeque::new(),
        }
    }

    /// Diff `record` against the previous snapshot and append the resulting events
    ///
    /// Snapshots not newer than the previous one produce nothing. A snapshot of a different job
    /// starts the log over.
    pub fn observe(&mut self, record: &JobRecord) -> Vec<ActivityEvent> {
        if let Some(last) = &self.last {
            if last.job_id != record.job_id {
                self.clear();
            } else if record.version <= last.version {
                return Vec::new();
            }
        }

        let entries = diff(self.last.as_ref(), record);
        let events: Vec<ActivityEvent> = entries
            .into_iter()
            .map(|entry| ActivityEvent {
                version: record.version,
                at: record.updated_at,
                entry,
            })
            .collect();

        for event in &events {
            if self.events.len() == self.capacity {
                self.events.pop_front();
            }
            self.events.push_back(event.clone());
        }
        self.last = Some(record.clone());

        events
    }

    /// Events kept so far, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.events.iter()
    }

    /// Number of events kept
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been logged
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Job the log is tracking
    pub fn job_id(&self) -> Option<JobId> {
        self.last.as_ref().map(|r| r.job_id)
    }

    /// Forget all events and the previous snapshot
    pub fn clear(&mut self) {
        self.last = None;
        self.events.clear();
    }
}

fn diff(previous: Option<&JobRecord>, current: &JobRecord) -> Vec<ActivityEntry> {
    let mut entries = Vec::new();

    if previous.is_none_or(|p| p.status != current.status) {
        entries.push(ActivityEntry::StatusChanged {
            from: previous.map(|p| p.status),
            to: current.status,
        });
    }

    let counters = |r: Option<&JobRecord>| {
        r.map_or((0, 0, 0, 0), |r| (r.fetched, r.extracted, r.saved, r.failed))
    };
    let (f0, e0, s0, x0) = counters(previous);
    let (f1, e1, s1, x1) = counters(Some(current));
    let deltas = (
        f1.saturating_sub(f0),
        e1.saturating_sub(e0),
        s1.saturating_sub(s0),
        x1.saturating_sub(x0),
    );
    if deltas != (0, 0, 0, 0) {
        entries.push(ActivityEntry::Progress {
            fetched_delta: deltas.0,
            extracted_delta: deltas.1,
            saved_delta: deltas.2,
            failed_delta: deltas.3,
        });
    }

    if let Some(url) = &current.last_url
        && previous.is_none_or(|p| p.last_url.as_ref() != Some(url))
    {
        entries.push(ActivityEntry::Visited { url: url.clone() });
    }

    if let Some(message) = &current.last_error
        && previous.is_none_or(|p| p.last_error.as_ref() != Some(message))
    {
        entries.push(ActivityEntry::Error {
            message: message.clone(),
        });
    }

    entries
}
