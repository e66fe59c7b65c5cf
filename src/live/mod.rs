//! Live snapshot fan-out
//!
//! Every job has one `tokio::sync::watch` channel holding its latest published record. Each
//! subscriber gets its own receiver, so a slow subscriber only ever sees the newest snapshot
//! and never delays the registry or other subscribers.
//!
//! ## Submodules
//!
//! - [`follow`] — subscriber side: version cursor, snapshot sources, reconnecting follower
//! - [`http`] — snapshot source reading the SSE endpoint over HTTP

use crate::types::{JobId, JobRecord};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::RwLock;
use std::task::{Context, Poll, ready};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub mod follow;
pub mod http;

/// Fans out full job snapshots to subscribers and serves point-in-time reads
#[derive(Default)]
pub struct LiveDelivery {
    channels: RwLock<HashMap<JobId, watch::Sender<JobRecord>>>,
}

impl LiveDelivery {
    /// Create an empty fan-out hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot to every subscriber of its job
    ///
    /// Snapshots that are not newer than the last published version are dropped, so the value
    /// a subscriber observes never goes backwards.
    pub fn publish(&self, record: &JobRecord) {
        {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = channels.get(&record.job_id) {
                publish_if_newer(sender, record);
                return;
            }
        }

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        match channels.get(&record.job_id) {
            Some(sender) => publish_if_newer(sender, record),
            None => {
                let (sender, _) = watch::channel(record.clone());
                channels.insert(record.job_id, sender);
            }
        }
    }

    /// Latest published snapshot of a job
    pub fn get(&self, job_id: JobId) -> Option<JobRecord> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(&job_id).map(|sender| sender.borrow().clone())
    }

    /// Subscribe to a job's snapshots
    ///
    /// The stream yields the current snapshot immediately, then each newer one, and ends after
    /// yielding a terminal snapshot. Returns `None` for an unknown job.
    pub fn subscribe(&self, job_id: JobId) -> Option<SnapshotStream> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&job_id)
            .map(|sender| SnapshotStream::new(sender.subscribe()))
    }

    /// Number of live subscribers for a job
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&job_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

fn publish_if_newer(sender: &watch::Sender<JobRecord>, record: &JobRecord) {
    sender.send_if_modified(|current| {
        if record.version > current.version {
            *current = record.clone();
            true
        } else {
            false
        }
    });
}

/// Per-subscriber stream of job snapshots
///
/// Versions are non-decreasing; the stream finishes right after a terminal snapshot.
pub struct SnapshotStream {
    inner: WatchStream<JobRecord>,
    last_version: Option<u64>,
    finished: bool,
}

impl SnapshotStream {
    fn new(receiver: watch::Receiver<JobRecord>) -> Self {
        Self {
            inner: WatchStream::new(receiver),
            last_version: None,
            finished: false,
        }
    }
}

impl Stream for SnapshotStream {
    type Item = JobRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<JobRecord>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            let Some(record) = ready!(Pin::new(&mut self.inner).poll_next(cx)) else {
                self.finished = true;
                return Poll::Ready(None);
            };

            if self.last_version.is_some_and(|seen| record.version <= seen) {
                continue;
            }
            self.last_version = Some(record.version);
            if record.is_terminal() {
                self.finished = true;
            }
            return Poll::Ready(Some(record));
        }
    }
}
