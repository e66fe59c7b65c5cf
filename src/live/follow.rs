//! Subscriber side of live delivery
//!
//! A subscriber opens a [`SnapshotSource`], applies each snapshot through a [`SnapshotCursor`]
//! so nothing older than what it already showed gets through, and reopens the source with
//! capped exponential backoff whenever the stream drops before the job is terminal.

use super::LiveDelivery;
use crate::config::ReconnectConfig;
use crate::error::{Error, Result};
use crate::retry::{Backoff, IsRetryable};
use crate::types::{JobId, JobRecord};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of snapshots from one subscription
pub type SnapshotFeed = BoxStream<'static, Result<JobRecord>>;

/// Tracks the newest version a subscriber has applied
///
/// Snapshots may arrive twice or out of order across reconnects; only strictly newer ones are
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCursor {
    last_version: Option<u64>,
}

impl SnapshotCursor {
    /// A cursor that has seen nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `record` if it is newer than anything applied so far
    pub fn accept(&mut self, record: &JobRecord) -> bool {
        if self.last_version.is_some_and(|seen| record.version <= seen) {
            return false;
        }
        self.last_version = Some(record.version);
        true
    }

    /// Version of the last accepted snapshot
    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }
}

/// Something a subscriber can open a snapshot stream on
///
/// Opening must be cheap and idempotent: every open starts with the current snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Subscribe to a job; fails with `NotFound` for an unknown job
    async fn open(&self, job_id: JobId) -> Result<SnapshotFeed>;
}

#[async_trait]
impl SnapshotSource for LiveDelivery {
    async fn open(&self, job_id: JobId) -> Result<SnapshotFeed> {
        let stream = self
            .subscribe(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        Ok(stream.map(Ok).boxed())
    }
}

#[async_trait]
impl<S: SnapshotSource + ?Sized> SnapshotSource for Arc<S> {
    async fn open(&self, job_id: JobId) -> Result<SnapshotFeed> {
        (**self).open(job_id).await
    }
}

/// Follow a job until it reaches a terminal status
///
/// `on_snapshot` sees every accepted snapshot, in version order, including the terminal one
/// that is returned. Transient open failures and dropped streams are retried with capped
/// exponential backoff; the backoff starts over whenever a snapshot arrives.
///
/// # Errors
///
/// - `NotFound` if the source does not know the job
/// - any other non-retryable error from the source
/// - `Other` once `reconnect.max_attempts` consecutive reconnects have failed
pub async fn follow_job<S, F>(
    source: &S,
    job_id: JobId,
    reconnect: &ReconnectConfig,
    mut on_snapshot: F,
) -> Result<JobRecord>
where
    S: SnapshotSource + ?Sized,
    F: FnMut(&JobRecord) + Send,
{
    let mut cursor = SnapshotCursor::new();
    let mut backoff = Backoff::new(reconnect);

    loop {
        match source.open(job_id).await {
            Ok(mut feed) => {
                while let Some(item) = feed.next().await {
                    match item {
                        Ok(record) => {
                            backoff.reset();
                            if !cursor.accept(&record) {
                                continue;
                            }
                            on_snapshot(&record);
                            if record.is_terminal() {
                                return Ok(record);
                            }
                        }
                        Err(e) if e.is_retryable() => {
                            tracing::debug!(job_id = %job_id, error = %e, "snapshot stream failed");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                tracing::debug!(
                    job_id = %job_id,
                    last_version = ?cursor.last_version(),
                    "snapshot stream dropped before the job finished"
                );
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(job_id = %job_id, error = %e, "failed to open snapshot stream");
            }
            Err(e) => return Err(e),
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(
                job_id = %job_id,
                attempts = backoff.attempts(),
                "giving up on following job"
            );
            return Err(Error::Other(format!(
                "lost the snapshot stream for job {job_id} after {} reconnect attempts",
                backoff.attempts()
            )));
        };

        tracing::debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}
