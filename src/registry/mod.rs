//! Authoritative, versioned store of crawl job state
//!
//! [`JobRegistry`] is the only thing that mutates a [`JobRecord`]. Every mutation:
//! 1. runs under the job's own async mutex (one writer per job, jobs never block each other)
//! 2. bumps `version` and `updated_at`
//! 3. is written through to SQLite before anything else sees it
//! 4. is copied into the job's published snapshot and handed to [`LiveDelivery`]
//! 5. emits one audit event on the `crawl_control::audit` tracing target
//!
//! Reads (`get`, `list_for_base`) only touch the published copies and never wait on a writer.
//!
//! ## Submodules
//!
//! - [`transitions`] — the status state machine
//! - `claims` — the one-active-job-per-knowledge-base slot table

use crate::db::{Database, StoredJob};
use crate::error::{Error, JobError, Result};
use crate::live::LiveDelivery;
use crate::progress::ProgressSink;
use crate::types::{
    BaseId, Command, CrawlConfig, JobId, JobRecord, JobStatus, ProgressDelta, WorkerOutcome,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

mod claims;
pub mod transitions;

pub use claims::BaseReservation;
use claims::ActiveClaims;
use transitions::{CommandEffect, command_effect, outcome_status};

/// `lastError` given to jobs whose worker died with a previous process
pub const INTERRUPTED_ERROR: &str = "interrupted by service restart";

/// Result of applying a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The job's record after the command
    pub record: JobRecord,
    /// Whether the command changed the record
    pub changed: bool,
}

/// Counts from loading persisted jobs at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records loaded
    pub loaded: usize,
    /// Active records moved to `failed` because their worker is gone
    pub interrupted: usize,
}

/// What caused a mutation, for the audit trail
enum Mutation<'a> {
    Created,
    Started,
    Command(Command),
    Progress(&'a ProgressDelta),
    DeferredCompletion,
    Restored,
}

impl std::fmt::Display for Mutation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::Created => f.write_str("create"),
            Mutation::Started => f.write_str("start"),
            Mutation::Command(command) => write!(f, "command:{command}"),
            Mutation::Progress(delta) => {
                write!(
                    f,
                    "progress:+{}/+{}/+{}/+{}",
                    delta.fetched_delta,
                    delta.extracted_delta,
                    delta.saved_delta,
                    delta.failed_delta
                )?;
                match &delta.outcome {
                    Some(WorkerOutcome::Done) => f.write_str(" outcome:done"),
                    Some(WorkerOutcome::Failed { .. }) => f.write_str(" outcome:failed"),
                    None => Ok(()),
                }
            }
            Mutation::DeferredCompletion => f.write_str("deferred-completion"),
            Mutation::Restored => f.write_str("restore"),
        }
    }
}

fn audit(before: Option<&JobRecord>, after: &JobRecord, mutation: &Mutation<'_>) {
    let from = before.map_or("none", |b| b.status.as_str());
    let from_version = before.map_or(0, |b| b.version);

    if before.is_some_and(|b| b.status == after.status) {
        tracing::debug!(
            target: "crawl_control::audit",
            job_id = %after.job_id,
            base_id = %after.base_id,
            status = %after.status,
            from_version,
            to_version = after.version,
            mutation = %mutation,
            "job updated"
        );
    } else {
        tracing::info!(
            target: "crawl_control::audit",
            job_id = %after.job_id,
            base_id = %after.base_id,
            from,
            to = %after.status,
            from_version,
            to_version = after.version,
            mutation = %mutation,
            "job status changed"
        );
    }
}

/// Writer-side state of one job, guarded by its async mutex
struct SlotState {
    record: JobRecord,
    /// A completion marker arrived while paused; applied on resume
    deferred_done: bool,
}

struct JobSlot {
    state: tokio::sync::Mutex<SlotState>,
    published: RwLock<JobRecord>,
    config: CrawlConfig,
    retry_of: Option<JobId>,
    /// Held while a retry of this job is deciding whether to start a generation
    retry_gate: Arc<tokio::sync::Mutex<()>>,
}

impl JobSlot {
    fn new(record: JobRecord, config: CrawlConfig, retry_of: Option<JobId>) -> Self {
        Self {
            published: RwLock::new(record.clone()),
            state: tokio::sync::Mutex::new(SlotState {
                record,
                deferred_done: false,
            }),
            config,
            retry_of,
            retry_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn snapshot(&self) -> JobRecord {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Arc<JobSlot>>,
    /// Job IDs per knowledge base in creation order
    by_base: HashMap<BaseId, Vec<JobId>>,
    /// Generation started by retrying a job (`retry_of` reversed)
    retried_by: HashMap<JobId, JobId>,
}

/// Keyed store of job records (`jobId → JobRecord`)
pub struct JobRegistry {
    db: Arc<Database>,
    live: Arc<LiveDelivery>,
    table: RwLock<JobTable>,
    claims: ActiveClaims,
}

impl JobRegistry {
    /// Create an empty registry writing through to `db` and publishing to `live`
    pub fn new(db: Arc<Database>, live: Arc<LiveDelivery>) -> Self {
        Self {
            db,
            live,
            table: RwLock::new(JobTable::default()),
            claims: ActiveClaims::default(),
        }
    }

    /// The fan-out hub this registry publishes to
    pub fn live(&self) -> &Arc<LiveDelivery> {
        &self.live
    }

    /// Load persisted jobs
    ///
    /// Records that were still active belonged to workers of a previous process. They are moved
    /// to `failed` with [`INTERRUPTED_ERROR`] so they can be retried.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let stored = self.db.list_jobs().await?;
        let mut summary = RestoreSummary::default();

        for StoredJob {
            record,
            config,
            retry_of,
        } in stored
        {
            if self.contains(record.job_id) {
                continue;
            }

            let record = if record.status.is_active() {
                let mut next = record.next_revision();
                next.status = JobStatus::Failed;
                next.last_error = Some(INTERRUPTED_ERROR.to_string());
                self.db.update_job(&next).await?;
                audit(Some(&record), &next, &Mutation::Restored);
                summary.interrupted += 1;
                next
            } else {
                record
            };

            self.live.publish(&record);
            self.insert_slot(record, config, retry_of);
            summary.loaded += 1;
        }

        if summary.interrupted > 0 {
            tracing::warn!(
                interrupted = summary.interrupted,
                "Marked jobs interrupted by the previous shutdown as failed"
            );
        }
        tracing::info!(loaded = summary.loaded, "Restored crawl jobs from database");

        Ok(summary)
    }

    /// Create a `queued` job for `base_id`
    ///
    /// Fails with `Conflict` if the knowledge base already has an active job.
    pub async fn create(&self, base_id: &BaseId, config: CrawlConfig) -> Result<JobRecord> {
        let reservation = self.reserve(base_id)?;
        self.create_reserved(reservation, JobId::new(), config, None)
            .await
    }

    /// Claim the active slot for `base_id` ahead of creating its record
    ///
    /// Lets a caller talk to the dispatcher before the record exists without racing another
    /// create for the same knowledge base. Dropping the reservation frees the slot.
    pub fn reserve(&self, base_id: &BaseId) -> Result<BaseReservation> {
        self.claims.reserve(base_id)
    }

    /// Record a `queued` job under a reservation taken with [`JobRegistry::reserve`]
    pub async fn create_reserved(
        &self,
        reservation: BaseReservation,
        job_id: JobId,
        config: CrawlConfig,
        retry_of: Option<JobId>,
    ) -> Result<JobRecord> {
        if self.contains(job_id) {
            return Err(Error::Other(format!("job {job_id} already exists")));
        }

        let record = JobRecord::new(job_id, reservation.base_id().clone());
        if let Err(e) = self.db.insert_job(&record, &config, retry_of).await {
            tracing::error!(job_id = %job_id, error = %e, "failed to persist new job");
            return Err(e);
        }

        self.insert_slot(record.clone(), config, retry_of);
        reservation.commit(job_id);
        self.live.publish(&record);
        audit(None, &record, &Mutation::Created);

        Ok(record)
    }

    /// Move a freshly created job from `queued` to `running`
    ///
    /// Any other status is left alone (the worker may already have finished).
    pub async fn mark_running(&self, job_id: JobId) -> Result<JobRecord> {
        let slot = self.slot(job_id)?;
        let mut state = slot.state.lock().await;

        if state.record.status != JobStatus::Queued {
            return Ok(state.record.clone());
        }

        let mut next = state.record.next_revision();
        next.status = JobStatus::Running;
        self.commit(&slot, &mut state, next, Mutation::Started)
            .await
    }

    /// Current snapshot of a job
    pub fn get(&self, job_id: JobId) -> Result<JobRecord> {
        Ok(self.slot(job_id)?.snapshot())
    }

    /// Merge a worker's progress delta
    ///
    /// Counters add, `lastUrl`/`lastError` are replaced when present, and a terminal marker
    /// moves the status. A terminal job, or a delta that changes nothing, returns the
    /// unchanged record without a new version.
    pub async fn apply_progress(&self, job_id: JobId, delta: ProgressDelta) -> Result<JobRecord> {
        let slot = self.slot(job_id)?;
        let mut state = slot.state.lock().await;
        let current = state.record.clone();

        if current.is_terminal() {
            tracing::debug!(
                job_id = %job_id,
                status = %current.status,
                "ignoring progress for terminal job"
            );
            return Ok(current);
        }
        if delta.is_empty() {
            return Ok(current);
        }

        let mut next = current.next_revision();
        next.fetched = next.fetched.saturating_add(delta.fetched_delta);
        next.extracted = next.extracted.saturating_add(delta.extracted_delta);
        next.saved = next.saved.saturating_add(delta.saved_delta);
        next.failed = next.failed.saturating_add(delta.failed_delta);
        if let Some(url) = &delta.last_url {
            next.last_url = Some(url.clone());
        }
        if let Some(error) = &delta.last_error {
            next.last_error = Some(error.clone());
        }

        if let Some(outcome) = &delta.outcome {
            match outcome_status(current.status, outcome) {
                Some(status) => {
                    next.status = status;
                    if let WorkerOutcome::Failed { error } = outcome {
                        next.last_error = Some(error.clone());
                    }
                }
                None if *outcome == WorkerOutcome::Done => {
                    tracing::info!(job_id = %job_id, "worker finished while paused, completion deferred until resume");
                    state.deferred_done = true;
                }
                None => {}
            }
        }

        if same_content(&current, &next) {
            return Ok(current);
        }

        self.commit(&slot, &mut state, next, Mutation::Progress(&delta))
            .await
    }

    /// Apply a user command
    ///
    /// Commands that do not change the current status succeed with the unchanged record.
    /// `retry` on an active job fails with `InvalidTransition`; on a canceled or failed job it
    /// succeeds unchanged here, and the caller starts the new generation.
    pub async fn apply_command(&self, job_id: JobId, command: Command) -> Result<Applied> {
        let slot = self.slot(job_id)?;
        let mut state = slot.state.lock().await;
        let current = state.record.clone();

        match command_effect(current.status, command) {
            CommandEffect::Transition(status) => {
                let mut next = current.next_revision();
                next.status = status;
                let mut record = self
                    .commit(&slot, &mut state, next, Mutation::Command(command))
                    .await?;

                if status == JobStatus::Running && state.deferred_done {
                    let mut done = record.next_revision();
                    done.status = JobStatus::Done;
                    record = self
                        .commit(&slot, &mut state, done, Mutation::DeferredCompletion)
                        .await?;
                }
                if record.is_terminal() {
                    state.deferred_done = false;
                }

                Ok(Applied {
                    record,
                    changed: true,
                })
            }
            CommandEffect::Unchanged | CommandEffect::NewGeneration => {
                tracing::debug!(
                    job_id = %job_id,
                    command = %command,
                    status = %current.status,
                    "command left job unchanged"
                );
                Ok(Applied {
                    record: current,
                    changed: false,
                })
            }
            CommandEffect::Rejected => Err(Error::Job(JobError::InvalidTransition {
                id: job_id,
                command,
                current_status: current.status,
            })),
        }
    }

    /// Configuration of the newest generation for a knowledge base
    pub fn last_config(&self, base_id: &BaseId) -> Option<CrawlConfig> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .by_base
            .get(base_id)
            .and_then(|ids| ids.last())
            .and_then(|id| table.jobs.get(id))
            .map(|slot| slot.config.clone())
    }

    /// Configuration a job was submitted with
    pub fn config_of(&self, job_id: JobId) -> Result<CrawlConfig> {
        Ok(self.slot(job_id)?.config.clone())
    }

    /// The terminal job a generation retried, if any
    pub fn retry_of(&self, job_id: JobId) -> Result<Option<JobId>> {
        Ok(self.slot(job_id)?.retry_of)
    }

    /// The generation that retried `job_id`, if one was started
    pub fn retried_by(&self, job_id: JobId) -> Option<JobId> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .retried_by
            .get(&job_id)
            .copied()
    }

    /// Serialize retries of one job
    ///
    /// Held across the check for an existing generation and the start of a new one, so
    /// concurrent retries of the same job start at most one generation.
    pub async fn lock_retry(&self, job_id: JobId) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let gate = self.slot(job_id)?.retry_gate.clone();
        Ok(gate.lock_owned().await)
    }

    /// All generations for a knowledge base, newest first
    pub fn list_for_base(&self, base_id: &BaseId) -> Vec<JobRecord> {
        let slots: Vec<Arc<JobSlot>> = {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            table
                .by_base
                .get(base_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| table.jobs.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut records: Vec<JobRecord> = slots.iter().map(|slot| slot.snapshot()).collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        records
    }

    /// The active job for a knowledge base, if one has been recorded
    pub fn active_job(&self, base_id: &BaseId) -> Option<JobId> {
        self.claims.active_job(base_id)
    }

    /// Number of jobs held
    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .len()
    }

    /// Whether no jobs are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, job_id: JobId) -> bool {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .contains_key(&job_id)
    }

    fn slot(&self, job_id: JobId) -> Result<Arc<JobSlot>> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    fn insert_slot(&self, record: JobRecord, config: CrawlConfig, retry_of: Option<JobId>) {
        let job_id = record.job_id;
        let base_id = record.base_id.clone();
        let slot = Arc::new(JobSlot::new(record, config, retry_of));

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        table.jobs.insert(job_id, slot);
        table.by_base.entry(base_id).or_default().push(job_id);
        if let Some(previous) = retry_of {
            table.retried_by.insert(previous, job_id);
        }
    }

    /// Persist, publish and audit a new revision; on a failed write nothing changes
    async fn commit(
        &self,
        slot: &JobSlot,
        state: &mut SlotState,
        next: JobRecord,
        mutation: Mutation<'_>,
    ) -> Result<JobRecord> {
        if let Err(e) = self.db.update_job(&next).await {
            tracing::error!(
                job_id = %next.job_id,
                version = next.version,
                error = %e,
                "failed to persist job mutation"
            );
            return Err(e);
        }

        let previous = std::mem::replace(&mut state.record, next.clone());
        *slot.published.write().unwrap_or_else(|e| e.into_inner()) = next.clone();
        if next.is_terminal() {
            self.claims.release(&next.base_id, next.job_id);
        }
        self.live.publish(&next);
        audit(Some(&previous), &next, &mutation);

        Ok(next)
    }
}

fn same_content(a: &JobRecord, b: &JobRecord) -> bool {
    a.status == b.status
        && a.fetched == b.fetched
        && a.extracted == b.extracted
        && a.saved == b.saved
        && a.failed == b.failed
        && a.last_url == b.last_url
        && a.last_error == b.last_error
}

#[async_trait]
impl ProgressSink for JobRegistry {
    async fn apply_progress(&self, job_id: JobId, delta: ProgressDelta) -> Result<JobRecord> {
        JobRegistry::apply_progress(self, job_id, delta).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
