//! Job start and pause/resume/cancel/retry commands
//!
//! [`CommandProcessor`] sits between callers and the [`JobRegistry`]: it validates the request,
//! lets the registry apply the transition, and relays the matching signal to the worker. The
//! worker is told after the transition is durable and never waited on; it converges on the
//! recorded status by itself.

use crate::error::{Error, Result};
use crate::registry::{BaseReservation, JobRegistry};
use crate::types::{BaseId, Command, CrawlConfig, JobId, JobRecord, JobStatus, WorkerSignal};
use crate::worker::{CrawlDispatcher, KnowledgeBases};
use std::sync::Arc;

/// Executes user commands against the registry and the worker dispatcher
pub struct CommandProcessor {
    registry: Arc<JobRegistry>,
    dispatcher: Arc<dyn CrawlDispatcher>,
    bases: Arc<dyn KnowledgeBases>,
}

impl CommandProcessor {
    /// Create a processor over the given registry and collaborators
    pub fn new(
        registry: Arc<JobRegistry>,
        dispatcher: Arc<dyn CrawlDispatcher>,
        bases: Arc<dyn KnowledgeBases>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            bases,
        }
    }

    /// Start a crawl for a knowledge base
    ///
    /// Checks the knowledge base exists, claims its active slot, submits the execution and
    /// records the new job as `running`.
    ///
    /// # Errors
    ///
    /// - `KnowledgeBaseNotFound` if `base_id` is unknown
    /// - `Conflict` if the knowledge base already has an active job
    /// - `WorkerUnavailable` if the dispatcher cannot take the job; nothing is recorded
    pub async fn start(&self, base_id: &BaseId, config: CrawlConfig) -> Result<JobRecord> {
        if !self.bases.exists(base_id).await? {
            return Err(Error::KnowledgeBaseNotFound(base_id.clone()));
        }

        let reservation = self.registry.reserve(base_id)?;
        self.launch(reservation, config, None).await
    }

    /// Pause a running job
    pub async fn pause(&self, job_id: JobId) -> Result<JobRecord> {
        self.execute(job_id, Command::Pause).await
    }

    /// Resume a paused job
    pub async fn resume(&self, job_id: JobId) -> Result<JobRecord> {
        self.execute(job_id, Command::Resume).await
    }

    /// Cancel a running or paused job
    pub async fn cancel(&self, job_id: JobId) -> Result<JobRecord> {
        self.execute(job_id, Command::Cancel).await
    }

    /// Start a new generation of a canceled or failed job
    ///
    /// Returns the new generation's record; the old record is left as it is. Retrying a `done`
    /// job returns it unchanged, and retrying a job that already has a generation returns that
    /// generation's current record without submitting anything.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the job is unknown
    /// - `InvalidTransition` if the job is still active
    /// - `Conflict` if another job for the same knowledge base became active meanwhile
    /// - `WorkerUnavailable` if the dispatcher cannot take the job
    pub async fn retry(&self, job_id: JobId) -> Result<JobRecord> {
        let _gate = self.registry.lock_retry(job_id).await?;

        let applied = self.registry.apply_command(job_id, Command::Retry).await?;
        let previous = applied.record;

        if !matches!(previous.status, JobStatus::Canceled | JobStatus::Failed) {
            return Ok(previous);
        }

        if let Some(generation) = self.registry.retried_by(job_id) {
            tracing::debug!(
                job_id = %job_id,
                generation = %generation,
                "job already retried, returning existing generation"
            );
            return self.registry.get(generation);
        }

        let reservation = self.registry.reserve(&previous.base_id)?;
        let config = match self.registry.last_config(&previous.base_id) {
            Some(config) => config,
            None => self.registry.config_of(job_id)?,
        };

        tracing::info!(
            job_id = %job_id,
            base_id = %previous.base_id,
            status = %previous.status,
            "retrying crawl job"
        );

        self.launch(reservation, config, Some(job_id)).await
    }

    /// Apply any command by name
    pub async fn execute(&self, job_id: JobId, command: Command) -> Result<JobRecord> {
        if command == Command::Retry {
            return self.retry(job_id).await;
        }

        let applied = self.registry.apply_command(job_id, command).await?;
        if applied.changed
            && let Some(signal) = command.worker_signal()
        {
            self.dispatcher.signal(job_id, signal);
        }

        Ok(applied.record)
    }

    async fn launch(
        &self,
        reservation: BaseReservation,
        config: CrawlConfig,
        retry_of: Option<JobId>,
    ) -> Result<JobRecord> {
        let base_id = reservation.base_id().clone();

        let job_id = match self.dispatcher.submit(&base_id, &config).await {
            Ok(job_id) => job_id,
            Err(Error::WorkerUnavailable(reason)) => {
                tracing::warn!(base_id = %base_id, reason = %reason, "worker unavailable");
                return Err(Error::WorkerUnavailable(reason));
            }
            Err(e) => {
                tracing::warn!(base_id = %base_id, error = %e, "dispatcher submit failed");
                return Err(Error::WorkerUnavailable(e.to_string()));
            }
        };

        if let Err(e) = self
            .registry
            .create_reserved(reservation, job_id, config, retry_of)
            .await
        {
            self.dispatcher.signal(job_id, WorkerSignal::Cancel);
            return Err(e);
        }

        match self.registry.mark_running(job_id).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.dispatcher.signal(job_id, WorkerSignal::Cancel);
                Err(e)
            }
        }
    }

    /// Registry this processor commands
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for CommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProcessor").finish_non_exhaustive()
    }
}
