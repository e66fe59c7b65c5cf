//! Crawl control plane facade
//!
//! [`CrawlControl`] wires the pieces together and is what an embedding service holds on to:
//! - the SQLite [`Database`] the registry writes through to
//! - the [`JobRegistry`] and its [`LiveDelivery`] hub
//! - the [`CommandProcessor`] that talks to the worker dispatcher
//!
//! Submodules:
//! - [`lifecycle`] - Graceful shutdown

mod lifecycle;

use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::live::{LiveDelivery, SnapshotStream};
use crate::registry::JobRegistry;
use crate::types::{BaseId, Command, CrawlConfig, JobId, JobRecord, JobStatus};
use crate::worker::{CrawlDispatcher, CrawlerFactory, KnowledgeBases, LocalDispatcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use utoipa::ToSchema;

/// Number of stored jobs in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobCounts {
    /// Waiting for their worker to start
    pub queued: u64,
    /// Being crawled
    pub running: u64,
    /// Held by a pause command
    pub paused: u64,
    /// Stopped by a cancel command
    pub canceled: u64,
    /// Ended with an error
    pub failed: u64,
    /// Finished
    pub done: u64,
}

impl JobCounts {
    /// Jobs that are queued, running or paused
    pub fn active(&self) -> u64 {
        self.queued + self.running + self.paused
    }
}

/// Main control plane instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct CrawlControl {
    /// Database instance for persistence
    /// Public for integration tests to inspect stored records
    pub db: Arc<Database>,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) live: Arc<LiveDelivery>,
    pub(crate) commands: Arc<CommandProcessor>,
    pub(crate) dispatcher: Arc<dyn CrawlDispatcher>,
    pub(crate) config: Arc<Config>,
    /// Cleared on shutdown; start and retry fail with `ShuttingDown` afterwards
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Storage half of a control plane, built before the dispatcher
struct Storage {
    db: Arc<Database>,
    live: Arc<LiveDelivery>,
    registry: Arc<JobRegistry>,
}

impl CrawlControl {
    /// Create a control plane driving an external dispatcher
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens/creates the SQLite database and runs migrations
    /// - Restores persisted jobs, failing those whose worker died with a previous process
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database cannot be opened.
    pub async fn new(
        config: Config,
        dispatcher: Arc<dyn CrawlDispatcher>,
        bases: Arc<dyn KnowledgeBases>,
    ) -> Result<Self> {
        let storage = open_storage(&config).await?;
        Self::assemble(config, storage, dispatcher, bases).await
    }

    /// Create a control plane that crawls in-process with a [`LocalDispatcher`]
    ///
    /// `factory` builds the crawler for each job; the pool size and progress batching come
    /// from `config.workers` and `config.progress`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use crawl_control::*;
    /// # use std::sync::Arc;
    /// # async fn example(factory: Arc<dyn CrawlerFactory>) -> Result<()> {
    /// let bases = Arc::new(KnownBases::new([BaseId::new("docs")]));
    /// let control = CrawlControl::with_local_workers(Config::default(), factory, bases).await?;
    ///
    /// let job = control.start(&BaseId::new("docs"), CrawlConfig::default()).await?;
    /// println!("started {} ({})", job.job_id, job.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_local_workers(
        config: Config,
        factory: Arc<dyn CrawlerFactory>,
        bases: Arc<dyn KnowledgeBases>,
    ) -> Result<Self> {
        let storage = open_storage(&config).await?;
        let dispatcher = Arc::new(LocalDispatcher::new(
            storage.registry.clone(),
            factory,
            config.progress.clone(),
            config.workers.clone(),
        ));
        Self::assemble(config, storage, dispatcher, bases).await
    }

    async fn assemble(
        config: Config,
        storage: Storage,
        dispatcher: Arc<dyn CrawlDispatcher>,
        bases: Arc<dyn KnowledgeBases>,
    ) -> Result<Self> {
        let Storage { db, live, registry } = storage;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let commands = Arc::new(CommandProcessor::new(
            registry.clone(),
            dispatcher.clone(),
            bases,
        ));

        Ok(Self {
            db,
            registry,
            live,
            commands,
            dispatcher,
            config: Arc::new(config),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Start a crawl for a knowledge base
    ///
    /// # Returns
    ///
    /// The new job's record, already `running`.
    ///
    /// # Errors
    ///
    /// - `KnowledgeBaseNotFound` if the knowledge base does not exist
    /// - `Conflict` if it already has an active job
    /// - `WorkerUnavailable` if no worker can take the job
    /// - `ShuttingDown` once [`CrawlControl::shutdown`] has been called
    pub async fn start(&self, base_id: &BaseId, config: CrawlConfig) -> Result<JobRecord> {
        self.ensure_accepting()?;
        self.commands.start(base_id, config).await
    }

    /// Pause a running job
    ///
    /// Pausing a job that is not running succeeds with the unchanged record.
    pub async fn pause(&self, job_id: JobId) -> Result<JobRecord> {
        self.commands.pause(job_id).await
    }

    /// Resume a paused job
    pub async fn resume(&self, job_id: JobId) -> Result<JobRecord> {
        self.commands.resume(job_id).await
    }

    /// Cancel a running or paused job
    ///
    /// Returns as soon as `canceled` is recorded; the worker stops at its next checkpoint.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobRecord> {
        self.commands.cancel(job_id).await
    }

    /// Retry a canceled or failed job as a new generation
    ///
    /// # Returns
    ///
    /// The new generation's record. The retried record is left untouched.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown job
    /// - `InvalidTransition` if the job is still queued, running or paused
    /// - `WorkerUnavailable` if no worker can take the job
    pub async fn retry(&self, job_id: JobId) -> Result<JobRecord> {
        self.ensure_accepting()?;
        self.commands.retry(job_id).await
    }

    /// Apply a command by value
    pub async fn execute(&self, job_id: JobId, command: Command) -> Result<JobRecord> {
        if command == Command::Retry {
            return self.retry(job_id).await;
        }
        self.commands.execute(job_id, command).await
    }

    /// Current snapshot of a job
    pub fn get_job(&self, job_id: JobId) -> Result<JobRecord> {
        self.registry.get(job_id)
    }

    /// Every generation for a knowledge base, newest first
    pub fn list_jobs(&self, base_id: &BaseId) -> Vec<JobRecord> {
        self.registry.list_for_base(base_id)
    }

    /// Subscribe to a job's live snapshots
    ///
    /// The stream starts with the current snapshot and ends after the terminal one.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown job.
    pub fn subscribe(&self, job_id: JobId) -> Result<SnapshotStream> {
        self.live
            .subscribe(job_id)
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    /// Stored job counts by status
    pub async fn job_counts(&self) -> Result<JobCounts> {
        let mut counts = JobCounts::default();
        for (status, count) in self.db.count_jobs_by_status().await? {
            let count = u64::try_from(count).unwrap_or(0);
            match JobStatus::from_i32(status) {
                JobStatus::Queued => counts.queued += count,
                JobStatus::Running => counts.running += count,
                JobStatus::Paused => counts.paused += count,
                JobStatus::Canceled => counts.canceled += count,
                JobStatus::Failed => counts.failed += count,
                JobStatus::Done => counts.done += count,
            }
        }
        Ok(counts)
    }

    /// The job registry
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// The live fan-out hub (also a [`crate::SnapshotSource`])
    pub fn live(&self) -> &Arc<LiveDelivery> {
        &self.live
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Whether new jobs are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server listens on `config.api.bind_address` (default: 127.0.0.1:6790).
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let control = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(control, config).await })
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}

async fn open_storage(config: &Config) -> Result<Storage> {
    config.validate()?;

    let db = Arc::new(Database::new(&config.persistence.database_path).await?);
    if db.was_unclean_shutdown().await? {
        tracing::warn!("Previous run did not shut down cleanly");
    }

    let live = Arc::new(LiveDelivery::new());
    let registry = Arc::new(JobRegistry::new(db.clone(), live.clone()));
    registry.restore().await?;

    Ok(Storage { db, live, registry })
}
