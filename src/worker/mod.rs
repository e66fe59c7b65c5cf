//! Crawl worker collaborators
//!
//! The control plane never crawls anything itself. It talks to workers through these seams:
//! - [`CrawlDispatcher`] — submits executions and forwards pause/resume/cancel signals
//! - [`KnowledgeBases`] — validates a knowledge base exists before a job is created
//! - [`CrawlerFactory`] / [`PageCrawler`] — the page-by-page crawl run by [`LocalDispatcher`]
//!
//! ## Submodules
//!
//! - [`local`] — in-process worker pool on tokio tasks
//! - [`task`] — the per-job crawl loop

use crate::error::Result;
use crate::types::{BaseId, CrawlConfig, JobId, WorkerSignal};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

pub mod local;
mod task;

pub use local::LocalDispatcher;

/// Accepts crawl executions and relays cooperative signals to them
#[async_trait]
pub trait CrawlDispatcher: Send + Sync {
    /// Start an execution for `base_id`, returning the job ID it reports progress under
    ///
    /// Fails with [`crate::Error::WorkerUnavailable`] when no worker can take the job.
    async fn submit(&self, base_id: &BaseId, config: &CrawlConfig) -> Result<JobId>;

    /// Deliver a signal to a running execution
    ///
    /// Fire-and-forget: must not block on the worker, and an unknown job is not an error.
    fn signal(&self, job_id: JobId, signal: WorkerSignal);

    /// Stop accepting work and stop running executions
    async fn shutdown(&self) {}
}

/// Knowledge-base existence check
#[async_trait]
pub trait KnowledgeBases: Send + Sync {
    /// Whether `base_id` names an existing knowledge base
    async fn exists(&self, base_id: &BaseId) -> Result<bool>;
}

/// In-memory set of knowledge bases
#[derive(Debug, Default)]
pub struct KnownBases {
    ids: RwLock<HashSet<BaseId>>,
}

impl KnownBases {
    /// Create a set from an initial list
    pub fn new(ids: impl IntoIterator<Item = BaseId>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    /// Register another knowledge base
    pub fn insert(&self, id: BaseId) {
        self.ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }
}

#[async_trait]
impl KnowledgeBases for KnownBases {
    async fn exists(&self, base_id: &BaseId) -> Result<bool> {
        Ok(self
            .ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(base_id))
    }
}

/// Result of processing one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// The page URL
    pub url: String,
    /// How far the page got
    pub status: PageStatus,
}

/// How far a page got through fetch, extract and save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    /// Fetched and stored in the knowledge base
    Saved,
    /// Fetched with content extracted, nothing stored
    Extracted,
    /// Fetched, no usable content
    Fetched,
    /// Could not be processed
    Failed(String),
}

/// One crawl execution, advanced a page at a time
#[async_trait]
pub trait PageCrawler: Send {
    /// Process the next page
    ///
    /// `Ok(None)` means the crawl is complete; `Err` aborts the crawl with that reason.
    async fn step(&mut self) -> std::result::Result<Option<PageOutcome>, String>;
}

/// Builds a crawler for a knowledge base
pub trait CrawlerFactory: Send + Sync {
    /// Create the crawl for one execution
    fn build(&self, base_id: &BaseId, config: &CrawlConfig) -> Box<dyn PageCrawler>;
}
