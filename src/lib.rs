//! # crawl-control
//!
//! Control plane for long-running knowledge-base crawl jobs.
//!
//! ## Design Philosophy
//!
//! crawl-control is designed to be:
//! - **Authoritative** - One registry owns every job record; each mutation is versioned,
//!   persisted and then published
//! - **Forgiving** - Duplicate commands and late worker progress are absorbed as no-ops
//! - **Library-first** - Embed [`CrawlControl`] in a service and mount [`api::create_router`]
//! - **Live** - Subscribers receive full snapshots and close after the terminal one
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use crawl_control::{
//!     BaseId, Config, CrawlConfig, CrawlControl, CrawlerFactory, KnownBases, PageCrawler,
//!     PageOutcome, PageStatus,
//! };
//! use std::sync::Arc;
//!
//! struct Sitemap {
//!     urls: Vec<String>,
//! }
//!
//! #[async_trait]
//! impl PageCrawler for Sitemap {
//!     async fn step(&mut self) -> Result<Option<PageOutcome>, String> {
//!         Ok(self.urls.pop().map(|url| PageOutcome {
//!             url,
//!             status: PageStatus::Saved,
//!         }))
//!     }
//! }
//!
//! struct SitemapFactory;
//!
//! impl CrawlerFactory for SitemapFactory {
//!     fn build(&self, base_id: &BaseId, _config: &CrawlConfig) -> Box<dyn PageCrawler> {
//!         Box::new(Sitemap {
//!             urls: vec![format!("https://{base_id}.example/")],
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bases = Arc::new(KnownBases::new([BaseId::new("docs")]));
//!     let control =
//!         CrawlControl::with_local_workers(Config::default(), Arc::new(SitemapFactory), bases)
//!             .await?;
//!
//!     let job = control.start(&BaseId::new("docs"), CrawlConfig::default()).await?;
//!
//!     // Follow the job until it ends
//!     let mut snapshots = control.subscribe(job.job_id)?;
//!     while let Some(record) = futures::StreamExt::next(&mut snapshots).await {
//!         println!("{} v{}: {} saved", record.status, record.version, record.saved);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Client-side activity feed derived from snapshots
pub mod activity;
/// REST API module
pub mod api;
/// Command processing against the registry and the worker dispatcher
pub mod commands;
/// Configuration types
pub mod config;
/// Control plane facade
pub mod control;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Live snapshot fan-out and subscriber toolkit
pub mod live;
/// Batched progress reporting at the worker boundary
pub mod progress;
/// Authoritative job registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Crawl worker collaborators and the in-process worker pool
pub mod worker;

// unwrap/expect are acceptable in test helpers
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use activity::{ActivityEntry, ActivityEvent, ActivityLog};
pub use commands::CommandProcessor;
pub use config::{Config, ReconnectConfig};
pub use control::{CrawlControl, JobCounts};
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, JobError, Result, ToHttpStatus};
pub use live::follow::{SnapshotCursor, SnapshotFeed, SnapshotSource, follow_job};
pub use live::http::HttpSnapshotSource;
pub use live::{LiveDelivery, SnapshotStream};
pub use progress::{ProgressReporter, ProgressReporterParams, ProgressSink};
pub use registry::JobRegistry;
pub use types::{
    BaseId, Command, CrawlConfig, JobId, JobRecord, JobStatus, ProgressDelta, WorkerOutcome,
    WorkerSignal,
};
pub use worker::{
    CrawlDispatcher, CrawlerFactory, KnowledgeBases, KnownBases, LocalDispatcher, PageCrawler,
    PageOutcome, PageStatus,
};

/// Helper function to run the control plane with graceful signal handling.
///
/// Waits for a termination signal and then calls [`CrawlControl::shutdown`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use crawl_control::{Config, CrawlControl, CrawlerFactory, KnownBases, run_with_shutdown};
/// use std::sync::Arc;
///
/// # async fn example(factory: Arc<dyn CrawlerFactory>) -> Result<(), Box<dyn std::error::Error>> {
/// let bases = Arc::new(KnownBases::default());
/// let control = Arc::new(CrawlControl::with_local_workers(Config::default(), factory, bases).await?);
///
/// // Serve the API in the background, shut down on SIGTERM/SIGINT
/// let _server = control.spawn_api_server();
/// run_with_shutdown((*control).clone()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(control: CrawlControl) -> Result<()> {
    wait_for_signal().await;
    control.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
