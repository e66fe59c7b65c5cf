//! Shutdown coordination.

use crate::error::Result;
use std::sync::atomic::Ordering;

use super::CrawlControl;

impl CrawlControl {
    /// Gracefully shut down the control plane
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs (start and retry fail with `ShuttingDown`)
    /// 2. Shuts the dispatcher down, which cancels running crawls and waits for them up to
    ///    `workers.shutdown_timeout`
    /// 3. Marks a clean shutdown in the database
    ///
    /// Jobs that were still active stay recorded as such; the next start marks them failed
    /// so they can be retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the clean-shutdown marker cannot be written.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new crawl jobs");

        self.dispatcher.shutdown().await;

        match self.db.set_clean_shutdown().await {
            Ok(()) => tracing::info!("Marked clean shutdown in database"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark clean shutdown in database");
                return Err(e);
            }
        }

        tracing::info!(
            "Shutdown complete - database connections will close when the control plane is dropped"
        );
        Ok(())
    }
}
