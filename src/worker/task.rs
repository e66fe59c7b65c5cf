//! Per-job crawl loop run by the local worker pool.

use super::PageCrawler;
use crate::progress::ProgressReporter;
use crate::types::{JobId, WorkerOutcome};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Everything one crawl task owns
pub(crate) struct CrawlTaskParams {
    pub job_id: JobId,
    pub crawler: Box<dyn PageCrawler>,
    pub reporter: ProgressReporter,
    pub cancel: CancellationToken,
    pub pause: watch::Receiver<bool>,
}

/// Drive a crawl to completion, failure or cancellation
///
/// Cancel and pause are checked between pages. A finished crawl that is paused holds its
/// completion report until it is resumed, so a paused job never jumps straight to `done`.
pub(crate) async fn run_crawl(params: CrawlTaskParams) {
    let CrawlTaskParams {
        job_id,
        mut crawler,
        reporter,
        cancel,
        mut pause,
    } = params;

    tracing::debug!(job_id = %job_id, "crawl task started");

    let outcome = loop {
        if !wait_while_paused(&mut pause, &cancel).await {
            break None;
        }

        match crawler.step().await {
            Ok(Some(page)) => reporter.record(&page),
            Ok(None) => {
                if !wait_while_paused(&mut pause, &cancel).await {
                    break None;
                }
                break Some(WorkerOutcome::Done);
            }
            Err(error) => {
                tracing::warn!(job_id = %job_id, error = %error, "crawl aborted");
                break Some(WorkerOutcome::Failed { error });
            }
        }
    };

    match &outcome {
        Some(WorkerOutcome::Done) => tracing::info!(job_id = %job_id, "crawl finished"),
        Some(WorkerOutcome::Failed { .. }) => {}
        None => tracing::info!(job_id = %job_id, "crawl stopped after cancel"),
    }

    if let Err(e) = reporter.finish(outcome).await {
        tracing::warn!(job_id = %job_id, error = %e, "failed to report final progress");
    }
}

/// Block while the pause flag is set
///
/// Returns `false` if the job was canceled (before or while paused).
async fn wait_while_paused(pause: &mut watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if !*pause.borrow_and_update() {
            return true;
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = pause.changed() => {
                if changed.is_err() {
                    // Control handle dropped; nobody can resume or cancel us anymore
                    return !cancel.is_cancelled();
                }
            }
        }
    }
}
