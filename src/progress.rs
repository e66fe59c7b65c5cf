//! Worker-side progress batching
//!
//! A [`ProgressReporter`] sits at the worker boundary. The crawl loop calls
//! [`ProgressReporter::record`] once per page (cheap, synchronous, atomics only); a background
//! ticker turns the accumulated counts into additive [`ProgressDelta`]s and pushes them into
//! the registry every `flush_every_pages` pages or `flush_interval`, whichever comes first.

use crate::config::ProgressConfig;
use crate::error::Result;
use crate::types::{JobId, JobRecord, ProgressDelta, WorkerOutcome};
use crate::worker::{PageOutcome, PageStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// How many times `finish` retries a final delta for a job that is not recorded yet
const FINISH_MAX_ATTEMPTS: u32 = 40;

/// Pause between those retries
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Destination for progress deltas
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Merge a delta into the job's record
    async fn apply_progress(&self, job_id: JobId, delta: ProgressDelta) -> Result<JobRecord>;
}

/// Cumulative per-job counts recorded by the worker
#[derive(Default)]
struct ProgressCounters {
    fetched: AtomicU64,
    extracted: AtomicU64,
    saved: AtomicU64,
    failed: AtomicU64,
    pages: AtomicU64,
    flushed_pages: AtomicU64,
    last_url: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

/// Totals already pushed to the sink
#[derive(Default, Clone, Copy)]
struct Flushed {
    fetched: u64,
    extracted: u64,
    saved: u64,
    failed: u64,
    pages: u64,
}

struct Shared {
    job_id: JobId,
    counters: ProgressCounters,
    flushed: tokio::sync::Mutex<Flushed>,
    sink: Arc<dyn ProgressSink>,
}

impl Shared {
    /// Push everything recorded since the last flush, plus an optional terminal marker
    ///
    /// Returns `Ok(None)` when there was nothing to send. On error the pending counts stay
    /// pending and go out with the next flush.
    async fn flush(&self, outcome: Option<WorkerOutcome>) -> Result<Option<JobRecord>> {
        let mut flushed = self.flushed.lock().await;
        let counters = &self.counters;

        let pages = counters.pages.load(Ordering::Acquire);
        let totals = Flushed {
            fetched: counters.fetched.load(Ordering::Acquire),
            extracted: counters.extracted.load(Ordering::Acquire),
            saved: counters.saved.load(Ordering::Acquire),
            failed: counters.failed.load(Ordering::Acquire),
            pages,
        };
        let last_url = take(&counters.last_url);
        let last_error = take(&counters.last_error);

        let delta = ProgressDelta {
            fetched_delta: totals.fetched - flushed.fetched,
            extracted_delta: totals.extracted - flushed.extracted,
            saved_delta: totals.saved - flushed.saved,
            failed_delta: totals.failed - flushed.failed,
            last_url: last_url.clone(),
            last_error: last_error.clone(),
            outcome,
        };
        if delta.is_empty() {
            return Ok(None);
        }

        match self.sink.apply_progress(self.job_id, delta).await {
            Ok(record) => {
                *flushed = totals;
                counters.flushed_pages.store(pages, Ordering::Release);
                Ok(Some(record))
            }
            Err(e) => {
                restore(&counters.last_url, last_url);
                restore(&counters.last_error, last_error);
                Err(e)
            }
        }
    }
}

fn take(slot: &Mutex<Option<String>>) -> Option<String> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

// A newer value recorded while the flush was in flight wins
fn restore(slot: &Mutex<Option<String>>, value: Option<String>) {
    if let Some(value) = value {
        slot.lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(value);
    }
}

/// Parameters for spawning a progress reporter
pub struct ProgressReporterParams {
    /// Job the worker is crawling for
    pub job_id: JobId,
    /// Where deltas go (normally the job registry)
    pub sink: Arc<dyn ProgressSink>,
    /// Batching bounds
    pub config: ProgressConfig,
}

/// Batches page outcomes into progress deltas for one job
pub struct ProgressReporter {
    shared: Arc<Shared>,
    flush_every_pages: u64,
    wake: Arc<Notify>,
    stop: CancellationToken,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressReporter {
    /// Create a reporter and spawn its flush ticker
    pub fn spawn(params: ProgressReporterParams) -> Self {
        let ProgressReporterParams {
            job_id,
            sink,
            config,
        } = params;

        let shared = Arc::new(Shared {
            job_id,
            counters: ProgressCounters::default(),
            flushed: tokio::sync::Mutex::new(Flushed::default()),
            sink,
        });
        let wake = Arc::new(Notify::new());
        let stop = CancellationToken::new();

        let ticker = tokio::spawn({
            let shared = shared.clone();
            let wake = wake.clone();
            let stop = stop.clone();
            async move {
                let mut interval = tokio::time::interval(config.flush_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = wake.notified() => {}
                        _ = stop.cancelled() => break,
                    }

                    match shared.flush(None).await {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            tracing::debug!(job_id = %job_id, "job not recorded yet, keeping progress pending");
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, error = %e, "progress flush failed");
                        }
                    }
                }
            }
        });

        Self {
            shared,
            flush_every_pages: config.flush_every_pages.max(1),
            wake,
            stop,
            ticker: Some(ticker),
        }
    }

    /// Job this reporter feeds
    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }

    /// Record one processed page
    pub fn record(&self, page: &PageOutcome) {
        let counters = &self.shared.counters;

        match &page.status {
            PageStatus::Saved => {
                counters.fetched.fetch_add(1, Ordering::AcqRel);
                counters.extracted.fetch_add(1, Ordering::AcqRel);
                counters.saved.fetch_add(1, Ordering::AcqRel);
            }
            PageStatus::Extracted => {
                counters.fetched.fetch_add(1, Ordering::AcqRel);
                counters.extracted.fetch_add(1, Ordering::AcqRel);
            }
            PageStatus::Fetched => {
                counters.fetched.fetch_add(1, Ordering::AcqRel);
            }
            PageStatus::Failed(error) => {
                counters.failed.fetch_add(1, Ordering::AcqRel);
                *counters
                    .last_error
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(error.clone());
            }
        }
        *counters.last_url.lock().unwrap_or_else(|e| e.into_inner()) = Some(page.url.clone());

        let pages = counters.pages.fetch_add(1, Ordering::AcqRel) + 1;
        if pages - counters.flushed_pages.load(Ordering::Acquire) >= self.flush_every_pages {
            self.wake.notify_one();
        }
    }

    /// Push pending progress now
    pub async fn flush(&self) -> Result<Option<JobRecord>> {
        self.shared.flush(None).await
    }

    /// Stop the ticker and push the final delta
    ///
    /// `outcome` is `Some` when the worker completed or aborted on its own, `None` when it stopped
    /// because the job was canceled. A job that is not recorded yet is retried briefly, since a
    /// fast worker can finish before its record exists.
    pub async fn finish(mut self, outcome: Option<WorkerOutcome>) -> Result<Option<JobRecord>> {
        self.stop.cancel();
        if let Some(ticker) = self.ticker.take()
            && let Err(e) = ticker.await
        {
            tracing::warn!(job_id = %self.shared.job_id, error = %e, "progress ticker panicked");
        }

        let mut attempt = 1;
        loop {
            match self.shared.flush(outcome.clone()).await {
                Err(e) if e.is_not_found() && attempt < FINISH_MAX_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(FINISH_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
