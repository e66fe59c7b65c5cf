//! In-process worker pool.
//!
//! Each submitted crawl runs on its own tokio task with a [`ProgressReporter`] feeding the
//! registry. The pool is bounded by a semaphore; a full pool rejects submissions instead of
//! queueing them, which surfaces to callers as `WorkerUnavailable`.

use super::task::{CrawlTaskParams, run_crawl};
use super::{CrawlDispatcher, CrawlerFactory};
use crate::config::{ProgressConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::progress::{ProgressReporter, ProgressReporterParams, ProgressSink};
use crate::types::{BaseId, CrawlConfig, JobId, WorkerSignal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// Handles for steering one running crawl
struct WorkerControl {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

/// Crawl dispatcher backed by tokio tasks in this process
pub struct LocalDispatcher {
    sink: Arc<dyn ProgressSink>,
    factory: Arc<dyn CrawlerFactory>,
    progress: ProgressConfig,
    workers: WorkerConfig,
    slots: Arc<Semaphore>,
    accepting_new: AtomicBool,
    controls: Arc<Mutex<HashMap<JobId, WorkerControl>>>,
}

impl LocalDispatcher {
    /// Create a pool that reports progress into `sink`
    pub fn new(
        sink: Arc<dyn ProgressSink>,
        factory: Arc<dyn CrawlerFactory>,
        progress: ProgressConfig,
        workers: WorkerConfig,
    ) -> Self {
        Self {
            sink,
            factory,
            progress,
            slots: Arc::new(Semaphore::new(workers.max_concurrent_jobs)),
            workers,
            accepting_new: AtomicBool::new(true),
            controls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of crawls currently running
    pub fn active_workers(&self) -> usize {
        self.controls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether `job_id` has a running crawl task
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.controls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job_id)
    }

    fn cancel_all(&self) {
        let controls = self.controls.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(active_count = controls.len(), "Canceling all crawl workers");

        for (job_id, control) in controls.iter() {
            tracing::debug!(job_id = %job_id, "Signaling cancel");
            control.cancel.cancel();
        }
    }

    async fn wait_for_workers(&self) {
        loop {
            let active_count = self.active_workers();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for crawl workers to stop");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl CrawlDispatcher for LocalDispatcher {
    async fn submit(&self, base_id: &BaseId, config: &CrawlConfig) -> Result<JobId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::WorkerUnavailable(
                "worker pool is shutting down".to_string(),
            ));
        }

        let permit = self.slots.clone().try_acquire_owned().map_err(|_| {
            Error::WorkerUnavailable(format!(
                "all {} worker slots are busy",
                self.workers.max_concurrent_jobs
            ))
        })?;

        let job_id = JobId::new();
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        self.controls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                job_id,
                WorkerControl {
                    cancel: cancel.clone(),
                    pause: pause_tx,
                },
            );

        let crawler = self.factory.build(base_id, config);
        let reporter = ProgressReporter::spawn(ProgressReporterParams {
            job_id,
            sink: self.sink.clone(),
            config: self.progress.clone(),
        });

        tracing::info!(job_id = %job_id, base_id = %base_id, "crawl worker spawned");

        let controls = self.controls.clone();
        tokio::spawn(async move {
            run_crawl(CrawlTaskParams {
                job_id,
                crawler,
                reporter,
                cancel,
                pause: pause_rx,
            })
            .await;
            drop(permit);
            controls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job_id);
        });

        Ok(job_id)
    }

    fn signal(&self, job_id: JobId, signal: WorkerSignal) {
        let controls = self.controls.lock().unwrap_or_else(|e| e.into_inner());
        let Some(control) = controls.get(&job_id) else {
            tracing::warn!(job_id = %job_id, ?signal, "signal for a job with no running worker");
            return;
        };

        tracing::debug!(job_id = %job_id, ?signal, "forwarding signal to worker");
        match signal {
            WorkerSignal::Pause => {
                control.pause.send_replace(true);
            }
            WorkerSignal::Resume => {
                control.pause.send_replace(false);
            }
            WorkerSignal::Cancel => control.cancel.cancel(),
        }
    }

    async fn shutdown(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new crawl jobs");

        self.cancel_all();

        let timeout = self.workers.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait_for_workers()).await {
            Ok(()) => tracing::info!("All crawl workers stopped"),
            Err(_) => tracing::warn!(
                remaining = self.active_workers(),
                "Timeout waiting for crawl workers, proceeding with shutdown"
            ),
        }
    }
}
