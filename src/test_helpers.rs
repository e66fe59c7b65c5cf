//! Shared test helpers for building registries, processors and crawl workers in tests.

use crate::commands::CommandProcessor;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::live::LiveDelivery;
use crate::registry::JobRegistry;
use crate::types::{BaseId, CrawlConfig, JobId, WorkerSignal};
use crate::worker::{
    CrawlDispatcher, CrawlerFactory, KnownBases, PageCrawler, PageOutcome, PageStatus,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Helper to create a registry backed by a fresh database.
/// Returns the registry and the tempdir (which must be kept alive).
pub(crate) async fn create_test_registry() -> (Arc<JobRegistry>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db"))
        .await
        .unwrap();

    let registry = Arc::new(JobRegistry::new(
        Arc::new(db),
        Arc::new(LiveDelivery::new()),
    ));
    (registry, temp_dir)
}

/// A command processor with a recording dispatcher and the knowledge bases `kb-1`/`kb-2`
pub(crate) struct TestProcessor {
    pub processor: CommandProcessor,
    pub registry: Arc<JobRegistry>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub bases: Arc<KnownBases>,
    pub _temp_dir: tempfile::TempDir,
}

pub(crate) async fn create_test_processor() -> TestProcessor {
    let (registry, temp_dir) = create_test_registry().await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let bases = Arc::new(KnownBases::new([BaseId::new("kb-1"), BaseId::new("kb-2")]));

    TestProcessor {
        processor: CommandProcessor::new(registry.clone(), dispatcher.clone(), bases.clone()),
        registry,
        dispatcher,
        bases,
        _temp_dir: temp_dir,
    }
}

/// Dispatcher that never runs anything and remembers what it was asked to do
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    unavailable: AtomicBool,
    submissions: AtomicUsize,
    signals: Mutex<Vec<(JobId, WorkerSignal)>>,
}

impl RecordingDispatcher {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> Vec<(JobId, WorkerSignal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn signals_for(&self, job_id: JobId) -> Vec<WorkerSignal> {
        self.signals()
            .into_iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, signal)| signal)
            .collect()
    }
}

#[async_trait]
impl CrawlDispatcher for RecordingDispatcher {
    async fn submit(&self, _base_id: &BaseId, _config: &CrawlConfig) -> Result<JobId> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::WorkerUnavailable("test dispatcher is down".into()));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(JobId::new())
    }

    fn signal(&self, job_id: JobId, signal: WorkerSignal) {
        self.signals.lock().unwrap().push((job_id, signal));
    }
}

/// Crawler that produces `pages` saved pages, `delay` apart, then finishes or fails
#[derive(Debug, Clone)]
pub(crate) struct ScriptedFactory {
    pub pages: usize,
    pub delay: Duration,
    pub fail_with: Option<String>,
}

impl ScriptedFactory {
    pub fn pages(pages: usize) -> Self {
        Self {
            pages,
            delay: Duration::from_millis(20),
            fail_with: None,
        }
    }

    /// A crawl that keeps going until it is canceled
    pub fn endless() -> Self {
        Self {
            pages: usize::MAX,
            delay: Duration::from_millis(5),
            fail_with: None,
        }
    }

    pub fn failing_after(pages: usize, error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Self::pages(pages)
        }
    }
}

impl CrawlerFactory for ScriptedFactory {
    fn build(&self, base_id: &BaseId, _config: &CrawlConfig) -> Box<dyn PageCrawler> {
        Box::new(ScriptedCrawler {
            base_id: base_id.clone(),
            remaining: self.pages,
            served: 0,
            delay: self.delay,
            fail_with: self.fail_with.clone(),
        })
    }
}

struct ScriptedCrawler {
    base_id: BaseId,
    remaining: usize,
    served: usize,
    delay: Duration,
    fail_with: Option<String>,
}

#[async_trait]
impl PageCrawler for ScriptedCrawler {
    async fn step(&mut self) -> std::result::Result<Option<PageOutcome>, String> {
        if self.remaining == 0 {
            return match self.fail_with.take() {
                Some(error) => Err(error),
                None => Ok(None),
            };
        }

        tokio::time::sleep(self.delay).await;
        self.remaining -= 1;
        self.served += 1;
        Ok(Some(PageOutcome {
            url: format!("https://{}.example/page/{}", self.base_id, self.served),
            status: PageStatus::Saved,
        }))
    }
}

/// Poll `check` until it returns true or `timeout` passes
pub(crate) async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Helper to create a CrawlControl with a recording dispatcher and the bases `kb-1`/`kb-2`.
/// Returns the control plane, its dispatcher and the tempdir (which must be kept alive).
pub(crate) async fn create_test_control() -> (
    crate::CrawlControl,
    Arc<RecordingDispatcher>,
    tempfile::TempDir,
) {
    let temp_dir = tempdir().unwrap();
    let (control, dispatcher) = create_test_control_in(temp_dir.path()).await;
    (control, dispatcher, temp_dir)
}

/// Same as [`create_test_control`] with the database placed in `dir`, so a test can reopen it
pub(crate) async fn create_test_control_in(
    dir: &std::path::Path,
) -> (crate::CrawlControl, Arc<RecordingDispatcher>) {
    let mut config = crate::Config::default();
    config.persistence.database_path = dir.join("test.db");

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let bases = Arc::new(KnownBases::new([BaseId::new("kb-1"), BaseId::new("kb-2")]));
    let control = crate::CrawlControl::new(config, dispatcher.clone(), bases)
        .await
        .unwrap();
    (control, dispatcher)
}
