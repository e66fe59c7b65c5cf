//! Test fixtures: a crawler the test releases page by page, and control plane builders.

use async_trait::async_trait;
use crawl_control::{
    BaseId, Config, CrawlConfig, CrawlControl, CrawlerFactory, JobId, JobRecord, KnownBases,
    PageCrawler, PageOutcome, PageStatus,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Pages a crawler may process, released by the test
pub struct Gate {
    permits: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    /// Let the crawler process `pages` more pages
    pub fn release(&self, pages: usize) {
        self.permits.add_permits(pages);
    }

    /// End the crawl: the next step reports completion
    pub fn finish(&self) {
        self.permits.close();
    }
}

struct GatedCrawler {
    base_id: BaseId,
    gate: Arc<Gate>,
    page: usize,
}

#[async_trait]
impl PageCrawler for GatedCrawler {
    async fn step(&mut self) -> Result<Option<PageOutcome>, String> {
        match self.gate.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.page += 1;
                Ok(Some(PageOutcome {
                    url: format!("https://{}.example/page/{}", self.base_id, self.page),
                    status: PageStatus::Saved,
                }))
            }
            Err(_) => Ok(None),
        }
    }
}

/// Factory handing every new crawl a fresh [`Gate`]
#[derive(Default)]
pub struct GatedFactory {
    gates: Mutex<HashMap<BaseId, Arc<Gate>>>,
}

impl GatedFactory {
    /// Gate of the most recently built crawl for `base_id`
    pub fn gate(&self, base_id: &BaseId) -> Arc<Gate> {
        self.gates
            .lock()
            .unwrap()
            .get(base_id)
            .cloned()
            .expect("no crawl was built for this knowledge base")
    }
}

impl CrawlerFactory for GatedFactory {
    fn build(&self, base_id: &BaseId, _config: &CrawlConfig) -> Box<dyn PageCrawler> {
        let gate = Arc::new(Gate::new());
        self.gates
            .lock()
            .unwrap()
            .insert(base_id.clone(), gate.clone());
        Box::new(GatedCrawler {
            base_id: base_id.clone(),
            gate,
            page: 0,
        })
    }
}

/// Config with a database in `dir` and immediate progress flushing
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("crawl-control.db");
    config.progress.flush_every_pages = 1;
    config.progress.flush_interval = Duration::from_millis(10);
    config.workers.shutdown_timeout = Duration::from_secs(2);
    config
}

/// Knowledge bases every fixture knows about
pub fn bases() -> Arc<KnownBases> {
    Arc::new(KnownBases::new([BaseId::new("docs"), BaseId::new("wiki")]))
}

/// A control plane with local workers over a [`GatedFactory`]
pub async fn create_control() -> (CrawlControl, Arc<GatedFactory>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let (control, factory) = create_control_in(temp_dir.path()).await;
    (control, factory, temp_dir)
}

/// Same as [`create_control`] over an existing directory, so tests can reopen it
pub async fn create_control_in(dir: &Path) -> (CrawlControl, Arc<GatedFactory>) {
    let factory = Arc::new(GatedFactory::default());
    let control = CrawlControl::with_local_workers(test_config(dir), factory.clone(), bases())
        .await
        .unwrap();
    (control, factory)
}

/// Poll a job until `check` passes or the timeout elapses
pub async fn wait_for_job<F>(control: &CrawlControl, job_id: JobId, mut check: F) -> JobRecord
where
    F: FnMut(&JobRecord) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let record = control.get_job(job_id).unwrap();
        if check(&record) {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for job {job_id}, last seen {record:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
