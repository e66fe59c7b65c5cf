//! Core types for crawl-control

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a crawl job (one generation of a crawl)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Mint a new time-ordered job ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// Job IDs are stored as TEXT in SQLite
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(Uuid::parse_str(&text)?))
    }
}

/// Identifier of the knowledge base a crawl feeds
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct BaseId(pub String);

impl BaseId {
    /// Create a new BaseId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Crawl job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for the worker to start
    Queued,
    /// Worker is crawling
    Running,
    /// Paused by a user command
    Paused,
    /// Canceled by a user command
    Canceled,
    /// Worker reported a fatal failure
    Failed,
    /// Worker reported completion
    Done,
}

impl JobStatus {
    /// Convert integer status code to JobStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => JobStatus::Queued,
            1 => JobStatus::Running,
            2 => JobStatus::Paused,
            3 => JobStatus::Canceled,
            4 => JobStatus::Failed,
            5 => JobStatus::Done,
            _ => JobStatus::Failed, // Unknown codes are treated as failed
        }
    }

    /// Convert JobStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Paused => 2,
            JobStatus::Canceled => 3,
            JobStatus::Failed => 4,
            JobStatus::Done => 5,
        }
    }

    /// Canceled, failed and done accept no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Canceled | JobStatus::Failed | JobStatus::Done
        )
    }

    /// Queued, running and paused jobs hold their knowledge base's active slot
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Canceled => "canceled",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-issued job command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Pause a running job
    Pause,
    /// Resume a paused job
    Resume,
    /// Cancel an active job
    Cancel,
    /// Start a new generation of a canceled or failed job
    Retry,
}

impl Command {
    /// The worker signal this command forwards, if any
    pub fn worker_signal(&self) -> Option<WorkerSignal> {
        match self {
            Command::Pause => Some(WorkerSignal::Pause),
            Command::Resume => Some(WorkerSignal::Resume),
            Command::Cancel => Some(WorkerSignal::Cancel),
            Command::Retry => None,
        }
    }

    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Cancel => "cancel",
            Command::Retry => "retry",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative signal delivered to a crawl worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerSignal {
    /// Stop taking new pages until resumed
    Pause,
    /// Continue taking pages
    Resume,
    /// Stop at the next checkpoint
    Cancel,
}

/// One execution attempt of a crawl against a knowledge base.
///
/// This is the snapshot delivered to every subscriber: always the full record, never a diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job ID
    pub job_id: JobId,
    /// Owning knowledge base
    pub base_id: BaseId,
    /// Lifecycle status
    pub status: JobStatus,
    /// Pages fetched
    pub fetched: u64,
    /// Pages with extracted content
    pub extracted: u64,
    /// Pages saved into the knowledge base
    pub saved: u64,
    /// Pages that failed
    pub failed: u64,
    /// Most recently processed URL
    pub last_url: Option<String>,
    /// Most recent error message
    pub last_error: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated
    pub updated_at: DateTime<Utc>,
    /// Bumped on every mutation
    pub version: u64,
}

impl JobRecord {
    /// A fresh `queued` record at version 1 with zeroed counters
    pub fn new(job_id: JobId, base_id: BaseId) -> Self {
        let now = now_micros();
        Self {
            job_id,
            base_id,
            status: JobStatus::Queued,
            fetched: 0,
            extracted: 0,
            saved: 0,
            failed: 0,
            last_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Whether the job has reached canceled, failed or done
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Copy of this record with `version` bumped and `updated_at` strictly later
    pub(crate) fn next_revision(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = later_than(self.updated_at);
        next
    }
}

/// Current time truncated to microseconds (the precision records are persisted with)
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A timestamp strictly after `previous`, even if the wall clock has not advanced
pub(crate) fn later_than(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_micros();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Terminal marker a worker attaches to its final delta
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerOutcome {
    /// The crawl finished
    Done,
    /// The crawl aborted
    Failed {
        /// Reason reported by the worker
        error: String,
    },
}

/// Additive progress update pushed by a worker.
///
/// Counters are increments, not totals, so a delta is self-contained.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDelta {
    /// Pages fetched since the last delta
    #[serde(default)]
    pub fetched_delta: u64,
    /// Pages extracted since the last delta
    #[serde(default)]
    pub extracted_delta: u64,
    /// Pages saved since the last delta
    #[serde(default)]
    pub saved_delta: u64,
    /// Pages failed since the last delta
    #[serde(default)]
    pub failed_delta: u64,
    /// Replaces `lastUrl` when present
    #[serde(default)]
    pub last_url: Option<String>,
    /// Replaces `lastError` when present
    #[serde(default)]
    pub last_error: Option<String>,
    /// Completion or failure marker
    #[serde(default)]
    pub outcome: Option<WorkerOutcome>,
}

impl ProgressDelta {
    /// A delta that only increments `fetched`
    pub fn fetched(count: u64) -> Self {
        Self {
            fetched_delta: count,
            ..Default::default()
        }
    }

    /// A delta carrying only a terminal marker
    pub fn finished(outcome: WorkerOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    /// True when applying this delta would change nothing
    pub fn is_empty(&self) -> bool {
        self.fetched_delta == 0
            && self.extracted_delta == 0
            && self.saved_delta == 0
            && self.failed_delta == 0
            && self.last_url.is_none()
            && self.last_error.is_none()
            && self.outcome.is_none()
    }
}

/// Crawl configuration for one knowledge base.
///
/// Opaque to the control plane: it is stored with each generation and handed back to the
/// dispatcher on retry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrawlConfig(pub serde_json::Value);

impl Default for CrawlConfig {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl From<serde_json::Value> for CrawlConfig {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
