use super::*;
use crate::test_helpers::create_test_registry;
use crate::types::WorkerOutcome;
use std::time::Duration;

fn kb(id: &str) -> BaseId {
    BaseId::new(id)
}

async fn running_job(registry: &JobRegistry, base: &str) -> JobRecord {
    let record = registry
        .create(&kb(base), CrawlConfig::default())
        .await
        .unwrap();
    registry.mark_running(record.job_id).await.unwrap()
}

// ---------------------------------------------------------------------------
// create / get
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_starts_queued_at_version_one() {
    let (registry, _temp_dir) = create_test_registry().await;

    let record = registry
        .create(&kb("kb-1"), CrawlConfig::default())
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.version, 1);
    assert_eq!(record.fetched, 0);
    assert_eq!(record.created_at, record.updated_at);
    assert_eq!(registry.get(record.job_id).unwrap(), record);
    assert_eq!(registry.active_job(&kb("kb-1")), Some(record.job_id));
}

#[tokio::test]
async fn create_conflicts_while_a_job_is_active() {
    let (registry, _temp_dir) = create_test_registry().await;
    let first = running_job(&registry, "kb-1").await;

    let err = registry
        .create(&kb("kb-1"), CrawlConfig::default())
        .await
        .unwrap_err();
    match err {
        Error::Job(JobError::Conflict {
            base_id,
            active_job_id,
        }) => {
            assert_eq!(base_id, kb("kb-1"));
            assert_eq!(active_job_id, Some(first.job_id));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Other knowledge bases are unaffected
    assert!(
        registry
            .create(&kb("kb-2"), CrawlConfig::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn terminal_job_frees_the_knowledge_base() {
    let (registry, _temp_dir) = create_test_registry().await;
    let first = running_job(&registry, "kb-1").await;

    registry
        .apply_command(first.job_id, Command::Cancel)
        .await
        .unwrap();

    assert_eq!(registry.active_job(&kb("kb-1")), None);
    let second = registry
        .create(&kb("kb-1"), CrawlConfig::default())
        .await
        .unwrap();
    assert_ne!(second.job_id, first.job_id);
}

#[tokio::test]
async fn get_unknown_job_is_not_found() {
    let (registry, _temp_dir) = create_test_registry().await;

    let err = registry.get(JobId::new()).unwrap_err();
    assert!(err.is_not_found());

    let err = registry
        .apply_progress(JobId::new(), ProgressDelta::fetched(1))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = registry
        .apply_command(JobId::new(), Command::Pause)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn mark_running_only_moves_queued_jobs() {
    let (registry, _temp_dir) = create_test_registry().await;
    let record = running_job(&registry, "kb-1").await;
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.version, 2);

    let again = registry.mark_running(record.job_id).await.unwrap();
    assert_eq!(again, record);
}

// ---------------------------------------------------------------------------
// progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_additive() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    registry
        .apply_progress(
            job.job_id,
            ProgressDelta {
                fetched_delta: 3,
                extracted_delta: 2,
                saved_delta: 1,
                last_url: Some("https://a.example/1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let record = registry
        .apply_progress(
            job.job_id,
            ProgressDelta {
                fetched_delta: 2,
                failed_delta: 1,
                last_error: Some("timeout".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(record.fetched, 5);
    assert_eq!(record.extracted, 2);
    assert_eq!(record.saved, 1);
    assert_eq!(record.failed, 1);
    assert_eq!(record.last_url.as_deref(), Some("https://a.example/1"));
    assert_eq!(record.last_error.as_deref(), Some("timeout"));
    assert_eq!(record.version, job.version + 2);
}

#[tokio::test]
async fn empty_delta_does_not_bump_version() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let record = registry
        .apply_progress(job.job_id, ProgressDelta::default())
        .await
        .unwrap();
    assert_eq!(record, job);
}

#[tokio::test]
async fn terminal_jobs_ignore_progress() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    registry
        .apply_progress(job.job_id, ProgressDelta::fetched(5))
        .await
        .unwrap();
    let canceled = registry
        .apply_command(job.job_id, Command::Cancel)
        .await
        .unwrap()
        .record;

    let after = registry
        .apply_progress(
            job.job_id,
            ProgressDelta {
                fetched_delta: 3,
                outcome: Some(WorkerOutcome::Done),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(after, canceled);
    assert_eq!(after.status, JobStatus::Canceled);
    assert_eq!(after.fetched, 5);
}

#[tokio::test]
async fn completion_marker_finishes_running_job() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let record = registry
        .apply_progress(
            job.job_id,
            ProgressDelta {
                saved_delta: 4,
                outcome: Some(WorkerOutcome::Done),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.saved, 4);
    assert_eq!(registry.active_job(&kb("kb-1")), None);
}

#[tokio::test]
async fn failure_marker_records_the_error() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let record = registry
        .apply_progress(
            job.job_id,
            ProgressDelta::finished(WorkerOutcome::Failed {
                error: "robots.txt unreachable".into(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("robots.txt unreachable"));
}

#[tokio::test]
async fn completion_while_paused_waits_for_resume() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    registry
        .apply_command(job.job_id, Command::Pause)
        .await
        .unwrap();

    let record = registry
        .apply_progress(job.job_id, ProgressDelta::finished(WorkerOutcome::Done))
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::Paused);

    let applied = registry
        .apply_command(job.job_id, Command::Resume)
        .await
        .unwrap();
    assert!(applied.changed);
    assert_eq!(applied.record.status, JobStatus::Done);
    assert_eq!(registry.active_job(&kb("kb-1")), None);
}

#[tokio::test]
async fn cancel_discards_a_deferred_completion() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    registry
        .apply_command(job.job_id, Command::Pause)
        .await
        .unwrap();
    registry
        .apply_progress(job.job_id, ProgressDelta::finished(WorkerOutcome::Done))
        .await
        .unwrap();

    let applied = registry
        .apply_command(job.job_id, Command::Cancel)
        .await
        .unwrap();
    assert_eq!(applied.record.status, JobStatus::Canceled);
}

// ---------------------------------------------------------------------------
// commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_pause_is_a_no_op() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let first = registry
        .apply_command(job.job_id, Command::Pause)
        .await
        .unwrap();
    let second = registry
        .apply_command(job.job_id, Command::Pause)
        .await
        .unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.record, first.record);
    assert_eq!(second.record.status, JobStatus::Paused);
}

#[tokio::test]
async fn concurrent_pauses_bump_version_once() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let (a, b) = tokio::join!(
        registry.apply_command(job.job_id, Command::Pause),
        registry.apply_command(job.job_id, Command::Pause),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.record.status, JobStatus::Paused);
    assert_eq!(b.record.status, JobStatus::Paused);
    assert!(a.changed ^ b.changed);
    assert_eq!(registry.get(job.job_id).unwrap().version, job.version + 1);
}

#[tokio::test]
async fn commands_on_terminal_jobs_are_no_ops() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    let canceled = registry
        .apply_command(job.job_id, Command::Cancel)
        .await
        .unwrap()
        .record;

    for command in [Command::Pause, Command::Resume, Command::Cancel] {
        let applied = registry.apply_command(job.job_id, command).await.unwrap();
        assert!(!applied.changed, "{command}");
        assert_eq!(applied.record, canceled);
    }
}

#[tokio::test]
async fn retry_on_an_active_job_is_an_invalid_transition() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    let err = registry
        .apply_command(job.job_id, Command::Retry)
        .await
        .unwrap_err();
    match err {
        Error::Job(JobError::InvalidTransition {
            id,
            command,
            current_status,
        }) => {
            assert_eq!(id, job.job_id);
            assert_eq!(command, Command::Retry);
            assert_eq!(current_status, JobStatus::Running);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_leaves_the_terminal_record_alone() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    let canceled = registry
        .apply_command(job.job_id, Command::Cancel)
        .await
        .unwrap()
        .record;

    let applied = registry
        .apply_command(job.job_id, Command::Retry)
        .await
        .unwrap();
    assert!(!applied.changed);
    assert_eq!(applied.record, canceled);
}

// ---------------------------------------------------------------------------
// versions, persistence, fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn version_and_updated_at_strictly_increase() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    let mut previous = job.clone();

    for _ in 0..20 {
        let record = registry
            .apply_progress(job.job_id, ProgressDelta::fetched(1))
            .await
            .unwrap();
        assert_eq!(record.version, previous.version + 1);
        assert!(record.updated_at > previous.updated_at);
        assert!(record.fetched > previous.fetched);
        previous = record;
    }
}

#[tokio::test]
async fn mutations_are_written_through() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    let record = registry
        .apply_progress(job.job_id, ProgressDelta::fetched(7))
        .await
        .unwrap();

    let stored = registry.db.list_jobs().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].record, record);
}

#[tokio::test]
async fn failed_write_leaves_the_record_unchanged() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;

    registry.db.pool().close().await;

    assert!(
        registry
            .apply_progress(job.job_id, ProgressDelta::fetched(1))
            .await
            .is_err()
    );
    assert_eq!(registry.get(job.job_id).unwrap(), job);
    assert_eq!(registry.live().get(job.job_id).unwrap(), job);
}

#[tokio::test]
async fn every_mutation_is_published() {
    let (registry, _temp_dir) = create_test_registry().await;
    let job = running_job(&registry, "kb-1").await;
    assert_eq!(registry.live().get(job.job_id).unwrap(), job);

    let record = registry
        .apply_progress(job.job_id, ProgressDelta::fetched(2))
        .await
        .unwrap();
    assert_eq!(registry.live().get(job.job_id).unwrap(), record);
}

#[tokio::test]
async fn list_for_base_is_newest_first() {
    let (registry, _temp_dir) = create_test_registry().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = running_job(&registry, "kb-1").await;
        registry
            .apply_command(job.job_id, Command::Cancel)
            .await
            .unwrap();
        ids.push(job.job_id);
    }
    running_job(&registry, "kb-2").await;

    let listed: Vec<JobId> = registry
        .list_for_base(&kb("kb-1"))
        .into_iter()
        .map(|r| r.job_id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert!(registry.list_for_base(&kb("missing")).is_empty());
}

#[tokio::test]
async fn last_config_follows_the_newest_generation() {
    let (registry, _temp_dir) = create_test_registry().await;
    let first = registry
        .create(&kb("kb-1"), serde_json::json!({"depth": 1}).into())
        .await
        .unwrap();
    registry.mark_running(first.job_id).await.unwrap();
    registry
        .apply_command(first.job_id, Command::Cancel)
        .await
        .unwrap();
    registry
        .create(&kb("kb-1"), serde_json::json!({"depth": 2}).into())
        .await
        .unwrap();

    assert_eq!(
        registry.last_config(&kb("kb-1")).unwrap(),
        CrawlConfig::from(serde_json::json!({"depth": 2}))
    );
    assert_eq!(
        registry.config_of(first.job_id).unwrap(),
        CrawlConfig::from(serde_json::json!({"depth": 1}))
    );
    assert!(registry.last_config(&kb("kb-2")).is_none());
}

// ---------------------------------------------------------------------------
// restore
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restore_fails_interrupted_jobs() {
    let (registry, _temp_dir) = create_test_registry().await;
    let active = running_job(&registry, "kb-1").await;
    let finished = running_job(&registry, "kb-2").await;
    let finished = registry
        .apply_progress(
            finished.job_id,
            ProgressDelta::finished(WorkerOutcome::Done),
        )
        .await
        .unwrap();

    let restored = JobRegistry::new(registry.db.clone(), Arc::new(LiveDelivery::new()));
    let summary = restored.restore().await.unwrap();
    assert_eq!(
        summary,
        RestoreSummary {
            loaded: 2,
            interrupted: 1
        }
    );

    let record = restored.get(active.job_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some(INTERRUPTED_ERROR));
    assert_eq!(record.version, active.version + 1);
    assert_eq!(restored.get(finished.job_id).unwrap(), finished);

    // Interrupted jobs no longer hold their knowledge base
    assert_eq!(restored.active_job(&kb("kb-1")), None);
    assert!(
        restored
            .create(&kb("kb-1"), CrawlConfig::default())
            .await
            .is_ok()
    );
    assert_eq!(restored.live().get(active.job_id).unwrap(), record);
}

#[tokio::test]
async fn restore_keeps_generation_links() {
    let (registry, _temp_dir) = create_test_registry().await;
    let first = running_job(&registry, "kb-1").await;
    registry
        .apply_command(first.job_id, Command::Cancel)
        .await
        .unwrap();
    let reservation = registry.reserve(&kb("kb-1")).unwrap();
    let second = registry
        .create_reserved(
            reservation,
            JobId::new(),
            CrawlConfig::default(),
            Some(first.job_id),
        )
        .await
        .unwrap();

    let restored = JobRegistry::new(registry.db.clone(), Arc::new(LiveDelivery::new()));
    restored.restore().await.unwrap();

    assert_eq!(restored.retry_of(second.job_id).unwrap(), Some(first.job_id));
    assert_eq!(restored.retry_of(first.job_id).unwrap(), None);
    assert_eq!(restored.retried_by(first.job_id), Some(second.job_id));
    assert_eq!(restored.retried_by(second.job_id), None);
    assert_eq!(restored.len(), 2);
}

#[tokio::test]
async fn retry_gate_is_per_job() {
    let (registry, _temp_dir) = create_test_registry().await;
    let a = running_job(&registry, "kb-1").await;
    let b = running_job(&registry, "kb-2").await;

    let _held = registry.lock_retry(a.job_id).await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(50), registry.lock_retry(a.job_id))
            .await
            .is_err()
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(50), registry.lock_retry(b.job_id))
            .await
            .is_ok()
    );
    assert!(registry.lock_retry(JobId::new()).await.is_err());
}
