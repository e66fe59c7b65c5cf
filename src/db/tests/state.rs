use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_shutdown_state_initial() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "a fresh database has no clean shutdown recorded"
    );

    db.pool().close().await;
}

#[tokio::test]
async fn test_shutdown_state_clean_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.set_clean_shutdown().await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    db.pool().close().await;
}

#[tokio::test]
async fn test_shutdown_state_unclean_detection() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_clean_start().await.unwrap();
        // no set_clean_shutdown: simulates a crash
        db.pool().close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());
    db.pool().close().await;
}
