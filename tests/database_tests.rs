use altegio_bot::database::connection::DatabaseManager;
use altegio_bot::database::models::*;
use anyhow::Result;
use chrono::{Duration, Utc};
use tempfile::{tempdir, TempDir};

async fn setup_test_db() -> Result<(DatabaseManager, TempDir)> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let db_manager = DatabaseManager::new(&database_url).await?;
    db_manager.run_migrations().await?;

    Ok((db_manager, temp_dir))
}

const USER: &str = "+4915711112222";

#[tokio::test]
async fn test_session_creation_and_active_lookup() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    let session = ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await?;
    assert_eq!(session.user_id, USER);
    assert_eq!(session.stage, Stage::Idle);
    assert_eq!(session.version, 0);
    assert!(!session.id.is_empty());

    let found = ConversationSession::find_active(&db.pool, USER).await?;
    assert!(found.is_some());
    assert_eq!(found.unwrap().id, session.id);

    let missing = ConversationSession::find_active(&db.pool, "+490000000000").await?;
    assert!(missing.is_none());

    Ok(())
}

#[tokio::test]
async fn test_second_live_session_per_user_is_rejected() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await?;
    let second = ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await;
    assert!(second.is_err(), "unique index must reject a second live session");

    Ok(())
}

#[tokio::test]
async fn test_terminal_session_frees_up_the_user() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    let mut session =
        ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await?;
    session.stage = Stage::Cancelled;
    assert!(session.update(&db.pool, 0).await?);

    // With the first flow terminal, a fresh session is allowed.
    let second = ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await;
    assert!(second.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_optimistic_update_rejects_stale_version() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    let mut session =
        ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await?;
    session.stage = Stage::SelectingService;

    // First writer wins.
    assert!(session.update(&db.pool, 0).await?);

    // Second writer holding the old version loses.
    session.stage = Stage::SelectingStaff;
    assert!(!session.update(&db.pool, 0).await?);

    // The stored row reflects only the first write.
    let stored = ConversationSession::find_active(&db.pool, USER).await?.unwrap();
    assert_eq!(stored.stage, Stage::SelectingService);
    assert_eq!(stored.version, 1);

    Ok(())
}

#[tokio::test]
async fn test_expired_and_retry_sweep_queries() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    let mut session =
        ConversationSession::create(&db.pool, USER, Duration::minutes(30)).await?;

    let now = Utc::now();
    assert!(ConversationSession::find_expired(&db.pool, now).await?.is_empty());

    session.expires_at = (now - Duration::seconds(5)).to_rfc3339();
    assert!(session.update(&db.pool, 0).await?);

    let expired = ConversationSession::find_expired(&db.pool, now).await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, session.id);

    // Retry sweep only picks committing sessions with an elapsed deadline.
    assert!(ConversationSession::find_due_retries(&db.pool, now).await?.is_empty());

    session.stage = Stage::Committing;
    session.attempt_token = Some("tok-1".to_string());
    session.next_retry_at = Some((now - Duration::seconds(1)).to_rfc3339());
    assert!(session.update(&db.pool, 1).await?);

    let due = ConversationSession::find_due_retries(&db.pool, now).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempt_token.as_deref(), Some("tok-1"));

    Ok(())
}

fn record(token: &str, status: BookingStatus) -> BookingRecord {
    BookingRecord {
        attempt_token: token.to_string(),
        remote_booking_id: Some("R-42".to_string()),
        user_id: USER.to_string(),
        staff_id: 7,
        service_id: 3,
        starts_at: Utc::now().to_rfc3339(),
        duration_min: 60,
        price: Some(45.0),
        status,
        failure_reason: None,
        committed_at: Utc::now().to_rfc3339(),
    }
}

#[tokio::test]
async fn test_booking_record_insert_and_lookup() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    let stored = record("tok-1", BookingStatus::Confirmed).insert(&db.pool).await?;
    assert_eq!(stored.attempt_token, "tok-1");
    assert_eq!(stored.status, BookingStatus::Confirmed);

    let found = BookingRecord::find_by_token(&db.pool, "tok-1").await?;
    assert!(found.is_some());

    let missing = BookingRecord::find_by_token(&db.pool, "tok-404").await?;
    assert!(missing.is_none());

    Ok(())
}

#[tokio::test]
async fn test_duplicate_attempt_token_resolves_to_existing_record() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    record("tok-1", BookingStatus::Confirmed).insert(&db.pool).await?;

    // Racing writer with the same token but a different payload: the stored
    // record is authoritative.
    let mut duplicate = record("tok-1", BookingStatus::Failed);
    duplicate.remote_booking_id = Some("R-99".to_string());
    let resolved = duplicate.insert(&db.pool).await?;

    assert_eq!(resolved.status, BookingStatus::Confirmed);
    assert_eq!(resolved.remote_booking_id.as_deref(), Some("R-42"));

    let all = BookingRecord::find_by_user(&db.pool, USER).await?;
    assert_eq!(all.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_latest_confirmed_and_cancellation() -> Result<()> {
    let (db, _temp_dir) = setup_test_db().await?;

    assert!(BookingRecord::find_latest_confirmed(&db.pool, USER).await?.is_none());

    record("tok-1", BookingStatus::Failed).insert(&db.pool).await?;
    record("tok-2", BookingStatus::Confirmed).insert(&db.pool).await?;

    let latest = BookingRecord::find_latest_confirmed(&db.pool, USER).await?.unwrap();
    assert_eq!(latest.attempt_token, "tok-2");

    BookingRecord::mark_cancelled(&db.pool, "tok-2").await?;
    let cancelled = BookingRecord::find_by_token(&db.pool, "tok-2").await?.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    assert!(BookingRecord::find_latest_confirmed(&db.pool, USER).await?.is_none());

    Ok(())
}
