use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::database::models::{BookingRecord, ConversationSession};
use crate::errors::BotError;

/// Durable store consumed by the booking core. All writes are atomic;
/// session saves carry optimistic-version conflict detection.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, user_id: &str)
        -> Result<Option<ConversationSession>, BotError>;

    async fn create_session(&self, user_id: &str) -> Result<ConversationSession, BotError>;

    /// Most recent session regardless of stage, for terminal-outcome replay.
    async fn load_latest_session(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationSession>, BotError>;

    /// Persists the session only if the stored row still carries
    /// `expected_version`; fails with `ConcurrentModification` otherwise.
    async fn save_session(
        &self,
        session: &ConversationSession,
        expected_version: i64,
    ) -> Result<(), BotError>;

    async fn load_booking_record(
        &self,
        attempt_token: &str,
    ) -> Result<Option<BookingRecord>, BotError>;

    /// Inserts the record; an existing record under the same attempt token
    /// wins and is returned.
    async fn save_booking_record(
        &self,
        record: &BookingRecord,
    ) -> Result<BookingRecord, BotError>;

    async fn latest_confirmed_booking(
        &self,
        user_id: &str,
    ) -> Result<Option<BookingRecord>, BotError>;

    async fn mark_booking_cancelled(&self, attempt_token: &str) -> Result<(), BotError>;

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationSession>, BotError>;

    async fn due_commit_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationSession>, BotError>;
}

/// SQLite-backed store delegating to the model queries.
pub struct SqliteStore {
    pool: SqlitePool,
    session_expiry: Duration,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, session_expiry: std::time::Duration) -> Self {
        Self {
            pool,
            session_expiry: Duration::from_std(session_expiry)
                .unwrap_or_else(|_| Duration::minutes(30)),
        }
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationSession>, BotError> {
        Ok(ConversationSession::find_active(&self.pool, user_id).await?)
    }

    async fn create_session(&self, user_id: &str) -> Result<ConversationSession, BotError> {
        Ok(ConversationSession::create(&self.pool, user_id, self.session_expiry).await?)
    }

    async fn load_latest_session(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationSession>, BotError> {
        Ok(ConversationSession::find_latest(&self.pool, user_id).await?)
    }

    async fn save_session(
        &self,
        session: &ConversationSession,
        expected_version: i64,
    ) -> Result<(), BotError> {
        let updated = session.update(&self.pool, expected_version).await?;
        if !updated {
            return Err(BotError::ConcurrentModification);
        }
        Ok(())
    }

    async fn load_booking_record(
        &self,
        attempt_token: &str,
    ) -> Result<Option<BookingRecord>, BotError> {
        Ok(BookingRecord::find_by_token(&self.pool, attempt_token).await?)
    }

    async fn save_booking_record(
        &self,
        record: &BookingRecord,
    ) -> Result<BookingRecord, BotError> {
        Ok(record.insert(&self.pool).await?)
    }

    async fn latest_confirmed_booking(
        &self,
        user_id: &str,
    ) -> Result<Option<BookingRecord>, BotError> {
        Ok(BookingRecord::find_latest_confirmed(&self.pool, user_id).await?)
    }

    async fn mark_booking_cancelled(&self, attempt_token: &str) -> Result<(), BotError> {
        Ok(BookingRecord::mark_cancelled(&self.pool, attempt_token).await?)
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationSession>, BotError> {
        Ok(ConversationSession::find_expired(&self.pool, now).await?)
    }

    async fn due_commit_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationSession>, BotError> {
        Ok(ConversationSession::find_due_retries(&self.pool, now).await?)
    }
}
