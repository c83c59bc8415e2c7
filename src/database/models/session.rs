use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::altegio::SlotCandidate;

/// Stage of a booking conversation. Terminal stages never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    SelectingService,
    SelectingStaff,
    SelectingSlot,
    AwaitingConfirmation,
    Committing,
    Confirmed,
    Failed,
    Cancelled,
    Expired,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Confirmed | Stage::Failed | Stage::Cancelled | Stage::Expired
        )
    }
}

/// One user's booking flow. At most one non-terminal row per user, enforced
/// by a partial unique index on user_id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub user_id: String,
    pub stage: Stage,
    pub service_id: Option<i64>,
    pub staff_id: Option<i64>,
    pub slot_starts_at: Option<String>,
    pub slot_duration_min: Option<i64>,
    pub slot_price: Option<f64>,
    pub attempt_token: Option<String>,
    pub commit_attempts: i64,
    pub next_retry_at: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

impl ConversationSession {
    pub async fn create(
        pool: &sqlx::SqlitePool,
        user_id: &str,
        expiry: Duration,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let expires_at = (now + expiry).to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO conversation_sessions
                (id, user_id, stage, version, created_at, updated_at, expires_at)
            VALUES (?, ?, 'idle', 0, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&expires_at)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(
        pool: &sqlx::SqlitePool,
        session_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSession>(
            "SELECT * FROM conversation_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await
    }

    /// The user's current non-terminal session, if any.
    pub async fn find_active(
        pool: &sqlx::SqlitePool,
        user_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSession>(
            r#"
            SELECT * FROM conversation_sessions
            WHERE user_id = ?
              AND stage NOT IN ('confirmed', 'failed', 'cancelled', 'expired')
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// The user's most recent session regardless of stage. Used to replay a
    /// terminal outcome when a duplicate confirmation arrives late.
    pub async fn find_latest(
        pool: &sqlx::SqlitePool,
        user_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSession>(
            r#"
            SELECT * FROM conversation_sessions
            WHERE user_id = ?
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Optimistic write: succeeds only if the row still carries
    /// `expected_version`. Returns false when another writer got there first.
    pub async fn update(
        &self,
        pool: &sqlx::SqlitePool,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE conversation_sessions
            SET stage = ?, service_id = ?, staff_id = ?,
                slot_starts_at = ?, slot_duration_min = ?, slot_price = ?,
                attempt_token = ?, commit_attempts = ?, next_retry_at = ?,
                failure_reason = ?, version = version + 1, updated_at = ?,
                expires_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(self.stage)
        .bind(self.service_id)
        .bind(self.staff_id)
        .bind(&self.slot_starts_at)
        .bind(self.slot_duration_min)
        .bind(self.slot_price)
        .bind(&self.attempt_token)
        .bind(self.commit_attempts)
        .bind(&self.next_retry_at)
        .bind(&self.failure_reason)
        .bind(&now)
        .bind(&self.expires_at)
        .bind(&self.id)
        .bind(expected_version)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Non-terminal sessions whose expiry deadline has passed.
    pub async fn find_expired(
        pool: &sqlx::SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSession>(
            r#"
            SELECT * FROM conversation_sessions
            WHERE stage NOT IN ('confirmed', 'failed', 'cancelled', 'expired')
              AND expires_at <= ?
            ORDER BY expires_at
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await
    }

    /// Sessions stuck in `committing` whose retry backoff has elapsed.
    pub async fn find_due_retries(
        pool: &sqlx::SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConversationSession>(
            r#"
            SELECT * FROM conversation_sessions
            WHERE stage = 'committing'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= ?
            ORDER BY next_retry_at
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await
    }

    /// The slot the user has picked, once all three fields are present.
    pub fn slot_candidate(&self) -> Option<SlotCandidate> {
        let staff_id = self.staff_id?;
        let service_id = self.service_id?;
        let starts_at = self
            .slot_starts_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))?;

        Some(SlotCandidate {
            staff_id,
            service_id,
            starts_at,
            duration_min: self.slot_duration_min.unwrap_or(0),
            price: self.slot_price,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .map(|deadline| deadline.with_timezone(&Utc) <= now)
            .unwrap_or(false)
    }
}
