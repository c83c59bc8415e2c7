use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Terminal status of a booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Failed,
    Cancelled,
}

/// Durable result of a committed booking flow, keyed by attempt token.
/// A retried commit with the same token resolves to this record instead of
/// creating a second remote booking.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BookingRecord {
    pub attempt_token: String,
    pub remote_booking_id: Option<String>,
    pub user_id: String,
    pub staff_id: i64,
    pub service_id: i64,
    pub starts_at: String,
    pub duration_min: i64,
    pub price: Option<f64>,
    pub status: BookingStatus,
    pub failure_reason: Option<String>,
    pub committed_at: String,
}

impl BookingRecord {
    pub async fn find_by_token(
        pool: &sqlx::SqlitePool,
        attempt_token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, BookingRecord>(
            "SELECT * FROM booking_records WHERE attempt_token = ?",
        )
        .bind(attempt_token)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user(
        pool: &sqlx::SqlitePool,
        user_id: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, BookingRecord>(
            "SELECT * FROM booking_records WHERE user_id = ? ORDER BY committed_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// The user's most recent confirmed booking, if any.
    pub async fn find_latest_confirmed(
        pool: &sqlx::SqlitePool,
        user_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, BookingRecord>(
            r#"
            SELECT * FROM booking_records
            WHERE user_id = ? AND status = 'confirmed'
            ORDER BY committed_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn mark_cancelled(
        pool: &sqlx::SqlitePool,
        attempt_token: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE booking_records SET status = 'cancelled' WHERE attempt_token = ?")
            .bind(attempt_token)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Inserts the record. When a record with the same attempt token already
    /// exists (a racing duplicate commit), the existing row wins and is
    /// returned unchanged.
    pub async fn insert(&self, pool: &sqlx::SqlitePool) -> Result<Self, sqlx::Error> {
        let committed_at = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO booking_records
                (attempt_token, remote_booking_id, user_id, staff_id, service_id,
                 starts_at, duration_min, price, status, failure_reason, committed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.attempt_token)
        .bind(&self.remote_booking_id)
        .bind(&self.user_id)
        .bind(self.staff_id)
        .bind(self.service_id)
        .bind(&self.starts_at)
        .bind(self.duration_min)
        .bind(self.price)
        .bind(self.status)
        .bind(&self.failure_reason)
        .bind(&committed_at)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race; the stored record is authoritative.
            return Self::find_by_token(pool, &self.attempt_token)
                .await?
                .ok_or(sqlx::Error::RowNotFound);
        }

        Self::find_by_token(pool, &self.attempt_token)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}
