pub mod client;
pub mod retry;

pub use client::AltegioClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BotError;

/// A bookable staff/time combination offered by the remote platform.
/// Never persisted beyond the slot cache TTL; the remote system stays the
/// source of truth for actual availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCandidate {
    pub staff_id: i64,
    pub service_id: i64,
    pub starts_at: DateTime<Utc>,
    pub duration_min: i64,
    pub price: Option<f64>,
}

/// Contact details passed to the remote platform at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub phone: String,
    pub fullname: Option<String>,
}

/// Outcome of a create-booking call that reached the remote platform and got
/// a definite answer. Transport-level failures where the outcome is unknown
/// are reported as `BotError::RemoteUnavailable` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateBookingOutcome {
    /// Booking exists remotely under this id.
    Created(String),
    /// The platform definitively refused (slot taken, validation failure).
    Rejected(String),
}

/// Remote booking client interface consumed by the booking core.
#[async_trait]
pub trait BookingApi: Send + Sync {
    /// Availability for one staff member, one service, one day.
    async fn list_availability(
        &self,
        staff_id: i64,
        service_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<SlotCandidate>, BotError>;

    /// Creates a booking. Safe to call more than once with the same attempt
    /// token: repeated calls must resolve to the same remote booking.
    async fn create_booking(
        &self,
        attempt_token: &str,
        slot: &SlotCandidate,
        user: &UserInfo,
    ) -> Result<CreateBookingOutcome, BotError>;

    async fn cancel_booking(&self, remote_booking_id: &str) -> Result<(), BotError>;
}
