use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::altegio::SlotCandidate;
use crate::database::models::Stage;

/// An inbound user event, already decoded by the transport. Delivery is
/// at-least-once, so every intent must be safe to re-dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    /// Begin (or supersede) a booking flow.
    Start,
    SelectService { service_id: i64 },
    SelectStaff { staff_id: i64, date: NaiveDate },
    SelectSlot { starts_at: DateTime<Utc> },
    Confirm,
    /// Abandon the current flow.
    Cancel,
    /// Cancel an already confirmed booking remotely.
    CancelBooking,
    /// Re-drive a commit stuck on an indeterminate failure. Dispatched by
    /// the sweep, never by the transport.
    RetryCommit,
}

/// What the dispatcher hands back to the transport for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Flow advanced; `message` tells the user what to do next.
    Prompt,
    /// Availability attached in `slots`.
    SlotsOffered,
    Confirmed,
    Rejected,
    /// Commit hit a transient failure; a retry is scheduled.
    NeedsRetry,
    /// Commit outcome unknown after bounded retries; user must verify.
    Undetermined,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub slots: Vec<SlotCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_booking_id: Option<String>,
    /// Set when slots were served from an expired cache entry because the
    /// remote platform could not be reached.
    #[serde(default)]
    pub possibly_stale: bool,
}

impl Outcome {
    pub fn prompt(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Prompt,
            stage,
            message: message.into(),
            slots: Vec::new(),
            remote_booking_id: None,
            possibly_stale: false,
        }
    }

    pub fn with_kind(mut self, kind: OutcomeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_slots(mut self, slots: Vec<SlotCandidate>, possibly_stale: bool) -> Self {
        self.kind = OutcomeKind::SlotsOffered;
        self.slots = slots;
        self.possibly_stale = possibly_stale;
        self
    }

    pub fn with_booking_id(mut self, remote_booking_id: String) -> Self {
        self.remote_booking_id = Some(remote_booking_id);
        self
    }
}
