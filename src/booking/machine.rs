use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::altegio::{BookingApi, CreateBookingOutcome, RetryPolicy, UserInfo};
use crate::booking::intent::{Intent, Outcome, OutcomeKind};
use crate::cache::SlotCache;
use crate::database::models::{BookingRecord, BookingStatus, ConversationSession, Stage};
use crate::errors::BotError;
use crate::store::SessionStore;
use crate::utils::datetime::{format_date, format_time};

/// Side effect a transition asks the machine to carry out. Everything that
/// touches the cache, the store, or the remote platform lives behind one of
/// these; the transition function itself never blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Clear any prior selections and restart the flow.
    Reset,
    SetService(i64),
    OfferSlots {
        staff_id: i64,
        date: chrono::NaiveDate,
    },
    /// Validate the chosen start time against cached availability.
    ResolveSlot(DateTime<Utc>),
    Commit,
    CancelFlow,
}

/// Result of the pure transition function: where the session goes and what
/// the machine has to do to get it there.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub next_stage: Stage,
    pub effect: Effect,
}

/// Pure transition: (current session, incoming intent) → plan. Invalid
/// combinations are rejected with `InvalidTransition` and the session is
/// left untouched.
pub fn transition(
    session: &ConversationSession,
    intent: &Intent,
) -> Result<TransitionPlan, BotError> {
    let stage = session.stage;

    match (stage, intent) {
        (s, Intent::Start) if !s.is_terminal() && s != Stage::Committing => Ok(TransitionPlan {
            next_stage: Stage::SelectingService,
            effect: Effect::Reset,
        }),
        (Stage::SelectingService, Intent::SelectService { service_id }) => Ok(TransitionPlan {
            next_stage: Stage::SelectingStaff,
            effect: Effect::SetService(*service_id),
        }),
        (Stage::SelectingStaff, Intent::SelectStaff { staff_id, date }) => Ok(TransitionPlan {
            next_stage: Stage::SelectingSlot,
            effect: Effect::OfferSlots {
                staff_id: *staff_id,
                date: *date,
            },
        }),
        (Stage::SelectingSlot, Intent::SelectSlot { starts_at }) => Ok(TransitionPlan {
            next_stage: Stage::AwaitingConfirmation,
            effect: Effect::ResolveSlot(*starts_at),
        }),
        (Stage::AwaitingConfirmation, Intent::Confirm)
        | (Stage::Committing, Intent::Confirm)
        | (Stage::Committing, Intent::RetryCommit) => Ok(TransitionPlan {
            next_stage: Stage::Committing,
            effect: Effect::Commit,
        }),
        (s, Intent::Cancel) if !s.is_terminal() && s != Stage::Committing => Ok(TransitionPlan {
            next_stage: Stage::Cancelled,
            effect: Effect::CancelFlow,
        }),
        _ => Err(BotError::InvalidTransition(format!(
            "intent {:?} is not valid in stage {:?}",
            intent, stage
        ))),
    }
}

/// Drives a single user's booking flow and owns the commit protocol. All
/// remote access goes through here so idempotency lives in one place.
pub struct BookingMachine {
    store: Arc<dyn SessionStore>,
    adapter: Arc<dyn BookingApi>,
    cache: Arc<SlotCache>,
    commit_backoff: RetryPolicy,
    max_commit_attempts: u32,
    session_expiry: Duration,
}

impl BookingMachine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        adapter: Arc<dyn BookingApi>,
        cache: Arc<SlotCache>,
        commit_backoff: RetryPolicy,
        max_commit_attempts: u32,
        session_expiry: std::time::Duration,
    ) -> Self {
        Self {
            store,
            adapter,
            cache,
            commit_backoff,
            max_commit_attempts,
            session_expiry: Duration::from_std(session_expiry)
                .unwrap_or_else(|_| Duration::minutes(30)),
        }
    }

    /// Pushes the expiry deadline out on every accepted transition.
    fn touch(&self, session: &mut ConversationSession) {
        session.expires_at = (Utc::now() + self.session_expiry).to_rfc3339();
    }

    /// Applies a non-commit effect to the session in memory. The caller is
    /// responsible for persisting the session afterwards; an error here
    /// means nothing was persisted and the stored session is unchanged.
    pub async fn apply_effect(
        &self,
        session: &mut ConversationSession,
        plan: &TransitionPlan,
    ) -> Result<Outcome, BotError> {
        match &plan.effect {
            Effect::Reset => {
                session.service_id = None;
                session.staff_id = None;
                session.slot_starts_at = None;
                session.slot_duration_min = None;
                session.slot_price = None;
                session.attempt_token = None;
                session.commit_attempts = 0;
                session.next_retry_at = None;
                session.failure_reason = None;
                session.stage = plan.next_stage;
                self.touch(session);
                Ok(Outcome::prompt(
                    session.stage,
                    "Let's book an appointment. Which service would you like?",
                ))
            }
            Effect::SetService(service_id) => {
                session.service_id = Some(*service_id);
                session.stage = plan.next_stage;
                self.touch(session);
                Ok(Outcome::prompt(
                    session.stage,
                    "Got it. Who would you like to book with, and on which day?",
                ))
            }
            Effect::OfferSlots { staff_id, date } => {
                let service_id = session.service_id.ok_or_else(|| {
                    BotError::InvalidTransition("no service selected".to_string())
                })?;

                let availability = self.cache.get(*staff_id, service_id, *date).await?;
                if availability.slots.is_empty() {
                    // Stay on staff selection so the user can pick another day.
                    return Ok(Outcome::prompt(
                        session.stage,
                        format!(
                            "No free slots on {}. Try another day or staff member.",
                            format_date(date)
                        ),
                    ));
                }

                session.staff_id = Some(*staff_id);
                session.stage = plan.next_stage;
                self.touch(session);

                let message = format!(
                    "Available times on {} — pick one:",
                    format_date(date)
                );
                Ok(Outcome::prompt(session.stage, message)
                    .with_slots(availability.slots, availability.possibly_stale))
            }
            Effect::ResolveSlot(starts_at) => {
                let service_id = session.service_id.ok_or_else(|| {
                    BotError::InvalidTransition("no service selected".to_string())
                })?;
                let staff_id = session.staff_id.ok_or_else(|| {
                    BotError::InvalidTransition("no staff selected".to_string())
                })?;

                let date = starts_at.date_naive();
                let availability = self.cache.get(staff_id, service_id, date).await?;
                let slot = availability
                    .slots
                    .iter()
                    .find(|s| s.starts_at == *starts_at)
                    .ok_or_else(|| {
                        BotError::InvalidRequest(
                            "that time is no longer available".to_string(),
                        )
                    })?;

                session.slot_starts_at = Some(slot.starts_at.to_rfc3339());
                session.slot_duration_min = Some(slot.duration_min);
                session.slot_price = slot.price;
                // Fresh attempt token: one per booking attempt, reused across
                // commit retries but never across different slots.
                session.attempt_token = Some(Uuid::new_v4().to_string());
                session.commit_attempts = 0;
                session.failure_reason = None;
                session.stage = plan.next_stage;
                self.touch(session);

                Ok(Outcome::prompt(
                    session.stage,
                    format!(
                        "Book {} at {}? Reply with confirm or cancel.",
                        format_date(&date),
                        format_time(&slot.starts_at)
                    ),
                ))
            }
            Effect::CancelFlow => {
                session.stage = plan.next_stage;
                Ok(Outcome::prompt(session.stage, "Booking flow cancelled.")
                    .with_kind(OutcomeKind::Cancelled))
            }
            Effect::Commit => Err(BotError::InvalidTransition(
                "commit must go through the commit protocol".to_string(),
            )),
        }
    }

    /// Marks the session as committing. Must be persisted durably before
    /// `commit` runs so an unexpected failure never reverts the flow to an
    /// earlier stage.
    pub fn prepare_commit(&self, session: &mut ConversationSession) {
        session.stage = Stage::Committing;
        session.next_retry_at = None;
        self.touch(session);
    }

    /// The commit protocol. Checks for an existing booking record under the
    /// session's attempt token first (idempotent replay), then calls the
    /// remote platform with the token as idempotency key. Distinguishes
    /// success, definite rejection, and indeterminate failure.
    pub async fn commit(
        &self,
        session: &mut ConversationSession,
    ) -> Result<Outcome, BotError> {
        let token = session.attempt_token.clone().ok_or_else(|| {
            BotError::InvalidTransition("committing without an attempt token".to_string())
        })?;

        if let Some(existing) = self.store.load_booking_record(&token).await? {
            tracing::info!(
                "replaying stored outcome for attempt token {} (user {})",
                token,
                session.user_id
            );
            return Ok(self.settle(session, &existing));
        }

        let slot = session.slot_candidate().ok_or_else(|| {
            BotError::InvalidTransition("committing without a slot".to_string())
        })?;
        let user = UserInfo {
            phone: session.user_id.clone(),
            fullname: None,
        };

        let result = self.adapter.create_booking(&token, &slot, &user).await;
        let date = slot.starts_at.date_naive();

        match result {
            Ok(CreateBookingOutcome::Created(remote_id)) => {
                let record = BookingRecord {
                    attempt_token: token,
                    remote_booking_id: Some(remote_id),
                    user_id: session.user_id.clone(),
                    staff_id: slot.staff_id,
                    service_id: slot.service_id,
                    starts_at: slot.starts_at.to_rfc3339(),
                    duration_min: slot.duration_min,
                    price: slot.price,
                    status: BookingStatus::Confirmed,
                    failure_reason: None,
                    committed_at: Utc::now().to_rfc3339(),
                };
                let stored = self.store.save_booking_record(&record).await?;
                // The committed slot is gone; stop re-offering it.
                self.cache.invalidate(slot.staff_id, date).await;
                Ok(self.settle(session, &stored))
            }
            Ok(CreateBookingOutcome::Rejected(reason))
            | Err(BotError::InvalidRequest(reason)) => {
                let record = BookingRecord {
                    attempt_token: token,
                    remote_booking_id: None,
                    user_id: session.user_id.clone(),
                    staff_id: slot.staff_id,
                    service_id: slot.service_id,
                    starts_at: slot.starts_at.to_rfc3339(),
                    duration_min: slot.duration_min,
                    price: slot.price,
                    status: BookingStatus::Failed,
                    failure_reason: Some(reason),
                    committed_at: Utc::now().to_rfc3339(),
                };
                let stored = self.store.save_booking_record(&record).await?;
                self.cache.invalidate(slot.staff_id, date).await;
                Ok(self.settle(session, &stored))
            }
            Err(BotError::RemoteUnavailable(reason)) => {
                // Indeterminate: the platform may or may not have booked.
                // No terminal record; keep the token and schedule one retry.
                session.commit_attempts += 1;
                tracing::warn!(
                    "indeterminate commit for user {} (attempt {}/{}): {}",
                    session.user_id,
                    session.commit_attempts,
                    self.max_commit_attempts,
                    reason
                );

                if session.commit_attempts >= i64::from(self.max_commit_attempts) {
                    session.stage = Stage::Failed;
                    session.next_retry_at = None;
                    session.failure_reason =
                        Some("undetermined — verify manually".to_string());
                    return Ok(Outcome::prompt(
                        session.stage,
                        "We could not determine whether your booking was made. \
                         Please verify with the salon before trying again.",
                    )
                    .with_kind(OutcomeKind::Undetermined));
                }

                let delay = self
                    .commit_backoff
                    .delay_for((session.commit_attempts - 1).max(0) as u32);
                let retry_at = Utc::now()
                    + Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(2));
                session.next_retry_at = Some(retry_at.to_rfc3339());

                Ok(Outcome::prompt(
                    session.stage,
                    "The booking platform is slow to respond. We will retry \
                     automatically — no action needed.",
                )
                .with_kind(OutcomeKind::NeedsRetry))
            }
            // Anything else propagates; the session was already persisted in
            // `committing`, so the next retry keeps the same attempt token.
            Err(other) => Err(other),
        }
    }

    /// Replays the stored outcome for the session's attempt token without
    /// touching the remote platform. Returns None when no record exists.
    pub async fn replay_outcome(
        &self,
        session: &mut ConversationSession,
    ) -> Result<Option<Outcome>, BotError> {
        let Some(token) = session.attempt_token.clone() else {
            return Ok(None);
        };
        match self.store.load_booking_record(&token).await? {
            Some(record) => Ok(Some(self.settle(session, &record))),
            None => Ok(None),
        }
    }

    /// Resolves the session from a stored booking record.
    fn settle(&self, session: &mut ConversationSession, record: &BookingRecord) -> Outcome {
        session.next_retry_at = None;
        match record.status {
            BookingStatus::Confirmed => {
                session.stage = Stage::Confirmed;
                let mut outcome = Outcome::prompt(
                    session.stage,
                    format!(
                        "✅ Booking confirmed for {} at {}.",
                        format_date(&parse_date(&record.starts_at)),
                        format_time_str(&record.starts_at)
                    ),
                )
                .with_kind(OutcomeKind::Confirmed);
                if let Some(remote_id) = &record.remote_booking_id {
                    outcome = outcome.with_booking_id(remote_id.clone());
                }
                outcome
            }
            BookingStatus::Failed => {
                session.stage = Stage::Failed;
                session.failure_reason = record.failure_reason.clone();
                let reason = record
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "the slot is no longer available".to_string());
                Outcome::prompt(
                    session.stage,
                    format!("❌ Booking was not made: {reason}. Send start to try again."),
                )
                .with_kind(OutcomeKind::Rejected)
            }
            BookingStatus::Cancelled => {
                session.stage = Stage::Cancelled;
                Outcome::prompt(session.stage, "This booking was cancelled.")
                    .with_kind(OutcomeKind::Cancelled)
            }
        }
    }

    /// Time-triggered transition applied by the sweep, never by an intent.
    /// A session stuck in `committing` past its deadline resolves to failed
    /// with an undetermined outcome instead of staying open forever.
    pub fn expire(&self, session: &mut ConversationSession) -> Outcome {
        if session.stage == Stage::Committing {
            session.stage = Stage::Failed;
            session.next_retry_at = None;
            session.failure_reason = Some("undetermined — verify manually".to_string());
            return Outcome::prompt(
                session.stage,
                "Your booking attempt timed out. Please verify with the salon \
                 whether a booking was made.",
            )
            .with_kind(OutcomeKind::Undetermined);
        }

        session.stage = Stage::Expired;
        Outcome::prompt(
            session.stage,
            "Your booking session expired. Send start to begin again.",
        )
        .with_kind(OutcomeKind::Expired)
    }

    /// Cancels the user's most recent confirmed booking on the remote
    /// platform and marks the stored record cancelled.
    pub async fn cancel_confirmed(&self, user_id: &str) -> Result<Outcome, BotError> {
        let record = self
            .store
            .latest_confirmed_booking(user_id)
            .await?
            .ok_or_else(|| {
                BotError::InvalidTransition("no confirmed booking to cancel".to_string())
            })?;

        let remote_id = record.remote_booking_id.clone().ok_or_else(|| {
            BotError::InvalidTransition("confirmed booking has no remote id".to_string())
        })?;

        self.adapter.cancel_booking(&remote_id).await?;
        self.store
            .mark_booking_cancelled(&record.attempt_token)
            .await?;

        // The slot is free again.
        self.cache
            .invalidate(record.staff_id, parse_date(&record.starts_at))
            .await;

        Ok(Outcome::prompt(Stage::Cancelled, "Your booking was cancelled.")
            .with_kind(OutcomeKind::Cancelled)
            .with_booking_id(remote_id))
    }
}

fn parse_date(rfc3339: &str) -> chrono::NaiveDate {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .unwrap_or_else(|_| Utc::now().date_naive())
}

fn format_time_str(rfc3339: &str) -> String {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| format_time(&dt.with_timezone(&Utc)))
        .unwrap_or_default()
}
