use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;

use altegio_bot::altegio::{BookingApi, CreateBookingOutcome, RetryPolicy, SlotCandidate, UserInfo};
use altegio_bot::booking::{BookingMachine, IntentDispatcher};
use altegio_bot::cache::SlotCache;
use altegio_bot::database::connection::DatabaseManager;
use altegio_bot::errors::BotError;
use altegio_bot::store::{SessionStore, SqliteStore};

pub const STAFF_ID: i64 = 7;
pub const SERVICE_ID: i64 = 3;

pub fn slot_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

pub fn slot_start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

pub fn default_slots() -> Vec<SlotCandidate> {
    vec![
        SlotCandidate {
            staff_id: STAFF_ID,
            service_id: SERVICE_ID,
            starts_at: slot_start(),
            duration_min: 60,
            price: Some(45.0),
        },
        SlotCandidate {
            staff_id: STAFF_ID,
            service_id: SERVICE_ID,
            starts_at: Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap(),
            duration_min: 60,
            price: Some(45.0),
        },
    ]
}

/// Scripted in-memory stand-in for the Altegio client.
pub struct FakeApi {
    pub slots: Mutex<Result<Vec<SlotCandidate>, String>>,
    /// Next results for create_booking, popped front first. When empty,
    /// bookings succeed with remote id "R-42".
    pub create_script: Mutex<VecDeque<Result<CreateBookingOutcome, BotError>>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Ok(default_slots())),
            create_script: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub async fn script_create(&self, results: Vec<Result<CreateBookingOutcome, BotError>>) {
        let mut script = self.create_script.lock().await;
        script.extend(results);
    }

    pub async fn set_slots(&self, slots: Result<Vec<SlotCandidate>, String>) {
        *self.slots.lock().await = slots;
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookingApi for FakeApi {
    async fn list_availability(
        &self,
        _staff_id: i64,
        _service_id: i64,
        _date: NaiveDate,
    ) -> Result<Vec<SlotCandidate>, BotError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.slots.lock().await {
            Ok(slots) => Ok(slots.clone()),
            Err(reason) => Err(BotError::RemoteUnavailable(reason.clone())),
        }
    }

    async fn create_booking(
        &self,
        _attempt_token: &str,
        _slot: &SlotCandidate,
        _user: &UserInfo,
    ) -> Result<CreateBookingOutcome, BotError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.create_script.lock().await;
        match script.pop_front() {
            Some(result) => result,
            None => Ok(CreateBookingOutcome::Created("R-42".to_string())),
        }
    }

    async fn cancel_booking(&self, _remote_booking_id: &str) -> Result<(), BotError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestCore {
    pub dispatcher: Arc<IntentDispatcher>,
    pub machine: Arc<BookingMachine>,
    pub store: Arc<SqliteStore>,
    pub api: Arc<FakeApi>,
    pub db: DatabaseManager,
    pub _temp_dir: TempDir,
}

pub async fn setup_core() -> TestCore {
    setup_core_with(Arc::new(FakeApi::new()), 3).await
}

pub async fn setup_core_with(api: Arc<FakeApi>, max_commit_attempts: u32) -> TestCore {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let database_url = format!("sqlite:{}", db_path.display());

    let db = DatabaseManager::new(&database_url).await.unwrap();
    db.run_migrations().await.unwrap();

    let store = Arc::new(SqliteStore::new(
        db.pool.clone(),
        Duration::from_secs(1800),
    ));
    let cache = Arc::new(SlotCache::new(api.clone(), Duration::from_secs(120)));
    let backoff = RetryPolicy {
        max_attempts: max_commit_attempts,
        base_delay: Duration::from_millis(1),
        jitter: false,
    };
    let machine = Arc::new(BookingMachine::new(
        store.clone(),
        api.clone(),
        cache,
        backoff,
        max_commit_attempts,
        Duration::from_secs(1800),
    ));
    let dispatcher = Arc::new(IntentDispatcher::new(store.clone(), machine.clone()));

    TestCore {
        dispatcher,
        machine,
        store,
        api,
        db,
        _temp_dir: temp_dir,
    }
}

/// Drives a session to AwaitingConfirmation via the dispatcher.
pub async fn reach_awaiting_confirmation(core: &TestCore, user_id: &str) {
    use altegio_bot::booking::Intent;

    core.dispatcher
        .handle(user_id, Intent::Start)
        .await
        .unwrap();
    core.dispatcher
        .handle(user_id, Intent::SelectService { service_id: SERVICE_ID })
        .await
        .unwrap();
    core.dispatcher
        .handle(
            user_id,
            Intent::SelectStaff {
                staff_id: STAFF_ID,
                date: slot_date(),
            },
        )
        .await
        .unwrap();
    core.dispatcher
        .handle(
            user_id,
            Intent::SelectSlot {
                starts_at: slot_start(),
            },
        )
        .await
        .unwrap();
}

/// The user's active session must exist; panics otherwise.
pub async fn active_session(
    core: &TestCore,
    user_id: &str,
) -> altegio_bot::database::models::ConversationSession {
    core.store.load_session(user_id).await.unwrap().unwrap()
}
