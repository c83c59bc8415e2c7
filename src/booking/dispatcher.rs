use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::booking::intent::{Intent, Outcome};
use crate::booking::machine::{transition, BookingMachine, Effect};
use crate::database::models::Stage;
use crate::errors::BotError;
use crate::store::SessionStore;

/// The single entry point transport code calls. Owns per-user mutual
/// exclusion around read-compute-write and the optimistic save; never talks
/// to the remote platform itself.
pub struct IntentDispatcher {
    store: Arc<dyn SessionStore>,
    machine: Arc<BookingMachine>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IntentDispatcher {
    pub fn new(store: Arc<dyn SessionStore>, machine: Arc<BookingMachine>) -> Self {
        Self {
            store,
            machine,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the user's lock entry unless another handler holds a handle to
    /// it (map reference + ours = 2).
    async fn release_lock(&self, user_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        if let Some(existing) = locks.get(user_id) {
            if Arc::ptr_eq(existing, lock) && Arc::strong_count(existing) == 2 {
                locks.remove(user_id);
            }
        }
    }

    /// Current number of per-user lock entries.
    pub async fn active_locks(&self) -> usize {
        self.user_locks.lock().await.len()
    }

    /// Handles one inbound intent. A version conflict (e.g. a duplicate
    /// webhook racing us) is retried transparently once, then surfaced as
    /// `ConcurrentModification`.
    pub async fn handle(&self, user_id: &str, intent: Intent) -> Result<Outcome, BotError> {
        match self.handle_once(user_id, &intent).await {
            Err(BotError::ConcurrentModification) => {
                tracing::debug!("version conflict for user {}, retrying once", user_id);
                self.handle_once(user_id, &intent).await
            }
            other => other,
        }
    }

    async fn handle_once(&self, user_id: &str, intent: &Intent) -> Result<Outcome, BotError> {
        if matches!(intent, Intent::CancelBooking) {
            // Operates on a confirmed record, not on a live flow.
            return self.machine.cancel_confirmed(user_id).await;
        }

        let lock = self.lock_for(user_id).await;
        let guard = lock.lock().await;
        let result = self.dispatch_locked(user_id, intent).await;
        drop(guard);
        self.release_lock(user_id, &lock).await;
        result
    }

    async fn dispatch_locked(
        &self,
        user_id: &str,
        intent: &Intent,
    ) -> Result<Outcome, BotError> {
        let mut session = match self.store.load_session(user_id).await? {
            Some(session) => session,
            None => match intent {
                Intent::Start => self.store.create_session(user_id).await?,
                Intent::Confirm | Intent::RetryCommit => {
                    // The flow may already have settled; a late duplicate
                    // confirmation must see the same outcome, not an error.
                    if let Some(mut latest) =
                        self.store.load_latest_session(user_id).await?
                    {
                        if let Some(outcome) =
                            self.machine.replay_outcome(&mut latest).await?
                        {
                            return Ok(outcome);
                        }
                        // An attempt token with no record means the remote
                        // platform never gave a definite answer.
                        if latest.stage == Stage::Failed && latest.attempt_token.is_some()
                        {
                            return Err(BotError::UndeterminedCommit);
                        }
                    }
                    return Err(BotError::InvalidTransition(
                        "no active booking session; send start".to_string(),
                    ));
                }
                _ => {
                    return Err(BotError::InvalidTransition(
                        "no active booking session; send start".to_string(),
                    ))
                }
            },
        };

        let expected_version = session.version;
        let plan = transition(&session, intent)?;

        if plan.effect == Effect::Commit {
            // Enter `committing` durably before any remote call so an
            // unexpected failure can never revert the flow to an earlier
            // stage and lose the attempt token.
            self.machine.prepare_commit(&mut session);
            self.store
                .save_session(&session, expected_version)
                .await?;
            session.version = expected_version + 1;

            let outcome = self.machine.commit(&mut session).await?;
            self.store.save_session(&session, session.version).await?;
            return Ok(outcome);
        }

        let outcome = self.machine.apply_effect(&mut session, &plan).await?;
        self.store.save_session(&session, expected_version).await?;
        Ok(outcome)
    }
}
