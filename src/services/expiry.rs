use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::booking::{BookingMachine, Intent, IntentDispatcher};
use crate::errors::BotError;
use crate::store::SessionStore;

/// Periodic sweep: expires idle sessions past their deadline and re-drives
/// commits whose retry backoff has elapsed. This is the only source of
/// time-triggered transitions.
pub struct ExpiryService {
    scheduler: JobScheduler,
    store: Arc<dyn SessionStore>,
    machine: Arc<BookingMachine>,
    dispatcher: Arc<IntentDispatcher>,
}

impl ExpiryService {
    pub async fn new(
        store: Arc<dyn SessionStore>,
        machine: Arc<BookingMachine>,
        dispatcher: Arc<IntentDispatcher>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            store,
            machine,
            dispatcher,
        })
    }

    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let store = self.store.clone();
        let machine = self.machine.clone();
        let dispatcher = self.dispatcher.clone();

        // Every minute, at second 0
        let sweep_job = Job::new_async("0 * * * * *", move |_uuid, _l| {
            let store = store.clone();
            let machine = machine.clone();
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                if let Err(e) = run_sweep(store, machine, dispatcher).await {
                    tracing::error!("expiry sweep failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(sweep_job).await?;
        self.scheduler.start().await?;

        tracing::info!("Expiry service started - sweeping every minute");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

/// One pass over overdue sessions. Version conflicts are skipped: a losing
/// write means some other handler already moved the session on.
pub async fn run_sweep(
    store: Arc<dyn SessionStore>,
    machine: Arc<BookingMachine>,
    dispatcher: Arc<IntentDispatcher>,
) -> Result<(), BotError> {
    let now = Utc::now();

    for mut session in store.expired_sessions(now).await? {
        let expected_version = session.version;
        let outcome = machine.expire(&mut session);

        match store.save_session(&session, expected_version).await {
            Ok(()) => {
                tracing::info!(
                    "expired session {} for user {} ({:?})",
                    session.id,
                    session.user_id,
                    outcome.kind
                );
            }
            Err(BotError::ConcurrentModification) => {
                tracing::debug!("session {} changed during sweep, skipping", session.id);
            }
            Err(other) => return Err(other),
        }
    }

    for session in store.due_commit_retries(now).await? {
        tracing::info!(
            "re-driving commit for user {} (attempt {})",
            session.user_id,
            session.commit_attempts
        );
        match dispatcher
            .handle(&session.user_id, Intent::RetryCommit)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    "commit retry for user {} settled as {:?}",
                    session.user_id,
                    outcome.kind
                );
            }
            Err(e) => {
                // Session stays in committing with its token; either a later
                // backoff deadline or the expiry deadline resolves it.
                tracing::warn!("commit retry for user {} failed: {}", session.user_id, e);
            }
        }
    }

    Ok(())
}
