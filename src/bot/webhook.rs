use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::booking::{Intent, IntentDispatcher, Outcome};
use crate::errors::BotError;

/// Inbound transport adapter. Whatever delivers user messages (webhook
/// relay, message bus bridge) POSTs `(user_id, intent)` pairs here; delivery
/// is at-least-once, and the attempt tokens plus optimistic versioning
/// downstream absorb the duplicates.
#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<IntentDispatcher>,
    pub webhook_secret: Arc<String>,
}

/// Body of an inbound event: who sent it and what they asked for.
#[derive(Debug, Deserialize, Serialize)]
pub struct InboundEvent {
    pub user_id: String,
    #[serde(flatten)]
    pub intent: Intent,
}

pub fn router(dispatcher: Arc<IntentDispatcher>, webhook_secret: String) -> Router {
    let state = WebhookState {
        dispatcher,
        webhook_secret: Arc::new(webhook_secret),
    };

    Router::new()
        .route("/webhooks/altegio", post(handle_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_event(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
    body: Result<Json<InboundEvent>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<Outcome>, BotError> {
    // The relay authenticates with a shared secret in the query string.
    let provided = params.get("secret").map(String::as_str);
    if provided != Some(state.webhook_secret.as_str()) {
        return Err(BotError::Unauthorized);
    }

    let Json(event) = body
        .map_err(|e| BotError::InvalidRequest(format!("invalid JSON body: {e}")))?;

    // Internal-only intent; only the sweep may re-drive commits.
    if matches!(event.intent, Intent::RetryCommit) {
        return Err(BotError::InvalidRequest(
            "retry_commit is not accepted from the transport".to_string(),
        ));
    }

    tracing::info!(
        "inbound event for user {}: {:?}",
        event.user_id,
        event.intent
    );

    let outcome = state
        .dispatcher
        .handle(&event.user_id, event.intent)
        .await?;
    Ok(Json(outcome))
}
