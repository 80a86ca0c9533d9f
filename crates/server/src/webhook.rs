use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use citabot_chatwoot::events::classify;
use citabot_chatwoot::payload::WebhookPayload;
use citabot_chatwoot::signature::verify_signature;
use citabot_engine::Orchestrator;

const SIGNATURE_HEADER: &str = "x-chatwoot-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub orchestrator: Arc<Orchestrator>,
    pub webhook_secret: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhooks/chatwoot", post(chatwoot_webhook)).with_state(state)
}

/// Webhook entry point. Verifies the HMAC signature when a secret is
/// configured, parses the payload, ACKs with 200 immediately and hands the
/// classified event to the pipeline in a background task - the helpdesk
/// retries deliveries that block, and the dedupe cache absorbs the ones
/// that got through anyway.
async fn chatwoot_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("webhook rejected: invalid signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(WebhookAck { status: "invalid_signature", event: None }),
            );
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(parse_error) => {
            warn!(error = %parse_error, "webhook rejected: unparseable payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(WebhookAck { status: "invalid_payload", event: None }),
            );
        }
    };

    let event_name = payload.event.clone();
    info!(
        event_name = "ingress.webhook.received",
        event = event_name.as_deref().unwrap_or("unknown"),
        conversation_id = payload.conversation.as_ref().map(|c| c.id).unwrap_or_default(),
        "webhook received"
    );

    let event = classify(&payload);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(pipeline_error) = orchestrator.handle_event(event, Utc::now()).await {
            error!(error = %pipeline_error, "webhook processing failed");
        }
    });

    (StatusCode::OK, Json(WebhookAck { status: "accepted", event: event_name }))
}
