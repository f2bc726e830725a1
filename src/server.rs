//! HTTP surface: evaluation trigger and webhook ingress
//!
//! Three routes: a scheduler-invoked trigger that runs one evaluation
//! cycle, the provider's address-activity webhook, and the messaging
//! platform's update webhook (refresh button presses). Webhook responses
//! are always positive except for malformed payloads; processing failures
//! are reported out-of-band so the provider does not retry them forever.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::AlertEngine;
use crate::error::{Error, Result};
use crate::webhook::AddressActivityPayload;

/// Messaging-platform update; only the refresh callback is interesting
#[derive(Debug, Deserialize)]
pub struct PlatformUpdate {
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMessage {
    pub message_id: i64,
    pub chat: CallbackChat,
}

#[derive(Debug, Deserialize)]
pub struct CallbackChat {
    pub id: i64,
}

pub fn router(engine: Arc<AlertEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/cron", get(run_cycle))
        .route("/api/webhook/address-activity", post(address_activity))
        .route("/api/webhook/telegram", post(platform_update))
        .with_state(engine)
}

pub async fn serve(engine: Arc<AlertEngine>, bind: &str) -> Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| Error::Io(format!("Failed to bind {}: {}", bind, e)))?;

    info!(addr = %bind, "HTTP server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Io(e.to_string()))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// Zero-argument evaluation trigger
///
/// Individual definition failures are reported out-of-band and still count
/// as a successful invocation; only a missing session credential surfaces.
async fn run_cycle(State(engine): State<Arc<AlertEngine>>) -> impl IntoResponse {
    match engine.run_cycle().await {
        Ok(report) => {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                "Trigger completed"
            );
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

async fn address_activity(
    State(engine): State<Arc<AlertEngine>>,
    payload: std::result::Result<Json<AddressActivityPayload>, JsonRejection>,
) -> impl IntoResponse {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": rejection.to_string() })),
            );
        }
    };

    let disposition = engine.handle_webhook(payload).await;
    info!(?disposition, "Webhook handled");

    (StatusCode::OK, Json(json!({ "ok": true })))
}

async fn platform_update(
    State(engine): State<Arc<AlertEngine>>,
    payload: std::result::Result<Json<PlatformUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Json(update) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed platform update");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": rejection.to_string() })),
            );
        }
    };

    if let Some(callback) = update.callback_query {
        if callback.data.as_deref() == Some("refresh") {
            if let Err(e) = engine
                .dispatcher()
                .ack_callback(&callback.id, "Refreshing...")
                .await
            {
                warn!(error = %e, "Callback acknowledgement failed");
            }

            if let Some(message) = callback.message {
                match engine
                    .handle_refresh(message.chat.id, message.message_id)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            chat_id = message.chat.id,
                            message_id = message.message_id,
                            "Refresh request had no matching record"
                        );
                    }
                    Err(e) => {
                        engine
                            .dispatcher()
                            .report_error("Refresh failed", &e.to_string())
                            .await;
                    }
                }
            }
        }
    }

    (StatusCode::OK, Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_update_decoding() {
        let json = r#"{
            "update_id": 7,
            "callback_query": {
                "id": "cb123",
                "data": "refresh",
                "message": {
                    "message_id": 42,
                    "chat": { "id": -100555 }
                }
            }
        }"#;

        let update: PlatformUpdate = serde_json::from_str(json).unwrap();
        let callback = update.callback_query.unwrap();
        assert_eq!(callback.data.as_deref(), Some("refresh"));
        let message = callback.message.unwrap();
        assert_eq!(message.message_id, 42);
        assert_eq!(message.chat.id, -100555);
    }

    #[test]
    fn test_non_callback_update_decodes_to_none() {
        let update: PlatformUpdate =
            serde_json::from_str(r#"{ "update_id": 8, "message": { "text": "hi" } }"#).unwrap();
        assert!(update.callback_query.is_none());
    }
}
