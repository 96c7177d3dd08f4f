//! Webhook ingress.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use groupsnap_core::config::ServerConfig;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::bot::{BotContext, dispatch_event};
use crate::gateway::WebhookEvent;
use crate::ingest::parse_incoming_event;

pub fn build_router(context: Arc<BotContext>, settings: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/webhook", post(webhook))
        .route("/webhook/status", get(webhook_status))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(settings.max_request_bytes))
        .with_state(context);

    let router = if settings.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.layer(TraceLayer::new_for_http())
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "groupsnap webhook relay",
        "status": "online",
        "timestamp": Utc::now(),
    }))
}

async fn webhook_status() -> impl IntoResponse {
    Json(json!({
        "webhook": "active",
        "endpoint": "/webhook",
        "method": "POST",
        "timestamp": Utc::now(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "message": "route not found"})),
    )
}

async fn webhook(State(context): State<Arc<BotContext>>, body: Bytes) -> impl IntoResponse {
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!("malformed webhook body: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "internal server error",
                    "error": err.to_string(),
                    "timestamp": Utc::now(),
                })),
            );
        }
    };

    let Some(payload) = event.payload.as_ref().filter(|_| event.is_message()) else {
        debug!(event = ?event.event, "non-message event");
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "event received (not a message)",
                "timestamp": Utc::now(),
                "event": event.event,
            })),
        );
    };

    let incoming = match parse_incoming_event(payload, context.groups()) {
        Ok(incoming) => incoming,
        Err(skip) => {
            debug!(chat_id = ?payload.from, "message ignored: {skip}");
            return (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "message ignored",
                    "timestamp": Utc::now(),
                })),
            );
        }
    };

    info!(
        chat_id = %incoming.chat_id,
        user_id = %incoming.user_id,
        group_type = %incoming.group_type,
        "message accepted"
    );
    let outcome = dispatch_event(&context, incoming).await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "message processed",
            "timestamp": Utc::now(),
            "processedData": outcome,
        })),
    )
}
