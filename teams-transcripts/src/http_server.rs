use crate::controller::WebhookController;
use crate::trigger::Registration;
use crate::types::{NotificationBatch, PendingEvent};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

/// Shared snapshot of registrations for the HTTP server.
/// Refreshed whenever registrations are mutated.
pub type RegistrationMap = Arc<RwLock<HashMap<String, Registration>>>;

#[derive(Clone)]
pub struct ServerState {
    pub registrations: RegistrationMap,
    pub controller: Arc<WebhookController>,
    pub event_tx: mpsc::UnboundedSender<PendingEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/hooks/{registration_id}", post(handle_webhook))
        .with_state(state)
}

/// Spawn the Axum server on `bind_addr` and return the bound port and a
/// channel receiver for change events.
pub async fn start(
    bind_addr: &str,
    registrations: RegistrationMap,
    controller: Arc<WebhookController>,
) -> Result<(u16, mpsc::UnboundedReceiver<PendingEvent>), String> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let app = router(ServerState {
        registrations,
        controller,
        event_tx,
    });

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("failed to bind HTTP server: {e}"))?;

    let port = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?
        .port();
    info!(port, "HTTP server bound");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server error");
        }
    });

    Ok((port, event_rx))
}

async fn handle_webhook(
    Path(registration_id): Path<String>,
    Query(query): Query<WebhookQuery>,
    State(state): State<ServerState>,
    body: Bytes,
) -> Response {
    // Graph's validation handshake: echo the token and do nothing else.
    if let Some(token) = query.validation_token.filter(|t| !t.is_empty()) {
        info!(registration = %registration_id, "Answering validation handshake");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    let registrations = state.registrations.read().await;
    let reg = match registrations.get(&registration_id) {
        Some(r) => r.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    drop(registrations);

    let batch: NotificationBatch = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(registration = %registration_id, error = %e, "Malformed notification batch");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let outcome = state.controller.handle_batch(&reg, batch).await;

    for change in outcome.events {
        let change_type = change.change_type.as_deref().unwrap_or("changed");
        let event = PendingEvent {
            event_type: format!("teams.transcript.{change_type}"),
            subject: registration_id.clone(),
            data: serde_json::to_value(&change).unwrap_or_default(),
        };
        if state.event_tx.send(event).is_err() {
            warn!(registration = %registration_id, "Event channel closed; dropping change event");
        }
    }

    StatusCode::ACCEPTED.into_response()
}
