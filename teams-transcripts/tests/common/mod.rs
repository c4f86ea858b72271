//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{Duration, SecondsFormat, Utc};
use nexus_teams_transcripts::controller::WebhookController;
use nexus_teams_transcripts::graph::{GraphClient, HostToken};
use nexus_teams_transcripts::store::{MemoryStateStore, StateStore};
use nexus_teams_transcripts::subscription::SubscriptionManager;
use nexus_teams_transcripts::trigger::{Registration, TriggerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";
pub const PUBLIC_BASE: &str = "https://hooks.example.com";

/// Graph client rooted at the mock server's `/v1.0`.
pub fn graph_client(server: &MockServer) -> Arc<GraphClient> {
    let client = GraphClient::new(
        format!("{}/v1.0", server.uri()),
        Arc::new(HostToken::new(Some(TOKEN.to_string()))),
    )
    .expect("graph client");
    Arc::new(client)
}

pub fn controller(server: &MockServer) -> (Arc<WebhookController>, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let dyn_store: Arc<dyn StateStore> = store.clone();
    let controller = WebhookController::new(SubscriptionManager::new(graph_client(server)), dyn_store);
    (Arc::new(controller), store)
}

pub fn registration(trigger: TriggerConfig) -> Registration {
    Registration::new("Transcripts".to_string(), trigger, PUBLIC_BASE)
}

pub fn timestamp_in(minutes: i64) -> String {
    (Utc::now() + Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A subscription as Graph returns it.
pub fn subscription_json(id: &str, resource: &str, notification_url: &str, expires_in_minutes: i64) -> Value {
    json!({
        "id": id,
        "resource": resource,
        "changeType": "created",
        "notificationUrl": notification_url,
        "expirationDateTime": timestamp_in(expires_in_minutes),
        "applicationId": "app-1",
        "creatorId": "creator-1",
        "latestSupportedTlsVersion": "v1_2"
    })
}

/// Wraps items in an OData collection page.
pub fn odata_page(items: Vec<Value>, next_link: Option<&str>) -> Value {
    let mut page = json!({ "value": items });
    if let Some(link) = next_link {
        page["@odata.nextLink"] = json!(link);
    }
    page
}

pub fn odata_error(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

pub fn change_notification(subscription_id: &str, client_state: &str, resource: &str) -> Value {
    json!({
        "subscriptionId": subscription_id,
        "clientState": client_state,
        "changeType": "created",
        "resource": resource,
        "tenantId": "tenant-1",
        "subscriptionExpirationDateTime": timestamp_in(600),
        "resourceData": {
            "@odata.type": "#Microsoft.Graph.callTranscript",
            "id": "transcript-1"
        }
    })
}

pub fn lifecycle_notification(subscription_id: &str, client_state: &str, event: &str) -> Value {
    json!({
        "subscriptionId": subscription_id,
        "clientState": client_state,
        "lifecycleEvent": event,
        "resource": format!("Subscriptions/{subscription_id}"),
        "tenantId": "tenant-1",
        "subscriptionExpirationDateTime": timestamp_in(30)
    })
}
