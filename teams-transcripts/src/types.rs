use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change-notification subscription as Graph reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub resource: String,
    #[serde(default)]
    pub change_type: String,
    #[serde(default)]
    pub notification_url: String,
    pub expiration_date_time: DateTime<Utc>,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub lifecycle_notification_url: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub include_resource_data: Option<bool>,
    #[serde(default)]
    pub latest_supported_tls_version: Option<String>,
}

/// Body of `POST /subscriptions`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionBody {
    pub change_type: String,
    pub notification_url: String,
    pub resource: String,
    pub expiration_date_time: String,
    pub client_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_notification_url: Option<String>,
}

/// Body of `PATCH /subscriptions/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewSubscriptionBody {
    pub expiration_date_time: String,
}

/// One element of an inbound notification batch. Lifecycle and change
/// notifications share this shape on the wire, so every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationEnvelope {
    pub subscription_id: String,
    pub client_state: Option<String>,
    pub change_type: Option<String>,
    pub resource: Option<String>,
    pub subscription_expiration_date_time: Option<String>,
    pub resource_data: Option<Value>,
    pub tenant_id: Option<String>,
    pub lifecycle_event: Option<String>,
}

/// Inbound webhook body: `{ "value": [ ... ] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub value: Vec<NotificationEnvelope>,
}

/// A change notification queued for event.publish, not yet sent to host.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: String,
    pub subject: String,
    pub data: Value,
}
