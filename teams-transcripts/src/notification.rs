//! Classification of inbound Graph notifications.
//!
//! Graph delivers lifecycle notifications (about a subscription itself) and
//! change notifications (about watched data) through the same envelope.
//! Different API versions fill different fields, so several structural
//! checks are layered, cheapest first.

use serde::Serialize;
use serde_json::Value;

use crate::types::NotificationEnvelope;

pub const SUBSCRIPTION_RESOURCE_PREFIX: &str = "Subscriptions/";
pub const SUBSCRIPTION_ODATA_TYPE: &str = "#Microsoft.Graph.subscription";

/// Control-plane message about a subscription's own state.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleNotification {
    pub subscription_id: String,
    pub lifecycle_event: Option<String>,
}

/// Application-data event for a watched resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub subscription_id: String,
    pub change_type: Option<String>,
    pub resource: String,
    pub resource_data: Value,
    pub tenant_id: Option<String>,
    pub subscription_expiration_date_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Lifecycle(LifecycleNotification),
    Change(ChangeNotification),
}

/// True when the envelope is about the subscription rather than the data.
pub fn is_lifecycle(envelope: &NotificationEnvelope) -> bool {
    if envelope
        .lifecycle_event
        .as_deref()
        .is_some_and(|e| !e.is_empty())
    {
        return true;
    }

    if envelope
        .resource
        .as_deref()
        .is_some_and(|r| r.starts_with(SUBSCRIPTION_RESOURCE_PREFIX))
    {
        return true;
    }

    envelope
        .resource_data
        .as_ref()
        .and_then(|data| data.get("@odata.type"))
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case(SUBSCRIPTION_ODATA_TYPE))
}

pub fn classify(envelope: NotificationEnvelope) -> Notification {
    if is_lifecycle(&envelope) {
        return Notification::Lifecycle(LifecycleNotification {
            subscription_id: envelope.subscription_id,
            lifecycle_event: envelope.lifecycle_event.filter(|e| !e.is_empty()),
        });
    }

    Notification::Change(ChangeNotification {
        subscription_id: envelope.subscription_id,
        change_type: envelope.change_type,
        resource: envelope.resource.unwrap_or_default(),
        resource_data: envelope
            .resource_data
            .unwrap_or_else(|| Value::Object(Default::default())),
        tenant_id: envelope.tenant_id,
        subscription_expiration_date_time: envelope.subscription_expiration_date_time,
    })
}

/// Splits a batch, keeping arrival order within each side.
pub fn partition(
    envelopes: impl IntoIterator<Item = NotificationEnvelope>,
) -> (Vec<LifecycleNotification>, Vec<ChangeNotification>) {
    let mut lifecycle = Vec::new();
    let mut changes = Vec::new();
    for envelope in envelopes {
        match classify(envelope) {
            Notification::Lifecycle(n) => lifecycle.push(n),
            Notification::Change(n) => changes.push(n),
        }
    }
    (lifecycle, changes)
}
