use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TeamsError, TeamsResult};
use crate::subscription::NotificationTarget;
use crate::verification;

pub const ALL_TRANSCRIPTS_RESOURCE: &str = "communications/onlineMeetings/getAllTranscripts";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerEvent {
    /// Transcripts for any meeting in the tenant, or for chosen meetings.
    #[default]
    NewTranscript,
    /// Transcripts for meetings organized by chosen users.
    NewUserTranscript,
}

/// What a trigger watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(default)]
    pub event: TriggerEvent,
    #[serde(default = "default_watch_all")]
    pub watch_all_meetings: bool,
    #[serde(default)]
    pub meeting_id: String,
    #[serde(default)]
    pub meeting_ids: Vec<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

fn default_watch_all() -> bool {
    true
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            event: TriggerEvent::default(),
            watch_all_meetings: default_watch_all(),
            meeting_id: String::new(),
            meeting_ids: Vec::new(),
            user_id: String::new(),
            user_ids: Vec::new(),
        }
    }
}

impl TriggerConfig {
    /// Graph resource paths this trigger must subscribe to.
    pub fn resource_paths(&self) -> TeamsResult<Vec<String>> {
        match self.event {
            TriggerEvent::NewTranscript if self.watch_all_meetings => {
                Ok(vec![ALL_TRANSCRIPTS_RESOURCE.to_string()])
            }
            TriggerEvent::NewTranscript => {
                let ids = non_blank(&self.meeting_id, &self.meeting_ids);
                if ids.is_empty() {
                    return Err(TeamsError::Config(
                        "Meeting ID is required: provide a meeting ID or enable watchAllMeetings"
                            .into(),
                    ));
                }
                Ok(ids
                    .iter()
                    .map(|id| format!("communications/onlineMeetings/{id}/transcripts"))
                    .collect())
            }
            TriggerEvent::NewUserTranscript => {
                let ids = non_blank(&self.user_id, &self.user_ids);
                if ids.is_empty() {
                    return Err(TeamsError::Config("User ID is required".into()));
                }
                Ok(ids
                    .iter()
                    .map(|id| format!("users/{id}/onlineMeetings/getAllTranscripts"))
                    .collect())
            }
        }
    }
}

/// Trimmed, de-duplicated identifiers in first-seen order.
fn non_blank<'a>(single: &'a str, many: &'a [String]) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for id in std::iter::once(single).chain(many.iter().map(String::as_str)) {
        let id = id.trim();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// A trigger activated by the host, with its own webhook URL and secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub name: String,
    pub trigger: TriggerConfig,
    pub webhook_url: String,
    pub client_state: String,
    pub status: String, // "active" | "failed"
    pub notification_count: u64,
    pub last_notified_at: Option<String>,
    pub created_at: String,
}

impl Registration {
    pub fn new(name: String, trigger: TriggerConfig, webhook_base_url: &str) -> Self {
        let id = format!("trg_{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            webhook_url: webhook_url_for(webhook_base_url, &id),
            id,
            name,
            trigger,
            client_state: verification::generate_client_state(),
            status: "active".to_string(),
            notification_count: 0,
            last_notified_at: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn summary(&self) -> RegistrationSummary<'_> {
        RegistrationSummary {
            id: &self.id,
            name: &self.name,
            trigger: &self.trigger,
            webhook_url: &self.webhook_url,
            status: &self.status,
            notification_count: self.notification_count,
            last_notified_at: self.last_notified_at.as_deref(),
            created_at: &self.created_at,
        }
    }

    pub fn target(&self) -> NotificationTarget {
        NotificationTarget {
            url: self.webhook_url.clone(),
            client_state: self.client_state.clone(),
        }
    }
}

/// What the host sees of a registration. The clientState secret stays local.
#[derive(Debug, Serialize)]
pub struct RegistrationSummary<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub trigger: &'a TriggerConfig,
    pub webhook_url: &'a str,
    pub status: &'a str,
    pub notification_count: u64,
    pub last_notified_at: Option<&'a str>,
    pub created_at: &'a str,
}

pub fn webhook_url_for(base_url: &str, registration_id: &str) -> String {
    format!("{}/hooks/{registration_id}", base_url.trim_end_matches('/'))
}
