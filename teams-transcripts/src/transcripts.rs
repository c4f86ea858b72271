//! Read-only transcript actions and the option lists used to pick trigger
//! parameters.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{GraphError, TeamsError, TeamsResult};
use crate::graph::{GraphClient, RequestOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFormat {
    #[default]
    Vtt,
    Text,
}

impl TranscriptFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Vtt => "text/vtt",
            Self::Text => "text/plain",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Vtt => "vtt",
            Self::Text => "txt",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptContent {
    pub transcript_id: String,
    pub meeting_id: String,
    pub format: TranscriptFormat,
    pub mime_type: String,
    pub file_name: String,
    /// Base64 of the transcript body.
    pub data: String,
}

/// Entry of a searchable option list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionItem {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingEntry {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    start_date_time: Option<DateTime<Utc>>,
}

/// OData string literals escape `'` by doubling it.
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn require<'a>(value: &'a str, name: &str) -> TeamsResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TeamsError::Config(format!("{name} is required")));
    }
    Ok(value)
}

pub struct TranscriptClient {
    graph: Arc<GraphClient>,
}

impl TranscriptClient {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }

    pub async fn get_meeting(&self, user_id: &str, meeting_id: &str) -> TeamsResult<Value> {
        let path = format!(
            "/users/{}/onlineMeetings/{}",
            require(user_id, "User ID")?,
            require(meeting_id, "Meeting ID")?
        );
        Ok(self
            .graph
            .request(Method::GET, &path, RequestOptions::default())
            .await?)
    }

    /// Transcripts of one meeting, or of every meeting the user organized
    /// when `meeting_id` is `None`. With a `limit` only one page is fetched.
    pub async fn list_transcripts(
        &self,
        user_id: &str,
        meeting_id: Option<&str>,
        filter: Option<&str>,
        limit: Option<u32>,
    ) -> TeamsResult<Vec<Value>> {
        let user_id = require(user_id, "User ID")?;
        let path = match meeting_id.map(str::trim).filter(|m| !m.is_empty()) {
            Some(meeting_id) => {
                format!("/users/{user_id}/onlineMeetings/{meeting_id}/transcripts")
            }
            None => format!("/users/{user_id}/onlineMeetings/getAllTranscripts"),
        };

        let mut query = Vec::new();
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            query.push(("$filter".to_string(), filter.to_string()));
        }

        match limit {
            Some(limit) => {
                query.push(("$top".to_string(), limit.to_string()));
                let options = RequestOptions {
                    query,
                    ..Default::default()
                };
                let mut page = self.graph.request(Method::GET, &path, options).await?;
                Ok(match page.get_mut("value").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                })
            }
            None => Ok(self
                .graph
                .request_all_pages("value", Method::GET, &path, None, query)
                .await?),
        }
    }

    pub async fn get_transcript(
        &self,
        user_id: &str,
        meeting_id: &str,
        transcript_id: &str,
    ) -> TeamsResult<Value> {
        let path = format!(
            "/users/{}/onlineMeetings/{}/transcripts/{}",
            require(user_id, "User ID")?,
            require(meeting_id, "Meeting ID")?,
            require(transcript_id, "Transcript ID")?
        );
        Ok(self
            .graph
            .request(Method::GET, &path, RequestOptions::default())
            .await?)
    }

    pub async fn get_transcript_content(
        &self,
        user_id: &str,
        meeting_id: &str,
        transcript_id: &str,
        format: TranscriptFormat,
    ) -> TeamsResult<TranscriptContent> {
        let meeting_id = require(meeting_id, "Meeting ID")?;
        let transcript_id = require(transcript_id, "Transcript ID")?;
        let path = format!(
            "/users/{}/onlineMeetings/{meeting_id}/transcripts/{transcript_id}/content",
            require(user_id, "User ID")?
        );

        let options = RequestOptions::default()
            .with_query("$format", format.mime_type())
            .with_header(ACCEPT, HeaderValue::from_static(format.mime_type()));
        let body = self.graph.request_text(Method::GET, &path, options).await?;

        Ok(TranscriptContent {
            transcript_id: transcript_id.to_string(),
            meeting_id: meeting_id.to_string(),
            format,
            mime_type: format.mime_type().to_string(),
            file_name: format!("transcript_{transcript_id}.{}", format.extension()),
            data: base64::engine::general_purpose::STANDARD.encode(body.as_bytes()),
        })
    }

    pub async fn search_users(&self, filter: Option<&str>) -> TeamsResult<Vec<OptionItem>> {
        let mut query = Vec::new();
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            let f = odata_literal(f);
            query.push((
                "$filter".to_string(),
                format!("startsWith(displayName,'{f}') or startsWith(userPrincipalName,'{f}')"),
            ));
        }

        let items = self
            .graph
            .request_all_pages("value", Method::GET, "/users", None, query)
            .await?;

        items
            .into_iter()
            .map(|item| -> TeamsResult<OptionItem> {
                let user: UserEntry = serde_json::from_value(item).map_err(GraphError::from)?;
                Ok(OptionItem {
                    name: user
                        .display_name
                        .filter(|n| !n.is_empty())
                        .or(user.user_principal_name)
                        .unwrap_or_else(|| user.id.clone()),
                    url: Some(format!(
                        "https://admin.microsoft.com/#/users/:/UserDetails/{}",
                        user.id
                    )),
                    value: user.id,
                })
            })
            .collect()
    }

    pub async fn search_meetings(
        &self,
        user_id: &str,
        filter: Option<&str>,
    ) -> TeamsResult<Vec<OptionItem>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = Vec::new();
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            query.push((
                "$filter".to_string(),
                format!("contains(subject,'{}')", odata_literal(f)),
            ));
        }

        let items = self
            .graph
            .request_all_pages(
                "value",
                Method::GET,
                &format!("/users/{user_id}/onlineMeetings"),
                None,
                query,
            )
            .await?;

        items
            .into_iter()
            .map(|item| -> TeamsResult<OptionItem> {
                let meeting: MeetingEntry =
                    serde_json::from_value(item).map_err(GraphError::from)?;
                let subject = meeting.subject.unwrap_or_else(|| "Untitled meeting".into());
                let name = match meeting.start_date_time {
                    Some(start) => format!("{subject} ({})", start.format("%Y-%m-%d %H:%M UTC")),
                    None => subject,
                };
                Ok(OptionItem {
                    name,
                    value: meeting.id,
                    url: None,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_literals_escape_quotes() {
        assert_eq!(odata_literal("O'Brien"), "O''Brien");
        assert_eq!(odata_literal("plain"), "plain");
    }

    #[test]
    fn format_metadata() {
        assert_eq!(TranscriptFormat::Vtt.mime_type(), "text/vtt");
        assert_eq!(TranscriptFormat::Text.extension(), "txt");
        let parsed: TranscriptFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(parsed, TranscriptFormat::Text);
    }

    #[test]
    fn blank_identifiers_are_rejected() {
        assert!(matches!(require("  ", "User ID"), Err(TeamsError::Config(_))));
        assert_eq!(require(" u1 ", "User ID").unwrap(), "u1");
    }
}
