use crate::error::{TeamsError, TeamsResult};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Longest lease Graph grants for any subscription (7 days).
pub const MAX_LEASE_MINUTES: i64 = 10_080;

/// Extension settings, read from the host's `initialize` params.
///
/// Environment variables take precedence over params so a developer can point
/// a running host at a tunnel or a fake Graph without touching the host.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Externally reachable HTTPS base URL that fronts the HTTP server.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_lease_minutes")]
    pub lease_minutes: i64,
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_graph_base_url() -> String {
    crate::graph::GRAPH_BASE_URL.into()
}
fn default_bind_addr() -> String {
    "127.0.0.1:0".into()
}
fn default_lease_minutes() -> i64 {
    crate::subscription::DEFAULT_LEASE_MINUTES
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            graph_base_url: default_graph_base_url(),
            bind_addr: default_bind_addr(),
            public_base_url: None,
            lease_minutes: default_lease_minutes(),
            access_token: None,
        }
    }
}

impl ExtensionConfig {
    /// Build the config from `initialize` params, apply environment
    /// overrides and validate.
    pub fn from_params(params: &Value) -> TeamsResult<Self> {
        let mut config: Self = if params.is_object() {
            serde_json::from_value(params.clone())
                .map_err(|e| TeamsError::Config(format!("invalid initialize params: {e}")))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TEAMS_GRAPH_BASE_URL") {
            self.graph_base_url = v;
        }
        if let Some(v) = lookup("TEAMS_PUBLIC_BASE_URL") {
            self.public_base_url = Some(v);
        }
        if let Some(v) = lookup("TEAMS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("TEAMS_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
    }

    pub fn validate(&self) -> TeamsResult<()> {
        if !(1..=MAX_LEASE_MINUTES).contains(&self.lease_minutes) {
            return Err(TeamsError::Config(format!(
                "lease_minutes must be between 1 and {MAX_LEASE_MINUTES}, got {}",
                self.lease_minutes
            )));
        }
        if self.graph_base_url.trim().is_empty() {
            return Err(TeamsError::Config("graph_base_url must not be empty".into()));
        }
        Ok(())
    }

    /// Base URL for webhook URLs handed to Graph. Falls back to the local
    /// listener, which Graph will refuse (not HTTPS).
    pub fn webhook_base_url(&self, port: u16) -> String {
        match &self.public_base_url {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://127.0.0.1:{port}"),
        }
    }
}
