//! Error types for the Teams transcript extension.

use thiserror::Error;

/// Result type alias using `TeamsError`.
pub type TeamsResult<T> = Result<T, TeamsError>;

/// Failures from the Microsoft Graph client. Every outbound call fails with
/// this one shape regardless of the underlying fault.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Network or protocol failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from Graph.
    #[error("Graph API error ({status}): {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The host has not supplied a usable access token.
    #[error("Token error: {0}")]
    Token(String),

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// HTTP status of an API error, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Errors surfaced by the subscription lifecycle and the host operations.
#[derive(Debug, Error)]
pub enum TeamsError {
    /// Invalid configuration or trigger parameters. Raised before any remote call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure from the Graph client.
    #[error("Transport error: {0}")]
    Transport(#[from] GraphError),

    /// Graph refused to create a subscription.
    #[error("Failed to create subscription for {resource}: {source}")]
    SubscriptionCreate {
        resource: String,
        #[source]
        source: GraphError,
    },

    /// Graph refused to delete a subscription for a reason other than 404.
    #[error("Failed to delete subscription {id}: {source}")]
    SubscriptionDelete {
        id: String,
        #[source]
        source: GraphError,
    },

    /// Persisted state could not be read or written.
    #[error("Storage error: {0}")]
    Store(String),
}
