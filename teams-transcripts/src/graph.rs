//! Microsoft Graph HTTP client with cursor pagination.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::GraphError;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Page-size hint sent on the first page of a listing.
const PAGE_SIZE: u32 = 100;
const NEXT_LINK: &str = "@odata.nextLink";

/// Source of bearer tokens. The host owns the OAuth flow; the extension only
/// consumes the resulting access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, GraphError>;
}

/// Token handed over by the host at `initialize` and refreshed through
/// `update_credentials`.
#[derive(Debug, Default)]
pub struct HostToken {
    token: RwLock<Option<String>>,
}

impl HostToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: String) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token);
        }
    }
}

#[async_trait]
impl TokenProvider for HostToken {
    async fn access_token(&self) -> Result<String, GraphError> {
        let slot = self
            .token
            .read()
            .map_err(|_| GraphError::Token("token lock poisoned".into()))?;
        slot.as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_owned)
            .ok_or_else(|| GraphError::Token("no access token supplied by host".into()))
    }
}

/// `OData` error envelope returned by Graph on failure.
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Optional parts of a Graph request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    /// Absolute URI used instead of `base_url + path` (pagination cursors).
    pub uri: Option<String>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestOptions {
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }
}

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphClient {
    /// Creates a new Graph client rooted at `base_url` (e.g. `.../v1.0`).
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, GraphError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Performs one request and decodes the body as JSON. Empty bodies come
    /// back as `null`, non-JSON bodies as a JSON string.
    #[instrument(skip(self, options))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Value, GraphError> {
        let text = self.send(method, path, options).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(text)),
        }
    }

    /// Performs one request and returns the raw body.
    #[instrument(skip(self, options))]
    pub async fn request_text(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<String, GraphError> {
        self.send(method, path, options).await
    }

    /// Fetches every page of a collection, following `@odata.nextLink` until
    /// the server stops returning one.
    ///
    /// `$top` is only added to the first request. Cursor URLs already carry
    /// the paging state and are followed verbatim.
    #[instrument(skip(self, body, query))]
    pub async fn request_all_pages(
        &self,
        collection: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        mut query: Vec<(String, String)>,
    ) -> Result<Vec<Value>, GraphError> {
        if !query.iter().any(|(name, _)| name == "$top") {
            query.push(("$top".into(), PAGE_SIZE.to_string()));
        }

        let mut options = RequestOptions {
            body,
            query,
            ..Default::default()
        };
        let mut items = Vec::new();

        loop {
            let mut page = self.request(method.clone(), path, options.clone()).await?;
            let next = page.get(NEXT_LINK).and_then(Value::as_str).map(str::to_owned);

            if let Some(Value::Array(values)) = page.get_mut(collection).map(Value::take) {
                items.extend(values);
            }

            match next {
                Some(link) => {
                    debug!("Following cursor: {}", link);
                    options.uri = Some(link);
                    options.query.clear();
                }
                None => return Ok(items),
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<String, GraphError> {
        let url = options
            .uri
            .unwrap_or_else(|| format!("{}{}", self.base_url, path));
        let token = self.tokens.access_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in options.headers {
            headers.insert(name, value);
        }

        let mut request = self
            .http_client
            .request(method, &url)
            .bearer_auth(&token)
            .headers(headers);

        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(body) = options.body.filter(|b| !is_empty_body(b)) {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(api_error(status, text))
        }
    }
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn api_error(status: reqwest::StatusCode, body: String) -> GraphError {
    if let Ok(odata) = serde_json::from_str::<ODataError>(&body) {
        return GraphError::Api {
            status: status.as_u16(),
            code: odata.error.code,
            message: odata.error.message,
        };
    }
    GraphError::Api {
        status: status.as_u16(),
        code: status.canonical_reason().unwrap_or("error").to_string(),
        message: body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn odata_error_envelope_is_unwrapped() {
        let body = r#"{"error":{"code":"ResourceNotFound","message":"gone"}}"#;
        let err = api_error(reqwest::StatusCode::NOT_FOUND, body.into());
        assert!(err.is_not_found());
        match err {
            GraphError::Api { code, message, .. } => {
                assert_eq!(code, "ResourceNotFound");
                assert_eq!(message, "gone");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_error_body_keeps_status_reason() {
        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down".into());
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn empty_bodies_are_not_sent() {
        assert!(is_empty_body(&Value::Null));
        assert!(is_empty_body(&json!({})));
        assert!(!is_empty_body(&json!({ "expirationDateTime": "x" })));
    }

    #[tokio::test]
    async fn host_token_requires_a_value() {
        let token = HostToken::new(None);
        assert!(matches!(token.access_token().await, Err(GraphError::Token(_))));
        token.set("abc".into());
        assert_eq!(token.access_token().await.unwrap(), "abc");
    }
}
