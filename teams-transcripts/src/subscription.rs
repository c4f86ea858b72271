//! Graph change-notification subscription lifecycle: create, renew, delete
//! and verify leases.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use reqwest::Method;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{GraphError, TeamsError, TeamsResult};
use crate::graph::{GraphClient, RequestOptions};
use crate::types::{CreateSubscriptionBody, RenewSubscriptionBody, Subscription};

/// Working lease length applied to every subscription.
pub const DEFAULT_LEASE_MINUTES: i64 = 1008;
/// Leases longer than this require a lifecycle notification URL.
pub const LIFECYCLE_URL_THRESHOLD_MINUTES: i64 = 60;
/// Subscriptions closer than this to expiry are treated as gone.
pub const EXPIRY_MARGIN_MINUTES: i64 = 5;

const CHANGE_TYPE_CREATED: &str = "created";

/// Where Graph should deliver notifications, and the secret it echoes back.
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub url: String,
    pub client_state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Graph answered 404; the subscription was already gone.
    AlreadyGone,
}

/// Every outcome of a multi-resource creation. Failures never discard the
/// subscriptions that were created alongside them.
#[derive(Debug, Default)]
pub struct CreateResults {
    pub created: Vec<Subscription>,
    pub failures: Vec<TeamsError>,
}

impl CreateResults {
    pub fn ids(&self) -> Vec<String> {
        self.created.iter().map(|s| s.id.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub matching_ids: Vec<String>,
}

pub fn requires_lifecycle_url(lease: Duration) -> bool {
    lease > Duration::minutes(LIFECYCLE_URL_THRESHOLD_MINUTES)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct SubscriptionManager {
    graph: Arc<GraphClient>,
    lease: Duration,
}

impl SubscriptionManager {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self::with_lease_minutes(graph, DEFAULT_LEASE_MINUTES)
    }

    pub fn with_lease_minutes(graph: Arc<GraphClient>, minutes: i64) -> Self {
        Self {
            graph,
            lease: Duration::minutes(minutes),
        }
    }

    /// Request body for a new subscription expiring one lease after `now`.
    pub fn build_request(
        &self,
        target: &NotificationTarget,
        resource: &str,
        now: DateTime<Utc>,
    ) -> CreateSubscriptionBody {
        let expiration = now + self.lease;
        let lifecycle_notification_url =
            requires_lifecycle_url(expiration - now).then(|| target.url.clone());

        CreateSubscriptionBody {
            change_type: CHANGE_TYPE_CREATED.into(),
            notification_url: target.url.clone(),
            resource: resource.into(),
            expiration_date_time: format_timestamp(expiration),
            client_state: target.client_state.clone(),
            lifecycle_notification_url,
        }
    }

    #[instrument(skip(self, target))]
    pub async fn create(
        &self,
        target: &NotificationTarget,
        resource: &str,
    ) -> TeamsResult<Subscription> {
        let create_error = |source: GraphError| TeamsError::SubscriptionCreate {
            resource: resource.to_string(),
            source,
        };

        let body = self.build_request(target, resource, Utc::now());
        let body = serde_json::to_value(&body).map_err(|e| create_error(e.into()))?;

        let value = self
            .graph
            .request(
                Method::POST,
                "/subscriptions",
                RequestOptions::default().with_body(body),
            )
            .await
            .map_err(create_error)?;
        let subscription: Subscription =
            serde_json::from_value(value).map_err(|e| create_error(e.into()))?;

        info!(
            subscription_id = %subscription.id,
            resource,
            expires_at = %subscription.expiration_date_time,
            "Created subscription"
        );
        Ok(subscription)
    }

    /// Creates one subscription per resource concurrently and collects every
    /// result. One failure does not cancel or discard its siblings.
    pub async fn create_for_resources(
        &self,
        target: &NotificationTarget,
        resources: &[String],
    ) -> CreateResults {
        let outcomes = join_all(resources.iter().map(|r| self.create(target, r))).await;

        let mut results = CreateResults::default();
        for outcome in outcomes {
            match outcome {
                Ok(subscription) => results.created.push(subscription),
                Err(e) => results.failures.push(e),
            }
        }
        results
    }

    /// Extends the lease by another full window. Failures are logged and
    /// swallowed: a missed renewal only lets the subscription lapse.
    #[instrument(skip(self))]
    pub async fn renew(&self, subscription_id: &str) -> Option<Subscription> {
        match self.try_renew(subscription_id).await {
            Ok(subscription) => {
                info!(
                    subscription_id,
                    expires_at = %subscription.expiration_date_time,
                    "Renewed subscription"
                );
                Some(subscription)
            }
            Err(e) => {
                warn!(subscription_id, error = %e, "Failed to renew subscription");
                None
            }
        }
    }

    async fn try_renew(&self, subscription_id: &str) -> Result<Subscription, GraphError> {
        let body = RenewSubscriptionBody {
            expiration_date_time: format_timestamp(Utc::now() + self.lease),
        };
        let value = self
            .graph
            .request(
                Method::PATCH,
                &format!("/subscriptions/{subscription_id}"),
                RequestOptions::default().with_body(serde_json::to_value(&body)?),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Deletes a subscription. A 404 counts as success.
    #[instrument(skip(self))]
    pub async fn delete(&self, subscription_id: &str) -> TeamsResult<DeleteOutcome> {
        match self
            .graph
            .request(
                Method::DELETE,
                &format!("/subscriptions/{subscription_id}"),
                RequestOptions::default(),
            )
            .await
        {
            Ok(_) => {
                info!(subscription_id, "Deleted subscription");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if e.is_not_found() => {
                info!(subscription_id, "Subscription already gone");
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(source) => Err(TeamsError::SubscriptionDelete {
                id: subscription_id.to_string(),
                source,
            }),
        }
    }

    /// Every subscription visible to the application, across all pages.
    pub async fn list(&self) -> TeamsResult<Vec<Subscription>> {
        let items = self
            .graph
            .request_all_pages("value", Method::GET, "/subscriptions", None, Vec::new())
            .await?;

        Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Subscription>(item) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable subscription");
                    None
                }
            })
            .collect())
    }

    /// Checks whether live subscriptions already cover `required` for this
    /// webhook URL.
    pub async fn verify_existing(
        &self,
        webhook_url: &str,
        required: &[String],
    ) -> TeamsResult<Verification> {
        let subscriptions = self.list().await?;
        Ok(select_valid(&subscriptions, webhook_url, required, Utc::now()))
    }
}

/// Subscriptions targeting `webhook_url` with more than the safety margin
/// left, and whether their resources cover `required`.
pub fn select_valid(
    subscriptions: &[Subscription],
    webhook_url: &str,
    required: &[String],
    now: DateTime<Utc>,
) -> Verification {
    let margin = Duration::minutes(EXPIRY_MARGIN_MINUTES);
    let live: Vec<&Subscription> = subscriptions
        .iter()
        .filter(|s| s.notification_url == webhook_url)
        .filter(|s| s.expiration_date_time - now > margin)
        .collect();

    let covered: HashSet<&str> = live.iter().map(|s| s.resource.as_str()).collect();

    Verification {
        valid: required.iter().all(|r| covered.contains(r.as_str())),
        matching_ids: live.iter().map(|s| s.id.clone()).collect(),
    }
}
