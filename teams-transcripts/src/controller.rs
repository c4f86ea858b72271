//! Trigger activation hooks and inbound notification handling.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{TeamsError, TeamsResult};
use crate::notification::{self, ChangeNotification};
use crate::store::{StateStore, SubscriptionState};
use crate::subscription::SubscriptionManager;
use crate::trigger::Registration;
use crate::types::NotificationBatch;
use crate::verification;

/// What one inbound batch produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub renewals_requested: usize,
    pub renewed: usize,
    /// Envelopes dropped for carrying the wrong clientState.
    pub rejected: usize,
    /// One entry per change notification, each an independent execution.
    pub events: Vec<ChangeNotification>,
}

/// How `ensure` brought a registration's subscriptions up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    Existing(Vec<String>),
    Created(Vec<String>),
}

impl Ensured {
    pub fn ids(&self) -> &[String] {
        match self {
            Self::Existing(ids) | Self::Created(ids) => ids,
        }
    }
}

pub struct WebhookController {
    manager: SubscriptionManager,
    store: Arc<dyn StateStore>,
}

impl WebhookController {
    pub fn new(manager: SubscriptionManager, store: Arc<dyn StateStore>) -> Self {
        Self { manager, store }
    }

    pub fn subscription_ids(&self, registration_id: &str) -> TeamsResult<Vec<String>> {
        Ok(self
            .store
            .load(registration_id)?
            .map(|s| s.subscription_ids)
            .unwrap_or_default())
    }

    /// True when live subscriptions already cover this registration. On
    /// success the stored ID set is replaced by the live server-side set.
    pub async fn check_exists(&self, reg: &Registration) -> bool {
        let required = match reg.trigger.resource_paths() {
            Ok(r) => r,
            Err(e) => {
                warn!(registration = %reg.id, error = %e, "Cannot derive resources");
                return false;
            }
        };

        match self.manager.verify_existing(&reg.webhook_url, &required).await {
            Ok(v) if v.valid => {
                let state = SubscriptionState {
                    subscription_ids: v.matching_ids,
                };
                if let Err(e) = self.store.save(&reg.id, &state) {
                    warn!(registration = %reg.id, error = %e, "Failed to refresh stored subscriptions");
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(registration = %reg.id, error = %e, "Failed to list subscriptions");
                false
            }
        }
    }

    /// Creates every subscription the registration needs.
    ///
    /// IDs of subscriptions that were created are persisted even when a
    /// sibling creation fails, so a later `delete` can tear them down. The
    /// first failure is then returned.
    pub async fn create(&self, reg: &Registration) -> TeamsResult<Vec<String>> {
        if !reg.webhook_url.starts_with("https://") {
            return Err(TeamsError::Config(format!(
                "Invalid notification URL \"{}\": Microsoft Graph requires an HTTPS URL",
                reg.webhook_url
            )));
        }
        let resources = reg.trigger.resource_paths()?;

        let results = self
            .manager
            .create_for_resources(&reg.target(), &resources)
            .await;

        let created = results.ids();
        let state = self.record_created(&reg.id, &created).map_err(|e| {
            warn!(registration = %reg.id, ids = ?created, error = %e, "Created subscriptions not recorded");
            TeamsError::Store(format!(
                "{e}; unrecorded subscriptions: {}",
                created.join(", ")
            ))
        })?;

        let mut failures = results.failures.into_iter();
        if let Some(first) = failures.next() {
            for other in failures {
                warn!(registration = %reg.id, error = %other, "Subscription creation failed");
            }
            return Err(first);
        }

        info!(
            registration = %reg.id,
            count = state.subscription_ids.len(),
            "Registration subscribed"
        );
        Ok(state.subscription_ids)
    }

    /// Re-activates a registration after a restart or an earlier failure:
    /// reuses live subscriptions when Graph still has them, creates them
    /// otherwise.
    pub async fn ensure(&self, reg: &Registration) -> TeamsResult<Ensured> {
        if self.check_exists(reg).await {
            return Ok(Ensured::Existing(self.subscription_ids(&reg.id)?));
        }
        self.create(reg).await.map(Ensured::Created)
    }

    fn record_created(&self, registration_id: &str, created: &[String]) -> TeamsResult<SubscriptionState> {
        let mut state = self.store.load(registration_id)?.unwrap_or_default();
        for id in created {
            if !state.subscription_ids.contains(id) {
                state.subscription_ids.push(id.clone());
            }
        }
        self.store.save(registration_id, &state)?;
        Ok(state)
    }

    /// Deletes every stored subscription. Returns `false` instead of failing
    /// when a deletion cannot be confirmed; only the unconfirmed IDs are kept
    /// so the host can retry.
    pub async fn delete(&self, registration_id: &str) -> bool {
        let state = match self.store.load(registration_id) {
            Ok(Some(s)) => s,
            Ok(None) => return true,
            Err(e) => {
                warn!(registration = registration_id, error = %e, "Failed to load stored subscriptions");
                return false;
            }
        };

        let outcomes = join_all(
            state
                .subscription_ids
                .iter()
                .map(|id| self.manager.delete(id)),
        )
        .await;

        let mut unconfirmed = Vec::new();
        for (id, outcome) in state.subscription_ids.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(registration = registration_id, error = %e, "Subscription deletion failed");
                unconfirmed.push(id.clone());
            }
        }

        let result = if unconfirmed.is_empty() {
            self.store.clear(registration_id)
        } else {
            self.store.save(
                registration_id,
                &SubscriptionState {
                    subscription_ids: unconfirmed.clone(),
                },
            )
        };
        if let Err(e) = result {
            warn!(registration = registration_id, error = %e, "Failed to update stored subscriptions");
            return false;
        }
        unconfirmed.is_empty()
    }

    /// Handles one notification batch: renews subscriptions named by
    /// lifecycle notifications (all renewals finish before this returns) and
    /// hands back every change notification.
    pub async fn handle_batch(&self, reg: &Registration, batch: NotificationBatch) -> BatchOutcome {
        let tracked = self.subscription_ids(&reg.id).unwrap_or_default();

        let mut rejected = 0;
        let mut accepted = Vec::with_capacity(batch.value.len());
        for envelope in batch.value {
            let authentic = match envelope.client_state.as_deref() {
                Some(presented) => verification::client_state_matches(&reg.client_state, presented),
                // Graph omits clientState on some lifecycle events, never on changes.
                None => notification::is_lifecycle(&envelope),
            };
            if !authentic {
                warn!(
                    registration = %reg.id,
                    subscription_id = %envelope.subscription_id,
                    "Rejected notification with missing or mismatched clientState"
                );
                rejected += 1;
                continue;
            }
            if !tracked.contains(&envelope.subscription_id) {
                debug!(
                    registration = %reg.id,
                    subscription_id = %envelope.subscription_id,
                    "Notification for untracked subscription"
                );
            }
            accepted.push(envelope);
        }

        let (lifecycle, events) = notification::partition(accepted);

        for n in &lifecycle {
            info!(
                subscription_id = %n.subscription_id,
                lifecycle_event = n.lifecycle_event.as_deref().unwrap_or("expiration warning"),
                "Received lifecycle notification"
            );
        }
        let renewals = join_all(
            lifecycle
                .iter()
                .map(|n| self.manager.renew(&n.subscription_id)),
        )
        .await;

        BatchOutcome {
            renewals_requested: lifecycle.len(),
            renewed: renewals.iter().filter(|r| r.is_some()).count(),
            rejected,
            events,
        }
    }
}
