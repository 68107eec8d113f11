//! Alert evaluation and lifecycle.
//!
//! The engine decides whether an alert fires for an event, runs the alert's
//! actions, and applies the sticky/non-sticky rule afterwards. It holds no
//! alert state of its own: alerts come from the store on every round.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AlertError, AlertResult, ConfigurationError, DecodeError};
use crate::event::GeofenceEvent;
use crate::ids::{BeaconId, ProfileId, Revision};
use crate::presence::PresenceHistory;
use crate::storage::DocumentStore;
use crate::time::elapsed;

use super::rules::{Alert, AlertAction, AlertRule};
use super::store::{AlertStore, LoadedAlert};

/// How `perform_actions` reacts to a failing action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPolicy {
    /// Stop at the first failure and return it.
    #[default]
    FailFast,
    /// Attempt every action, then return the first failure.
    BestEffort,
}

/// Engine configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub action_policy: ActionPolicy,
}

/// Outcome of `reschedule_or_delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Sticky alert written back with a new activation time.
    Rescheduled {
        /// New `activeOn`.
        active_on: DateTime<Utc>,
        /// Revision of the rewritten document.
        rev: Revision,
    },
    /// Non-sticky alert removed.
    Deleted,
}

/// Builder for `AlertEngine`.
pub struct AlertEngineBuilder {
    store: Arc<dyn DocumentStore>,
    presence: Option<Arc<dyn PresenceHistory>>,
    presence_optional: bool,
    config: EngineConfig,
}

impl AlertEngineBuilder {
    /// Attaches the presence history used by presence-based rules.
    #[must_use]
    pub fn presence(mut self, presence: Arc<dyn PresenceHistory>) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Allows building without a presence history.
    ///
    /// Only any-users-present alerts can then be evaluated; the other
    /// variants fail with a fatal configuration error.
    #[must_use]
    pub fn without_presence(mut self) -> Self {
        self.presence_optional = true;
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates and builds the engine.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::MissingPresenceHistory` if no presence history is
    /// attached and `without_presence` was not requested.
    pub fn build(self) -> Result<AlertEngine, ConfigurationError> {
        if self.presence.is_none() && !self.presence_optional {
            return Err(ConfigurationError::MissingPresenceHistory);
        }
        Ok(AlertEngine {
            alerts: AlertStore::new(self.store),
            presence: self.presence,
            config: self.config,
        })
    }
}

/// Evaluates alerts against geofence events and applies their lifecycle.
pub struct AlertEngine {
    alerts: AlertStore,
    presence: Option<Arc<dyn PresenceHistory>>,
    config: EngineConfig,
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("has_presence", &self.presence.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    /// Starts building an engine over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn DocumentStore>) -> AlertEngineBuilder {
        AlertEngineBuilder {
            store,
            presence: None,
            presence_optional: false,
            config: EngineConfig::default(),
        }
    }

    /// The typed alert store.
    #[must_use]
    pub const fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    /// Active alert snapshot at `now`.
    pub fn active_alerts(&self, now: DateTime<Utc>) -> AlertResult<Vec<LoadedAlert>> {
        self.alerts.load_active(now)
    }

    /// Decides whether `alert` fires for `event`.
    ///
    /// Pure with respect to the alert: nothing is written. "No match" is
    /// `Ok(false)`; errors come only from the presence history, from an
    /// unparseable event timestamp, or from a missing presence history
    /// (fatal).
    pub fn process(&self, alert: &Alert, event: &GeofenceEvent) -> AlertResult<bool> {
        let fired = match &alert.rule {
            AlertRule::AnyUsersPresent { users, beacon } => {
                event.beacon_id == *beacon && users.contains(&event.profile_id)
            }

            AlertRule::SurpriseAppearance {
                users,
                beacons,
                min_last_seen_ago,
            } => {
                if !beacons.contains(&event.beacon_id) || !users.contains(&event.profile_id) {
                    false
                } else {
                    let presence = self.presence_for(alert)?;
                    let now = event.created_at()?;
                    match presence.last_seen(&event.profile_id, &event.beacon_id)? {
                        None => true,
                        Some(seen) => elapsed(seen, now) >= *min_last_seen_ago,
                    }
                }
            }

            AlertRule::AllUsersPresent {
                users,
                beacons,
                window,
            } => {
                if !beacons.contains(&event.beacon_id) || !users.contains(&event.profile_id) {
                    false
                } else {
                    let presence = self.presence_for(alert)?;
                    let now = event.created_at()?;
                    let others = users.iter().filter(|user| **user != event.profile_id);
                    all_seen_within(presence, others, &event.beacon_id, now, *window)?
                }
            }
        };

        debug!(
            alert_id = %alert.id,
            kind = alert.kind().tag(),
            event_id = %event.id,
            fired,
            "alert evaluated"
        );
        Ok(fired)
    }

    /// Invokes `invoke` for each action, in order.
    ///
    /// Under `ActionPolicy::FailFast` the first failure stops the loop and is
    /// returned. Under `ActionPolicy::BestEffort` every action is attempted
    /// and the first failure is returned afterwards.
    pub fn perform_actions<F, E>(&self, alert: &Alert, mut invoke: F) -> AlertResult<()>
    where
        F: FnMut(&AlertAction) -> Result<(), E>,
        E: Into<AlertError>,
    {
        let mut first_err: Option<AlertError> = None;

        for (idx, action) in alert.actions.iter().enumerate() {
            let Err(err) = invoke(action) else {
                continue;
            };
            let err: AlertError = err.into();
            match self.config.action_policy {
                ActionPolicy::FailFast => return Err(err),
                ActionPolicy::BestEffort => {
                    warn!(
                        alert_id = %alert.id,
                        action = idx,
                        recipient = %action.recipient,
                        error = %err,
                        "alert action failed, continuing"
                    );
                    first_err.get_or_insert(err);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Applies the lifecycle rule to a fired alert.
    ///
    /// Sticky alerts are rewritten with `activeOn = now + reactivateAfter`;
    /// others are deleted. Store errors, including revision conflicts, are
    /// returned as-is and never retried.
    ///
    /// # Errors
    ///
    /// `DecodeError::Document` if `reactivateAfter` pushes `activeOn` out of
    /// the representable range; the stored alert is left untouched.
    pub fn reschedule_or_delete(&self, alert: &Alert, now: DateTime<Utc>) -> AlertResult<Lifecycle> {
        if alert.sticky {
            let active_on = now
                .checked_add_signed(alert.reactivate_after)
                .ok_or_else(|| DecodeError::Document {
                    id: alert.id.clone(),
                    message: format!(
                        "reactivateAfter of {}s overflows activeOn",
                        alert.reactivate_after.num_seconds()
                    ),
                })?;
            let rev = self.alerts.reschedule(alert, active_on)?;
            debug!(alert_id = %alert.id, %active_on, "sticky alert rescheduled");
            Ok(Lifecycle::Rescheduled { active_on, rev })
        } else {
            self.alerts.delete(alert)?;
            debug!(alert_id = %alert.id, "alert deleted after firing");
            Ok(Lifecycle::Deleted)
        }
    }

    fn presence_for(&self, alert: &Alert) -> Result<&dyn PresenceHistory, ConfigurationError> {
        self.presence
            .as_deref()
            .ok_or_else(|| ConfigurationError::PresenceRequired {
                alert_id: alert.id.clone(),
            })
    }
}

/// True iff every user was seen at `beacon` no longer than `window` before `now`.
///
/// Short-circuits on the first user that fails. The event's own profile is
/// filtered out by the caller: it is present at `now` by definition.
fn all_seen_within<'a>(
    presence: &dyn PresenceHistory,
    users: impl Iterator<Item = &'a ProfileId>,
    beacon: &BeaconId,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> AlertResult<bool> {
    for user in users {
        match presence.last_seen(user, beacon)? {
            Some(seen) if elapsed(seen, now) <= window => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}
