//! Event dispatcher.
//!
//! For one geofence event: load the active alert snapshot, evaluate every
//! alert in store order, run the actions of those that fire, then apply
//! their lifecycle. Each step fails independently; a failure is logged,
//! recorded in the `DispatchReport`, and the round moves on.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertEngine};
use crate::error::{AlertError, AlertResult};
use crate::event::GeofenceEvent;
use crate::ids::DocId;
use crate::notify::NotificationGateway;

/// Step of the per-alert pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchStage {
    /// Fetching or decoding the alert document.
    Load,
    /// Evaluating the rule.
    Process,
    /// Invoking the alert's actions.
    Actions,
    /// Rescheduling or deleting the fired alert.
    Lifecycle,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Process => "process",
            Self::Actions => "actions",
            Self::Lifecycle => "lifecycle",
        })
    }
}

/// A discarded per-alert error.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertFailure {
    pub alert_id: DocId,
    pub stage: DispatchStage,
    pub message: String,
}

/// What happened while dispatching one event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Alerts whose rule was evaluated (successfully or not).
    pub evaluated: usize,
    /// Alerts that fired, in evaluation order.
    pub fired: Vec<DocId>,
    pub failures: Vec<AlertFailure>,
}

impl DispatchReport {
    /// True if no step failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, alert_id: &DocId, stage: DispatchStage, err: &AlertError) {
        self.failures.push(AlertFailure {
            alert_id: alert_id.clone(),
            stage,
            message: err.to_string(),
        });
    }
}

/// Feeds geofence events to the alert engine and the notification gateway.
pub struct EventDispatcher {
    engine: AlertEngine,
    gateway: Arc<dyn NotificationGateway>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(engine: AlertEngine, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { engine, gateway }
    }

    /// The engine used for evaluation and lifecycle.
    #[must_use]
    pub const fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Dispatches `event` against the alerts active right now.
    pub fn dispatch(&self, event: &GeofenceEvent) -> AlertResult<DispatchReport> {
        self.dispatch_at(event, Utc::now())
    }

    /// Dispatches `event` against the alerts active at `now`.
    ///
    /// # Errors
    ///
    /// - the active-alert query fails (nothing was evaluated)
    /// - a fatal error surfaces from evaluation; the round stops there
    pub fn dispatch_at(&self, event: &GeofenceEvent, now: DateTime<Utc>) -> AlertResult<DispatchReport> {
        let loaded = self.engine.active_alerts(now)?;
        debug!(event_id = %event.id, active = loaded.len(), "dispatching geofence event");

        let mut report = DispatchReport::default();
        for entry in loaded {
            let alert = match entry.alert {
                Ok(alert) => alert,
                Err(err) => {
                    warn!(alert_id = %entry.id, error = %err, "skipping alert that failed to load");
                    report.fail(&entry.id, DispatchStage::Load, &err);
                    continue;
                }
            };

            report.evaluated += 1;
            let fired = match self.engine.process(&alert, event) {
                Ok(fired) => fired,
                Err(err) if err.is_fatal() => {
                    error!(alert_id = %alert.id, error = %err, "fatal error evaluating alert");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        alert_id = %alert.id,
                        event_id = %event.id,
                        error = %err,
                        retryable = err.is_retryable(),
                        "alert failed to process event"
                    );
                    report.fail(&alert.id, DispatchStage::Process, &err);
                    continue;
                }
            };

            if !fired {
                continue;
            }

            info!(alert_id = %alert.id, kind = alert.kind().tag(), event_id = %event.id, "alert fired");
            report.fired.push(alert.id.clone());
            self.fire(&alert, now, &mut report);
        }

        Ok(report)
    }

    fn fire(&self, alert: &Alert, now: DateTime<Utc>, report: &mut DispatchReport) {
        let gateway = &self.gateway;
        let actions = self.engine.perform_actions(alert, |action| {
            debug!(alert_id = %alert.id, recipient = %action.recipient, "invoking alert action");
            gateway.push(&action.recipient, &action.message)
        });
        if let Err(err) = actions {
            warn!(alert_id = %alert.id, error = %err, retryable = err.is_retryable(), "alert failed to perform actions");
            report.fail(&alert.id, DispatchStage::Actions, &err);
        }

        if let Err(err) = self.engine.reschedule_or_delete(alert, now) {
            error!(alert_id = %alert.id, error = %err, "unable to reschedule or delete alert");
            report.fail(&alert.id, DispatchStage::Lifecycle, &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use std::time::Duration as StdDuration;

    use chrono::Duration;
    use serde_json::json;

    use crate::alert::AlertRule;
    use crate::document::Document;
    use crate::event::GeofenceAction;
    use crate::ids::{BeaconId, ProfileId, Revision, Sequence};
    use crate::notify::InMemoryGateway;
    use crate::presence::InMemoryPresenceHistory;
    use crate::storage::{DocumentStore, FeedResponse, InMemoryDocumentStore, StorageError};

    /// Another writer updates `contended` right after every read of it.
    struct ContendedStore {
        inner: InMemoryDocumentStore,
        contended: DocId,
    }

    impl DocumentStore for ContendedStore {
        fn get(&self, id: &DocId) -> Result<Option<Document>, StorageError> {
            let doc = self.inner.get(id)?;
            if let Some(current) = doc.as_ref().filter(|_| *id == self.contended) {
                self.inner.put(current.clone(), current.rev().as_ref())?;
            }
            Ok(doc)
        }

        fn put(&self, document: Document, expected: Option<&Revision>) -> Result<Revision, StorageError> {
            self.inner.put(document, expected)
        }

        fn delete(&self, id: &DocId, rev: &Revision) -> Result<(), StorageError> {
            self.inner.delete(id, rev)
        }

        fn changes_since(&self, since: &Sequence, timeout: StdDuration) -> Result<FeedResponse, StorageError> {
            self.inner.changes_since(since, timeout)
        }

        fn last_sequence(&self) -> Result<Sequence, StorageError> {
            self.inner.last_sequence()
        }

        fn list_active_alerts(&self, now: DateTime<Utc>) -> Result<Vec<DocId>, StorageError> {
            self.inner.list_active_alerts(now)
        }
    }

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        gateway: Arc<InMemoryGateway>,
        dispatcher: EventDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let gateway = Arc::new(InMemoryGateway::new());
        let engine = AlertEngine::builder(Arc::clone(&store) as Arc<dyn DocumentStore>)
            .presence(Arc::new(InMemoryPresenceHistory::new()))
            .build()
            .unwrap();
        let dispatcher = EventDispatcher::new(engine, Arc::clone(&gateway) as Arc<dyn NotificationGateway>);
        Fixture {
            store,
            gateway,
            dispatcher,
        }
    }

    fn any_users(id: &str, beacon: &str, users: &[&str]) -> Alert {
        Alert::new(AlertRule::AnyUsersPresent {
            users: users.iter().copied().map(ProfileId::from).collect::<BTreeSet<_>>(),
            beacon: BeaconId::from(beacon),
        })
        .with_id(id)
    }

    #[test]
    fn fired_alert_pushes_and_is_deleted() {
        let fx = fixture();
        let alert = any_users("a1", "b1", &["foo"]).with_action("boss", "foo arrived");
        fx.dispatcher.engine().alerts().insert(&alert).unwrap();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
        let report = fx.dispatcher.dispatch(&ev).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.fired, vec![DocId::from("a1")]);
        let pushes = fx.gateway.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].recipient, ProfileId::from("boss"));
        assert!(fx.store.get(&DocId::from("a1")).unwrap().is_none());
    }

    #[test]
    fn unfired_alert_is_left_untouched() {
        let fx = fixture();
        fx.dispatcher
            .engine()
            .alerts()
            .insert(&any_users("a1", "b1", &["foo"]).with_action("boss", "hi"))
            .unwrap();
        let before = fx.store.get(&DocId::from("a1")).unwrap().unwrap().rev();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "stranger", Utc::now());
        let report = fx.dispatcher.dispatch(&ev).unwrap();

        assert!(report.fired.is_empty());
        assert!(fx.gateway.pushes().is_empty());
        assert_eq!(fx.store.get(&DocId::from("a1")).unwrap().unwrap().rev(), before);
    }

    #[test]
    fn action_failure_still_applies_lifecycle() {
        let fx = fixture();
        fx.gateway.fail_for("boss").unwrap();
        let alert = any_users("a1", "b1", &["foo"])
            .with_action("boss", "one")
            .sticky(Duration::minutes(10));
        fx.dispatcher.engine().alerts().insert(&alert).unwrap();

        let now = Utc::now();
        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", now);
        let report = fx.dispatcher.dispatch_at(&ev, now).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, DispatchStage::Actions);
        let stored = fx.dispatcher.engine().alerts().get(&alert.id).unwrap().unwrap();
        assert_eq!(
            stored.active_on.map(|t| t.timestamp()),
            Some((now + Duration::minutes(10)).timestamp())
        );
    }

    #[test]
    fn fatal_evaluation_error_stops_the_round() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let gateway = Arc::new(InMemoryGateway::new());
        let engine = AlertEngine::builder(Arc::clone(&store) as Arc<dyn DocumentStore>)
            .without_presence()
            .build()
            .unwrap();
        let dispatcher = EventDispatcher::new(engine, Arc::clone(&gateway) as Arc<dyn NotificationGateway>);

        let surprise = Alert::new(AlertRule::SurpriseAppearance {
            users: [ProfileId::from("foo")].into_iter().collect(),
            beacons: [BeaconId::from("b1")].into_iter().collect(),
            min_last_seen_ago: Duration::days(14),
        })
        .with_id("first");
        dispatcher.engine().alerts().insert(&surprise).unwrap();
        dispatcher
            .engine()
            .alerts()
            .insert(&any_users("second", "b1", &["foo"]).with_action("boss", "hi"))
            .unwrap();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
        let err = dispatcher.dispatch(&ev).unwrap_err();
        assert!(err.is_fatal());
        assert!(gateway.pushes().is_empty());
    }

    #[test]
    fn revision_conflict_is_reported_and_round_continues() {
        let store = Arc::new(ContendedStore {
            inner: InMemoryDocumentStore::new(),
            contended: DocId::from("raced"),
        });
        let gateway = Arc::new(InMemoryGateway::new());
        let engine = AlertEngine::builder(Arc::clone(&store) as Arc<dyn DocumentStore>)
            .without_presence()
            .build()
            .unwrap();
        let dispatcher = EventDispatcher::new(engine, Arc::clone(&gateway) as Arc<dyn NotificationGateway>);
        dispatcher
            .engine()
            .alerts()
            .insert(&any_users("raced", "b1", &["foo"]).with_action("boss", "one"))
            .unwrap();
        dispatcher
            .engine()
            .alerts()
            .insert(&any_users("calm", "b1", &["foo"]).with_action("boss", "two"))
            .unwrap();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
        let report = dispatcher.dispatch(&ev).unwrap();

        assert_eq!(report.fired, vec![DocId::from("raced"), DocId::from("calm")]);
        assert_eq!(
            report.failures.iter().map(|f| (f.alert_id.as_str(), f.stage)).collect::<Vec<_>>(),
            vec![("raced", DispatchStage::Lifecycle)]
        );
        assert_eq!(gateway.pushes().len(), 2);
        assert!(store.inner.get(&DocId::from("raced")).unwrap().is_some());
        assert!(store.inner.get(&DocId::from("calm")).unwrap().is_none());
    }

    #[test]
    fn unrepresentable_reactivation_is_a_lifecycle_failure() {
        let fx = fixture();
        fx.store
            .put(
                Document::new(json!({
                    "_id": "forever",
                    "type": "any_users_present_alert",
                    "sticky": true,
                    "reactivateAfter": 10_000_000_000_000_i64,
                    "users": ["foo"],
                    "beacon": "b1"
                }))
                .unwrap(),
                None,
            )
            .unwrap();
        fx.dispatcher
            .engine()
            .alerts()
            .insert(&any_users("next", "b1", &["foo"]).with_action("boss", "hi"))
            .unwrap();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
        let report = fx.dispatcher.dispatch(&ev).unwrap();

        assert_eq!(report.fired, vec![DocId::from("forever"), DocId::from("next")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].alert_id, DocId::from("forever"));
        assert_eq!(report.failures[0].stage, DispatchStage::Lifecycle);
        assert!(fx.store.get(&DocId::from("next")).unwrap().is_none());
    }

    #[test]
    fn deferred_alert_waits_for_its_activation_time() {
        let fx = fixture();
        let now = Utc::now();
        let alert = any_users("later", "b1", &["foo"])
            .with_action("boss", "hi")
            .active_from(now + Duration::hours(1));
        fx.dispatcher.engine().alerts().insert(&alert).unwrap();

        let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", now);
        let report = fx.dispatcher.dispatch_at(&ev, now).unwrap();
        assert_eq!(report.evaluated, 0);

        let report = fx.dispatcher.dispatch_at(&ev, now + Duration::hours(1)).unwrap();
        assert_eq!(report.fired, vec![DocId::from("later")]);
        assert_eq!(fx.gateway.pushes().len(), 1);
    }

    #[test]
    fn stage_names() {
        assert_eq!(DispatchStage::Lifecycle.to_string(), "lifecycle");
        assert_eq!(DispatchStage::Load.to_string(), "load");
    }
}
