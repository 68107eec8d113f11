use std::sync::Arc;

use chrono::{Duration, Utc};

use beacon_alerts::{
    Alert, AlertEngine, AlertRule, Beacon, BeaconId, ChangeFeedConsumer, ConsumerConfig, DocId, DocumentStore,
    EventDispatcher, GeofenceAction, GeofenceEvent, InMemoryDocumentStore, InMemoryGateway,
    InMemoryPresenceHistory, NotificationGateway, PollOutcome, PresenceHistory, PresenceRecorder, Profile, ProfileId,
    Sequence,
};

fn consumer(
    store: &Arc<InMemoryDocumentStore>,
    gateway: &Arc<InMemoryGateway>,
    engine: AlertEngine,
    since: Option<Sequence>,
) -> ChangeFeedConsumer {
    let gw = Arc::clone(gateway) as Arc<dyn NotificationGateway>;
    let dispatcher = EventDispatcher::new(engine, Arc::clone(&gw));
    let config = ConsumerConfig {
        since,
        poll_timeout_ms: 25,
    };
    ChangeFeedConsumer::new(Arc::clone(store) as Arc<dyn DocumentStore>, dispatcher, gw, config).unwrap()
}

fn engine_for(store: &Arc<InMemoryDocumentStore>, presence: &Arc<InMemoryPresenceHistory>) -> AlertEngine {
    AlertEngine::builder(Arc::clone(store) as Arc<dyn DocumentStore>)
        .presence(Arc::clone(presence) as Arc<dyn PresenceHistory>)
        .build()
        .unwrap()
}

#[test]
fn change_feed_drives_alerts_end_to_end() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let gateway = Arc::new(InMemoryGateway::new());
    let presence = Arc::new(InMemoryPresenceHistory::new());

    store.put(Beacon::new("b1", "the office").to_document().unwrap(), None).unwrap();
    let mut boss = Profile::new("boss", "Boss");
    boss.device_tokens = vec!["boss-phone".to_string()];
    store.put(boss.to_document().unwrap(), None).unwrap();

    let alert = Alert::new(AlertRule::AnyUsersPresent {
        users: [ProfileId::from("foo")].into_iter().collect(),
        beacon: BeaconId::from("b1"),
    })
    .with_id("welcome")
    .with_action("boss", "foo entered the office")
    .sticky(Duration::hours(8));

    let engine = engine_for(&store, &presence);
    engine.alerts().insert(&alert).unwrap();
    let mut consumer = consumer(&store, &gateway, engine, Some(Sequence::zero()));

    // First batch: beacon, profile, alert. Only the profile is routed anywhere.
    let outcome = consumer.poll_once().unwrap();
    assert!(matches!(outcome, PollOutcome::Processed { changes: 3, .. }));
    assert_eq!(gateway.registrations(), vec![(ProfileId::from("boss"), "boss-phone".to_string())]);
    assert!(gateway.pushes().is_empty());

    let stranger = GeofenceEvent::new(GeofenceAction::Entry, "b1", "stranger", Utc::now());
    store.put(stranger.to_document().unwrap(), None).unwrap();
    consumer.poll_once().unwrap();
    assert!(gateway.pushes().is_empty());

    let foo = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
    store.put(foo.to_document().unwrap(), None).unwrap();
    consumer.poll_once().unwrap();

    let pushes = gateway.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].recipient, ProfileId::from("boss"));
    assert_eq!(pushes[0].message, "foo entered the office");

    // Rescheduled, not deleted.
    let stored = store.get(&DocId::from("welcome")).unwrap().unwrap();
    assert!(stored.field("activeOn").is_some());

    // The reschedule write shows up next; it routes nowhere.
    let outcome = consumer.poll_once().unwrap();
    assert!(matches!(outcome, PollOutcome::Processed { changes: 1, .. }));

    // Sleeping until the reactivation time: a second entry does not fire.
    let again = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
    store.put(again.to_document().unwrap(), None).unwrap();
    consumer.poll_once().unwrap();
    assert_eq!(gateway.pushes().len(), 1);
}

#[test]
fn consumer_resumes_from_configured_cursor() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let gateway = Arc::new(InMemoryGateway::new());
    let presence = Arc::new(InMemoryPresenceHistory::new());

    let engine = engine_for(&store, &presence);
    engine
        .alerts()
        .insert(
            &Alert::new(AlertRule::AnyUsersPresent {
                users: [ProfileId::from("foo")].into_iter().collect(),
                beacon: BeaconId::from("b1"),
            })
            .with_action("boss", "foo")
            .sticky(Duration::zero()),
        )
        .unwrap();

    let old = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
    store.put(old.to_document().unwrap(), None).unwrap();
    let checkpoint = store.last_sequence().unwrap();

    let mut consumer = consumer(&store, &gateway, engine, Some(checkpoint.clone()));
    assert_eq!(consumer.since(), &checkpoint);
    assert_eq!(consumer.poll_once().unwrap(), PollOutcome::TimedOut);
    assert!(gateway.pushes().is_empty());

    let new = GeofenceEvent::new(GeofenceAction::Exit, "b1", "foo", Utc::now());
    store.put(new.to_document().unwrap(), None).unwrap();
    let outcome = consumer.poll_once().unwrap();
    assert!(matches!(outcome, PollOutcome::Processed { changes: 1, .. }));
    assert_eq!(gateway.pushes().len(), 1);
    assert_ne!(consumer.since(), &checkpoint);
}

#[test]
fn run_stops_on_missing_presence_history() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let gateway = Arc::new(InMemoryGateway::new());

    let engine = AlertEngine::builder(Arc::clone(&store) as Arc<dyn DocumentStore>)
        .without_presence()
        .build()
        .unwrap();
    engine
        .alerts()
        .insert(&Alert::new(AlertRule::SurpriseAppearance {
            users: [ProfileId::from("foo")].into_iter().collect(),
            beacons: [BeaconId::from("b1")].into_iter().collect(),
            min_last_seen_ago: Duration::days(14),
        }))
        .unwrap();
    let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", "foo", Utc::now());
    store.put(ev.to_document().unwrap(), None).unwrap();

    let mut consumer = consumer(&store, &gateway, engine, Some(Sequence::zero()));
    let err = consumer.run().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(consumer.since(), &Sequence::zero());
}

fn entry(store: &InMemoryDocumentStore, profile: &str) {
    let ev = GeofenceEvent::new(GeofenceAction::Entry, "b1", profile, Utc::now());
    store.put(ev.to_document().unwrap(), None).unwrap();
}

#[test]
fn all_users_present_fires_from_recorded_sightings() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let gateway = Arc::new(InMemoryGateway::new());
    let presence = Arc::new(InMemoryPresenceHistory::new());

    let engine = engine_for(&store, &presence);
    engine
        .alerts()
        .insert(
            &Alert::new(AlertRule::AllUsersPresent {
                users: [ProfileId::from("foo"), ProfileId::from("bar")].into_iter().collect(),
                beacons: [BeaconId::from("b1")].into_iter().collect(),
                window: Duration::hours(1),
            })
            .with_action("boss", "foo and bar are both in"),
        )
        .unwrap();
    let mut consumer = consumer(&store, &gateway, engine, None)
        .record_presence(Arc::clone(&presence) as Arc<dyn PresenceRecorder>);

    // foo alone: bar has never been seen.
    entry(&store, "foo");
    consumer.poll_once().unwrap();
    assert!(gateway.pushes().is_empty());
    assert!(presence
        .last_seen(&ProfileId::from("foo"), &BeaconId::from("b1"))
        .unwrap()
        .is_some());

    // bar arrives while foo's sighting is still inside the window.
    entry(&store, "bar");
    consumer.poll_once().unwrap();
    let pushes = gateway.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].message, "foo and bar are both in");
}

#[test]
fn surprise_appearance_compares_against_previous_sighting() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let gateway = Arc::new(InMemoryGateway::new());
    let presence = Arc::new(InMemoryPresenceHistory::new());

    let engine = engine_for(&store, &presence);
    engine
        .alerts()
        .insert(
            &Alert::new(AlertRule::SurpriseAppearance {
                users: [ProfileId::from("foo")].into_iter().collect(),
                beacons: [BeaconId::from("b1")].into_iter().collect(),
                min_last_seen_ago: Duration::days(14),
            })
            .with_action("boss", "foo is back")
            .sticky(Duration::zero()),
        )
        .unwrap();
    let mut consumer = consumer(&store, &gateway, engine, None)
        .record_presence(Arc::clone(&presence) as Arc<dyn PresenceRecorder>);

    // First ever sighting is a surprise.
    entry(&store, "foo");
    consumer.poll_once().unwrap();
    assert_eq!(gateway.pushes().len(), 1);

    // The reschedule write comes through on its own.
    consumer.poll_once().unwrap();

    // Seen moments ago: not a surprise any more.
    entry(&store, "foo");
    consumer.poll_once().unwrap();
    assert_eq!(gateway.pushes().len(), 1);
}
