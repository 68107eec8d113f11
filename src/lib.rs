//! # beacon-alerts
//!
//! Presence alerts driven by beacon geofence events.
//!
//! Devices report when a profile enters or exits a beacon's geofence. Those
//! events land in a document store; this crate follows the store's change
//! feed, evaluates every active alert against each event, pushes
//! notifications for the ones that fire, and then either reschedules
//! (sticky) or deletes them.
//!
//! ## Core Concepts
//!
//! - **Alert**: a rule (any user present, surprise appearance, all users
//!   present) plus actions and a stickiness policy
//! - **Presence History**: when a profile was last seen at a beacon
//! - **Dispatcher**: runs one event through every active alert, isolating
//!   failures per alert
//! - **Consumer**: resumable long-poll loop over the change feed
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use beacon_alerts::{
//!     AlertEngine, ChangeFeedConsumer, ConsumerConfig, EventDispatcher,
//!     InMemoryDocumentStore, InMemoryGateway, InMemoryPresenceHistory,
//! };
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let gateway = Arc::new(InMemoryGateway::new());
//! let engine = AlertEngine::builder(store.clone())
//!     .presence(Arc::new(InMemoryPresenceHistory::new()))
//!     .build()?;
//! let dispatcher = EventDispatcher::new(engine, gateway.clone());
//! let mut consumer = ChangeFeedConsumer::new(store, dispatcher, gateway, ConsumerConfig::default())?;
//! consumer.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod document;
pub mod error;
pub mod event;
pub mod ids;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod presence;
pub mod storage;
pub mod time;

pub use alert::{
    ActionPolicy, Alert, AlertAction, AlertEngine, AlertEngineBuilder, AlertKind, AlertRule, AlertStore,
    EngineConfig, Lifecycle, LoadedAlert,
};
pub use document::{Beacon, DocType, Document, Profile};
pub use error::{AlertError, AlertResult, ConfigurationError, DecodeError};
pub use event::{describe_event, GeofenceAction, GeofenceEvent};
pub use ids::{BeaconId, DocId, ProfileId, Revision, Sequence};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use notify::{GatewayError, InMemoryGateway, NotificationGateway, Push};
pub use pipeline::{
    ChangeFeedConsumer, ConsumerConfig, DispatchReport, DispatchStage, EventDispatcher, PollOutcome,
};
pub use presence::{InMemoryPresenceHistory, PresenceHistory, PresenceRecorder};
pub use storage::{DocumentStore, FeedResponse, InMemoryDocumentStore, StorageError};
