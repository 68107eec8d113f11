//! Presence history: when was a profile last seen at a beacon.
//!
//! The engine only reads the history, through the `PresenceHistory` trait
//! injected at construction. The change-feed consumer writes it through
//! `PresenceRecorder` once an event has been dispatched.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::DecodeError;
use crate::event::GeofenceEvent;
use crate::ids::{BeaconId, ProfileId};
use crate::storage::StorageError;

/// Last-seen lookup.
pub trait PresenceHistory: Send + Sync {
    /// When `profile` was last seen at `beacon`, or `None` if never.
    fn last_seen(&self, profile: &ProfileId, beacon: &BeaconId) -> Result<Option<DateTime<Utc>>, StorageError>;
}

/// Write side of the presence history.
pub trait PresenceRecorder: Send + Sync {
    /// Records the sighting carried by `event`.
    fn record_event(&self, event: &GeofenceEvent) -> Result<(), StorageError>;
}

/// In-memory presence history keyed by (profile, beacon).
#[derive(Debug, Default)]
pub struct InMemoryPresenceHistory {
    seen: RwLock<HashMap<(ProfileId, BeaconId), DateTime<Utc>>>,
}

impl InMemoryPresenceHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting. Older sightings never overwrite newer ones.
    pub fn record(&self, profile: &ProfileId, beacon: &BeaconId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut seen = self
            .seen
            .write()
            .map_err(|_| StorageError::Backend("poisoned lock: presence".to_string()))?;
        seen.entry((profile.clone(), beacon.clone()))
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
        Ok(())
    }
}

impl PresenceRecorder for InMemoryPresenceHistory {
    /// Fails with `StorageError::Serialization` if the event timestamp does
    /// not parse.
    fn record_event(&self, event: &GeofenceEvent) -> Result<(), StorageError> {
        let at = event
            .created_at()
            .map_err(|e: DecodeError| StorageError::Serialization(e.to_string()))?;
        self.record(&event.profile_id, &event.beacon_id, at)
    }
}

impl PresenceHistory for InMemoryPresenceHistory {
    fn last_seen(&self, profile: &ProfileId, beacon: &BeaconId) -> Result<Option<DateTime<Utc>>, StorageError> {
        let seen = self
            .seen
            .read()
            .map_err(|_| StorageError::Backend("poisoned lock: presence".to_string()))?;
        Ok(seen.get(&(profile.clone(), beacon.clone())).copied())
    }
}
