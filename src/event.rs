//! Geofence events: a profile entering or leaving a beacon's range.
//!
//! Events are produced by devices, written to the store, and consumed
//! read-only by the alert engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{tagged, Beacon, DocType, Document, Profile};
use crate::error::{AlertResult, DecodeError};
use crate::ids::{BeaconId, DocId, ProfileId, Revision};
use crate::storage::{DocumentStore, StorageError};
use crate::time::parse_timestamp;

/// Direction of a geofence crossing.
///
/// Unknown actions are preserved verbatim; they only matter when rendering
/// the event for humans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GeofenceAction {
    /// `entry`
    Entry,
    /// `exit`
    Exit,
    /// Any other value reported by a device.
    Other(String),
}

impl GeofenceAction {
    /// "entered" / "exited", or `None` when the action has no display form.
    #[must_use]
    pub const fn past_tense(&self) -> Option<&'static str> {
        match self {
            Self::Entry => Some("entered"),
            Self::Exit => Some("exited"),
            Self::Other(_) => None,
        }
    }

    /// The wire value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for GeofenceAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "entry" => Self::Entry,
            "exit" => Self::Exit,
            _ => Self::Other(value),
        }
    }
}

impl From<GeofenceAction> for String {
    fn from(value: GeofenceAction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for GeofenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A profile crossing a beacon's geofence.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    pub action: GeofenceAction,
    #[serde(rename = "beacon")]
    pub beacon_id: BeaconId,
    #[serde(rename = "profile")]
    pub profile_id: ProfileId,
    /// RFC 3339 timestamp, kept as reported.
    pub created_at: String,
}

impl GeofenceEvent {
    /// Creates an event stamped at `at`, with a generated id.
    #[must_use]
    pub fn new(
        action: GeofenceAction,
        beacon_id: impl Into<BeaconId>,
        profile_id: impl Into<ProfileId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocId::generate("geofence_event"),
            rev: None,
            action,
            beacon_id: beacon_id.into(),
            profile_id: profile_id.into(),
            created_at: at.to_rfc3339(),
        }
    }

    /// Parsed `created_at`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Timestamp` if the stored value is not RFC 3339.
    pub fn created_at(&self) -> Result<DateTime<Utc>, DecodeError> {
        parse_timestamp(&self.created_at)
    }

    /// Envelope with the `geofence_event` tag.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_document(&self) -> Result<Document, DecodeError> {
        tagged(self, &DocType::GeofenceEvent)
    }
}

/// Renders "<profile name> <entered|exited> <beacon location>".
///
/// # Errors
///
/// - `StorageError::NotFound` if the profile or beacon document is missing
/// - `DecodeError` if either document is malformed or the action has no
///   display form
pub fn describe_event(store: &dyn DocumentStore, event: &GeofenceEvent) -> AlertResult<String> {
    let verb = event
        .action
        .past_tense()
        .ok_or_else(|| DecodeError::UnknownAction {
            action: event.action.as_str().to_string(),
        })?;

    let profile_id = DocId::from(&event.profile_id);
    let profile: Profile = store
        .get(&profile_id)?
        .ok_or(StorageError::NotFound(profile_id))?
        .decode()?;

    let beacon_id = DocId::from(&event.beacon_id);
    let beacon: Beacon = store
        .get(&beacon_id)?
        .ok_or(StorageError::NotFound(beacon_id))?
        .decode()?;

    Ok(format!("{} {verb} {}", profile.name, beacon.location))
}
