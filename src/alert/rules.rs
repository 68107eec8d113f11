//! Alert documents and their rule variants.
//!
//! An alert is a common base (actions, stickiness, activation time) plus
//! exactly one rule. Rules are a closed set, serialized with the `type`
//! discriminant the store uses for alert documents.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::DecodeError;
use crate::ids::{BeaconId, DocId, ProfileId, Revision};
use crate::time::duration_secs;

fn zero_duration() -> Duration {
    Duration::zero()
}

/// Variant discriminant, without the variant's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Any listed user shows up at one beacon.
    AnyUsersPresent,
    /// A listed user shows up somewhere they have not been for a while.
    SurpriseAppearance,
    /// All listed users are at the same beacon within a window.
    AllUsersPresent,
}

impl AlertKind {
    /// The `type` tag stored on the document.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::AnyUsersPresent => "any_users_present_alert",
            Self::SurpriseAppearance => "surprise_appearance_alert",
            Self::AllUsersPresent => "all_users_present_alert",
        }
    }
}

/// Alert rule variants.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum AlertRule {
    /// Fires when any of `users` is seen at `beacon`.
    ///
    /// Useful for leaving a note at a beacon for whoever arrives first.
    #[serde(rename = "any_users_present_alert")]
    AnyUsersPresent {
        users: BTreeSet<ProfileId>,
        beacon: BeaconId,
    },

    /// Fires when one of `users` appears at one of `beacons` after not being
    /// seen there for at least `min_last_seen_ago`.
    #[serde(rename = "surprise_appearance_alert", rename_all = "camelCase")]
    SurpriseAppearance {
        users: BTreeSet<ProfileId>,
        beacons: BTreeSet<BeaconId>,
        #[serde(with = "duration_secs")]
        min_last_seen_ago: Duration,
    },

    /// Fires when every one of `users` has been seen at the event's beacon
    /// within `window`.
    #[serde(rename = "all_users_present_alert")]
    AllUsersPresent {
        users: BTreeSet<ProfileId>,
        beacons: BTreeSet<BeaconId>,
        #[serde(with = "duration_secs")]
        window: Duration,
    },
}

impl AlertRule {
    /// The variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> AlertKind {
        match self {
            Self::AnyUsersPresent { .. } => AlertKind::AnyUsersPresent,
            Self::SurpriseAppearance { .. } => AlertKind::SurpriseAppearance,
            Self::AllUsersPresent { .. } => AlertKind::AllUsersPresent,
        }
    }
}

/// A notification to send when an alert fires.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertAction {
    pub recipient: ProfileId,
    pub message: String,
}

impl AlertAction {
    /// Creates an action.
    #[must_use]
    pub fn new(recipient: impl Into<ProfileId>, message: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            message: message.into(),
        }
    }
}

/// A stored alert.
///
/// Loaded fresh from the store for every event; the engine never caches
/// alert state.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    /// Invoked in order when the alert fires.
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    /// Survive firing and reactivate after `reactivate_after`.
    #[serde(default)]
    pub sticky: bool,
    #[serde(rename = "reactivateAfter", default = "zero_duration", with = "duration_secs")]
    pub reactivate_after: Duration,
    /// Absent means immediately eligible.
    #[serde(rename = "activeOn", default, skip_serializing_if = "Option::is_none")]
    pub active_on: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub rule: AlertRule,
}

impl Alert {
    /// Creates an unsaved, non-sticky alert with a generated id.
    #[must_use]
    pub fn new(rule: AlertRule) -> Self {
        Self {
            id: DocId::generate("alert"),
            rev: None,
            actions: Vec::new(),
            sticky: false,
            reactivate_after: Duration::zero(),
            active_on: None,
            rule,
        }
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<DocId>) -> Self {
        self.id = id.into();
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, recipient: impl Into<ProfileId>, message: impl Into<String>) -> Self {
        self.actions.push(AlertAction::new(recipient, message));
        self
    }

    /// Makes the alert sticky, reactivating `reactivate_after` after each firing.
    #[must_use]
    pub fn sticky(mut self, reactivate_after: Duration) -> Self {
        self.sticky = true;
        self.reactivate_after = reactivate_after;
        self
    }

    /// Defers eligibility until `at`.
    #[must_use]
    pub fn active_from(mut self, at: DateTime<Utc>) -> Self {
        self.active_on = Some(at);
        self
    }

    /// The variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> AlertKind {
        self.rule.kind()
    }

    /// True if the store should consider the alert at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_on.map_or(true, |at| at <= now)
    }

    /// Serializes into a store envelope.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_document(&self) -> Result<Document, DecodeError> {
        Document::from_typed(self)
    }
}
