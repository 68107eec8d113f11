//! Store documents and their `type` discriminant.
//!
//! Every record in the store is a JSON object with `_id`, an optional
//! `_rev`, and a `type` field naming what it is. `Document` is the untyped
//! envelope moved through the storage traits; `Profile` and `Beacon` are the
//! typed views the pipeline reads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::ids::{DocId, ProfileId, Revision};

/// Value of the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocType {
    /// `profile`
    Profile,
    /// `beacon`
    Beacon,
    /// `geofence_event`
    GeofenceEvent,
    /// `any_users_present_alert`
    AnyUsersPresentAlert,
    /// `surprise_appearance_alert`
    SurpriseAppearanceAlert,
    /// `all_users_present_alert`
    AllUsersPresentAlert,
    /// Anything else; ignored by the pipeline.
    Other(String),
}

impl DocType {
    /// Parses a `type` field value.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "profile" => Self::Profile,
            "beacon" => Self::Beacon,
            "geofence_event" => Self::GeofenceEvent,
            "any_users_present_alert" => Self::AnyUsersPresentAlert,
            "surprise_appearance_alert" => Self::SurpriseAppearanceAlert,
            "all_users_present_alert" => Self::AllUsersPresentAlert,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Profile => "profile",
            Self::Beacon => "beacon",
            Self::GeofenceEvent => "geofence_event",
            Self::AnyUsersPresentAlert => "any_users_present_alert",
            Self::SurpriseAppearanceAlert => "surprise_appearance_alert",
            Self::AllUsersPresentAlert => "all_users_present_alert",
            Self::Other(tag) => tag,
        }
    }

    /// True for the three alert variant tags.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::AnyUsersPresentAlert | Self::SurpriseAppearanceAlert | Self::AllUsersPresentAlert
        )
    }
}

/// Untyped store document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocId,
    body: Map<String, Value>,
}

impl Document {
    /// Wraps a JSON object. The object must carry a string `_id`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Document` if `body` is not an object or lacks `_id`.
    pub fn new(body: Value) -> Result<Self, DecodeError> {
        let Value::Object(body) = body else {
            return Err(DecodeError::Document {
                id: DocId::from("<unknown>"),
                message: "document is not a JSON object".to_string(),
            });
        };
        let Some(Value::String(id)) = body.get("_id") else {
            return Err(DecodeError::Document {
                id: DocId::from("<unknown>"),
                message: "document has no string _id".to_string(),
            });
        };
        Ok(Self {
            id: DocId::from(id.as_str()),
            body,
        })
    }

    /// Serializes a typed document into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Document` if `value` does not serialize to an
    /// object with `_id`.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, DecodeError> {
        let body = serde_json::to_value(value).map_err(|e| DecodeError::Document {
            id: DocId::from("<unknown>"),
            message: e.to_string(),
        })?;
        Self::new(body)
    }

    /// Decodes the envelope into a typed document.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Document` naming this document's id.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|e| DecodeError::Document {
            id: self.id.clone(),
            message: e.to_string(),
        })
    }

    /// The document id.
    #[must_use]
    pub const fn id(&self) -> &DocId {
        &self.id
    }

    /// The revision, if the document has been stored.
    #[must_use]
    pub fn rev(&self) -> Option<Revision> {
        match self.body.get("_rev") {
            Some(Value::String(rev)) => Some(Revision::from(rev.as_str())),
            _ => None,
        }
    }

    /// Replaces the `_rev` field.
    pub fn set_rev(&mut self, rev: &Revision) {
        self.body
            .insert("_rev".to_string(), Value::String(rev.as_str().to_string()));
    }

    /// The `type` discriminant, if present.
    #[must_use]
    pub fn doc_type(&self) -> Option<DocType> {
        match self.body.get("type") {
            Some(Value::String(tag)) => Some(DocType::parse(tag)),
            _ => None,
        }
    }

    /// Raw field access.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

/// A registered user and the push tokens of their devices.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: ProfileId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "deviceTokens", default)]
    pub device_tokens: Vec<String>,
    #[serde(rename = "authSystem", default)]
    pub auth_system: String,
}

impl Profile {
    /// Creates an unsaved profile.
    #[must_use]
    pub fn new(id: impl Into<ProfileId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            name: name.into(),
            device_tokens: Vec::new(),
            auth_system: String::new(),
        }
    }

    /// Envelope with the `profile` tag.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_document(&self) -> Result<Document, DecodeError> {
        tagged(self, &DocType::Profile)
    }
}

/// A physical beacon installation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    #[serde(rename = "_id")]
    pub id: DocId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub major: u16,
    #[serde(default)]
    pub minor: u16,
    #[serde(default)]
    pub organization: String,
}

impl Beacon {
    /// Creates an unsaved beacon at `location`.
    #[must_use]
    pub fn new(id: impl Into<DocId>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            desc: String::new(),
            location: location.into(),
            uuid: String::new(),
            major: 0,
            minor: 0,
            organization: String::new(),
        }
    }

    /// Envelope with the `beacon` tag.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_document(&self) -> Result<Document, DecodeError> {
        tagged(self, &DocType::Beacon)
    }
}

pub(crate) fn tagged<T: Serialize>(value: &T, tag: &DocType) -> Result<Document, DecodeError> {
    let mut doc = Document::from_typed(value)?;
    doc.body
        .insert("type".to_string(), Value::String(tag.as_str().to_string()));
    Ok(doc)
}
