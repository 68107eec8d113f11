//! Identifier types.
//!
//! Every identifier handed out by the document store is an opaque string.
//! The newtypes below keep profile ids, beacon ids and document ids from
//! being mixed up at call sites while serializing as plain JSON strings.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Store-wide document identifier (`_id`).
    DocId
);

string_id!(
    /// Optimistic-concurrency token (`_rev`).
    ///
    /// Must be echoed back unchanged on every update or delete so the store
    /// can reject writes based on a stale read.
    Revision
);

string_id!(
    /// Identifier of a registered profile (user/device).
    ProfileId
);

string_id!(
    /// Identifier of a physical beacon.
    BeaconId
);

impl DocId {
    /// Generates a fresh document id with the given prefix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }
}

impl From<&ProfileId> for DocId {
    fn from(id: &ProfileId) -> Self {
        Self(id.0.clone())
    }
}

impl From<&BeaconId> for DocId {
    fn from(id: &BeaconId) -> Self {
        Self(id.0.clone())
    }
}

/// Position in the store's change feed.
///
/// Feeds report sequences either as JSON numbers or as strings; both decode
/// into the same opaque cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sequence(String);

impl Sequence {
    /// The start of the feed.
    #[must_use]
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    /// Wraps an existing cursor value.
    #[must_use]
    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    /// Returns the cursor as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Sequence {
    fn from(seq: u64) -> Self {
        Self(seq.to_string())
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}
