//! Notification gateway: device registration and push delivery.
//!
//! The gateway is an external service. `NotificationGateway` is the seam;
//! `InMemoryGateway` records traffic and can be told to fail for chosen
//! recipients.

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

use crate::ids::ProfileId;

/// Errors reported by a notification gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway could not be reached.
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway refused the request.
    #[error("Gateway rejected request for '{recipient}': {message}")]
    Rejected {
        /// Profile the request was about.
        recipient: ProfileId,
        /// Reason given by the gateway.
        message: String,
    },
}

/// Push-notification gateway.
pub trait NotificationGateway: Send + Sync {
    /// Associates a device token with a profile.
    fn register_device(&self, profile: &ProfileId, device_token: &str) -> Result<(), GatewayError>;

    /// Sends `message` to every device registered for `recipient`.
    fn push(&self, recipient: &ProfileId, message: &str) -> Result<(), GatewayError>;
}

/// A push accepted by `InMemoryGateway`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    pub recipient: ProfileId,
    pub message: String,
}

#[derive(Debug, Default)]
struct GatewayState {
    registrations: Vec<(ProfileId, String)>,
    pushes: Vec<Push>,
    failing: HashSet<ProfileId>,
}

fn poisoned() -> GatewayError {
    GatewayError::Unreachable("poisoned lock: gateway".to_string())
}

/// Recording gateway.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
}

impl InMemoryGateway {
    /// Creates a gateway that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request concerning `profile` fail with `Rejected`.
    ///
    /// # Errors
    ///
    /// `GatewayError::Unreachable` if the gateway state lock is poisoned.
    pub fn fail_for(&self, profile: impl Into<ProfileId>) -> Result<(), GatewayError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.failing.insert(profile.into());
        Ok(())
    }

    /// Pushes accepted so far, in order.
    #[must_use]
    pub fn pushes(&self) -> Vec<Push> {
        self.state.lock().map(|s| s.pushes.clone()).unwrap_or_default()
    }

    /// Device registrations accepted so far, in order.
    #[must_use]
    pub fn registrations(&self) -> Vec<(ProfileId, String)> {
        self.state
            .lock()
            .map(|s| s.registrations.clone())
            .unwrap_or_default()
    }

    fn with_state<T>(
        &self,
        profile: &ProfileId,
        f: impl FnOnce(&mut GatewayState) -> T,
    ) -> Result<T, GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| poisoned())?;
        if state.failing.contains(profile) {
            return Err(GatewayError::Rejected {
                recipient: profile.clone(),
                message: "recipient configured to fail".to_string(),
            });
        }
        Ok(f(&mut state))
    }
}

impl NotificationGateway for InMemoryGateway {
    fn register_device(&self, profile: &ProfileId, device_token: &str) -> Result<(), GatewayError> {
        self.with_state(profile, |s| {
            s.registrations.push((profile.clone(), device_token.to_string()));
        })
    }

    fn push(&self, recipient: &ProfileId, message: &str) -> Result<(), GatewayError> {
        self.with_state(recipient, |s| {
            s.pushes.push(Push {
                recipient: recipient.clone(),
                message: message.to_string(),
            });
        })
    }
}
