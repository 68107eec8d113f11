//! Change-feed consumer.
//!
//! Long-polls the document store's change feed from a resumable cursor and
//! routes each changed document: profiles get their device tokens
//! registered, geofence events go to the dispatcher, everything else is
//! ignored. The cursor only advances past a batch once the whole batch has
//! been routed.
//!
//! A dispatched event is then written to the presence history, so the next
//! event sees it as the profile's latest sighting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::document::{DocType, Document, Profile};
use crate::error::{AlertResult, DecodeError};
use crate::event::{describe_event, GeofenceEvent};
use crate::ids::{DocId, Sequence};
use crate::notify::NotificationGateway;
use crate::presence::PresenceRecorder;
use crate::storage::{DocumentStore, FeedResponse};

use super::dispatcher::EventDispatcher;

const fn default_poll_timeout_ms() -> u64 {
    60_000
}

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Resume point. `None` starts at the store's current sequence.
    #[serde(default)]
    pub since: Option<Sequence>,
    /// Long-poll timeout per request.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            since: None,
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl ConsumerConfig {
    /// Long-poll timeout as a `Duration`.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// One entry of a change batch.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Change {
    pub seq: Sequence,
    pub id: DocId,
    #[serde(default)]
    pub deleted: bool,
}

/// A decoded change-feed response.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeBatch {
    pub results: Vec<Change>,
    pub last_seq: Sequence,
}

impl ChangeBatch {
    /// Decodes a raw change-feed body.
    ///
    /// # Errors
    ///
    /// `DecodeError::ChangeBatch` if the body is not a change batch.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError::ChangeBatch { message: e.to_string() })
    }
}

/// Result of one `poll_once` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The long poll expired with no changes.
    TimedOut,
    /// The response was dropped and the cursor held.
    Skipped {
        /// Why the response was dropped.
        reason: String,
    },
    /// A batch was routed and the cursor advanced to `last_seq`.
    Processed {
        /// Entries in the batch, deleted ones included.
        changes: usize,
        /// New cursor.
        last_seq: Sequence,
    },
}

/// Consumes the change feed and routes documents.
pub struct ChangeFeedConsumer {
    store: Arc<dyn DocumentStore>,
    dispatcher: EventDispatcher,
    gateway: Arc<dyn NotificationGateway>,
    presence: Option<Arc<dyn PresenceRecorder>>,
    poll_timeout: Duration,
    since: Sequence,
}

impl fmt::Debug for ChangeFeedConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedConsumer")
            .field("since", &self.since)
            .field("poll_timeout", &self.poll_timeout)
            .field("records_presence", &self.presence.is_some())
            .finish_non_exhaustive()
    }
}

impl ChangeFeedConsumer {
    /// Creates a consumer positioned at `config.since`, or at the store's
    /// current sequence when unset.
    ///
    /// # Errors
    ///
    /// Propagates a failure to read the store's current sequence.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        dispatcher: EventDispatcher,
        gateway: Arc<dyn NotificationGateway>,
        config: ConsumerConfig,
    ) -> AlertResult<Self> {
        let poll_timeout = config.poll_timeout();
        let since = match config.since {
            Some(since) => since,
            None => store.last_sequence()?,
        };
        info!(since = %since, "change feed consumer positioned");
        Ok(Self {
            store,
            dispatcher,
            gateway,
            presence: None,
            poll_timeout,
            since,
        })
    }

    /// Records every dispatched event into `recorder`.
    ///
    /// Without a recorder the presence history must be fed elsewhere.
    #[must_use]
    pub fn record_presence(mut self, recorder: Arc<dyn PresenceRecorder>) -> Self {
        self.presence = Some(recorder);
        self
    }

    /// Current cursor.
    #[must_use]
    pub const fn since(&self) -> &Sequence {
        &self.since
    }

    /// Performs one long poll and routes the resulting batch.
    ///
    /// # Errors
    ///
    /// Only fatal errors; everything else is logged and reported through
    /// the outcome. The cursor is unchanged when an error is returned.
    pub fn poll_once(&mut self) -> AlertResult<PollOutcome> {
        let response = match self.store.changes_since(&self.since, self.poll_timeout) {
            Ok(response) => response,
            Err(err) => {
                warn!(since = %self.since, error = %err, "change feed request failed");
                return Ok(PollOutcome::Skipped {
                    reason: err.to_string(),
                });
            }
        };

        let body = match response {
            FeedResponse::Timeout => {
                debug!(since = %self.since, "change feed poll timed out");
                return Ok(PollOutcome::TimedOut);
            }
            FeedResponse::Batch(body) => body,
        };

        let batch = match ChangeBatch::decode(&body) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(since = %self.since, error = %err, "skipping undecodable change batch");
                return Ok(PollOutcome::Skipped {
                    reason: err.to_string(),
                });
            }
        };

        debug!(since = %self.since, changes = batch.results.len(), "processing change batch");
        for change in &batch.results {
            if change.deleted {
                debug!(doc_id = %change.id, "skipping deleted document");
                continue;
            }
            self.route(change)?;
        }

        self.since = batch.last_seq.clone();
        Ok(PollOutcome::Processed {
            changes: batch.results.len(),
            last_seq: batch.last_seq,
        })
    }

    /// Polls forever.
    ///
    /// # Errors
    ///
    /// Returns only when a fatal error surfaces.
    pub fn run(&mut self) -> AlertResult<()> {
        info!(since = %self.since, records_presence = self.presence.is_some(), "change feed consumer running");
        loop {
            if let Err(err) = self.poll_once() {
                error!(since = %self.since, error = %err, "change feed consumer stopped");
                return Err(err);
            }
        }
    }

    fn route(&self, change: &Change) -> AlertResult<()> {
        let doc = match self.store.get(&change.id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(doc_id = %change.id, "changed document no longer exists");
                return Ok(());
            }
            Err(err) => {
                warn!(doc_id = %change.id, error = %err, "unable to fetch changed document");
                return Ok(());
            }
        };

        match doc.doc_type() {
            Some(DocType::Profile) => {
                self.profile_changed(&doc);
                Ok(())
            }
            Some(DocType::GeofenceEvent) => self.geofence_event(&doc),
            other => {
                debug!(doc_id = %change.id, doc_type = ?other, "ignoring change");
                Ok(())
            }
        }
    }

    fn profile_changed(&self, doc: &Document) {
        match doc.decode::<Profile>() {
            Ok(profile) => {
                register_device_tokens(self.gateway.as_ref(), &profile);
            }
            Err(err) => warn!(doc_id = %doc.id(), error = %err, "skipping malformed profile"),
        }
    }

    fn geofence_event(&self, doc: &Document) -> AlertResult<()> {
        let event: GeofenceEvent = match doc.decode() {
            Ok(event) => event,
            Err(err) => {
                warn!(doc_id = %doc.id(), error = %err, "skipping malformed geofence event");
                return Ok(());
            }
        };

        match describe_event(self.store.as_ref(), &event) {
            Ok(text) => info!(event_id = %event.id, "{text}"),
            Err(err) => warn!(event_id = %event.id, error = %err, "unable to describe event"),
        }

        match self.dispatcher.dispatch(&event) {
            Ok(report) => debug!(
                event_id = %event.id,
                evaluated = report.evaluated,
                fired = report.fired.len(),
                failures = report.failures.len(),
                "geofence event dispatched"
            ),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => error!(event_id = %event.id, error = %err, "unable to dispatch geofence event"),
        }

        // After dispatch: evaluation sees the sighting before this one.
        if let Some(recorder) = &self.presence {
            if let Err(err) = recorder.record_event(&event) {
                warn!(event_id = %event.id, error = %err, "unable to record presence");
            }
        }
        Ok(())
    }
}

/// Registers every device token of `profile`, returning how many succeeded.
///
/// A rejected token is logged and the rest are still attempted.
pub fn register_device_tokens(gateway: &dyn NotificationGateway, profile: &Profile) -> usize {
    let mut registered = 0;
    for token in &profile.device_tokens {
        match gateway.register_device(&profile.id, token) {
            Ok(()) => registered += 1,
            Err(err) => warn!(profile_id = %profile.id, error = %err, "device token registration failed"),
        }
    }
    debug!(profile_id = %profile.id, registered, total = profile.device_tokens.len(), "device tokens registered");
    registered
}
