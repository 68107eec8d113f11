//! Typed alert persistence on top of the document store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AlertResult;
use crate::ids::{DocId, Revision};
use crate::storage::{DocumentStore, StorageError};

use super::rules::Alert;

/// One entry of the active-alert snapshot.
///
/// Loading is per alert: one malformed or vanished document does not hide
/// the others.
#[allow(missing_docs)]
#[derive(Debug)]
pub struct LoadedAlert {
    pub id: DocId,
    pub alert: AlertResult<Alert>,
}

/// Loads active alerts and persists lifecycle decisions.
#[derive(Clone)]
pub struct AlertStore {
    docs: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for AlertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStore").finish_non_exhaustive()
    }
}

impl AlertStore {
    /// Wraps a document store.
    #[must_use]
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Stores a new alert, returning its first revision.
    pub fn insert(&self, alert: &Alert) -> AlertResult<Revision> {
        let doc = alert.to_document()?;
        Ok(self.docs.put(doc, None)?)
    }

    /// Fetches and decodes one alert.
    pub fn get(&self, id: &DocId) -> AlertResult<Option<Alert>> {
        match self.docs.get(id)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Snapshot of alerts active at `now`, in store order.
    ///
    /// # Errors
    ///
    /// Fails as a whole only if the active-alert query itself fails.
    pub fn load_active(&self, now: DateTime<Utc>) -> AlertResult<Vec<LoadedAlert>> {
        let ids = self.docs.list_active_alerts(now)?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let alert = self
                    .get(&id)
                    .and_then(|found| found.ok_or_else(|| StorageError::NotFound(id.clone()).into()));
                LoadedAlert { id, alert }
            })
            .collect())
    }

    /// Writes `alert` back with a new `activeOn`.
    ///
    /// # Errors
    ///
    /// `StorageError::RevisionConflict` if the alert changed since it was loaded.
    pub fn reschedule(&self, alert: &Alert, active_on: DateTime<Utc>) -> AlertResult<Revision> {
        let expected = Self::loaded_rev(alert)?;
        let mut updated = alert.clone();
        updated.active_on = Some(active_on);
        let doc = updated.to_document()?;
        Ok(self.docs.put(doc, Some(expected))?)
    }

    /// Deletes `alert` at the revision it was loaded with.
    pub fn delete(&self, alert: &Alert) -> AlertResult<()> {
        let rev = Self::loaded_rev(alert)?;
        Ok(self.docs.delete(&alert.id, rev)?)
    }

    fn loaded_rev(alert: &Alert) -> Result<&Revision, StorageError> {
        alert.rev.as_ref().ok_or_else(|| StorageError::RevisionConflict {
            id: alert.id.clone(),
            expected: None,
            actual: None,
        })
    }
}
