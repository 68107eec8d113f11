//! In-memory storage backend.
//!
//! Thread-safe implementation of `DocumentStore` with revision checks and a
//! long-poll change feed. Intended for embedded usage, tests, and as a
//! reference implementation of the store contract.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::document::Document;
use crate::ids::{DocId, Revision, Sequence};
use crate::storage::traits::{DocumentStore, FeedResponse, StorageError};
use crate::time::parse_timestamp;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn parse_seq(since: &Sequence) -> Result<u64, StorageError> {
    since
        .as_str()
        .parse::<u64>()
        .map_err(|_| StorageError::Backend(format!("invalid sequence: {since}")))
}

fn next_revision(generation: u64) -> Revision {
    Revision::new(format!("{generation}-{}", Uuid::new_v4().simple()))
}

#[derive(Debug)]
struct StoredDoc {
    doc: Document,
    rev: Revision,
    generation: u64,
    created_seq: u64,
}

#[derive(Debug, Clone)]
struct ChangeEntry {
    seq: u64,
    id: DocId,
    deleted: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    docs: HashMap<DocId, StoredDoc>,
    changes: Vec<ChangeEntry>,
    last_seq: u64,
}

impl StoreState {
    fn record_change(&mut self, id: DocId, deleted: bool) -> u64 {
        self.last_seq += 1;
        self.changes.push(ChangeEntry {
            seq: self.last_seq,
            id,
            deleted,
        });
        self.last_seq
    }

    /// Latest change per document after `since`, in sequence order.
    fn pending(&self, since: u64) -> Vec<ChangeEntry> {
        let mut latest: HashMap<&DocId, &ChangeEntry> = HashMap::new();
        for entry in self.changes.iter().filter(|c| c.seq > since) {
            latest.insert(&entry.id, entry);
        }
        let mut out: Vec<ChangeEntry> = latest.into_values().cloned().collect();
        out.sort_by_key(|c| c.seq);
        out
    }
}

/// In-memory document store.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded::<()>(1);
        Self {
            state: RwLock::new(StoreState::default()),
            wake_tx,
            wake_rx,
        }
    }

    fn wake(&self) {
        // A pending token already guarantees the waiter re-checks.
        let _ = self.wake_tx.try_send(());
    }

    fn encode_batch(entries: &[ChangeEntry], last_seq: u64) -> Result<Vec<u8>, StorageError> {
        let results: Vec<serde_json::Value> = entries
            .iter()
            .map(|c| {
                if c.deleted {
                    json!({"seq": c.seq, "id": c.id, "deleted": true})
                } else {
                    json!({"seq": c.seq, "id": c.id})
                }
            })
            .collect();
        serde_json::to_vec(&json!({"results": results, "last_seq": last_seq}))
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, id: &DocId) -> Result<Option<Document>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("documents"))?;
        Ok(state.docs.get(id).map(|stored| {
            let mut doc = stored.doc.clone();
            doc.set_rev(&stored.rev);
            doc
        }))
    }

    fn put(&self, document: Document, expected: Option<&Revision>) -> Result<Revision, StorageError> {
        let id = document.id().clone();
        let rev = {
            let mut state = self.state.write().map_err(|_| lock_err("documents"))?;

            let current = state.docs.get(&id);
            let current_rev = current.map(|s| s.rev.clone());
            if current_rev.as_ref() != expected {
                return Err(StorageError::RevisionConflict {
                    id,
                    expected: expected.cloned(),
                    actual: current_rev,
                });
            }

            let generation = current.map_or(1, |s| s.generation + 1);
            let rev = next_revision(generation);
            let seq = state.record_change(id.clone(), false);
            let created_seq = state.docs.get(&id).map_or(seq, |s| s.created_seq);
            state.docs.insert(
                id.clone(),
                StoredDoc {
                    doc: document,
                    rev: rev.clone(),
                    generation,
                    created_seq,
                },
            );
            rev
        };

        debug!(doc_id = %id, rev = %rev, "document stored");
        self.wake();
        Ok(rev)
    }

    fn delete(&self, id: &DocId, rev: &Revision) -> Result<(), StorageError> {
        {
            let mut state = self.state.write().map_err(|_| lock_err("documents"))?;
            let Some(stored) = state.docs.get(id) else {
                return Err(StorageError::NotFound(id.clone()));
            };
            if &stored.rev != rev {
                return Err(StorageError::RevisionConflict {
                    id: id.clone(),
                    expected: Some(rev.clone()),
                    actual: Some(stored.rev.clone()),
                });
            }
            state.docs.remove(id);
            state.record_change(id.clone(), true);
        }

        debug!(doc_id = %id, "document deleted");
        self.wake();
        Ok(())
    }

    fn changes_since(&self, since: &Sequence, timeout: Duration) -> Result<FeedResponse, StorageError> {
        let since = parse_seq(since)?;
        let deadline = Instant::now() + timeout;

        loop {
            {
                let state = self.state.read().map_err(|_| lock_err("changes"))?;
                let pending = state.pending(since);
                if !pending.is_empty() {
                    return Self::encode_batch(&pending, state.last_seq).map(FeedResponse::Batch);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(FeedResponse::Timeout);
            }
            match self.wake_rx.recv_timeout(remaining) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => return Ok(FeedResponse::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(StorageError::Backend("change feed wake-up channel closed".to_string()));
                }
            }
        }
    }

    fn last_sequence(&self) -> Result<Sequence, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("changes"))?;
        Ok(Sequence::from(state.last_seq))
    }

    fn list_active_alerts(&self, now: DateTime<Utc>) -> Result<Vec<DocId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("documents"))?;

        let mut active: Vec<(&DocId, u64)> = state
            .docs
            .iter()
            .filter(|(_, stored)| stored.doc.doc_type().is_some_and(|t| t.is_alert()))
            .filter(|(_, stored)| match stored.doc.field("activeOn") {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(at)) => {
                    // An unparseable activeOn is listed so the decode failure
                    // surfaces where alerts are loaded.
                    parse_timestamp(at).map_or(true, |at| at <= now)
                }
                Some(_) => true,
            })
            .map(|(id, stored)| (id, stored.created_seq))
            .collect();

        active.sort_by_key(|(_, created)| *created);
        Ok(active.into_iter().map(|(id, _)| id.clone()).collect())
    }
}
