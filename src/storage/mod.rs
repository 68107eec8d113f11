//! Storage trait definitions and the in-memory backend.
//!
//! The document store is an external collaborator; `InMemoryDocumentStore`
//! is the reference implementation used for embedded runs and tests.

mod memory;
mod traits;

pub use memory::InMemoryDocumentStore;
pub use traits::{DocumentStore, FeedResponse, StorageError};
