//! Document store abstraction.
//!
//! A [`DocumentStore`] is a connection factory shared by every worker of a
//! load. Connections are never shared: each worker opens its own through
//! [`DocumentStore::connect`] and releases it when the value is dropped.

pub mod memory;
pub mod sqlite;

use crate::domain::{BulkMode, Document, IndexDescriptor, NaturalKey};
use crate::error::IngestError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Keyed partial update. Never creates a document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub key: NaturalKey,
    pub set: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub attempted: usize,
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub errors: Vec<String>,
}

impl BulkWriteResult {
    pub fn attempted(attempted: usize) -> Self {
        Self {
            attempted,
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub trait DocumentStore: Send + Sync {
    type Connection: StoreConnection;

    fn connect(&self) -> Result<Self::Connection, IngestError>;

    fn describe(&self) -> String;
}

pub trait StoreConnection {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, IngestError>;

    /// Idempotent: dropping an absent collection is not an error.
    fn drop_collection(&mut self, collection: &str) -> Result<(), IngestError>;

    fn insert_many(
        &mut self,
        collection: &str,
        documents: &[Document],
        mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError>;

    /// Applies each request to the first document matching its key.
    fn bulk_update(
        &mut self,
        collection: &str,
        requests: &[UpdateRequest],
        mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError>;

    /// Creates the collection when missing, so indexing an empty load works.
    fn create_indexes(
        &mut self,
        collection: &str,
        indexes: &[IndexDescriptor],
    ) -> Result<(), IngestError>;

    fn count(&mut self, collection: &str) -> Result<u64, IngestError>;

    /// Number of documents beyond the first for every repeated natural key.
    fn count_duplicate_keys(&mut self, collection: &str) -> Result<u64, IngestError>;
}

/// Merges `set` into `document`; returns whether any value changed.
pub fn apply_set(document: &mut Document, set: &Document) -> bool {
    let mut changed = false;
    for (field, value) in set {
        if document.get(field) != Some(value) {
            document.insert(field.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

pub(crate) fn bulk_error(collection: &str, attempted: usize, message: String) -> IngestError {
    IngestError::BulkWrite {
        collection: collection.to_string(),
        attempted,
        failed: 1,
        message,
    }
}
