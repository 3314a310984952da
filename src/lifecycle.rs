use tracing::{debug, info};

use crate::domain::IndexDescriptor;
use crate::error::IngestError;
use crate::store::StoreConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Full reload of a fixed collection.
    Always,
    /// Caller-named collection; only touched when it is already there.
    IfExists,
}

/// Drops a collection before a load and indexes it afterwards.
pub struct CollectionLifecycle;

impl CollectionLifecycle {
    /// Returns whether anything was dropped.
    pub fn prepare<C>(conn: &mut C, collection: &str, policy: DropPolicy) -> Result<bool, IngestError>
    where
        C: StoreConnection + ?Sized,
    {
        let exists = conn.collection_exists(collection)?;
        match policy {
            DropPolicy::Always => conn.drop_collection(collection)?,
            DropPolicy::IfExists if exists => conn.drop_collection(collection)?,
            DropPolicy::IfExists => {}
        }
        debug!(collection, existed = exists, ?policy, "prepared collection");
        Ok(exists)
    }

    /// Builds `indexes` and returns the document count read back from the
    /// store. An empty or absent collection is indexed like any other.
    pub fn finalize<C>(
        conn: &mut C,
        collection: &str,
        indexes: &[IndexDescriptor],
    ) -> Result<u64, IngestError>
    where
        C: StoreConnection + ?Sized,
    {
        conn.create_indexes(collection, indexes)?;
        let count = conn.count(collection)?;
        info!(collection, indexes = indexes.len(), documents = count, "built indexes");
        Ok(count)
    }
}
