//! In-memory [`DocumentStore`] used by tests.
//!
//! Every connection shares one map of collections behind a mutex. The store
//! also records each index build together with the number of documents that
//! were present at that moment, and how many connections are still open.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{BulkMode, Document, IndexDescriptor, NaturalKey};
use crate::error::IngestError;

use super::{
    BulkWriteResult, DocumentStore, StoreConnection, UpdateRequest, apply_set, bulk_error,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    pub documents: Vec<Document>,
    pub indexes: Vec<IndexDescriptor>,
    pub index_builds: Vec<IndexBuild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBuild {
    pub fields: Vec<String>,
    pub documents_present: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<BTreeMap<String, MemoryCollection>>>,
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, name: &str) -> Option<MemoryCollection> {
        self.collections
            .lock()
            .ok()
            .and_then(|collections| collections.get(name).cloned())
    }

    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.collection(name)
            .map(|collection| collection.documents)
            .unwrap_or_default()
    }

    pub fn seed(&self, name: &str, documents: Vec<Document>) {
        if let Ok(mut collections) = self.collections.lock() {
            collections
                .entry(name.to_string())
                .or_default()
                .documents
                .extend(documents);
        }
    }

    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn connections_live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl DocumentStore for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, IngestError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            collections: Arc::clone(&self.collections),
            live: Arc::clone(&self.live),
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryConnection {
    collections: Arc<Mutex<BTreeMap<String, MemoryCollection>>>,
    live: Arc<AtomicUsize>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryConnection {
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, MemoryCollection>>, IngestError> {
        self.collections
            .lock()
            .map_err(|_| IngestError::Store("memory store lock poisoned".to_string()))
    }
}

impl StoreConnection for MemoryConnection {
    fn collection_exists(&mut self, collection: &str) -> Result<bool, IngestError> {
        Ok(self.lock()?.contains_key(collection))
    }

    fn drop_collection(&mut self, collection: &str) -> Result<(), IngestError> {
        self.lock()?.remove(collection);
        Ok(())
    }

    fn insert_many(
        &mut self,
        collection: &str,
        documents: &[Document],
        mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError> {
        let mut result = BulkWriteResult::attempted(documents.len());
        if documents.is_empty() {
            return Ok(result);
        }
        let mut collections = self.lock()?;
        let target = collections.entry(collection.to_string()).or_default();

        let mut accepted = Vec::with_capacity(documents.len());
        for (position, document) in documents.iter().enumerate() {
            let pending = target.documents.iter().chain(accepted.iter());
            match unique_violation(&target.indexes, pending, document) {
                None => accepted.push(document.clone()),
                Some(field) => {
                    let message = format!("document {position}: duplicate value for unique {field}");
                    if mode == BulkMode::Ordered {
                        return Err(bulk_error(collection, documents.len(), message));
                    }
                    result.errors.push(message);
                }
            }
        }
        result.inserted = accepted.len() as u64;
        target.documents.extend(accepted);
        Ok(result)
    }

    fn bulk_update(
        &mut self,
        collection: &str,
        requests: &[UpdateRequest],
        _mode: BulkMode,
    ) -> Result<BulkWriteResult, IngestError> {
        let mut result = BulkWriteResult::attempted(requests.len());
        let mut collections = self.lock()?;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(result);
        };
        for request in requests {
            let Some(document) = target
                .documents
                .iter_mut()
                .find(|document| request.key.matches(document))
            else {
                continue;
            };
            result.matched += 1;
            if apply_set(document, &request.set) {
                result.modified += 1;
            }
        }
        Ok(result)
    }

    fn create_indexes(
        &mut self,
        collection: &str,
        indexes: &[IndexDescriptor],
    ) -> Result<(), IngestError> {
        let mut collections = self.lock()?;
        let target = collections.entry(collection.to_string()).or_default();
        for index in indexes.iter().filter(|index| index.unique) {
            let mut seen = Vec::new();
            for value in target.documents.iter().filter_map(|doc| doc.get(&index.field)) {
                if seen.contains(&value) {
                    return Err(IngestError::Store(format!(
                        "cannot build unique index on {collection}.{}: duplicate values",
                        index.field
                    )));
                }
                seen.push(value);
            }
        }
        for index in indexes {
            if !target.indexes.contains(index) {
                target.indexes.push(index.clone());
            }
        }
        target.index_builds.push(IndexBuild {
            fields: indexes.iter().map(|index| index.field.clone()).collect(),
            documents_present: target.documents.len(),
        });
        Ok(())
    }

    fn count(&mut self, collection: &str) -> Result<u64, IngestError> {
        Ok(self
            .lock()?
            .get(collection)
            .map(|target| target.documents.len() as u64)
            .unwrap_or(0))
    }

    fn count_duplicate_keys(&mut self, collection: &str) -> Result<u64, IngestError> {
        let collections = self.lock()?;
        let Some(target) = collections.get(collection) else {
            return Ok(0);
        };
        let mut seen: HashMap<NaturalKey, u64> = HashMap::new();
        for key in target.documents.iter().filter_map(NaturalKey::from_document) {
            *seen.entry(key).or_default() += 1;
        }
        Ok(seen.values().map(|count| count - 1).sum())
    }
}

fn unique_violation<'d>(
    indexes: &[IndexDescriptor],
    existing: impl Iterator<Item = &'d Document> + Clone,
    document: &Document,
) -> Option<String> {
    indexes
        .iter()
        .filter(|index| index.unique)
        .find(|index| {
            document.get(&index.field).is_some_and(|value| {
                existing
                    .clone()
                    .any(|other| other.get(&index.field) == Some(value))
            })
        })
        .map(|index| index.field.clone())
}
