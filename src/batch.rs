use tracing::trace;

use crate::domain::{BulkMode, Document};
use crate::error::IngestError;
use crate::store::StoreConnection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub documents: u64,
    pub batches: u64,
}

/// Groups a document stream into bulk inserts of at most `batch_size`.
#[derive(Debug, Clone, Copy)]
pub struct BulkWriteBatcher {
    batch_size: usize,
}

impl BulkWriteBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Writes every document of `stream` into `collection`.
    ///
    /// Stops at the first source error or rejected batch. Batches written
    /// before that point stay in the store.
    pub fn write<C, I>(
        &self,
        conn: &mut C,
        collection: &str,
        stream: I,
        mode: BulkMode,
    ) -> Result<BatchReport, IngestError>
    where
        C: StoreConnection + ?Sized,
        I: IntoIterator<Item = Result<Document, IngestError>>,
    {
        let mut report = BatchReport::default();
        for chunk in Chunks::new(stream.into_iter(), self.batch_size) {
            let chunk = chunk?;
            let result = conn.insert_many(collection, &chunk, mode)?;
            if let Some(message) = result.errors.first() {
                return Err(IngestError::BulkWrite {
                    collection: collection.to_string(),
                    attempted: result.attempted,
                    failed: result.errors.len(),
                    message: message.clone(),
                });
            }
            report.documents += chunk.len() as u64;
            report.batches += 1;
            trace!(collection, batch = report.batches, size = chunk.len(), "wrote batch");
        }
        Ok(report)
    }
}

/// Splits a fallible stream into vectors of at most `size` items. An item
/// error ends the stream after being yielded once.
pub struct Chunks<I> {
    inner: I,
    size: usize,
    failed: bool,
}

impl<I> Chunks<I> {
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            failed: false,
        }
    }
}

impl<I, T> Iterator for Chunks<I>
where
    I: Iterator<Item = Result<T, IngestError>>,
{
    type Item = Result<Vec<T>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.size.min(4096));
        while chunk.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => chunk.push(item),
                Some(Err(err)) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                None => break,
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}
