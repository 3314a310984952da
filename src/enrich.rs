//! Keyed, non-upserting update pass over an already loaded collection.

use std::time::Duration;

use tracing::{debug, info};

use crate::domain::{BulkMode, Document, NaturalKey};
use crate::error::IngestError;
use crate::progress::{ProgressCounters, ProgressEvent, ProgressSink};
use crate::store::{StoreConnection, UpdateRequest};

impl UpdateRequest {
    /// Sets every field of `document` except the natural key itself.
    pub fn from_document(document: &Document) -> Option<Self> {
        let key = NaturalKey::from_document(document)?;
        let set = document
            .iter()
            .filter(|(field, _)| !NaturalKey::FIELDS.contains(&field.as_str()))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        Some(Self { key, set })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub seen: u64,
    pub matched: u64,
    pub modified: u64,
    pub failed: u64,
    pub flushes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentPass {
    batch_size: usize,
    mode: BulkMode,
    noun: &'static str,
}

impl EnrichmentPass {
    pub fn new(batch_size: usize, mode: BulkMode) -> Self {
        Self {
            batch_size: batch_size.max(1),
            mode,
            noun: "variant",
        }
    }

    /// Word used for the processed records in progress lines.
    pub fn with_noun(mut self, noun: &'static str) -> Self {
        self.noun = noun;
        self
    }

    /// Streams `requests` into `collection` in bulk updates of `batch_size`.
    ///
    /// Totals go to `sink` after every flush and once more when the stream
    /// ends, even if it was empty. Requests without a matching document are
    /// counted as seen but not matched.
    pub fn run<C, I>(
        &self,
        conn: &mut C,
        collection: &str,
        label: &str,
        requests: I,
        sink: &dyn ProgressSink,
    ) -> Result<EnrichmentReport, IngestError>
    where
        C: StoreConnection + ?Sized,
        I: IntoIterator<Item = Result<UpdateRequest, IngestError>>,
    {
        let mut counters = ProgressCounters::start();
        let mut flushes = 0u64;
        let mut pending: Vec<UpdateRequest> = Vec::with_capacity(self.batch_size.min(65_536));
        debug!(collection, label, batch_size = self.batch_size, "starting update pass");

        for request in requests {
            pending.push(request?);
            counters.documents += 1;
            if pending.len() >= self.batch_size {
                self.flush(conn, collection, &mut pending, &mut counters)?;
                flushes += 1;
                sink.event(ProgressEvent::message(
                    self.progress_line(label, &counters, false),
                ));
            }
        }
        if !pending.is_empty() {
            self.flush(conn, collection, &mut pending, &mut counters)?;
            flushes += 1;
        }
        sink.event(ProgressEvent::message(
            self.progress_line(label, &counters, true),
        ));

        let report = EnrichmentReport {
            seen: counters.documents,
            matched: counters.matched,
            modified: counters.modified,
            failed: counters.failed,
            flushes,
            elapsed: counters.elapsed(),
        };
        info!(
            collection,
            label,
            seen = report.seen,
            matched = report.matched,
            modified = report.modified,
            failed = report.failed,
            "update pass finished"
        );
        Ok(report)
    }

    fn flush<C>(
        &self,
        conn: &mut C,
        collection: &str,
        pending: &mut Vec<UpdateRequest>,
        counters: &mut ProgressCounters,
    ) -> Result<(), IngestError>
    where
        C: StoreConnection + ?Sized,
    {
        let result = conn.bulk_update(collection, pending, self.mode)?;
        counters.matched += result.matched;
        counters.modified += result.modified;
        counters.failed += result.errors.len() as u64;
        for message in &result.errors {
            debug!(collection, %message, "update rejected");
        }
        pending.clear();
        Ok(())
    }

    fn progress_line(&self, label: &str, counters: &ProgressCounters, finished: bool) -> String {
        let snapshot = counters.snapshot();
        let mut line = format!(
            "{label}. Processed {} {}(s) in {} second(s), {} matched, {} modified.",
            snapshot.documents, self.noun, snapshot.elapsed_secs, snapshot.matched, snapshot.modified
        );
        if snapshot.failed > 0 {
            line.push_str(&format!(" {} failed.", snapshot.failed));
        }
        if finished {
            line.insert_str(0, "Finished. ");
        }
        line
    }
}
