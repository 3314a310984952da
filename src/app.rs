use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::batch::{BatchReport, BulkWriteBatcher};
use crate::config::LoadSettings;
use crate::domain::{CollectionKind, Document, DuplicatePolicy, WorkUnit};
use crate::enrich::{EnrichmentPass, EnrichmentReport};
use crate::error::IngestError;
use crate::lifecycle::{CollectionLifecycle, DropPolicy};
use crate::partition::partition_files;
use crate::pool::{UnitOutcome, WorkerPool};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::sources::gencode::{EXON_FEATURES, GENE_FEATURES, TRANSCRIPT_FEATURES};
use crate::sources::plain::{metrics_documents, whitelist_documents};
use crate::sources::{
    DbsnpSource, DocumentStream, GencodeSource, GeneAnnotations, RecordSource, SitesVcfSource,
    percentile_requests,
};
use crate::store::{DocumentStore, StoreConnection, UpdateRequest};

const VARIANTS: &str = "variants";

/// Steps of a sharded collection load. Any step may end in a failed `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Start,
    DropCollection,
    DispatchWorkUnits,
    AwaitAllWorkers,
    BuildIndexes,
    Done { failed: bool },
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Start => write!(f, "START"),
            LoadPhase::DropCollection => write!(f, "DROP_COLLECTION"),
            LoadPhase::DispatchWorkUnits => write!(f, "DISPATCH_WORK_UNITS"),
            LoadPhase::AwaitAllWorkers => write!(f, "AWAIT_ALL_WORKERS"),
            LoadPhase::BuildIndexes => write!(f, "BUILD_INDEXES"),
            LoadPhase::Done { failed: false } => write!(f, "DONE"),
            LoadPhase::Done { failed: true } => write!(f, "DONE(failed)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub collection: String,
    pub documents: u64,
    pub units: usize,
    pub skipped_units: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub collections: Vec<CollectionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitUpdate {
    pub unit: String,
    pub seen: u64,
    pub matched: u64,
    pub modified: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub collection: String,
    pub units: Vec<UnitUpdate>,
}

/// Input files of the gene model load.
#[derive(Debug, Clone)]
pub struct GeneModelFiles {
    pub canonical_transcripts: Utf8PathBuf,
    pub omim: Utf8PathBuf,
    pub genenames: Utf8PathBuf,
    pub gencode: Utf8PathBuf,
}

/// Where a sharded load writes and how its target is reset.
struct ShardedLoad<'a> {
    kind: CollectionKind,
    collection: &'a str,
    drop_policy: DropPolicy,
    histograms: bool,
}

pub struct App<S: DocumentStore> {
    store: S,
    settings: LoadSettings,
}

impl<S: DocumentStore> App<S> {
    pub fn new(store: S, settings: LoadSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    /// Genes, transcripts and exons from one GENCODE GTF. Gene documents
    /// are merged with the canonical transcript, OMIM and HGNC lookups.
    pub fn load_genes(
        &self,
        files: &GeneModelFiles,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let annotations =
            GeneAnnotations::load(&files.canonical_transcripts, &files.omim, &files.genenames)?;
        ensure_input(&files.gencode)?;

        let plan = [
            (
                CollectionKind::Genes,
                GencodeSource::new(&files.gencode, GENE_FEATURES).with_annotations(annotations),
            ),
            (
                CollectionKind::Transcripts,
                GencodeSource::new(&files.gencode, TRANSCRIPT_FEATURES),
            ),
            (CollectionKind::Exons, GencodeSource::new(&files.gencode, EXON_FEATURES)),
        ];

        let mut conn = self.store.connect()?;
        for (kind, _) in &plan {
            CollectionLifecycle::prepare(&mut conn, fixed_name(*kind)?, DropPolicy::Always)?;
        }
        let mut collections = Vec::with_capacity(plan.len());
        for (kind, source) in &plan {
            let summary = self.load_stream(&mut conn, *kind, source.documents()?, sink)?;
            collections.push(summary);
        }
        Ok(LoadResult { collections })
    }

    /// Empty users collection, indexed on `user_id`.
    pub fn create_users(&self) -> Result<LoadResult, IngestError> {
        let collection = fixed_name(CollectionKind::Users)?;
        let mut conn = self.store.connect()?;
        CollectionLifecycle::prepare(&mut conn, collection, DropPolicy::Always)?;
        let documents =
            CollectionLifecycle::finalize(&mut conn, collection, &CollectionKind::Users.indexes())?;
        Ok(single(collection, documents))
    }

    pub fn load_whitelist(
        &self,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let stream = whitelist_documents(path)?;
        self.reload(CollectionKind::Whitelist, stream, sink)
    }

    pub fn load_metrics(
        &self,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let stream = metrics_documents(path)?;
        self.reload(CollectionKind::Metrics, stream, sink)
    }

    pub fn load_dbsnp(
        &self,
        files: &[Utf8PathBuf],
        threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let target = ShardedLoad {
            kind: CollectionKind::Dbsnp,
            collection: fixed_name(CollectionKind::Dbsnp)?,
            drop_policy: DropPolicy::Always,
            histograms: false,
        };
        let summary = self.load_sharded(&target, files, threads, &DbsnpSource, sink)?;
        Ok(LoadResult {
            collections: vec![summary],
        })
    }

    pub fn load_variants(
        &self,
        files: &[Utf8PathBuf],
        threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let target = ShardedLoad {
            kind: CollectionKind::Variants,
            collection: fixed_name(CollectionKind::Variants)?,
            drop_policy: DropPolicy::Always,
            histograms: true,
        };
        let summary = self.load_sharded(&target, files, threads, &SitesVcfSource, sink)?;
        Ok(LoadResult {
            collections: vec![summary],
        })
    }

    /// Variants into a caller-named collection, without histograms. The
    /// collection is dropped only if it already exists.
    pub fn load_custom_variants(
        &self,
        files: &[Utf8PathBuf],
        collection: &str,
        threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(IngestError::InvalidConfig(
                "custom variant collection name must not be empty".to_string(),
            ));
        }
        let target = ShardedLoad {
            kind: CollectionKind::CustomVariants,
            collection,
            drop_policy: DropPolicy::IfExists,
            histograms: false,
        };
        let summary = self.load_sharded(&target, files, threads, &SitesVcfSource, sink)?;
        Ok(LoadResult {
            collections: vec![summary],
        })
    }

    /// Creates the sequence cache collection and its unique `name` index.
    /// Existing cache entries are kept.
    pub fn create_sequence_cache(&self) -> Result<LoadResult, IngestError> {
        let collection = self.settings.sequence_cache_collection.as_str();
        let mut conn = self.store.connect()?;
        let documents = CollectionLifecycle::finalize(
            &mut conn,
            collection,
            &CollectionKind::SequenceCache.indexes(),
        )?;
        info!(collection, documents, "sequence cache ready");
        Ok(single(collection, documents))
    }

    /// One worker per percentile file; each sets the percentiles field on
    /// the variants it matches by natural key.
    pub fn load_percentiles(
        &self,
        files: &[Utf8PathBuf],
        threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<UpdateResult, IngestError> {
        for file in files {
            ensure_input(file)?;
        }
        let pass = EnrichmentPass::new(self.settings.percentile_batch_size, self.settings.bulk_mode);
        let outcomes = WorkerPool::new(threads).run(files.to_vec(), |file| {
            let mut conn = self.store.connect()?;
            let requests = percentile_requests(file)?;
            pass.run(&mut conn, VARIANTS, &format!("VCF {file}"), requests, sink)
        });
        collect_updates(VARIANTS, outcomes)
    }

    /// Keyed update of existing variants: every field of each parsed
    /// variant except `xpos`, `ref` and `alt` is set on its match.
    pub fn update_variants(
        &self,
        files: &[Utf8PathBuf],
        threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<UpdateResult, IngestError> {
        let units: Vec<WorkUnit> = partition_files(files)?
            .into_iter()
            .filter(WorkUnit::is_dispatchable)
            .collect();
        let pass = EnrichmentPass::new(self.settings.update_batch_size, self.settings.bulk_mode)
            .with_noun("document");
        let source = SitesVcfSource;
        let outcomes = WorkerPool::new(threads).run(units, |unit| {
            let mut conn = self.store.connect()?;
            let documents = source.open(unit, None, false)?;
            let requests = documents.filter_map(|document| match document {
                Ok(document) => UpdateRequest::from_document(&document).map(Ok),
                Err(err) => Some(Err(err)),
            });
            pass.run(&mut conn, VARIANTS, &format!("VCF/BCF {unit}"), requests, sink)
        });
        collect_updates(VARIANTS, outcomes)
    }

    fn load_sharded<R: RecordSource>(
        &self,
        target: &ShardedLoad<'_>,
        files: &[Utf8PathBuf],
        threads: usize,
        source: &R,
        sink: &dyn ProgressSink,
    ) -> Result<CollectionSummary, IngestError> {
        let collection = target.collection;
        enter(collection, LoadPhase::Start);
        let units = partition_files(files).inspect_err(|_| fail(collection))?;
        let skipped_units = units.iter().filter(|unit| !unit.is_dispatchable()).count();
        info!(collection, units = units.len(), skipped_units, threads, "partitioned input");

        enter(collection, LoadPhase::DropCollection);
        {
            let mut conn = self.store.connect().inspect_err(|_| fail(collection))?;
            CollectionLifecycle::prepare(&mut conn, collection, target.drop_policy)
                .inspect_err(|_| fail(collection))?;
        }

        enter(collection, LoadPhase::DispatchWorkUnits);
        let total = units.len();
        let batcher = BulkWriteBatcher::new(self.settings.insert_batch_size);
        let mode = self.settings.bulk_mode;
        let outcomes = WorkerPool::new(threads).run(units, |unit| {
            if !unit.is_dispatchable() {
                return Ok(BatchReport::default());
            }
            let mut conn = self.store.connect()?;
            let stream = source.open(unit, None, target.histograms)?;
            batcher.write(&mut conn, collection, stream, mode)
        });

        enter(collection, LoadPhase::AwaitAllWorkers);
        let mut failed = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(report) => info!(
                    collection,
                    unit = %outcome.unit,
                    documents = report.documents,
                    batches = report.batches,
                    "work unit finished"
                ),
                Err(err) => {
                    failed += 1;
                    error!(collection, unit = %outcome.unit, error = %err, "work unit failed");
                }
            }
        }
        if failed > 0 {
            fail(collection);
            return Err(IngestError::WorkUnitsFailed {
                collection: collection.to_string(),
                failed,
                total,
            });
        }

        let mut conn = self.store.connect().inspect_err(|_| fail(collection))?;
        if self.settings.duplicate_policy == DuplicatePolicy::Reject {
            let duplicates = conn
                .count_duplicate_keys(collection)
                .inspect_err(|_| fail(collection))?;
            if duplicates > 0 {
                fail(collection);
                return Err(IngestError::DuplicateKeys {
                    collection: collection.to_string(),
                    duplicates,
                });
            }
        }

        enter(collection, LoadPhase::BuildIndexes);
        let documents = CollectionLifecycle::finalize(&mut conn, collection, &target.kind.indexes())
            .inspect_err(|_| fail(collection))?;
        sink.event(ProgressEvent::message(inserted_line(documents, target.kind)));
        enter(collection, LoadPhase::Done { failed: false });

        Ok(CollectionSummary {
            collection: collection.to_string(),
            documents,
            units: total,
            skipped_units,
        })
    }

    fn reload(
        &self,
        kind: CollectionKind,
        stream: DocumentStream<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, IngestError> {
        let mut conn = self.store.connect()?;
        CollectionLifecycle::prepare(&mut conn, fixed_name(kind)?, DropPolicy::Always)?;
        let summary = self.load_stream(&mut conn, kind, stream, sink)?;
        Ok(LoadResult {
            collections: vec![summary],
        })
    }

    /// Single-stream load into an already prepared fixed collection.
    fn load_stream<I>(
        &self,
        conn: &mut S::Connection,
        kind: CollectionKind,
        stream: I,
        sink: &dyn ProgressSink,
    ) -> Result<CollectionSummary, IngestError>
    where
        I: IntoIterator<Item = Result<Document, IngestError>>,
    {
        let collection = fixed_name(kind)?;
        let batcher = BulkWriteBatcher::new(self.settings.insert_batch_size);
        let report = batcher.write(conn, collection, stream, self.settings.bulk_mode)?;
        info!(collection, documents = report.documents, batches = report.batches, "loaded collection");
        let documents = CollectionLifecycle::finalize(conn, collection, &kind.indexes())?;
        sink.event(ProgressEvent::message(inserted_line(documents, kind)));
        Ok(CollectionSummary {
            collection: collection.to_string(),
            documents,
            units: 1,
            skipped_units: 0,
        })
    }
}

pub fn inserted_line(documents: u64, kind: CollectionKind) -> String {
    format!("Inserted {documents} {}(s).", kind.noun())
}

fn enter(collection: &str, phase: LoadPhase) {
    info!(collection, %phase, "load phase");
}

fn fail(collection: &str) {
    let phase = LoadPhase::Done { failed: true };
    warn!(collection, %phase, "load phase");
}

fn fixed_name(kind: CollectionKind) -> Result<&'static str, IngestError> {
    kind.default_name()
        .ok_or_else(|| IngestError::InvalidConfig(format!("{kind:?} has no fixed collection name")))
}

fn ensure_input(path: &Utf8Path) -> Result<(), IngestError> {
    if path.as_std_path().is_file() {
        Ok(())
    } else {
        Err(IngestError::MissingInput(path.to_path_buf()))
    }
}

fn single(collection: &str, documents: u64) -> LoadResult {
    LoadResult {
        collections: vec![CollectionSummary {
            collection: collection.to_string(),
            documents,
            units: 0,
            skipped_units: 0,
        }],
    }
}

fn collect_updates<T: fmt::Display>(
    collection: &str,
    outcomes: Vec<UnitOutcome<T, EnrichmentReport>>,
) -> Result<UpdateResult, IngestError> {
    let total = outcomes.len();
    let mut units = Vec::with_capacity(total);
    let mut failed = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(report) => units.push(UnitUpdate {
                unit: outcome.unit.to_string(),
                seen: report.seen,
                matched: report.matched,
                modified: report.modified,
                failed: report.failed,
            }),
            Err(err) => {
                failed += 1;
                error!(collection, unit = %outcome.unit, error = %err, "update unit failed");
            }
        }
    }
    if failed > 0 {
        return Err(IngestError::WorkUnitsFailed {
            collection: collection.to_string(),
            failed,
            total,
        });
    }
    Ok(UpdateResult {
        collection: collection.to_string(),
        units,
    })
}
