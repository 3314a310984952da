use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("input file not found: {0}")]
    MissingInput(Utf8PathBuf),

    #[error("failed to read {path}: {message}")]
    InputRead { path: Utf8PathBuf, message: String },

    #[error("no tabix index found for {0} (expected .tbi or .csi next to it)")]
    MissingIndex(Utf8PathBuf),

    #[error("invalid index {path}: {message}")]
    InvalidIndex { path: Utf8PathBuf, message: String },

    #[error("contig {contig} is not present in the index of {path}")]
    UnknownContig { path: Utf8PathBuf, contig: String },

    #[error("unsupported contig for genome-wide position: {0}")]
    UnsupportedContig(String),

    #[error("malformed record in {path} at line {line}: {message}")]
    MalformedRecord {
        path: Utf8PathBuf,
        line: u64,
        message: String,
    },

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("store connection failed: {0}")]
    StoreConnect(String),

    #[error("store operation failed: {0}")]
    Store(String),

    #[error("bulk write into {collection} failed: {failed} of {attempted} operation(s) rejected ({message})")]
    BulkWrite {
        collection: String,
        attempted: usize,
        failed: usize,
        message: String,
    },

    #[error("collection {collection} holds {duplicates} duplicate natural key(s)")]
    DuplicateKeys { collection: String, duplicates: u64 },

    #[error("{failed} of {total} work unit(s) failed while loading {collection}")]
    WorkUnitsFailed {
        collection: String,
        failed: usize,
        total: usize,
    },

    #[error("worker panicked while processing {0}")]
    WorkerPanic(String),
}

impl IngestError {
    pub fn read(path: impl Into<Utf8PathBuf>, err: impl ToString) -> Self {
        IngestError::InputRead {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Errors raised before any work is dispatched.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            IngestError::MissingInput(_)
                | IngestError::InputRead { .. }
                | IngestError::MissingIndex(_)
                | IngestError::InvalidIndex { .. }
                | IngestError::ConfigRead(_)
                | IngestError::ConfigParse(_)
                | IngestError::InvalidConfig(_)
        )
    }
}
