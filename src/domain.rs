use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

pub type Document = serde_json::Map<String, serde_json::Value>;

/// Contig name whose records duplicate the true chromosome shards.
pub const PAR_CONTIG: &str = "PAR";

const XPOS_FACTOR: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    file: Utf8PathBuf,
    contig: String,
}

impl WorkUnit {
    pub fn new(file: impl Into<Utf8PathBuf>, contig: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            contig: contig.into(),
        }
    }

    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    pub fn is_dispatchable(&self) -> bool {
        self.contig != PAR_CONTIG
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.contig)
    }
}

/// Inclusive position range inside one contig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub xpos: i64,
    #[serde(rename = "ref")]
    pub ref_allele: String,
    pub alt: String,
}

impl NaturalKey {
    pub const FIELDS: [&'static str; 3] = ["xpos", "ref", "alt"];

    pub fn new(xpos: i64, ref_allele: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            xpos,
            ref_allele: ref_allele.into(),
            alt: alt.into(),
        }
    }

    pub fn from_document(document: &Document) -> Option<Self> {
        let xpos = document.get("xpos")?.as_i64()?;
        let ref_allele = document.get("ref")?.as_str()?;
        let alt = document.get("alt")?.as_str()?;
        Some(Self::new(xpos, ref_allele, alt))
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get("xpos").and_then(|value| value.as_i64()) == Some(self.xpos)
            && document.get("ref").and_then(|value| value.as_str()) == Some(self.ref_allele.as_str())
            && document.get("alt").and_then(|value| value.as_str()) == Some(self.alt.as_str())
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.xpos, self.ref_allele, self.alt)
    }
}

pub fn chrom_code(chrom: &str) -> Option<i64> {
    let name = chrom.strip_prefix("chr").unwrap_or(chrom);
    match name {
        "X" => Some(23),
        "Y" => Some(24),
        "M" | "MT" => Some(25),
        other => other
            .parse::<i64>()
            .ok()
            .filter(|code| (1..=22).contains(code)),
    }
}

pub fn xpos(chrom: &str, position: i64) -> Result<i64, IngestError> {
    chrom_code(chrom)
        .map(|code| code * XPOS_FACTOR + position)
        .ok_or_else(|| IngestError::UnsupportedContig(chrom.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDescriptor {
    pub fn field(field: &str) -> Self {
        Self {
            field: field.to_string(),
            unique: false,
        }
    }

    pub fn unique(field: &str) -> Self {
        Self {
            field: field.to_string(),
            unique: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Genes,
    Transcripts,
    Exons,
    Variants,
    CustomVariants,
    Dbsnp,
    Metrics,
    Whitelist,
    Users,
    SequenceCache,
}

impl CollectionKind {
    /// Fixed collection name; custom variants and the sequence cache are
    /// named by the caller.
    pub fn default_name(self) -> Option<&'static str> {
        match self {
            CollectionKind::Genes => Some("genes"),
            CollectionKind::Transcripts => Some("transcripts"),
            CollectionKind::Exons => Some("exons"),
            CollectionKind::Variants => Some("variants"),
            CollectionKind::Dbsnp => Some("dbsnp"),
            CollectionKind::Metrics => Some("metrics"),
            CollectionKind::Whitelist => Some("whitelist"),
            CollectionKind::Users => Some("users"),
            CollectionKind::CustomVariants | CollectionKind::SequenceCache => None,
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            CollectionKind::Genes => "gene",
            CollectionKind::Transcripts => "transcript",
            CollectionKind::Exons => "exon",
            CollectionKind::Variants | CollectionKind::CustomVariants | CollectionKind::Dbsnp => {
                "variant"
            }
            CollectionKind::Metrics => "metric",
            CollectionKind::Whitelist => "email",
            CollectionKind::Users => "user",
            CollectionKind::SequenceCache => "cached file",
        }
    }

    pub fn indexes(self) -> Vec<IndexDescriptor> {
        let fields: &[&str] = match self {
            CollectionKind::Genes => &["gene_id", "gene_name", "other_names", "xstart", "xstop"],
            CollectionKind::Transcripts => &["transcript_id", "gene_id"],
            CollectionKind::Exons => &["exon_id", "transcript_id", "gene_id"],
            CollectionKind::Variants => &["xpos", "xstop", "rsids", "filter"],
            CollectionKind::CustomVariants => &["xpos", "xstop", "filter"],
            CollectionKind::Dbsnp => &["xpos", "rsid"],
            CollectionKind::Metrics => &["metric"],
            CollectionKind::Whitelist | CollectionKind::Users => &["user_id"],
            CollectionKind::SequenceCache => return vec![IndexDescriptor::unique("name")],
        };
        fields.iter().map(|field| IndexDescriptor::field(field)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkMode {
    /// The whole batch commits or none of it does.
    Ordered,
    /// Each operation stands alone; failures are counted and skipped.
    #[default]
    Unordered,
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkMode::Ordered => write!(f, "ordered"),
            BulkMode::Unordered => write!(f, "unordered"),
        }
    }
}

impl FromStr for BulkMode {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ordered" => Ok(BulkMode::Ordered),
            "unordered" => Ok(BulkMode::Unordered),
            other => Err(IngestError::InvalidConfig(format!("unknown bulk mode: {other}"))),
        }
    }
}

/// What to do when two loaded documents share a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Allow,
    Reject,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Allow => write!(f, "allow"),
            DuplicatePolicy::Reject => write!(f, "reject"),
        }
    }
}
