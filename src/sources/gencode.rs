use std::collections::HashMap;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde_json::{Map, json};
use tracing::debug;

use crate::domain::{Document, chrom_code, xpos};
use crate::error::IngestError;
use crate::tabix::ShardLine;

use super::{DocumentStream, parse_lines, text_lines};

pub const GENE_FEATURES: &[&str] = &["gene"];
pub const TRANSCRIPT_FEATURES: &[&str] = &["transcript"];
pub const EXON_FEATURES: &[&str] = &["exon", "CDS", "UTR"];

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\S+)\s+"([^"]*)""#).unwrap());

const ID_ATTRIBUTES: &[&str] = &["gene_id", "transcript_id", "exon_id"];
const NAME_ATTRIBUTES: &[&str] = &["gene_name", "gene_type", "transcript_type", "transcript_name"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct OmimEntry {
    accession: String,
    description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GeneNames {
    full_name: String,
    other_names: Vec<String>,
}

/// Lookups merged into gene documents, keyed by unversioned Ensembl gene ID.
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotations {
    canonical_transcripts: HashMap<String, String>,
    omim: HashMap<String, OmimEntry>,
    names: HashMap<String, GeneNames>,
}

impl GeneAnnotations {
    pub fn load(
        canonical_transcripts: &Utf8Path,
        omim: &Utf8Path,
        genenames: &Utf8Path,
    ) -> Result<Self, IngestError> {
        let annotations = Self {
            canonical_transcripts: read_canonical_transcripts(canonical_transcripts)?,
            omim: read_omim(omim)?,
            names: read_genenames(genenames)?,
        };
        debug!(
            canonical = annotations.canonical_transcripts.len(),
            omim = annotations.omim.len(),
            names = annotations.names.len(),
            "loaded gene annotations"
        );
        Ok(annotations)
    }

    pub fn annotate(&self, gene: &mut Document) {
        let Some(gene_id) = gene.get("gene_id").and_then(|value| value.as_str()).map(str::to_string)
        else {
            return;
        };
        if let Some(transcript) = self.canonical_transcripts.get(&gene_id) {
            gene.insert("canonical_transcript".to_string(), json!(transcript));
        }
        if let Some(entry) = self.omim.get(&gene_id) {
            gene.insert("omim_accession".to_string(), json!(entry.accession));
            gene.insert("omim_description".to_string(), json!(entry.description));
        }
        if let Some(names) = self.names.get(&gene_id) {
            gene.insert("full_gene_name".to_string(), json!(names.full_name));
            gene.insert("other_names".to_string(), json!(names.other_names));
        }
    }
}

/// Features of one or more kinds from a gzip-compressed GTF file.
#[derive(Debug, Clone)]
pub struct GencodeSource {
    path: Utf8PathBuf,
    features: &'static [&'static str],
    annotations: Option<GeneAnnotations>,
}

impl GencodeSource {
    pub fn new(path: impl Into<Utf8PathBuf>, features: &'static [&'static str]) -> Self {
        Self {
            path: path.into(),
            features,
            annotations: None,
        }
    }

    pub fn with_annotations(mut self, annotations: GeneAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    pub fn documents(&self) -> Result<DocumentStream<'_>, IngestError> {
        let lines = text_lines(&self.path)?;
        Ok(parse_lines(self.path.clone(), lines, move |text| {
            let mut documents = parse_gtf_line(text, self.features)?;
            if let Some(annotations) = &self.annotations {
                documents
                    .iter_mut()
                    .for_each(|document| annotations.annotate(document));
            }
            Ok(documents)
        }))
    }
}

/// Returns no document for comments, unwanted features, and contigs that
/// have no genome-wide position (scaffolds, patches).
pub fn parse_gtf_line(text: &str, features: &[&str]) -> Result<Vec<Document>, String> {
    if text.starts_with('#') || text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let columns: Vec<&str> = text.split('\t').collect();
    if columns.len() < 9 {
        return Err(format!("expected 9 GTF columns, found {}", columns.len()));
    }
    let feature = columns[2];
    if !features.contains(&feature) {
        return Ok(Vec::new());
    }
    let chrom = columns[0].strip_prefix("chr").unwrap_or(columns[0]);
    if chrom_code(chrom).is_none() {
        return Ok(Vec::new());
    }
    let start = columns[3]
        .parse::<i64>()
        .map_err(|_| format!("invalid start {:?}", columns[3]))?;
    let stop = columns[4]
        .parse::<i64>()
        .map_err(|_| format!("invalid stop {:?}", columns[4]))?;

    let mut document = Map::new();
    document.insert("feature_type".to_string(), json!(feature));
    document.insert("chrom".to_string(), json!(chrom));
    document.insert("start".to_string(), json!(start));
    document.insert("stop".to_string(), json!(stop));
    document.insert("strand".to_string(), json!(columns[6]));
    document.insert(
        "xstart".to_string(),
        json!(xpos(chrom, start).map_err(|err| err.to_string())?),
    );
    document.insert(
        "xstop".to_string(),
        json!(xpos(chrom, stop).map_err(|err| err.to_string())?),
    );

    for capture in ATTRIBUTE.captures_iter(columns[8]) {
        let (name, value) = (&capture[1], &capture[2]);
        if ID_ATTRIBUTES.contains(&name) {
            document.insert(name.to_string(), json!(strip_version(value)));
        } else if NAME_ATTRIBUTES.contains(&name) {
            document.insert(name.to_string(), json!(value));
        }
    }
    Ok(vec![document])
}

pub fn strip_version(id: &str) -> &str {
    match id.split_once('.') {
        Some((stable, version))
            if id.starts_with("ENS") && version.chars().all(|ch| ch.is_ascii_digit()) =>
        {
            stable
        }
        _ => id,
    }
}

fn read_canonical_transcripts(path: &Utf8Path) -> Result<HashMap<String, String>, IngestError> {
    let mut transcripts = HashMap::new();
    for line in text_lines(path)? {
        let line = line?;
        let mut columns = line.text.split_whitespace();
        match (columns.next(), columns.next()) {
            (Some(gene), Some(transcript)) => {
                transcripts.insert(
                    strip_version(gene).to_string(),
                    strip_version(transcript).to_string(),
                );
            }
            (None, _) => continue,
            (Some(_), None) => {
                return Err(malformed(path, line.ordinal, "expected gene and transcript IDs"));
            }
        }
    }
    Ok(transcripts)
}

fn read_omim(path: &Utf8Path) -> Result<HashMap<String, OmimEntry>, IngestError> {
    let mut lines = text_lines(path)?;
    let header = header_line(path, &mut lines)?;
    let [gene_col, accession_col, description_col] = locate_columns(
        path,
        &header,
        ["Gene stable ID", "MIM gene accession", "MIM gene description"],
    )?;

    let mut entries = HashMap::new();
    for line in lines {
        let line = line?;
        let columns: Vec<&str> = line.text.split('\t').collect();
        let field = |index: usize| columns.get(index).map(|value| value.trim()).unwrap_or("");
        let (gene, accession) = (field(gene_col), field(accession_col));
        if gene.is_empty() || accession.is_empty() {
            continue;
        }
        entries.insert(
            strip_version(gene).to_string(),
            OmimEntry {
                accession: accession.to_string(),
                description: field(description_col).to_string(),
            },
        );
    }
    Ok(entries)
}

fn read_genenames(path: &Utf8Path) -> Result<HashMap<String, GeneNames>, IngestError> {
    let mut lines = text_lines(path)?;
    let header = header_line(path, &mut lines)?;
    let [name_col, alias_col, prev_col, ensembl_col] = locate_columns(
        path,
        &header,
        ["name", "alias_symbol", "prev_name", "ensembl_gene_id"],
    )?;

    let mut names = HashMap::new();
    for line in lines {
        let line = line?;
        let columns: Vec<&str> = line.text.split('\t').collect();
        let field = |index: usize| {
            columns
                .get(index)
                .map(|value| value.trim().trim_matches('"'))
                .unwrap_or("")
        };
        let gene = field(ensembl_col);
        if gene.is_empty() {
            continue;
        }
        let other_names = [field(alias_col), field(prev_col)]
            .iter()
            .flat_map(|value| value.split('|'))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect();
        names.insert(
            strip_version(gene).to_string(),
            GeneNames {
                full_name: field(name_col).to_string(),
                other_names,
            },
        );
    }
    Ok(names)
}

fn header_line(
    path: &Utf8Path,
    lines: &mut impl Iterator<Item = Result<ShardLine, IngestError>>,
) -> Result<Vec<String>, IngestError> {
    let line = lines
        .next()
        .transpose()?
        .ok_or_else(|| malformed(path, 1, "missing header line"))?;
    Ok(line
        .text
        .split('\t')
        .map(|name| name.trim().trim_matches('"').to_string())
        .collect())
}

fn locate_columns<const N: usize>(
    path: &Utf8Path,
    header: &[String],
    names: [&str; N],
) -> Result<[usize; N], IngestError> {
    let mut found = [0usize; N];
    for (slot, name) in found.iter_mut().zip(names) {
        *slot = header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| malformed(path, 1, &format!("missing column {name:?}")))?;
    }
    Ok(found)
}

fn malformed(path: &Utf8Path, line: u64, message: &str) -> IngestError {
    IngestError::MalformedRecord {
        path: path.to_path_buf(),
        line,
        message: message.to_string(),
    }
}
