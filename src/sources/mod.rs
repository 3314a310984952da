//! Record sources turn raw input files into documents.
//!
//! The loaders treat documents as opaque; only the natural-key fields
//! (`xpos`, `ref`, `alt`) are ever read back by the pipeline.

pub mod dbsnp;
pub mod gencode;
pub mod plain;
pub mod vcf;

use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;

use crate::domain::{Document, Region, WorkUnit};
use crate::error::IngestError;
use crate::tabix::ShardLine;

pub use dbsnp::DbsnpSource;
pub use gencode::{GencodeSource, GeneAnnotations};
pub use vcf::{SitesVcfSource, percentile_requests};

pub type DocumentStream<'a> = Box<dyn Iterator<Item = Result<Document, IngestError>> + 'a>;

/// Produces the documents of one work unit, lazily and exactly once.
pub trait RecordSource: Send + Sync {
    fn open(
        &self,
        unit: &WorkUnit,
        region: Option<Region>,
        histograms: bool,
    ) -> Result<DocumentStream<'_>, IngestError>;
}

/// Opens a text file, transparently decompressing gzip/BGZF input.
pub fn open_text(path: &Utf8Path) -> Result<Box<dyn BufRead + Send>, IngestError> {
    if !path.as_std_path().is_file() {
        return Err(IngestError::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path.as_std_path()).map_err(|err| IngestError::read(path, err))?;
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz")) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file)))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Numbered lines of a text file, starting at 1.
pub fn text_lines(
    path: &Utf8Path,
) -> Result<impl Iterator<Item = Result<ShardLine, IngestError>> + Send + use<>, IngestError> {
    let reader = open_text(path)?;
    let path = path.to_path_buf();
    Ok(reader.lines().enumerate().map(move |(index, line)| {
        line.map(|text| ShardLine {
            ordinal: index as u64 + 1,
            text,
        })
        .map_err(|err| IngestError::read(path.clone(), err))
    }))
}

/// Turns per-line parse results into a flat document stream, tagging parse
/// failures with the file and line they came from.
pub(crate) fn parse_lines<'a, I, F>(path: Utf8PathBuf, lines: I, mut parse: F) -> DocumentStream<'a>
where
    I: Iterator<Item = Result<ShardLine, IngestError>> + 'a,
    F: FnMut(&str) -> Result<Vec<Document>, String> + 'a,
{
    Box::new(lines.flat_map(move |line| -> Vec<Result<Document, IngestError>> {
        match line {
            Err(err) => vec![Err(err)],
            Ok(line) => match parse(&line.text) {
                Ok(documents) => documents.into_iter().map(Ok).collect(),
                Err(message) => vec![Err(IngestError::MalformedRecord {
                    path: path.clone(),
                    line: line.ordinal,
                    message,
                })],
            },
        }
    }))
}
