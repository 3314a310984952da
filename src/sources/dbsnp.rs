use serde_json::{Map, json};

use crate::domain::{Document, Region, WorkUnit, xpos};
use crate::error::IngestError;
use crate::tabix::ContigLines;

use super::{DocumentStream, RecordSource, parse_lines};

/// Three tab-separated columns without header: rsId number, chromosome and
/// 0-based position.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbsnpSource;

impl RecordSource for DbsnpSource {
    fn open(
        &self,
        unit: &WorkUnit,
        region: Option<Region>,
        _histograms: bool,
    ) -> Result<DocumentStream<'_>, IngestError> {
        let lines = ContigLines::open(unit.file(), unit.contig(), region)?;
        Ok(parse_lines(unit.file().to_path_buf(), lines, |text| {
            parse_dbsnp_line(text).map(|document| vec![document])
        }))
    }
}

pub fn parse_dbsnp_line(text: &str) -> Result<Document, String> {
    let mut columns = text.split('\t');
    let (Some(rsid), Some(chrom), Some(position)) = (columns.next(), columns.next(), columns.next())
    else {
        return Err("expected three columns: rsid, chromosome, position".to_string());
    };
    let rsid = rsid
        .trim_start_matches("rs")
        .parse::<i64>()
        .map_err(|_| format!("invalid rsid {rsid:?}"))?;
    let position = position
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("invalid position {position:?}"))?;
    let xpos = xpos(chrom, position + 1).map_err(|err| err.to_string())?;

    let mut document = Map::new();
    document.insert("rsid".to_string(), json!(rsid));
    document.insert("xpos".to_string(), json!(xpos));
    Ok(document)
}
