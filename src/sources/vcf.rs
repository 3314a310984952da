use camino::Utf8Path;
use serde_json::{Map, Value, json};

use crate::domain::{Document, NaturalKey, Region, WorkUnit, xpos};
use crate::error::IngestError;
use crate::store::UpdateRequest;
use crate::tabix::ContigLines;

use super::{DocumentStream, RecordSource, parse_lines, text_lines};

pub const PERCENTILES_FIELD: &str = "quality_metrics_percentiles";

/// Site-level VCF (no genotypes); one document per alternate allele.
#[derive(Debug, Clone, Copy, Default)]
pub struct SitesVcfSource;

impl RecordSource for SitesVcfSource {
    fn open(
        &self,
        unit: &WorkUnit,
        region: Option<Region>,
        histograms: bool,
    ) -> Result<DocumentStream<'_>, IngestError> {
        let lines = ContigLines::open(unit.file(), unit.contig(), region)?;
        Ok(parse_lines(unit.file().to_path_buf(), lines, move |text| {
            parse_sites_line(text, histograms)
        }))
    }
}

struct SitesLine<'a> {
    chrom: &'a str,
    pos: i64,
    id: &'a str,
    ref_allele: &'a str,
    alts: Vec<&'a str>,
    qual: &'a str,
    filter: &'a str,
    info: Vec<(&'a str, Option<&'a str>)>,
}

impl<'a> SitesLine<'a> {
    fn parse(text: &'a str) -> Result<Self, String> {
        let columns: Vec<&str> = text.split('\t').collect();
        if columns.len() < 8 {
            return Err(format!("expected at least 8 columns, found {}", columns.len()));
        }
        let pos = columns[1]
            .parse::<i64>()
            .map_err(|_| format!("invalid position {:?}", columns[1]))?;
        let info = if columns[7] == "." {
            Vec::new()
        } else {
            columns[7]
                .split(';')
                .filter(|entry| !entry.is_empty())
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => (key, Some(value)),
                    None => (entry, None),
                })
                .collect()
        };
        Ok(Self {
            chrom: columns[0],
            pos,
            id: columns[2],
            ref_allele: columns[3],
            alts: columns[4].split(',').collect(),
            qual: columns[5],
            filter: columns[6],
            info,
        })
    }

    fn info(&self, key: &str) -> Option<&'a str> {
        self.info
            .iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, value)| *value)
    }

    fn key(&self, allele: usize) -> Result<NaturalKey, String> {
        let xpos = xpos(self.chrom, self.pos).map_err(|err| err.to_string())?;
        Ok(NaturalKey::new(xpos, self.ref_allele, self.alts[allele]))
    }
}

pub fn parse_sites_line(text: &str, histograms: bool) -> Result<Vec<Document>, String> {
    let line = SitesLine::parse(text)?;
    let rsids: Vec<&str> = line
        .id
        .split(';')
        .filter(|id| id.starts_with("rs"))
        .collect();
    let filter = if line.filter == "." { "PASS" } else { line.filter };
    let site_quality = line.qual.parse::<f64>().ok();
    let allele_num = line.info("AN").and_then(|value| value.parse::<i64>().ok());
    let allele_counts = numbers::<i64>(line.info("AC"));
    let allele_freqs = numbers::<f64>(line.info("AF"));

    let mut documents = Vec::with_capacity(line.alts.len());
    for allele in 0..line.alts.len() {
        let key = line.key(allele)?;
        let allele_count = allele_counts.get(allele).copied().flatten();
        let allele_freq = allele_freqs
            .get(allele)
            .copied()
            .flatten()
            .or_else(|| match (allele_count, allele_num) {
                (Some(count), Some(num)) if num > 0 => Some(count as f64 / num as f64),
                _ => None,
            });

        let mut document = Map::new();
        document.insert("chrom".to_string(), json!(line.chrom));
        document.insert("pos".to_string(), json!(line.pos));
        document.insert("xpos".to_string(), json!(key.xpos));
        document.insert(
            "xstop".to_string(),
            json!(key.xpos + line.ref_allele.len() as i64 - 1),
        );
        document.insert("ref".to_string(), json!(key.ref_allele));
        document.insert("alt".to_string(), json!(key.alt));
        document.insert("rsids".to_string(), json!(rsids));
        document.insert("filter".to_string(), json!(filter));
        document.insert("site_quality".to_string(), json!(site_quality));
        document.insert("allele_count".to_string(), json!(allele_count));
        document.insert("allele_num".to_string(), json!(allele_num));
        document.insert("allele_freq".to_string(), json!(allele_freq));
        if histograms {
            let mut summary = Map::new();
            for (name, value) in &line.info {
                if let (Some(metric), Some(value)) = (name.strip_suffix("_HIST"), value) {
                    let bins: Vec<Option<f64>> = numbers::<f64>(Some(*value));
                    summary.insert(metric.to_string(), json!(bins));
                }
            }
            document.insert("histograms".to_string(), Value::Object(summary));
        }
        documents.push(document);
    }
    Ok(documents)
}

/// Percentile updates, one per alternate allele. INFO keys ending in `_P`
/// hold `low,high`; the suffix is dropped from the stored metric name.
pub fn parse_percentile_line(text: &str) -> Result<Vec<UpdateRequest>, String> {
    let line = SitesLine::parse(text)?;
    let mut percentiles = Map::new();
    for (name, value) in &line.info {
        let (Some(metric), Some(value)) = (name.strip_suffix("_P"), value) else {
            continue;
        };
        let bounds = numbers::<f64>(Some(*value));
        match bounds.as_slice() {
            [Some(low), Some(high)] => {
                percentiles.insert(metric.to_string(), json!([low, high]));
            }
            _ => return Err(format!("percentile {name} must hold two numbers, got {value:?}")),
        }
    }

    let mut requests = Vec::with_capacity(line.alts.len());
    for allele in 0..line.alts.len() {
        let mut set = Map::new();
        set.insert(
            PERCENTILES_FIELD.to_string(),
            Value::Object(percentiles.clone()),
        );
        requests.push(UpdateRequest {
            key: line.key(allele)?,
            set,
        });
    }
    Ok(requests)
}

pub fn percentile_requests(
    path: &Utf8Path,
) -> Result<impl Iterator<Item = Result<UpdateRequest, IngestError>> + use<>, IngestError> {
    let owned = path.to_path_buf();
    let lines = text_lines(path)?;
    Ok(lines
        .filter(|line| match line {
            Ok(line) => !line.text.starts_with('#') && !line.text.is_empty(),
            Err(_) => true,
        })
        .flat_map(move |line| -> Vec<Result<UpdateRequest, IngestError>> {
            match line {
                Err(err) => vec![Err(err)],
                Ok(line) => match parse_percentile_line(&line.text) {
                    Ok(requests) => requests.into_iter().map(Ok).collect(),
                    Err(message) => vec![Err(IngestError::MalformedRecord {
                        path: owned.clone(),
                        line: line.ordinal,
                        message,
                    })],
                },
            }
        }))
}

fn numbers<T: std::str::FromStr>(value: Option<&str>) -> Vec<Option<T>> {
    value
        .map(|value| value.split(',').map(|item| item.parse::<T>().ok()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiallelic_site_yields_one_document_per_allele() {
        let line = "chr1\t100\trs1;rs2\tA\tC,T\t50\t.\tAC=3,1;AN=10;DP_HIST=1,2,3";
        let documents = parse_sites_line(line, true).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["xpos"], json!(1_000_000_100i64));
        assert_eq!(documents[1]["alt"], json!("T"));
        assert_eq!(documents[0]["rsids"], json!(["rs1", "rs2"]));
        assert_eq!(documents[0]["filter"], json!("PASS"));
        assert_eq!(documents[1]["allele_freq"], json!(0.1));
        assert_eq!(documents[0]["histograms"]["DP"], json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn histograms_are_omitted_when_not_requested() {
        let line = "1\t100\t.\tAC\tA\t.\tPASS\tDP_HIST=1,2";
        let documents = parse_sites_line(line, false).unwrap();
        assert!(!documents[0].contains_key("histograms"));
        assert_eq!(documents[0]["xstop"], json!(1_000_000_101i64));
    }

    #[test]
    fn percentile_line_builds_keyed_update() {
        let line = "2\t5\t.\tG\tA\t.\tPASS\tQUAL_P=0.1,0.2;DP_P=0.5,0.6;AC=1";
        let requests = parse_percentile_line(line).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].key, NaturalKey::new(2_000_000_005, "G", "A"));
        assert_eq!(
            requests[0].set[PERCENTILES_FIELD],
            json!({"QUAL": [0.1, 0.2], "DP": [0.5, 0.6]})
        );
    }

    #[test]
    fn malformed_percentile_is_reported() {
        let line = "2\t5\t.\tG\tA\t.\tPASS\tQUAL_P=0.1";
        assert!(parse_percentile_line(line).is_err());
    }
}
