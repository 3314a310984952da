#![allow(dead_code)]

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use noodles::bgzf;
use serde_json::Value;
use tempfile::TempDir;

use bravo_ingest::domain::Document;

pub const VCF_HEADER: &[&str] = &[
    "##fileformat=VCFv4.2",
    "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO",
];

/// Column layout written into fixture indexes.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub col_seq: i32,
    pub col_beg: i32,
    pub meta: u8,
}

pub const VCF_LAYOUT: Layout = Layout {
    col_seq: 1,
    col_beg: 2,
    meta: b'#',
};

pub const DBSNP_LAYOUT: Layout = Layout {
    col_seq: 2,
    col_beg: 3,
    meta: b'#',
};

pub fn scratch() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn write_gz(path: &Utf8Path, lines: &[&str]) {
    fs::write(path, gzip(&lines_text(lines))).unwrap();
}

fn lines_text(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Writes `path` as BGZF (header, then each contig's lines in order) plus a
/// `.tbi` index whose single bin per contig spans exactly that contig.
pub fn write_indexed(
    path: &Utf8Path,
    layout: Layout,
    header: &[&str],
    contigs: &[(&str, &[&str])],
) {
    let mut writer = bgzf::io::Writer::new(Vec::new());
    if !header.is_empty() {
        writer.write_all(lines_text(header).as_bytes()).unwrap();
    }
    let mut spans = Vec::with_capacity(contigs.len());
    for (_, lines) in contigs {
        let start = u64::from(writer.virtual_position());
        if !lines.is_empty() {
            writer.write_all(lines_text(lines).as_bytes()).unwrap();
        }
        let end = u64::from(writer.virtual_position());
        spans.push((start, end));
    }
    fs::write(path, writer.finish().unwrap()).unwrap();

    let names: Vec<&str> = contigs.iter().map(|(name, _)| *name).collect();
    fs::write(format!("{path}.tbi"), bgzip(&tbi_bytes(layout, &names, &spans))).unwrap();
}

pub fn bgzip(bytes: &[u8]) -> Vec<u8> {
    let mut writer = bgzf::io::Writer::new(Vec::new());
    writer.write_all(bytes).unwrap();
    writer.finish().unwrap()
}

/// Raw tabix index bytes. Each non-empty contig gets bin 4681 (the first
/// 16 kbp) with one chunk and a one-entry linear index.
pub fn tbi_bytes(layout: Layout, names: &[&str], spans: &[(u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"TBI\x01");
    out.extend_from_slice(&(names.len() as i32).to_le_bytes());
    let format = if layout.col_seq == 1 { 2i32 } else { 0x10000 };
    for value in [
        format,
        layout.col_seq,
        layout.col_beg,
        0,
        layout.meta as i32,
        0,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    let joined: Vec<u8> = names
        .iter()
        .flat_map(|name| name.bytes().chain(std::iter::once(0)))
        .collect();
    out.extend_from_slice(&(joined.len() as i32).to_le_bytes());
    out.extend_from_slice(&joined);
    for &(start, end) in spans {
        if start == end {
            out.extend_from_slice(&0i32.to_le_bytes());
            out.extend_from_slice(&0i32.to_le_bytes());
            continue;
        }
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(&4681u32.to_le_bytes());
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
        out.extend_from_slice(&1i32.to_le_bytes());
        out.extend_from_slice(&start.to_le_bytes());
    }
    out
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}
