//! Indexed access to bgzip-compressed text files through their tabix
//! (`.tbi`) or CSI (`.csi`) index.
//!
//! The index header supplies the contig names and the column layout.
//! Reading a contig walks the BGZF chunks the index lists for it.

use std::fs::File;
use std::io::{self, BufRead};
use std::vec;

use camino::{Utf8Path, Utf8PathBuf};
use noodles::bgzf::io::Seek as _;
use noodles::bgzf::{self, VirtualPosition};
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi::{self, BinningIndex};
use noodles::tabix;

use crate::domain::Region;
use crate::error::IngestError;

type ChunkBounds = (VirtualPosition, VirtualPosition);

enum Inner {
    Tabix(tabix::Index),
    Csi(csi::Index),
}

/// Column layout taken from the index header, with 0-based column numbers.
struct Layout {
    names: Vec<String>,
    seq_column: usize,
    beg_column: usize,
    comment: Option<u8>,
}

pub struct TabixIndex {
    path: Utf8PathBuf,
    inner: Inner,
    layout: Layout,
}

impl TabixIndex {
    pub fn locate(data_path: &Utf8Path) -> Result<Utf8PathBuf, IngestError> {
        if !data_path.as_std_path().is_file() {
            return Err(IngestError::MissingInput(data_path.to_path_buf()));
        }
        ["tbi", "csi"]
            .iter()
            .map(|ext| Utf8PathBuf::from(format!("{data_path}.{ext}")))
            .find(|candidate| candidate.as_std_path().is_file())
            .ok_or_else(|| IngestError::MissingIndex(data_path.to_path_buf()))
    }

    /// Reads the index that sits next to `data_path`.
    pub fn for_data_file(data_path: &Utf8Path) -> Result<Self, IngestError> {
        let path = Self::locate(data_path)?;
        let inner = if path.extension() == Some("csi") {
            csi::fs::read(&path).map(Inner::Csi)
        } else {
            tabix::fs::read(&path).map(Inner::Tabix)
        }
        .map_err(|err| invalid(&path, err.to_string()))?;

        let layout = match &inner {
            Inner::Tabix(index) => read_layout(index),
            Inner::Csi(index) => read_layout(index),
        }
        .ok_or_else(|| {
            invalid(
                &path,
                "index carries no contig names (BCF input is not supported)".to_string(),
            )
        })?;
        Ok(Self {
            path,
            inner,
            layout,
        })
    }

    pub fn contigs(&self) -> impl Iterator<Item = &str> {
        self.layout.names.iter().map(String::as_str)
    }

    fn reference_sequence_id(&self, contig: &str) -> Option<usize> {
        self.layout.names.iter().position(|name| name == contig)
    }

    fn chunks(&self, id: usize, interval: Interval) -> Result<Vec<ChunkBounds>, IngestError> {
        match &self.inner {
            Inner::Tabix(index) => chunk_bounds(index, id, interval),
            Inner::Csi(index) => chunk_bounds(index, id, interval),
        }
        .map_err(|err| invalid(&self.path, err.to_string()))
    }
}

fn read_layout<I: BinningIndex>(index: &I) -> Option<Layout> {
    index.header().map(|header| Layout {
        names: header
            .reference_sequence_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        seq_column: header.reference_sequence_name_index(),
        beg_column: header.start_position_index(),
        comment: Some(header.line_comment_prefix()).filter(|prefix| *prefix != 0),
    })
}

fn chunk_bounds<I: BinningIndex>(
    index: &I,
    id: usize,
    interval: Interval,
) -> io::Result<Vec<ChunkBounds>> {
    Ok(index
        .query(id, interval)?
        .into_iter()
        .map(|chunk| (chunk.start(), chunk.end()))
        .collect())
}

/// Index interval covering `region`. The lower bound is widened by one so a
/// file with 0-based begin columns still yields every candidate chunk.
fn query_interval(region: Option<Region>) -> Interval {
    let bounds = region.and_then(|region| {
        let start = usize::try_from(region.start.saturating_sub(1)).ok()?;
        let end = usize::try_from(region.end.saturating_add(1)).ok()?;
        Some((Position::new(start.max(1))?, Position::new(end)?))
    });
    match bounds {
        Some((start, end)) if start <= end => Interval::from(start..=end),
        _ => Interval::from(..),
    }
}

fn invalid(path: &Utf8Path, message: String) -> IngestError {
    IngestError::InvalidIndex {
        path: path.to_path_buf(),
        message,
    }
}

/// One data line of a shard, numbered from 1 within the shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLine {
    pub ordinal: u64,
    pub text: String,
}

/// Forward-only stream over the lines of one contig of a BGZF file.
pub struct ContigLines {
    path: Utf8PathBuf,
    reader: bgzf::io::Reader<File>,
    chunks: vec::IntoIter<ChunkBounds>,
    chunk_end: Option<VirtualPosition>,
    contig: String,
    seq_column: usize,
    beg_column: usize,
    comment: Option<u8>,
    region: Option<Region>,
    ordinal: u64,
    buf: String,
}

impl ContigLines {
    pub fn open(
        path: &Utf8Path,
        contig: &str,
        region: Option<Region>,
    ) -> Result<Self, IngestError> {
        let index = TabixIndex::for_data_file(path)?;
        Self::open_with_index(path, &index, contig, region)
    }

    fn open_with_index(
        path: &Utf8Path,
        index: &TabixIndex,
        contig: &str,
        region: Option<Region>,
    ) -> Result<Self, IngestError> {
        let id = index
            .reference_sequence_id(contig)
            .ok_or_else(|| IngestError::UnknownContig {
                path: path.to_path_buf(),
                contig: contig.to_string(),
            })?;
        let chunks = index.chunks(id, query_interval(region))?;
        let file = File::open(path.as_std_path()).map_err(|err| IngestError::read(path, err))?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: bgzf::io::Reader::new(file),
            chunks: chunks.into_iter(),
            chunk_end: None,
            contig: contig.to_string(),
            seq_column: index.layout.seq_column,
            beg_column: index.layout.beg_column,
            comment: index.layout.comment,
            region,
            ordinal: 0,
            buf: String::new(),
        })
    }

    fn in_chunk(&self) -> bool {
        self.chunk_end
            .is_some_and(|end| self.reader.virtual_position() < end)
    }

    fn halt(&mut self, err: io::Error) -> IngestError {
        self.chunks = Vec::new().into_iter();
        self.chunk_end = None;
        IngestError::read(self.path.clone(), err)
    }
}

impl Iterator for ContigLines {
    type Item = Result<ShardLine, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.in_chunk() {
                let (start, end) = self.chunks.next()?;
                if let Err(err) = self.reader.seek_to_virtual_position(start) {
                    return Some(Err(self.halt(err)));
                }
                self.chunk_end = Some(end);
                continue;
            }

            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.chunk_end = None;
                    continue;
                }
                Ok(_) => {}
                Err(err) => return Some(Err(self.halt(err))),
            }

            let line = self.buf.trim_end_matches(['\n', '\r']);
            if line.is_empty() || self.comment.is_some_and(|prefix| line.as_bytes()[0] == prefix) {
                continue;
            }
            let column = |index: usize| line.split('\t').nth(index);
            // Chunk edges may share a BGZF block with a neighbouring contig.
            if column(self.seq_column) != Some(self.contig.as_str()) {
                continue;
            }
            if let Some(region) = self.region {
                let begin = column(self.beg_column).and_then(|value| value.parse::<u64>().ok());
                if !begin.is_some_and(|begin| region.contains(begin)) {
                    continue;
                }
            }

            let text = line.to_string();
            self.ordinal += 1;
            return Some(Ok(ShardLine {
                ordinal: self.ordinal,
                text,
            }));
        }
    }
}
