use camino::Utf8PathBuf;
use tracing::debug;

use crate::domain::WorkUnit;
use crate::error::IngestError;
use crate::tabix::TabixIndex;

/// One work unit per (file, contig) listed in the files' indexes.
///
/// Units are stably sorted by contig name: shards of the same contig from
/// different files end up adjacent and keep the order of `files`. Any file
/// without a readable index fails the whole call.
pub fn partition_files(files: &[Utf8PathBuf]) -> Result<Vec<WorkUnit>, IngestError> {
    let mut units = Vec::new();
    for file in files {
        let index = TabixIndex::for_data_file(file)?;
        let before = units.len();
        units.extend(index.contigs().map(|contig| WorkUnit::new(file.clone(), contig)));
        debug!(file = %file, contigs = units.len() - before, "indexed input file");
    }
    units.sort_by(|left, right| left.contig().cmp(right.contig()));
    Ok(units)
}
