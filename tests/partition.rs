mod common;

use assert_matches::assert_matches;

use bravo_ingest::domain::WorkUnit;
use bravo_ingest::error::IngestError;
use bravo_ingest::partition::partition_files;
use bravo_ingest::tabix::ContigLines;

use common::{VCF_HEADER, VCF_LAYOUT, scratch, write_indexed};

#[test]
fn units_are_stably_sorted_by_contig() {
    let (_dir, root) = scratch();
    let first = root.join("a.vcf.gz");
    let second = root.join("b.vcf.gz");
    write_indexed(
        &first,
        VCF_LAYOUT,
        VCF_HEADER,
        &[("2", &["2\t10\t.\tA\tC\t.\tPASS\t."]), ("1", &["1\t5\t.\tG\tT\t.\tPASS\t."])],
    );
    write_indexed(
        &second,
        VCF_LAYOUT,
        VCF_HEADER,
        &[("1", &["1\t7\t.\tG\tA\t.\tPASS\t."]), ("PAR", &[])],
    );

    let units = partition_files(&[first.clone(), second.clone()]).unwrap();
    assert_eq!(
        units,
        vec![
            WorkUnit::new(first.clone(), "1"),
            WorkUnit::new(second.clone(), "1"),
            WorkUnit::new(first, "2"),
            WorkUnit::new(second, "PAR"),
        ]
    );
    assert!(!units[3].is_dispatchable());
}

#[test]
fn missing_index_fails_the_whole_partition() {
    let (_dir, root) = scratch();
    let indexed = root.join("a.vcf.gz");
    write_indexed(&indexed, VCF_LAYOUT, VCF_HEADER, &[("1", &["1\t5\t.\tG\tT\t.\tPASS\t."])]);
    let bare = root.join("bare.vcf.gz");
    common::write_gz(&bare, &["1\t5\t.\tG\tT\t.\tPASS\t."]);

    let err = partition_files(&[indexed, bare]).unwrap_err();
    assert_matches!(err, IngestError::MissingIndex(_));
}

#[test]
fn missing_file_is_a_setup_error() {
    let (_dir, root) = scratch();
    let err = partition_files(&[root.join("absent.vcf.gz")]).unwrap_err();
    assert_matches!(err, IngestError::MissingInput(_));
    assert!(err.is_setup());
}

#[test]
fn contig_lines_stay_within_their_shard() {
    let (_dir, root) = scratch();
    let path = root.join("a.vcf.gz");
    write_indexed(
        &path,
        VCF_LAYOUT,
        VCF_HEADER,
        &[
            ("1", &["1\t5\t.\tG\tT\t.\tPASS\t.", "1\t9\t.\tC\tA\t.\tPASS\t."]),
            ("2", &["2\t3\t.\tT\tG\t.\tPASS\t."]),
        ],
    );

    let lines: Vec<String> = ContigLines::open(&path, "1", None)
        .unwrap()
        .map(|line| line.unwrap().text)
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.starts_with("1\t")));

    let region = bravo_ingest::domain::Region { start: 6, end: 100 };
    let ranged: Vec<u64> = ContigLines::open(&path, "1", Some(region))
        .unwrap()
        .map(|line| line.unwrap().ordinal)
        .collect();
    assert_eq!(ranged, vec![1]);

    let err = ContigLines::open(&path, "7", None).err().unwrap();
    assert_matches!(err, IngestError::UnknownContig { .. });
}

#[test]
fn unreadable_index_is_a_setup_error() {
    let (_dir, root) = scratch();
    let path = root.join("a.vcf.gz");
    write_indexed(&path, VCF_LAYOUT, VCF_HEADER, &[("1", &["1\t5\t.\tG\tT\t.\tPASS\t."])]);
    let bytes = common::tbi_bytes(VCF_LAYOUT, &["1"], &[(0, 1 << 16)]);
    std::fs::write(format!("{path}.tbi"), common::bgzip(&bytes[..bytes.len() - 6])).unwrap();

    let err = partition_files(&[path]).unwrap_err();
    assert_matches!(err, IngestError::InvalidIndex { .. });
    assert!(err.is_setup());
}
