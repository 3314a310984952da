mod common;

use std::fs;

use assert_matches::assert_matches;
use serde_json::json;

use bravo_ingest::domain::{NaturalKey, Region, WorkUnit};
use bravo_ingest::error::IngestError;
use bravo_ingest::sources::gencode::{EXON_FEATURES, GENE_FEATURES};
use bravo_ingest::sources::plain::{metrics_documents, whitelist_documents};
use bravo_ingest::sources::vcf::PERCENTILES_FIELD;
use bravo_ingest::sources::{
    DbsnpSource, GencodeSource, GeneAnnotations, RecordSource, SitesVcfSource, percentile_requests,
};

use common::{DBSNP_LAYOUT, VCF_HEADER, VCF_LAYOUT, scratch, write_gz, write_indexed};

const GTF: &[&str] = &[
    "##description: test annotation",
    "chr1\tHAVANA\tgene\t100\t900\t.\t+\t.\tgene_id \"ENSG01.3\"; gene_type \"protein_coding\"; gene_name \"ABC1\";",
    "chr1\tHAVANA\ttranscript\t100\t900\t.\t+\t.\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.1\"; gene_name \"ABC1\";",
    "chr1\tHAVANA\texon\t100\t200\t.\t+\t.\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.1\"; exon_id \"ENSE01.1\";",
    "chr1\tHAVANA\tCDS\t150\t200\t.\t+\t0\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.1\"; exon_id \"ENSE01.1\";",
    "chr1\tHAVANA\tstart_codon\t150\t152\t.\t+\t0\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.1\";",
    "chrY\tHAVANA\tgene\t50\t60\t.\t-\t.\tgene_id \"ENSG02.1\"; gene_type \"lncRNA\"; gene_name \"XYZ\";",
];

#[test]
fn gene_documents_carry_annotations() {
    let (_dir, root) = scratch();
    let canonical = root.join("canonical.tsv.gz");
    let omim = root.join("omim.tsv.gz");
    let genenames = root.join("hgnc.tsv.gz");
    let gencode = root.join("gencode.gtf.gz");
    write_gz(&canonical, &["ENSG01.3 ENST01.1", "ENSG02\tENST09"]);
    write_gz(
        &omim,
        &[
            "Gene stable ID\tTranscript stable ID\tMIM gene accession\tMIM gene description",
            "ENSG01\tENST01\t600001\tExample disorder",
            "ENSG02\tENST09\t\t",
        ],
    );
    write_gz(
        &genenames,
        &[
            "hgnc_id\tsymbol\tname\talias_symbol\tprev_name\tensembl_gene_id",
            "HGNC:1\tABC1\t\"ABC family member 1\"\t\"A1|AB1\"\t\"old name\"\tENSG01",
        ],
    );
    write_gz(&gencode, GTF);

    let annotations = GeneAnnotations::load(&canonical, &omim, &genenames).unwrap();
    let source = GencodeSource::new(&gencode, GENE_FEATURES).with_annotations(annotations);
    let genes: Vec<_> = source
        .documents()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(genes.len(), 2);
    let abc = &genes[0];
    assert_eq!(abc["gene_id"], json!("ENSG01"));
    assert_eq!(abc["canonical_transcript"], json!("ENST01"));
    assert_eq!(abc["omim_accession"], json!("600001"));
    assert_eq!(abc["omim_description"], json!("Example disorder"));
    assert_eq!(abc["full_gene_name"], json!("ABC family member 1"));
    assert_eq!(abc["other_names"], json!(["A1", "AB1", "old name"]));
    assert_eq!(abc["xstop"], json!(1_000_000_900i64));

    let xyz = &genes[1];
    assert_eq!(xyz["xstart"], json!(24_000_000_050i64));
    assert_eq!(xyz["canonical_transcript"], json!("ENST09"));
    assert!(!xyz.contains_key("omim_accession"));
}

#[test]
fn exon_features_include_cds_and_utr() {
    let (_dir, root) = scratch();
    let gencode = root.join("gencode.gtf.gz");
    write_gz(&gencode, GTF);
    let exons: Vec<_> = GencodeSource::new(&gencode, EXON_FEATURES)
        .documents()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let kinds: Vec<&str> = exons
        .iter()
        .map(|exon| exon["feature_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["exon", "CDS"]);
    assert_eq!(exons[1]["exon_id"], json!("ENSE01"));
}

#[test]
fn annotation_table_without_required_column_is_rejected() {
    let (_dir, root) = scratch();
    let canonical = root.join("canonical.tsv.gz");
    let omim = root.join("omim.tsv.gz");
    let genenames = root.join("hgnc.tsv.gz");
    write_gz(&canonical, &["ENSG01 ENST01"]);
    write_gz(&omim, &["Gene stable ID\tMIM gene accession", "ENSG01\t1"]);
    write_gz(&genenames, &["name\talias_symbol\tprev_name\tensembl_gene_id"]);

    let err = GeneAnnotations::load(&canonical, &omim, &genenames).unwrap_err();
    assert_matches!(err, IngestError::MalformedRecord { line: 1, .. });
}

#[test]
fn dbsnp_shard_yields_one_based_positions() {
    let (_dir, root) = scratch();
    let path = root.join("dbsnp.tsv.gz");
    write_indexed(
        &path,
        DBSNP_LAYOUT,
        &[],
        &[("1", &["11\t1\t99", "12\t1\t199"]), ("2", &["13\t2\t0"])],
    );

    let documents: Vec<_> = DbsnpSource
        .open(&WorkUnit::new(path.clone(), "2"), None, false)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(documents, vec![common::doc(json!({"rsid": 13, "xpos": 2_000_000_001i64}))]);

    let ranged: Vec<_> = DbsnpSource
        .open(&WorkUnit::new(path, "1"), Some(Region { start: 150, end: 500 }), false)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(ranged.len(), 1);
    assert_eq!(ranged[0]["rsid"], json!(12));
}

#[test]
fn malformed_vcf_line_names_file_and_line() {
    let (_dir, root) = scratch();
    let path = root.join("sites.vcf.gz");
    write_indexed(
        &path,
        VCF_LAYOUT,
        VCF_HEADER,
        &[("1", &["1\t10\t.\tA\tC\t.\tPASS\t.", "1\tnot-a-number\t.\tA\tC\t.\tPASS\t."])],
    );

    let results: Vec<_> = SitesVcfSource
        .open(&WorkUnit::new(path, "1"), None, true)
        .unwrap()
        .collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert_matches!(&results[1], Err(IngestError::MalformedRecord { line: 2, .. }));
}

#[test]
fn percentile_file_is_read_whole() {
    let (_dir, root) = scratch();
    let path = root.join("percentiles.vcf.gz");
    let mut lines = VCF_HEADER.to_vec();
    lines.push("1\t100\t.\tA\tG,T\t.\tPASS\tDP_P=0.1,0.2");
    lines.push("2\t7\t.\tC\tA\t.\tPASS\tDP_P=0.9,1.0");
    write_gz(&path, &lines);

    let requests: Vec<_> = percentile_requests(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let keys: Vec<NaturalKey> = requests.iter().map(|request| request.key.clone()).collect();
    assert_eq!(
        keys,
        vec![
            NaturalKey::new(1_000_000_100, "A", "G"),
            NaturalKey::new(1_000_000_100, "A", "T"),
            NaturalKey::new(2_000_000_007, "C", "A"),
        ]
    );
    assert_eq!(requests[2].set[PERCENTILES_FIELD], json!({"DP": [0.9, 1.0]}));
}

#[test]
fn metrics_and_whitelist_files() {
    let (_dir, root) = scratch();
    let metrics = root.join("metrics.json");
    fs::write(&metrics, "{\"metric\": \"DP\"}\n\n{\"metric\": \"GQ\", \"mids\": [1]}\n").unwrap();
    let documents: Vec<_> = metrics_documents(&metrics)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[1]["metric"], json!("GQ"));

    let whitelist = root.join("whitelist.txt");
    fs::write(&whitelist, "a@example.org\n  \nb@example.org  \n").unwrap();
    let users: Vec<_> = whitelist_documents(&whitelist)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[1]["user_id"], json!("b@example.org"));

    let err = metrics_documents(&root.join("absent.json")).err().unwrap();
    assert_matches!(err, IngestError::MissingInput(_));
}
