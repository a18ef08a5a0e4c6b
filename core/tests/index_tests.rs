//! End-to-end tests of the index stream and the feature counter.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use mscanner_core::{count_features, Error, FeatureIndexReader, FeatureIndexWriter};

fn build_index(dir: &Path, records: &[(u32, u32, Vec<u32>)]) -> PathBuf {
    let path = dir.join("features.idx");
    let mut writer = FeatureIndexWriter::create(&path).unwrap();
    for (docid, date, features) in records {
        writer.append(*docid, *date, features).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn three_doc_index(dir: &Path) -> PathBuf {
    build_index(
        dir,
        &[
            (1, 20050101, vec![7, 42]),
            (2, 20050102, vec![7]),
            (3, 19990101, vec![42]),
        ],
    )
}

#[test]
fn counts_respect_date_window_and_report_ndocs() {
    let dir = tempfile::tempdir().unwrap();
    let index = three_doc_index(dir.path());
    let cancel = AtomicBool::new(false);

    let counts = count_features(&index, 64, &[], 20000101, 21000101, &cancel).unwrap();
    assert_eq!(counts.ndocs, 2);
    assert_eq!(counts.scanned, 3);
    let mut expected = vec![0u32; 64];
    expected[7] = 2;
    expected[42] = 1;
    assert_eq!(counts.counts, expected);
}

#[test]
fn counts_skip_excluded_docids() {
    let dir = tempfile::tempdir().unwrap();
    let index = three_doc_index(dir.path());
    let cancel = AtomicBool::new(false);

    let counts = count_features(&index, 64, &[1], 0, 99_999_999, &cancel).unwrap();
    assert_eq!(counts.ndocs, 2);
    assert_eq!(counts.counts[7], 1);
    assert_eq!(counts.counts[42], 1);
}

#[test]
fn unsorted_exclusions_fail_even_with_a_valid_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = three_doc_index(dir.path());
    let cancel = AtomicBool::new(false);

    let err = count_features(&index, 64, &[3, 2], 0, 99_999_999, &cancel).unwrap_err();
    assert!(matches!(err, Error::InvalidExclusion));
}

#[test]
fn counts_match_brute_force_on_random_data() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(99);
    let num_features = 200usize;
    let records: Vec<(u32, u32, Vec<u32>)> = (0..500)
        .map(|i| {
            let date = 19900101 + rng.gen_range(0..200_000);
            let mut features: Vec<u32> =
                (0..rng.gen_range(0..20)).map(|_| rng.gen_range(0..200)).collect();
            features.sort_unstable();
            features.dedup();
            (i + 1, date, features)
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &records);
    let excluded: Vec<u32> = (1..=500).step_by(7).collect();
    let (mindate, maxdate) = (19950101, 20080101);
    let cancel = AtomicBool::new(false);

    let counts =
        count_features(&index, num_features, &excluded, mindate, maxdate, &cancel).unwrap();

    let mut expected = vec![0u32; num_features];
    let mut expected_ndocs = 0u32;
    for (docid, date, features) in &records {
        if *date < mindate || *date > maxdate || excluded.binary_search(docid).is_ok() {
            continue;
        }
        expected_ndocs += 1;
        for &f in features {
            expected[f as usize] += 1;
        }
    }
    assert_eq!(counts.ndocs, expected_ndocs);
    assert_eq!(counts.counts, expected);
}

#[test]
fn cancelled_count_returns_no_partial_state() {
    let dir = tempfile::tempdir().unwrap();
    let index = three_doc_index(dir.path());
    let cancel = AtomicBool::new(true);

    let err = count_features(&index, 64, &[], 0, 99_999_999, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn empty_payload_records_are_legal() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &[(9, 20010101, vec![])]);
    let mut reader = FeatureIndexReader::open(&index).unwrap();
    let record = reader.read_next().unwrap().unwrap();
    assert_eq!(record.docid, 9);
    assert!(record.features.is_empty());

    let cancel = AtomicBool::new(false);
    let counts = count_features(&index, 4, &[], 0, 99_999_999, &cancel).unwrap();
    assert_eq!(counts.ndocs, 1);
    assert_eq!(counts.counts, vec![0, 0, 0, 0]);
}

#[test]
fn oversized_feature_ids_are_malformed_for_the_universe() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &[(1, 20010101, vec![3, 64])]);
    let cancel = AtomicBool::new(false);
    let err = count_features(&index, 64, &[], 0, 99_999_999, &cancel).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
}
