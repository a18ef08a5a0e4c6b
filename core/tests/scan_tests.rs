//! End-to-end tests of training plus the index scanner.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use mscanner_core::{
    count_features, scan, Error, FeatureIndexWriter, FeatureScores, ScanConfig, Smoothing,
    TrainConfig,
};

fn build_index(dir: &Path, records: &[(u32, u32, Vec<u32>)]) -> PathBuf {
    let path = dir.join("features.idx");
    let mut writer = FeatureIndexWriter::create(&path).unwrap();
    for (docid, date, features) in records {
        writer.append(*docid, *date, features).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn full_window(offset: f32, limit: usize) -> ScanConfig {
    ScanConfig::new(offset, limit)
}

#[test]
fn trained_query_ranks_the_positive_document_first() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(
        dir.path(),
        &[
            (1, 20050101, vec![7, 42]),
            (2, 20050102, vec![7]),
            (3, 19990101, vec![42]),
        ],
    );
    let cancel = AtomicBool::new(false);

    // Positive counts from the labelled set {1}; negatives are the rest of
    // the corpus, obtained by excluding the positives from a full count.
    let mut pos_counts = vec![0u32; 64];
    pos_counts[7] = 1;
    pos_counts[42] = 1;
    let neg = count_features(&index, 64, &[1], 0, 99_999_999, &cancel).unwrap();

    let trained = FeatureScores::train(
        &pos_counts,
        &neg.counts,
        1,
        neg.ndocs,
        &TrainConfig {
            smoothing: Smoothing::Constant(1.0),
            ..TrainConfig::default()
        },
    )
    .unwrap();

    let (results, scanned) = scan(
        &index,
        &trained.scores,
        &full_window(trained.offset(), 10),
        &cancel,
    )
    .unwrap();
    assert_eq!(scanned, 3);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].docid, 1);
    assert!(results[0].score > results[1].score);
}

#[test]
fn scan_scores_match_f64_reference() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(21);
    let num_features = 300usize;
    let scores: Vec<f32> = (0..num_features)
        .map(|_| rng.gen_range(-5.0f32..5.0))
        .collect();
    let records: Vec<(u32, u32, Vec<u32>)> = (0..200)
        .map(|i| {
            let mut features: Vec<u32> =
                (0..rng.gen_range(1..40)).map(|_| rng.gen_range(0..300)).collect();
            features.sort_unstable();
            features.dedup();
            (i + 1, 20050101, features)
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &records);
    let cancel = AtomicBool::new(false);
    let offset = 1.25f32;

    let (results, _) = scan(&index, &scores, &full_window(offset, 200), &cancel).unwrap();
    assert_eq!(results.len(), records.len());

    for result in &results {
        let (_, _, features) = records
            .iter()
            .find(|(docid, _, _)| *docid == result.docid)
            .unwrap();
        let expected: f64 = f64::from(offset)
            + features
                .iter()
                .map(|&f| f64::from(scores[f as usize]))
                .sum::<f64>();
        let tolerance = 1e-4 * expected.abs().max(1.0);
        assert!(
            (f64::from(result.score) - expected).abs() < tolerance,
            "docid {}: {} vs {expected}",
            result.docid,
            result.score
        );
    }

    // Ranked output is descending with docid tie-breaks.
    for pair in results.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].docid < pair[1].docid)
        );
    }
}

#[test]
fn tied_scores_keep_the_lower_docid() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(
        dir.path(),
        &[(20, 20050101, vec![5]), (10, 20050101, vec![5])],
    );
    let mut scores = vec![0f32; 8];
    scores[5] = 2.0;
    let cancel = AtomicBool::new(false);

    let (results, _) = scan(&index, &scores, &full_window(0.0, 1), &cancel).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].docid, 10);
}

#[test]
fn threshold_filters_results_below_it() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(
        dir.path(),
        &[
            (1, 20050101, vec![0]),
            (2, 20050101, vec![1]),
            (3, 20050101, vec![2]),
        ],
    );
    let scores = vec![3.0f32, 1.0, -2.0];
    let cancel = AtomicBool::new(false);

    let mut config = full_window(0.0, 10);
    config.threshold = 0.5;
    let (results, _) = scan(&index, &scores, &config, &cancel).unwrap();
    let docids: Vec<u32> = results.iter().map(|r| r.docid).collect();
    assert_eq!(docids, vec![1, 2]);
}

#[test]
fn out_of_window_documents_never_appear() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(
        dir.path(),
        &[(1, 19890101, vec![0]), (2, 20050101, vec![0])],
    );
    let scores = vec![10.0f32];
    let cancel = AtomicBool::new(false);

    let mut config = full_window(0.0, 10);
    config.mindate = 20000101;
    config.maxdate = 21000101;
    let (results, scanned) = scan(&index, &scores, &config, &cancel).unwrap();
    assert_eq!(scanned, 2);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].docid, 2);
}

#[test]
fn parallel_scan_matches_sequential() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(5);
    let num_features = 100usize;
    let scores: Vec<f32> = (0..num_features)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    let records: Vec<(u32, u32, Vec<u32>)> = (0..1000)
        .map(|i| {
            let mut features: Vec<u32> =
                (0..rng.gen_range(0..15)).map(|_| rng.gen_range(0..100)).collect();
            features.sort_unstable();
            features.dedup();
            (i + 1, 20050101, features)
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &records);
    let cancel = AtomicBool::new(false);

    let sequential = scan(&index, &scores, &full_window(0.5, 25), &cancel).unwrap();
    for threads in [2, 3, 8] {
        let mut config = full_window(0.5, 25);
        config.threads = threads;
        let parallel = scan(&index, &scores, &config, &cancel).unwrap();
        assert_eq!(parallel.0, sequential.0, "threads = {threads}");
        assert_eq!(parallel.1, sequential.1);
    }
}

#[test]
fn cancelled_scan_discards_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path(), &[(1, 20050101, vec![0])]);
    let scores = vec![1.0f32];
    let cancel = AtomicBool::new(true);

    let err = scan(&index, &scores, &full_window(0.0, 10), &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn truncated_index_aborts_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(
        dir.path(),
        &[(1, 20050101, vec![3, 9]), (2, 20050101, vec![4])],
    );
    let mut bytes = std::fs::read(&index).unwrap();
    bytes.truncate(bytes.len() - 1);
    std::fs::write(&index, &bytes).unwrap();

    let scores = vec![0f32; 16];
    let cancel = AtomicBool::new(false);
    let err = scan(&index, &scores, &full_window(0.0, 10), &cancel).unwrap_err();
    assert!(matches!(err, Error::MalformedRecord(_)));
}
