//! Stratified k-fold cross-validation of the retrieval scores.
//!
//! Each fold trains on the other folds' counts and scores its own held-out
//! documents, so every labelled document receives exactly one score from a
//! model that never saw it. The pooled scores feed [`PerformanceStats`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::counts::count_vectors;
use crate::error::{Error, Result};
use crate::metrics::PerformanceStats;
use crate::scores::{FeatureScores, TrainConfig};
use crate::stream::FeatureIndexReader;
use crate::{Date, DocId, FeatureId};

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub nfolds: usize,
    /// Precision weight of the F measure used to tune the threshold.
    pub alpha: f64,
    /// Utility ratio at the tuned threshold; defaults to N/P.
    pub utility_r: Option<f64>,
    /// Seed for shuffling and negative sampling; equal seeds give
    /// bit-identical folds and samples.
    pub seed: u64,
    /// Negatives drawn from the corpus when none are supplied.
    pub num_negatives: usize,
    pub mindate: Date,
    pub maxdate: Date,
    pub train: TrainConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            nfolds: 10,
            alpha: 0.5,
            utility_r: None,
            seed: 0,
            num_negatives: 100_000,
            mindate: 0,
            maxdate: 99_999_999,
            train: TrainConfig::default(),
        }
    }
}

/// Pooled cross-validation output.
#[derive(Debug, Clone)]
pub struct CrossValidation {
    /// (docid, held-out score) per positive, in fold order.
    pub positives: Vec<(DocId, f32)>,
    /// (docid, held-out score) per negative, in fold order.
    pub negatives: Vec<(DocId, f32)>,
    pub stats: PerformanceStats,
}

/// Cross-validate `positives` against `negatives`, sampling the negatives
/// from the index when none are supplied.
pub fn cross_validate(
    index: impl AsRef<Path>,
    num_features: usize,
    positives: &[DocId],
    negatives: Option<&[DocId]>,
    config: &ValidationConfig,
    cancel: &AtomicBool,
) -> Result<CrossValidation> {
    let index = index.as_ref();
    if config.nfolds < 2 {
        return Err(Error::Argument(format!(
            "cross-validation needs at least 2 folds, got {}",
            config.nfolds
        )));
    }
    if config.mindate > config.maxdate {
        return Err(Error::Argument(format!(
            "empty date window: mindate {} > maxdate {}",
            config.mindate, config.maxdate
        )));
    }
    let mut positives = dedup_sorted(positives);
    if positives.len() < config.nfolds {
        return Err(Error::EmptyLabelled(format!(
            "{} positives cannot be stratified into {} folds",
            positives.len(),
            config.nfolds
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    // Resolve the labelled sets to feature vectors via index scans.
    let mut vectors: HashMap<DocId, Vec<FeatureId>>;
    let mut negatives = match negatives {
        Some(supplied) => {
            let mut negatives = dedup_sorted(supplied);
            negatives.retain(|docid| positives.binary_search(docid).is_err());
            let mut wanted = positives.clone();
            wanted.extend_from_slice(&negatives);
            wanted.sort_unstable();
            let (loaded, _) = load_vectors(index, &wanted, config, false, cancel)?;
            vectors = loaded;
            negatives
        }
        None => {
            let (loaded, pool) = load_vectors(index, &positives, config, true, cancel)?;
            vectors = loaded;
            let sampled = sample_negatives(&mut rng, pool, config.num_negatives, &positives)?;
            let mut wanted = sampled.clone();
            wanted.sort_unstable();
            let (loaded, _) = load_vectors(index, &wanted, config, false, cancel)?;
            vectors.extend(loaded);
            sampled
        }
    };

    drop_missing(&mut positives, &vectors, "positive");
    drop_missing(&mut negatives, &vectors, "negative");
    if positives.len() < config.nfolds {
        return Err(Error::EmptyLabelled(format!(
            "only {} positives found in the index, need {}",
            positives.len(),
            config.nfolds
        )));
    }
    if negatives.is_empty() {
        return Err(Error::EmptyLabelled("no negative documents available".into()));
    }

    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);
    tracing::debug!(
        positives = positives.len(),
        negatives = negatives.len(),
        nfolds = config.nfolds,
        seed = config.seed,
        "cross-validating"
    );

    let vector_of = |docid: &DocId| vectors[docid].as_slice();
    let pos_totals = count_vectors(num_features, positives.iter().map(vector_of));
    let neg_totals = count_vectors(num_features, negatives.iter().map(vector_of));

    // The class prior is fixed from the full labelled sets; base and feature
    // scores are re-derived per fold from the training folds alone.
    let prior = config.train.prior_override.unwrap_or_else(|| {
        (positives.len() as f64 / negatives.len() as f64).ln()
    });
    let fold_train = TrainConfig {
        prior_override: Some(prior),
        ..config.train.clone()
    };

    let pparts = make_partitions(positives.len(), config.nfolds);
    let nparts = make_partitions(negatives.len(), config.nfolds);
    let mut pos_scored = Vec::with_capacity(positives.len());
    let mut neg_scored = Vec::with_capacity(negatives.len());
    for (fold, (&(pstart, psize), &(nstart, nsize))) in
        pparts.iter().zip(&nparts).enumerate()
    {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        tracing::debug!(fold, pstart, psize, nstart, nsize, "training fold");
        let test_pos = &positives[pstart..pstart + psize];
        let test_neg = &negatives[nstart..nstart + nsize];
        let pos_test_counts = count_vectors(num_features, test_pos.iter().map(vector_of));
        let neg_test_counts = count_vectors(num_features, test_neg.iter().map(vector_of));
        let pos_counts: Vec<u32> = pos_totals
            .iter()
            .zip(&pos_test_counts)
            .map(|(&total, &test)| total - test)
            .collect();
        let neg_counts: Vec<u32> = neg_totals
            .iter()
            .zip(&neg_test_counts)
            .map(|(&total, &test)| total - test)
            .collect();
        let trained = FeatureScores::train(
            &pos_counts,
            &neg_counts,
            (positives.len() - psize) as u32,
            (negatives.len() - nsize) as u32,
            &fold_train,
        )?;
        for &docid in test_pos {
            pos_scored.push((docid, trained.score_of(vector_of(&docid))));
        }
        for &docid in test_neg {
            neg_scored.push((docid, trained.score_of(vector_of(&docid))));
        }
    }

    let pscores: Vec<f32> = pos_scored.iter().map(|&(_, s)| s).collect();
    let nscores: Vec<f32> = neg_scored.iter().map(|&(_, s)| s).collect();
    let stats = PerformanceStats::new(&pscores, &nscores, config.alpha, config.utility_r)?;
    tracing::info!(
        roc = stats.wilcoxon,
        pr = stats.pr_area,
        threshold = stats.tuned.threshold,
        "cross-validation complete"
    );
    Ok(CrossValidation {
        positives: pos_scored,
        negatives: neg_scored,
        stats,
    })
}

/// Contiguous stratified partitions: the first `nitems % nparts` slices get
/// one extra item.
fn make_partitions(nitems: usize, nparts: usize) -> Vec<(usize, usize)> {
    let base = nitems / nparts;
    let rem = nitems % nparts;
    let mut parts = Vec::with_capacity(nparts);
    let mut start = 0;
    for i in 0..nparts {
        let size = base + usize::from(i < rem);
        parts.push((start, size));
        start += size;
    }
    parts
}

/// Sample `k` docids from `pool` without replacement, never choosing a
/// member of the sorted `exclude` list. Scrambles the tail of `pool` in
/// place: chosen items are swapped to the end, so equal seeds over an equal
/// pool always give the same set.
fn sample_negatives(
    rng: &mut StdRng,
    mut pool: Vec<DocId>,
    k: usize,
    exclude: &[DocId],
) -> Result<Vec<DocId>> {
    let excluded_in_pool = pool
        .iter()
        .filter(|&&docid| exclude.binary_search(&docid).is_ok())
        .count();
    let available = pool.len() - excluded_in_pool;
    if available == 0 {
        return Err(Error::EmptyLabelled(
            "corpus has no documents outside the positive set".into(),
        ));
    }
    let k = if k > available {
        tracing::warn!(requested = k, available, "clamping negative sample");
        available
    } else {
        k
    };
    let n = pool.len();
    for i in 0..k {
        let dest = n - 1 - i;
        let mut choice = rng.gen_range(0..=dest);
        while exclude.binary_search(&pool[choice]).is_ok() {
            choice = rng.gen_range(0..=dest);
        }
        pool.swap(choice, dest);
    }
    Ok(pool[n - k..].to_vec())
}

/// Scan the index once, collecting feature vectors for the sorted `wanted`
/// ids and, when `collect_pool` is set, every in-window docid.
fn load_vectors(
    index: &Path,
    wanted: &[DocId],
    config: &ValidationConfig,
    collect_pool: bool,
    cancel: &AtomicBool,
) -> Result<(HashMap<DocId, Vec<FeatureId>>, Vec<DocId>)> {
    let mut reader = FeatureIndexReader::open(index)?;
    let mut vectors = HashMap::with_capacity(wanted.len());
    let mut pool = Vec::new();
    while let Some(record) = reader.read_next()? {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if record.date < config.mindate || record.date > config.maxdate {
            continue;
        }
        if collect_pool {
            pool.push(record.docid);
        }
        if wanted.binary_search(&record.docid).is_ok() {
            vectors.insert(record.docid, record.features.to_vec());
        }
    }
    Ok((vectors, pool))
}

fn dedup_sorted(ids: &[DocId]) -> Vec<DocId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Drop labelled ids the index does not contain, as the original does with
/// unknown PubMed IDs in the input lists.
fn drop_missing(ids: &mut Vec<DocId>, vectors: &HashMap<DocId, Vec<FeatureId>>, label: &str) {
    let before = ids.len();
    ids.retain(|docid| vectors.contains_key(docid));
    if ids.len() < before {
        tracing::warn!(
            dropped = before - ids.len(),
            label,
            "labelled ids missing from the index"
        );
    }
}
