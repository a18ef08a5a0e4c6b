//! Linear scan of the feature index against a trained score vector.
//!
//! The scan streams every record once, accumulates `offset + Σ scores[f]`
//! per document and keeps the top `limit` results in a bounded min-heap.
//! The single-threaded path is the reference; chunked parallelism over the
//! record-offset index is opt-in and produces identical output.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::stream::{build_offset_index, FeatureIndexReader, Record};
use crate::{Date, DocId};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// `base + prior` of the trained scores, added to every document.
    pub offset: f32,
    /// Results scoring below this never enter the output.
    pub threshold: f32,
    /// Maximum number of results.
    pub limit: usize,
    pub mindate: Date,
    pub maxdate: Date,
    /// Worker threads; values <= 1 select the sequential reference path.
    pub threads: usize,
}

impl ScanConfig {
    pub fn new(offset: f32, limit: usize) -> Self {
        Self {
            offset,
            threshold: f32::NEG_INFINITY,
            limit,
            mindate: 0,
            maxdate: 99_999_999,
            threads: 1,
        }
    }
}

/// One retrieval result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub score: f32,
    pub docid: DocId,
}

impl ScoredDoc {
    /// Ranking order: higher score first, ascending docid on ties.
    fn ranks_above(&self, other: &ScoredDoc) -> bool {
        match self.score.total_cmp(&other.score) {
            CmpOrdering::Greater => true,
            CmpOrdering::Less => false,
            CmpOrdering::Equal => self.docid < other.docid,
        }
    }
}

/// Heap entry ordered by ranking, so `Reverse` keeps the worst on top.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ranked(ScoredDoc);

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.docid.cmp(&self.0.docid))
    }
}

/// Bounded top-K accumulator.
struct TopK {
    limit: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl TopK {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1 << 20) + 1),
        }
    }

    fn push(&mut self, doc: ScoredDoc) {
        if self.limit == 0 {
            return;
        }
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(Ranked(doc)));
        } else if let Some(&Reverse(worst)) = self.heap.peek() {
            if doc.ranks_above(&worst.0) {
                self.heap.pop();
                self.heap.push(Reverse(Ranked(doc)));
            }
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for Reverse(Ranked(doc)) in other.heap {
            self.push(doc);
        }
        self
    }

    fn into_sorted(self) -> Vec<ScoredDoc> {
        let mut results: Vec<ScoredDoc> =
            self.heap.into_iter().map(|Reverse(Ranked(d))| d).collect();
        results.sort_unstable_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.docid.cmp(&b.docid))
        });
        results
    }
}

/// Scan the whole index and return the top results, descending by score
/// with ties broken by ascending docid, plus the number of records scanned.
pub fn scan(
    index: impl AsRef<Path>,
    scores: &[f32],
    config: &ScanConfig,
    cancel: &AtomicBool,
) -> Result<(Vec<ScoredDoc>, u64)> {
    if config.mindate > config.maxdate {
        return Err(Error::Argument(format!(
            "empty date window: mindate {} > maxdate {}",
            config.mindate, config.maxdate
        )));
    }
    if config.threshold.is_nan() {
        return Err(Error::Argument("score threshold is NaN".into()));
    }
    let index = index.as_ref();
    let (top, scanned) = if config.threads > 1 {
        scan_parallel(index, scores, config, cancel)?
    } else {
        let mut reader = FeatureIndexReader::open(index)?;
        let mut top = TopK::new(config.limit);
        let mut scanned = 0u64;
        while let Some(record) = reader.read_next()? {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            scanned += 1;
            score_record(&record, scores, config, &mut top)?;
        }
        (top, scanned)
    };
    tracing::debug!(scanned, results = top.heap.len(), "index scan complete");
    Ok((top.into_sorted(), scanned))
}

#[inline]
fn score_record(
    record: &Record<'_>,
    scores: &[f32],
    config: &ScanConfig,
    top: &mut TopK,
) -> Result<()> {
    // Out-of-window records are skipped outright; unlike a sentinel score
    // they cannot slip past a -inf threshold.
    if record.date < config.mindate || record.date > config.maxdate {
        return Ok(());
    }
    let mut score = config.offset;
    for &feat in record.features {
        match scores.get(feat as usize) {
            Some(&s) => score += s,
            None => {
                return Err(Error::MalformedRecord(format!(
                    "feature id {feat} out of range for universe of {}",
                    scores.len()
                )))
            }
        }
    }
    if score >= config.threshold {
        top.push(ScoredDoc {
            score,
            docid: record.docid,
        });
    }
    Ok(())
}

/// Chunked scan over the record-offset index on a dedicated thread pool.
fn scan_parallel(
    index: &Path,
    scores: &[f32],
    config: &ScanConfig,
    cancel: &AtomicBool,
) -> Result<(TopK, u64)> {
    let offsets = build_offset_index(index)?;
    let scanned = offsets.len() as u64;
    if offsets.is_empty() {
        return Ok((TopK::new(config.limit), 0));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| Error::Argument(format!("cannot build scan pool: {e}")))?;
    // Several chunks per thread so an uneven chunk cannot stall the pool.
    let chunk_size = (offsets.len() / (config.threads * 4)).max(1);
    let partials: Vec<Result<TopK>> = pool.install(|| {
        offsets
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut reader = FeatureIndexReader::open(index)?;
                reader.seek_to(chunk[0])?;
                let mut top = TopK::new(config.limit);
                for _ in 0..chunk.len() {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(Error::Cancelled);
                    }
                    let record = reader.read_next()?.ok_or_else(|| {
                        Error::MalformedRecord(
                            "index ends before the offset table does".into(),
                        )
                    })?;
                    score_record(&record, scores, config, &mut top)?;
                }
                Ok(top)
            })
            .collect()
    });
    let mut merged = TopK::new(config.limit);
    for partial in partials {
        merged = merged.merge(partial?);
    }
    Ok((merged, scanned))
}

/// Read the binding score-vector format: `num_features` f64 LE, narrowed to
/// f32 for the scan.
pub fn read_score_vector(input: &mut impl Read, num_features: usize) -> Result<Vec<f32>> {
    let mut scores = Vec::with_capacity(num_features);
    let mut buf = [0u8; 8];
    for _ in 0..num_features {
        input.read_exact(&mut buf)?;
        scores.push(f64::from_le_bytes(buf) as f32);
    }
    Ok(scores)
}

/// Write the binding result format: `score` f32 LE then `pmid` u32 LE per
/// result, in ranked order.
pub fn write_results(out: &mut impl Write, results: &[ScoredDoc]) -> Result<()> {
    for doc in results {
        out.write_all(&doc.score.to_le_bytes())?;
        out.write_all(&doc.docid.to_le_bytes())?;
    }
    Ok(())
}
