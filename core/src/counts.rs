//! Feature occurrence counting over the index.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::stream::FeatureIndexReader;
use crate::{Date, DocId, FeatureId};

/// Per-feature occurrence totals over a subset of the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCounts {
    /// Documents that passed the date window and exclusion filters.
    pub ndocs: u32,
    /// Occurrence total per feature id.
    pub counts: Vec<u32>,
    /// Records scanned, including filtered ones.
    pub scanned: u64,
}

impl FeatureCounts {
    /// Write the binding wire format: `ndocs` u32 LE, then one u32 LE per
    /// feature.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.write_all(&self.ndocs.to_le_bytes())?;
        for &count in &self.counts {
            out.write_all(&count.to_le_bytes())?;
        }
        Ok(())
    }
}

/// Count feature occurrences over every record whose date falls inside
/// `[mindate, maxdate]` and whose id is not in `excluded`.
///
/// `excluded` must be sorted strictly ascending; this is checked before the
/// index is opened. The per-record membership test is a binary search, so a
/// 16M-record scan stays cheap even for exclusion lists in the tens of
/// thousands.
pub fn count_features(
    index: impl AsRef<Path>,
    num_features: usize,
    excluded: &[DocId],
    mindate: Date,
    maxdate: Date,
    cancel: &AtomicBool,
) -> Result<FeatureCounts> {
    validate_exclusions(excluded)?;
    if mindate > maxdate {
        return Err(Error::Argument(format!(
            "empty date window: mindate {mindate} > maxdate {maxdate}"
        )));
    }

    let mut reader = FeatureIndexReader::open(index)?;
    let mut counts = vec![0u32; num_features];
    let mut ndocs: u32 = 0;
    let mut scanned: u64 = 0;
    while let Some(record) = reader.read_next()? {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        scanned += 1;
        if record.date < mindate || record.date > maxdate {
            continue;
        }
        if excluded.binary_search(&record.docid).is_ok() {
            continue;
        }
        for &feat in record.features {
            let slot = counts.get_mut(feat as usize).ok_or_else(|| {
                Error::MalformedRecord(format!(
                    "feature id {feat} out of range for universe of {num_features}"
                ))
            })?;
            *slot += 1;
        }
        ndocs += 1;
    }
    tracing::debug!(scanned, ndocs, "feature count scan complete");
    Ok(FeatureCounts {
        ndocs,
        counts,
        scanned,
    })
}

/// Occurrence counts over in-memory feature vectors (the cross-validator
/// holds the labelled documents' vectors rather than rescanning the index).
pub fn count_vectors<'a>(
    num_features: usize,
    vectors: impl IntoIterator<Item = &'a [FeatureId]>,
) -> Vec<u32> {
    let mut counts = vec![0u32; num_features];
    for features in vectors {
        for &feat in features {
            counts[feat as usize] += 1;
        }
    }
    counts
}

fn validate_exclusions(excluded: &[DocId]) -> Result<()> {
    if excluded.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(Error::InvalidExclusion);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsorted_exclusions_fail_before_io() {
        // A path that does not exist: the pre-flight check must fire first.
        let cancel = AtomicBool::new(false);
        let err = count_features("/nonexistent/features.idx", 8, &[3, 2], 0, 99999999, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidExclusion));
    }

    #[test]
    fn duplicate_exclusions_rejected() {
        let cancel = AtomicBool::new(false);
        let err = count_features("/nonexistent/features.idx", 8, &[2, 2], 0, 99999999, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidExclusion));
    }

    #[test]
    fn inverted_date_window_is_an_argument_error() {
        let cancel = AtomicBool::new(false);
        let err = count_features("/nonexistent/features.idx", 8, &[], 20050101, 20000101, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn counts_in_memory_vectors() {
        let vectors: Vec<Vec<FeatureId>> = vec![vec![0, 2], vec![2, 3], vec![2]];
        let counts = count_vectors(4, vectors.iter().map(|v| v.as_slice()));
        assert_eq!(counts, vec![1, 0, 3, 1]);
    }
}
