//! Naive Bayes feature-score training from occurrence counts.
//!
//! Documents are modelled as multivariate Bernoulli draws. Feature absence is
//! folded into a per-document base score, so scoring a document is the base,
//! the class prior, and one addition per present feature.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::FeatureId;

/// Additive smoothing applied to the occurrence counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    /// A fixed pseudocount for every feature; `Constant(1.0)` is the
    /// classic Laplace prior.
    Constant(f64),
    /// Per-feature pseudocount equal to the feature's background frequency
    /// in the pooled corpora.
    BgFreq,
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub smoothing: Smoothing,
    /// Features with fewer total occurrences are deselected.
    pub min_count: u32,
    /// Deselect features whose information gain about the class, relative to
    /// the class entropy, falls below this. Zero disables the cutoff.
    pub min_infogain: f64,
    /// Class-prior log odds; defaults to `ln(pos_docs / neg_docs)`.
    pub prior_override: Option<f64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            smoothing: Smoothing::BgFreq,
            min_count: 0,
            min_infogain: 0.0,
            prior_override: None,
        }
    }
}

/// Summary of a trained score vector, in the spirit of the per-corpus
/// statistics the reporting layer prints.
#[derive(Debug, Clone, Serialize)]
pub struct TrainedStats {
    pub feats_total: usize,
    pub feats_selected: usize,
    pub pos_docs: u32,
    pub neg_docs: u32,
    pub pos_occurrences: u64,
    pub neg_occurrences: u64,
    pub pos_average: f64,
    pub neg_average: f64,
    pub pos_distinct: usize,
    pub neg_distinct: usize,
}

/// Floor for the smoothed probabilities, as in the maximum-likelihood
/// scorer's replacement of zero frequencies.
const P_MIN: f64 = 1e-8;

/// A trained feature-score vector.
///
/// A document's score is `base + prior + Σ scores[f]` over its present
/// features; deselected features carry a zero score and do not contribute
/// to `base`.
#[derive(Debug, Clone)]
pub struct FeatureScores {
    pub scores: Vec<f32>,
    pub base: f32,
    pub prior: f32,
    pub selected: Vec<bool>,
    pub stats: TrainedStats,
}

impl FeatureScores {
    /// Train from positive and negative occurrence counts.
    pub fn train(
        pos_counts: &[u32],
        neg_counts: &[u32],
        pos_docs: u32,
        neg_docs: u32,
        config: &TrainConfig,
    ) -> Result<FeatureScores> {
        if pos_counts.len() != neg_counts.len() {
            return Err(Error::Argument(format!(
                "count vectors disagree on the feature universe: {} vs {}",
                pos_counts.len(),
                neg_counts.len()
            )));
        }
        if pos_docs == 0 {
            return Err(Error::EmptyLabelled(
                "no positive documents to train on".into(),
            ));
        }

        let num_features = pos_counts.len();
        let pdocs = f64::from(pos_docs);
        let ndocs = f64::from(neg_docs);
        let p_rel = pdocs / (pdocs + ndocs);

        let mut scores = vec![0f32; num_features];
        let mut selected = vec![false; num_features];
        let mut base = 0f64;
        let mut deselected_low = 0usize;
        let mut deselected_gain = 0usize;

        for i in 0..num_features {
            let total = u64::from(pos_counts[i]) + u64::from(neg_counts[i]);
            if total < u64::from(config.min_count) {
                deselected_low += 1;
                continue;
            }
            let pos = f64::from(pos_counts[i]);
            let neg = f64::from(neg_counts[i]);
            let alpha = match config.smoothing {
                Smoothing::Constant(a) => a,
                Smoothing::BgFreq => total as f64 / (pdocs + ndocs),
            };
            // Clamp into the open interval so both log-ratios stay finite;
            // a feature saturated in one class would otherwise produce an
            // infinite switch term.
            let p_pos = ((pos + alpha) / (pdocs + 1.0)).clamp(P_MIN, 1.0 - P_MIN);
            let p_neg = ((neg + alpha) / (ndocs + 1.0)).clamp(P_MIN, 1.0 - P_MIN);
            if config.min_infogain > 0.0
                && relative_infogain(p_pos, p_neg, p_rel) < config.min_infogain
            {
                deselected_gain += 1;
                continue;
            }
            let success = (p_pos / p_neg).ln();
            let failure = ((1.0 - p_pos) / (1.0 - p_neg)).ln();
            // Store the full presence switch term so the scan loop stays a
            // single addition per feature.
            scores[i] = (success - failure) as f32;
            base += failure;
            selected[i] = true;
        }

        let prior = match config.prior_override {
            Some(p) => p,
            None if neg_docs == 0 => 0.0,
            None => (pdocs / ndocs).ln(),
        };

        let stats = make_stats(pos_counts, neg_counts, pos_docs, neg_docs, &selected);
        tracing::debug!(
            feats_total = stats.feats_total,
            feats_selected = stats.feats_selected,
            deselected_low,
            deselected_gain,
            base,
            prior,
            "trained feature scores"
        );

        Ok(FeatureScores {
            scores,
            base: base as f32,
            prior: prior as f32,
            selected,
            stats,
        })
    }

    /// The scalar added to every document score before feature terms.
    pub fn offset(&self) -> f32 {
        self.base + self.prior
    }

    /// Score a single document's feature vector.
    pub fn score_of(&self, features: &[FeatureId]) -> f32 {
        let mut score = self.offset();
        for &feat in features {
            score += self.scores[feat as usize];
        }
        score
    }
}

/// Information gain of the class given one feature, divided by the class
/// entropy, both from the smoothed 2x2 contingency. Lands in `[0, 1]`.
fn relative_infogain(p_pos: f64, p_neg: f64, p_rel: f64) -> f64 {
    fn part(p: f64) -> f64 {
        if p > 0.0 {
            -p * p.log2()
        } else {
            0.0
        }
    }
    let p_irr = 1.0 - p_rel;
    let class_entropy = part(p_rel) + part(p_irr);
    if class_entropy == 0.0 {
        return 0.0;
    }
    // Joint probabilities of (class, feature present/absent).
    let with_rel = p_rel * p_pos;
    let with_irr = p_irr * p_neg;
    let without_rel = p_rel * (1.0 - p_pos);
    let without_irr = p_irr * (1.0 - p_neg);
    let p_with = with_rel + with_irr;
    let p_without = without_rel + without_irr;
    let cond = |joint: f64, marginal: f64| {
        if marginal > 0.0 {
            part(joint / marginal)
        } else {
            0.0
        }
    };
    let after = p_with * (cond(with_rel, p_with) + cond(with_irr, p_with))
        + p_without * (cond(without_rel, p_without) + cond(without_irr, p_without));
    (class_entropy - after) / class_entropy
}

fn make_stats(
    pos_counts: &[u32],
    neg_counts: &[u32],
    pos_docs: u32,
    neg_docs: u32,
    selected: &[bool],
) -> TrainedStats {
    let mut pos_occurrences = 0u64;
    let mut neg_occurrences = 0u64;
    let mut pos_distinct = 0usize;
    let mut neg_distinct = 0usize;
    for i in 0..selected.len() {
        if !selected[i] {
            continue;
        }
        pos_occurrences += u64::from(pos_counts[i]);
        neg_occurrences += u64::from(neg_counts[i]);
        if pos_counts[i] > 0 {
            pos_distinct += 1;
        }
        if neg_counts[i] > 0 {
            neg_distinct += 1;
        }
    }
    TrainedStats {
        feats_total: selected.len(),
        feats_selected: selected.iter().filter(|&&s| s).count(),
        pos_docs,
        neg_docs,
        pos_occurrences,
        neg_occurrences,
        pos_average: if pos_docs > 0 {
            pos_occurrences as f64 / f64::from(pos_docs)
        } else {
            0.0
        },
        neg_average: if neg_docs > 0 {
            neg_occurrences as f64 / f64::from(neg_docs)
        } else {
            0.0
        },
        pos_distinct,
        neg_distinct,
    }
}
