//! Performance statistics over pooled cross-validation scores.
//!
//! All vectors are indexed by the distinct pooled scores in increasing
//! order; entry `i` describes the classifier that labels a document positive
//! when its score is at least `thresholds[i]`.

use serde::Serialize;

use crate::error::{Error, Result};

/// Confusion-matrix and ratio curves at every distinct threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Curves {
    pub thresholds: Vec<f32>,
    pub true_pos: Vec<u32>,
    pub true_neg: Vec<u32>,
    pub false_pos: Vec<u32>,
    pub false_neg: Vec<u32>,
    /// Recall (true positive rate).
    pub recall: Vec<f64>,
    /// False positive rate (1 - specificity).
    pub fpr: Vec<f64>,
    /// Precision (positive predictive value).
    pub precision: Vec<f64>,
    pub fmeasure: Vec<f64>,
    pub fmeasure_alpha: Vec<f64>,
}

/// Performance at the tuned threshold.
#[derive(Debug, Clone, Serialize)]
pub struct TunedStats {
    pub threshold: f32,
    pub true_pos: u32,
    pub true_neg: u32,
    pub false_pos: u32,
    pub false_neg: u32,
    pub recall: f64,
    pub precision: f64,
    pub specificity: f64,
    pub accuracy: f64,
    pub prevalence: f64,
    pub enrichment: f64,
    pub fmeasure: f64,
    pub fmeasure_alpha: f64,
    /// `(u_r * TP - FP) / (u_r * P)`.
    pub utility: f64,
}

/// Equal-width histogram of one class's scores.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    pub lo: f32,
    pub width: f32,
    pub counts: Vec<u32>,
}

impl Histogram {
    const BINS: usize = 20;

    fn new(scores: &[f32]) -> Histogram {
        let lo = scores.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut width = (hi - lo) / Self::BINS as f32;
        if !(width > 0.0) {
            width = 1.0;
        }
        let mut counts = vec![0u32; Self::BINS];
        for &s in scores {
            let bin = (((s - lo) / width) as usize).min(Self::BINS - 1);
            counts[bin] += 1;
        }
        Histogram { lo, width, counts }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub alpha: f64,
    pub num_positives: usize,
    pub num_negatives: usize,
    pub curves: Curves,
    /// Area under the ROC curve by the trapezoid rule. Slightly
    /// underestimates because the (0,0)/(1,1) corners are usually absent
    /// from the data; `wilcoxon` does not have that problem.
    pub roc_area: f64,
    /// Wilcoxon W statistic (area under ROC, Hanley-McNeil).
    pub wilcoxon: f64,
    pub wilcoxon_stderr: f64,
    pub pr_area: f64,
    /// Precision averaged over each rank at which a positive is retrieved.
    pub averaged_precision: f64,
    /// Recall/precision at the point where they are closest.
    pub breakeven: f64,
    pub tuned: TunedStats,
    pub pos_histogram: Histogram,
    pub neg_histogram: Histogram,
}

impl PerformanceStats {
    /// Derive all statistics from pooled per-class scores.
    pub fn new(
        pscores: &[f32],
        nscores: &[f32],
        alpha: f64,
        utility_r: Option<f64>,
    ) -> Result<PerformanceStats> {
        if pscores.is_empty() {
            return Err(Error::EmptyLabelled("no positive scores".into()));
        }
        if nscores.is_empty() {
            return Err(Error::EmptyLabelled("no negative scores".into()));
        }
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::Argument(format!(
                "F-measure alpha must lie in (0, 1), got {alpha}"
            )));
        }

        let mut pscores = pscores.to_vec();
        let mut nscores = nscores.to_vec();
        pscores.sort_unstable_by(f32::total_cmp);
        nscores.sort_unstable_by(f32::total_cmp);
        let num_p = pscores.len();
        let num_n = nscores.len();
        let p = num_p as f64;
        let n = num_n as f64;

        // Distinct pooled scores, ascending.
        let mut thresholds: Vec<f32> = Vec::with_capacity(num_p + num_n);
        thresholds.extend_from_slice(&pscores);
        thresholds.extend_from_slice(&nscores);
        thresholds.sort_unstable_by(f32::total_cmp);
        thresholds.dedup();
        let vlen = thresholds.len();

        // Confusion counts at each threshold, plus the per-threshold score
        // multiplicities needed for the Hanley-McNeil variance rows.
        let mut true_pos = vec![0u32; vlen];
        let mut true_neg = vec![0u32; vlen];
        let mut false_pos = vec![0u32; vlen];
        let mut false_neg = vec![0u32; vlen];
        let mut pos_at = vec![0u32; vlen]; // positives scoring exactly t
        let mut neg_at = vec![0u32; vlen];
        let mut fn_walk = 0usize;
        let mut tn_walk = 0usize;
        for (idx, &threshold) in thresholds.iter().enumerate() {
            while fn_walk < num_p && pscores[fn_walk] < threshold {
                fn_walk += 1;
            }
            let mut pcount = fn_walk;
            while pcount < num_p && pscores[pcount] == threshold {
                pcount += 1;
            }
            pos_at[idx] = (pcount - fn_walk) as u32;

            while tn_walk < num_n && nscores[tn_walk] < threshold {
                tn_walk += 1;
            }
            let mut ncount = tn_walk;
            while ncount < num_n && nscores[ncount] == threshold {
                ncount += 1;
            }
            neg_at[idx] = (ncount - tn_walk) as u32;

            false_neg[idx] = fn_walk as u32;
            true_pos[idx] = (num_p - fn_walk) as u32;
            true_neg[idx] = tn_walk as u32;
            false_pos[idx] = (num_n - tn_walk) as u32;
        }

        let mut recall = vec![0f64; vlen];
        let mut fpr = vec![0f64; vlen];
        let mut precision = vec![0f64; vlen];
        let mut fmeasure = vec![0f64; vlen];
        let mut fmeasure_alpha = vec![0f64; vlen];
        for idx in 0..vlen {
            let tp = f64::from(true_pos[idx]);
            let fp = f64::from(false_pos[idx]);
            recall[idx] = tp / p;
            fpr[idx] = fp / n;
            precision[idx] = if tp + fp > 0.0 { tp / (tp + fp) } else { 1.0 };
            let (r, pr) = (recall[idx], precision[idx]);
            fmeasure[idx] = if r + pr > 0.0 { 2.0 * r * pr / (r + pr) } else { 0.0 };
            fmeasure_alpha[idx] = if r > 0.0 && pr > 0.0 {
                1.0 / (alpha / pr + (1.0 - alpha) / r)
            } else {
                0.0
            };
        }

        // Thresholds ascend, so FPR and recall descend; integrate reversed.
        let roc_area = trapezoid_reversed(&fpr, &recall);
        let pr_area = trapezoid_reversed(&recall, &precision);

        // Hanley-McNeil rows over the distinct scores.
        let mut w_sum = 0f64;
        let mut q1_sum = 0f64;
        let mut q2_sum = 0f64;
        for idx in 0..vlen {
            let r1 = f64::from(neg_at[idx]);
            let r2 = f64::from(true_pos[idx]) - f64::from(pos_at[idx]);
            let r3 = f64::from(pos_at[idx]);
            let r4 = f64::from(true_neg[idx]);
            w_sum += r1 * r2 + 0.5 * r1 * r3;
            q2_sum += r3 * (r4 * r4 + r4 * r1 + r1 * r1 / 3.0);
            q1_sum += r1 * (r2 * r2 + r2 * r3 + r3 * r3 / 3.0);
        }
        let wilcoxon = w_sum / (n * p);
        let q1 = q1_sum / (n * p * p);
        let q2 = q2_sum / (p * n * n);
        let wilcoxon_stderr = ((wilcoxon * (1.0 - wilcoxon)
            + (p - 1.0) * (q1 - wilcoxon * wilcoxon)
            + (n - 1.0) * (q2 - wilcoxon * wilcoxon))
            / (p * n))
            .sqrt();

        let averaged_precision = averaged_precision(&pscores, &nscores);

        // Break-even: the threshold where recall and precision meet.
        let mut bep_idx = 0;
        let mut bep_diff = f64::INFINITY;
        for idx in 0..vlen {
            let diff = (recall[idx] - precision[idx]).abs();
            if diff < bep_diff {
                bep_diff = diff;
                bep_idx = idx;
            }
        }
        let breakeven = 0.5 * (recall[bep_idx] + precision[bep_idx]);

        // Tuned threshold: maximum F-alpha, ties toward the larger threshold.
        let max_fma = fmeasure_alpha.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let tuned_idx = (0..vlen)
            .rev()
            .find(|&idx| fmeasure_alpha[idx] == max_fma)
            .unwrap_or(0);

        let tp = f64::from(true_pos[tuned_idx]);
        let fp = f64::from(false_pos[tuned_idx]);
        let tn = f64::from(true_neg[tuned_idx]);
        let total = p + n;
        let tuned_recall = recall[tuned_idx];
        let tuned_precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let prevalence = p / total;
        let u_r = utility_r.unwrap_or(n / p);
        let tuned = TunedStats {
            threshold: thresholds[tuned_idx],
            true_pos: true_pos[tuned_idx],
            true_neg: true_neg[tuned_idx],
            false_pos: false_pos[tuned_idx],
            false_neg: false_neg[tuned_idx],
            recall: tuned_recall,
            precision: tuned_precision,
            specificity: if tn + fp > 0.0 { tn / (tn + fp) } else { 0.0 },
            accuracy: (tp + tn) / total,
            prevalence,
            enrichment: if prevalence > 0.0 {
                tuned_precision / prevalence
            } else {
                0.0
            },
            fmeasure: fmeasure[tuned_idx],
            fmeasure_alpha: fmeasure_alpha[tuned_idx],
            utility: (u_r * tp - fp) / (u_r * p),
        };

        let pos_histogram = Histogram::new(&pscores);
        let neg_histogram = Histogram::new(&nscores);

        Ok(PerformanceStats {
            alpha,
            num_positives: num_p,
            num_negatives: num_n,
            curves: Curves {
                thresholds,
                true_pos,
                true_neg,
                false_pos,
                false_neg,
                recall,
                fpr,
                precision,
                fmeasure,
                fmeasure_alpha,
            },
            roc_area,
            wilcoxon,
            wilcoxon_stderr,
            pr_area,
            averaged_precision,
            breakeven,
            tuned,
            pos_histogram,
            neg_histogram,
        })
    }
}

/// Trapezoid integral of `y` over `x`, with both vectors reversed so the
/// abscissa ascends.
fn trapezoid_reversed(x: &[f64], y: &[f64]) -> f64 {
    let mut area = 0f64;
    for i in (1..x.len()).rev() {
        // Reversed order: segment from index i down to i-1.
        area += (x[i - 1] - x[i]) * (y[i - 1] + y[i]) / 2.0;
    }
    area
}

/// Mean precision over the ranks at which positives are retrieved, walking
/// the two sorted score lists as one descending ranking. Positives win
/// score ties, matching the `>=` ranking convention of the curves.
fn averaged_precision(pscores: &[f32], nscores: &[f32]) -> f64 {
    let mut p_idx = pscores.len();
    let mut n_idx = nscores.len();
    let mut tp = 0u32;
    let mut fp = 0u32;
    let mut sum = 0f64;
    while p_idx > 0 || n_idx > 0 {
        let take_positive = p_idx > 0
            && (n_idx == 0 || pscores[p_idx - 1] >= nscores[n_idx - 1]);
        if take_positive {
            p_idx -= 1;
            tp += 1;
            sum += f64::from(tp) / f64::from(tp + fp);
        } else {
            n_idx -= 1;
            fp += 1;
        }
    }
    sum / f64::from(tp)
}
