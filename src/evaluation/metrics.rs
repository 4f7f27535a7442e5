//! Binary anomaly-detection metrics over aligned `(score, is_anomaly)` pairs.
//!
//! Degenerate inputs never panic: AUROC and FPR95 are `None` when a class is
//! missing, AUPR is 0 without positives and specificity is 1 without negatives.

use serde::{Deserialize, Serialize};

/// Thresholds used for the averaged precision / F1 (0.25 ..= 0.70).
pub const SWEEP_THRESHOLDS: [f64; 10] = [0.25, 0.30, 0.35, 0.40, 0.45, 0.50, 0.55, 0.60, 0.65, 0.70];

const FPR95_STEPS: usize = 100;
const TARGET_TPR: f64 = 0.95;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MetricReport {
    pub auroc: Option<f64>,
    pub aupr: f64,
    pub fpr95: Option<f64>,
    pub specificity: f64,
    pub f1_score: f64,
    pub ppv: f64,
    /// Threshold where precision and recall are closest.
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl Confusion {
    /// Predictions are positive when `score > threshold`.
    pub fn at(scores: &[f32], labels: &[bool], threshold: f64) -> Confusion {
        let mut c = Confusion::default();
        for (score, label) in scores.iter().zip(labels) {
            match ((*score as f64) > threshold, *label) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, false) => c.tn += 1,
                (false, true) => c.fn_ += 1,
            }
        }
        c
    }

    pub fn precision(&self) -> f64 {
        ratio_or(self.tp, self.tp + self.fp, 0.0)
    }

    pub fn f1(&self) -> f64 {
        ratio_or(2 * self.tp, 2 * self.tp + self.fp + self.fn_, 0.0)
    }

    pub fn specificity(&self) -> f64 {
        ratio_or(self.tn, self.tn + self.fp, 1.0)
    }
}

fn ratio_or(n: usize, d: usize, fallback: f64) -> f64 {
    if d == 0 {
        fallback
    } else {
        n as f64 / d as f64
    }
}

/// Cumulative (tp, fp) at every distinct score, highest score first.
fn ranked_counts(scores: &[f32], labels: &[bool]) -> Vec<(f64, usize, usize)> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut curve = Vec::new();
    let (mut tp, mut fp) = (0, 0);
    for (k, &i) in order.iter().enumerate() {
        if labels[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_score = k + 1 == order.len() || scores[order[k + 1]] != scores[i];
        if last_of_score {
            curve.push((scores[i] as f64, tp, fp));
        }
    }
    curve
}

/// Area under the ROC curve (trapezoidal over distinct thresholds).
pub fn auroc(scores: &[f32], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut area = 0.0;
    let (mut prev_tpr, mut prev_fpr) = (0.0, 0.0);
    for (_, tp, fp) in ranked_counts(scores, labels) {
        let tpr = tp as f64 / positives as f64;
        let fpr = fp as f64 / negatives as f64;
        area += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        prev_tpr = tpr;
        prev_fpr = fpr;
    }
    Some(area)
}

/// Average precision: `sum (R_n - R_{n-1}) * P_n` over descending thresholds.
pub fn aupr(scores: &[f32], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|l| **l).count();
    if positives == 0 {
        return 0.0;
    }
    let mut ap = 0.0;
    let mut prev_recall = 0.0;
    for (_, tp, fp) in ranked_counts(scores, labels) {
        let recall = tp as f64 / positives as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

/// FPR at the first threshold (1.0 down to 0.0 in steps of 0.01) whose TPR reaches 95%.
pub fn fpr_at_95_tpr(scores: &[f32], labels: &[bool]) -> Option<f64> {
    if !labels.iter().any(|l| *l) {
        return None;
    }
    (0..=FPR95_STEPS)
        .map(|i| 1.0 - i as f64 / FPR95_STEPS as f64)
        .map(|threshold| Confusion::at(scores, labels, threshold))
        .find(|c| c.tp as f64 / (c.tp + c.fn_) as f64 >= TARGET_TPR)
        .map(|c| ratio_or(c.fp, c.fp + c.tn, 0.0))
}

/// Threshold on the precision-recall curve minimising `|precision - recall|`.
///
/// Candidates are the distinct scores; ties go to the lowest threshold. Without
/// positives recall is taken as 0.
pub fn threshold_from_prc(scores: &[f32], labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|l| **l).count();
    let mut best: Option<(f64, f64)> = None;
    // ascending thresholds so the first minimum is the lowest one
    for (threshold, tp, fp) in ranked_counts(scores, labels).into_iter().rev() {
        let precision = tp as f64 / (tp + fp) as f64;
        let recall = ratio_or(tp, positives, 0.0);
        let gap = (precision - recall).abs();
        match best {
            Some((best_gap, _)) if best_gap <= gap => {}
            _ => best = Some((gap, threshold)),
        }
    }
    best.map(|(_, t)| t).unwrap_or(0.0)
}

pub fn compute_metrics(scores: &[f32], labels: &[bool]) -> MetricReport {
    let threshold = threshold_from_prc(scores, labels);
    let specificity = Confusion::at(scores, labels, threshold).specificity();
    let sweep: Vec<Confusion> = SWEEP_THRESHOLDS
        .iter()
        .map(|t| Confusion::at(scores, labels, *t))
        .collect();
    let n = sweep.len() as f64;
    MetricReport {
        auroc: auroc(scores, labels),
        aupr: aupr(scores, labels),
        fpr95: fpr_at_95_tpr(scores, labels),
        specificity,
        f1_score: sweep.iter().map(Confusion::f1).sum::<f64>() / n,
        ppv: sweep.iter().map(Confusion::precision).sum::<f64>() / n,
        threshold,
    }
}
