//! Per-scenario accumulation and the pooled benchmark report.

use crate::evaluation::align::AlignedScores;
use crate::evaluation::metrics::{self, MetricReport};
use crate::image::LabelImage;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static description of the anomaly placed in a scenario (`anomaly.json`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyAttributes {
    pub category: String,
    pub size: String,
}

#[derive(Debug, Clone)]
struct FrameScores {
    scores: AlignedScores,
    detectable: bool,
}

#[derive(Debug, Clone)]
pub struct ScenarioRecord {
    pub scenario_id: String,
    pub anomaly: AnomalyAttributes,
    frames: Vec<FrameScores>,
}

impl ScenarioRecord {
    pub fn new(scenario_id: &str, anomaly: AnomalyAttributes) -> ScenarioRecord {
        ScenarioRecord {
            scenario_id: scenario_id.to_string(),
            anomaly,
            frames: Vec::new(),
        }
    }

    pub fn push_frame(&mut self, scores: AlignedScores, detectable: bool) {
        self.frames.push(FrameScores { scores, detectable });
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn detectable_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.detectable).count()
    }

    /// All frames, or only those where the anomaly reached the sensor.
    pub fn pooled(&self, detectable_only: bool) -> AlignedScores {
        let mut pooled = AlignedScores::default();
        for frame in self
            .frames
            .iter()
            .filter(|f| f.detectable || !detectable_only)
        {
            pooled.extend(&frame.scores);
        }
        pooled
    }
}

pub fn detectable_in_image(semantic: &LabelImage, anomaly_class_id: u32) -> bool {
    semantic.data().contains(&anomaly_class_id)
}

pub fn detectable_in_lidar(labels: &[u32], anomaly_class_id: u32) -> bool {
    labels.contains(&anomaly_class_id)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioMetrics {
    pub anomaly: AnomalyAttributes,
    pub frames: usize,
    pub detectable_frames: usize,
    pub detectable: MetricReport,
    pub total: MetricReport,
}

/// Unweighted mean of per-scenario totals; undefined AUROC / FPR95 values are left out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MeanMetrics {
    pub auroc: Option<f64>,
    pub aupr: f64,
    pub fpr95: Option<f64>,
    pub specificity: f64,
    pub f1_score: f64,
    pub ppv: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    pub normality_included: MetricReport,
    pub anomalies_only: MetricReport,
    pub by_anomaly_size: BTreeMap<String, MetricReport>,
    pub scenario_mean: MeanMetrics,
    pub scenarios: BTreeMap<String, ScenarioMetrics>,
}

fn mean_of<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

fn mean_metrics(reports: &[MetricReport]) -> MeanMetrics {
    MeanMetrics {
        auroc: mean_of(reports.iter().filter_map(|r| r.auroc)),
        aupr: mean_of(reports.iter().map(|r| r.aupr)).unwrap_or(0.0),
        fpr95: mean_of(reports.iter().filter_map(|r| r.fpr95)),
        specificity: mean_of(reports.iter().map(|r| r.specificity)).unwrap_or(1.0),
        f1_score: mean_of(reports.iter().map(|r| r.f1_score)).unwrap_or(0.0),
        ppv: mean_of(reports.iter().map(|r| r.ppv)).unwrap_or(0.0),
    }
}

fn compute(scores: &AlignedScores) -> MetricReport {
    metrics::compute_metrics(&scores.pred_scores, &scores.gt_binary)
}

/// Metrics per scenario, over the pooled sets and per anomaly size bucket.
///
/// Size buckets and `anomalies_only` pool the detectable frames only.
pub fn evaluate_scenarios(records: &[ScenarioRecord]) -> BenchmarkReport {
    let scenarios: BTreeMap<String, ScenarioMetrics> = records
        .par_iter()
        .map(|record| {
            let detectable = compute(&record.pooled(true));
            let total = compute(&record.pooled(false));
            debug!(
                "scenario {}: {} frames, {} detectable",
                record.scenario_id,
                record.frame_count(),
                record.detectable_frames()
            );
            (
                record.scenario_id.clone(),
                ScenarioMetrics {
                    anomaly: record.anomaly.clone(),
                    frames: record.frame_count(),
                    detectable_frames: record.detectable_frames(),
                    detectable,
                    total,
                },
            )
        })
        .collect();

    let mut all = AlignedScores::default();
    let mut detectable = AlignedScores::default();
    let mut by_size: BTreeMap<String, AlignedScores> = BTreeMap::new();
    for record in records {
        all.extend(&record.pooled(false));
        let visible = record.pooled(true);
        detectable.extend(&visible);
        by_size
            .entry(record.anomaly.size.clone())
            .or_default()
            .extend(&visible);
    }
    info!(
        "pooled {} voxels ({} detectable) over {} scenarios",
        all.len(),
        detectable.len(),
        records.len()
    );

    let totals: Vec<MetricReport> = scenarios.values().map(|s| s.total).collect();
    BenchmarkReport {
        normality_included: compute(&all),
        anomalies_only: compute(&detectable),
        by_anomaly_size: by_size
            .iter()
            .map(|(size, scores)| (size.clone(), compute(scores)))
            .collect(),
        scenario_mean: mean_metrics(&totals),
        scenarios,
    }
}
