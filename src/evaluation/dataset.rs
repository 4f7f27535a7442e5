//! Walks a dataset root and its prediction mirror, frame by frame.
//!
//! Ground truth per [`DataType`], inside `<root>/<scenario>/`:
//! - voxel grids: `VOXEL_GRID/VOXEL_GRID_<n>.pcd`;
//! - images: `SEMANTIC_IMG/SEMANTIC_IMG_<n>.png`;
//! - point clouds: `SEMANTIC_PCD/SEMANTIC_PCD_<n>.pcd`.
//!
//! Predictions live in `<predictions>/<scenario>/*_<n>.{pcd,png}`: score grids,
//! 16-bit score maps or score clouds with one point per ground-truth point.

use crate::config;
use crate::error::{AnovoxError, Result};
use crate::evaluation::align::{self, AlignedScores};
use crate::evaluation::scenario::{self, AnomalyAttributes, BenchmarkReport, ScenarioRecord};
use crate::image::Modality;
use crate::io;
use crate::pipeline::VOXEL_GRID_DIR;
use crate::voxel_grid::VoxelGrid;
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

pub const ANOMALY_FILE: &str = "anomaly.json";

/// Sensor whose ground truth decides whether a frame counts as detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSensor {
    Camera,
    Lidar,
}

/// What the predictions score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    VoxelGrid,
    Image,
    PointCloud,
}

impl DataType {
    pub fn prediction_ending(&self) -> &'static str {
        match self {
            DataType::Image => "png",
            DataType::VoxelGrid | DataType::PointCloud => "pcd",
        }
    }

    /// Ground-truth file of one frame inside a scenario.
    pub fn ground_truth_path(&self, scenario_dir: &Path, frame: u32) -> PathBuf {
        let (dir, ending) = match self {
            DataType::VoxelGrid => (VOXEL_GRID_DIR, "pcd"),
            DataType::Image => (
                Modality::SemanticImage.dir_name(),
                Modality::SemanticImage.file_ending(),
            ),
            DataType::PointCloud => (
                Modality::SemanticLidarPoints.dir_name(),
                Modality::SemanticLidarPoints.file_ending(),
            ),
        };
        scenario_dir
            .join(dir)
            .join(format!("{}_{}.{}", dir, frame, ending))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSettings {
    pub anomaly_class_id: u32,
    pub front_only: bool,
    pub match_radius: i32,
    pub grid_size: [u32; 3],
    /// Prediction and ground-truth grids were intersected upstream.
    pub prealigned: bool,
    pub sensor: DetectionSensor,
    pub datatype: DataType,
}

impl EvaluationSettings {
    pub fn from_config(
        config: &config::Config,
        sensor: DetectionSensor,
        prealigned: bool,
    ) -> EvaluationSettings {
        EvaluationSettings {
            anomaly_class_id: config.anomaly_class_id,
            front_only: config.front_only,
            match_radius: config.match_radius,
            grid_size: config.grid_size,
            prealigned,
            sensor,
            datatype: DataType::VoxelGrid,
        }
    }

    /// Score sensor data directly; detectability then comes from the same file.
    pub fn with_datatype(mut self, datatype: DataType) -> EvaluationSettings {
        self.datatype = datatype;
        self
    }
}

pub fn align_frame(
    pred: &VoxelGrid,
    gt: &VoxelGrid,
    settings: &EvaluationSettings,
) -> Result<AlignedScores> {
    if settings.prealigned {
        return align::align_prealigned(pred, gt, settings.anomaly_class_id);
    }
    let gt = if settings.front_only {
        align::front_only(gt, &settings.grid_size)
    } else {
        gt.clone()
    };
    Ok(align::align_grids(
        pred,
        &gt,
        settings.anomaly_class_id,
        settings.match_radius,
    ))
}

/// Checks the sensor's own ground truth; falls back to the voxel grid when that file is absent.
pub fn frame_detectable(
    scenario_dir: &Path,
    frame: u32,
    gt: &VoxelGrid,
    settings: &EvaluationSettings,
) -> Result<bool> {
    let modality = match settings.sensor {
        DetectionSensor::Camera => Modality::SemanticImage,
        DetectionSensor::Lidar => Modality::SemanticLidarPoints,
    };
    let path = scenario_dir.join(modality.dir_name()).join(format!(
        "{}_{}.{}",
        modality.dir_name(),
        frame,
        modality.file_ending()
    ));
    if !path.exists() {
        return Ok(gt.contains_value(settings.anomaly_class_id as f32));
    }
    Ok(match settings.sensor {
        DetectionSensor::Camera => {
            scenario::detectable_in_image(&io::read_semantic_png(&path)?, settings.anomaly_class_id)
        }
        DetectionSensor::Lidar => scenario::detectable_in_lidar(
            io::read_semantic_lidar(&path)?.labels(),
            settings.anomaly_class_id,
        ),
    })
}

pub fn read_anomaly_attributes(scenario_dir: &Path) -> Result<AnomalyAttributes> {
    let path = scenario_dir.join(ANOMALY_FILE);
    if path.exists() {
        io::read_json(&path)
    } else {
        warn!("{:?} missing, anomaly recorded as unknown", path);
        Ok(AnomalyAttributes {
            category: "unknown".to_string(),
            size: "unknown".to_string(),
        })
    }
}

/// Aligned scores of one frame and whether the anomaly reached the sensor.
pub fn score_frame(
    scenario_dir: &Path,
    frame: u32,
    pred_path: &Path,
    gt_path: &Path,
    settings: &EvaluationSettings,
) -> Result<(AlignedScores, bool)> {
    let anomaly = settings.anomaly_class_id;
    match settings.datatype {
        DataType::VoxelGrid => {
            let pred = io::read_voxel_grid(pred_path)?;
            let gt = io::read_voxel_grid(gt_path)?;
            let aligned = align_frame(&pred, &gt, settings)?;
            let detectable = frame_detectable(scenario_dir, frame, &gt, settings)?;
            Ok((aligned, detectable))
        }
        DataType::Image => {
            let pred = io::read_score_png(pred_path)?;
            let gt = io::read_semantic_png(gt_path)?;
            let aligned = align::align_image(&pred, &gt, anomaly)?;
            Ok((aligned, scenario::detectable_in_image(&gt, anomaly)))
        }
        DataType::PointCloud => {
            let scores: Vec<f32> = io::read_pcd_to_points(pred_path)?
                .iter()
                .map(|p| p.value)
                .collect();
            let gt = io::read_semantic_lidar(gt_path)?;
            let aligned = align::align_points(&scores, gt.labels(), anomaly)?;
            Ok((aligned, scenario::detectable_in_lidar(gt.labels(), anomaly)))
        }
    }
}

/// Every predicted frame with a ground-truth counterpart; a bad frame is logged and skipped.
pub fn collect_scenario(
    scenario_dir: &Path,
    predictions_dir: &Path,
    settings: &EvaluationSettings,
) -> Result<ScenarioRecord> {
    let id = io::scenario_id(scenario_dir);
    let mut record = ScenarioRecord::new(&id, read_anomaly_attributes(scenario_dir)?);
    let ending = settings.datatype.prediction_ending();
    for (frame, pred_path) in io::list_frames(predictions_dir, ending)? {
        let gt_path = settings.datatype.ground_truth_path(scenario_dir, frame);
        if !gt_path.exists() {
            warn!("{} frame {}: no ground truth at {:?}", id, frame, gt_path);
            continue;
        }
        match score_frame(scenario_dir, frame, &pred_path, &gt_path, settings) {
            Ok((aligned, detectable)) => record.push_frame(aligned, detectable),
            Err(e) => error!("{} frame {}: {}", id, frame, e),
        }
    }
    info!(
        "{}: {} frames evaluated, {} detectable",
        id,
        record.frame_count(),
        record.detectable_frames()
    );
    Ok(record)
}

/// Collect scenarios in parallel, then reduce them into one report.
pub fn evaluate_dataset(
    dataset_root: &Path,
    predictions_root: &Path,
    settings: &EvaluationSettings,
    max_num_threads: usize,
) -> Result<BenchmarkReport> {
    let scenarios = io::list_scenarios(dataset_root)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_num_threads)
        .build()
        .map_err(|e| AnovoxError::Config(e.to_string()))?;
    let records: Vec<ScenarioRecord> = pool.install(|| {
        scenarios
            .par_iter()
            .filter_map(|scenario_dir| {
                let id = io::scenario_id(scenario_dir);
                let predictions_dir = predictions_root.join(&id);
                if !predictions_dir.is_dir() {
                    warn!("{}: no predictions", id);
                    return None;
                }
                match collect_scenario(scenario_dir, &predictions_dir, settings) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        error!("{}: {}", id, e);
                        None
                    }
                }
            })
            .collect()
    });
    Ok(pool.install(|| scenario::evaluate_scenarios(&records)))
}
