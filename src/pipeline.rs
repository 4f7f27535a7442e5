//! Per-frame fusion into voxel grids and the bounded worker pool that runs it.
//!
//! A scenario holds one or more sensor groups (`sensors.json`); without that
//! file the scenario root itself is the only group, mounted at the origin.
//! Every group's camera and lidar clouds are mount-compensated and merged
//! before one voxelization per frame.

use crate::config;
use crate::error::{AnovoxError, Result};
use crate::image::{DepthMap, Image, LabelImage, Modality, ScoreImage, SensorFrame};
use crate::io;
use crate::point3d::{Point3d, SemanticLidarCloud};
use crate::relabel::{GroundTruthFrame, RelabelRequest, RelabelingEngine};
use crate::transform::{self, MountPose, PinholeCamera};
use crate::voxel_grid::{VoxelGrid, Voxelizer};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const SENSOR_SETUP_FILE: &str = "sensors.json";
pub const VOXEL_GRID_DIR: &str = "VOXEL_GRID";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SensorGroup {
    /// Sub-directory of the scenario; empty for the scenario root.
    #[serde(default)]
    pub name: String,
    pub mount: MountPose,
}

impl SensorGroup {
    pub fn root() -> SensorGroup {
        SensorGroup {
            name: String::new(),
            mount: MountPose {
                location: [0.0; 3],
                rotation: [0.0; 3],
            },
        }
    }

    pub fn dir(&self, scenario_dir: &Path) -> PathBuf {
        if self.name.is_empty() {
            scenario_dir.to_path_buf()
        } else {
            scenario_dir.join(&self.name)
        }
    }
}

pub fn read_sensor_groups(scenario_dir: &Path) -> Result<Vec<SensorGroup>> {
    let setup = scenario_dir.join(SENSOR_SETUP_FILE);
    if setup.exists() {
        io::read_json(&setup)
    } else {
        Ok(vec![SensorGroup::root()])
    }
}

/// Ground-truth inputs of one sensor group for one tick.
#[derive(Debug, Clone)]
pub struct GroupFrame {
    pub mount: MountPose,
    pub depth: Option<DepthMap>,
    pub semantic: Option<LabelImage>,
    pub semantic_lidar: Option<SemanticLidarCloud>,
}

impl GroupFrame {
    pub fn new(mount: MountPose) -> GroupFrame {
        GroupFrame {
            mount,
            depth: None,
            semantic: None,
            semantic_lidar: None,
        }
    }

    /// Keep the modalities fusion needs; others are ignored.
    pub fn insert(&mut self, frame: SensorFrame, far_plane: f64) {
        match frame {
            SensorFrame::Depth(encoded) => {
                self.depth = Some(transform::decode_depth_image(&encoded, far_plane))
            }
            SensorFrame::SemanticImage(semantic) => self.semantic = Some(semantic),
            SensorFrame::SemanticLidarPoints(cloud) => self.semantic_lidar = Some(cloud),
            other => debug!("{:?} is not fused", other.modality()),
        }
    }
}

/// Semantic camera cloud; depth and semantic images must share the camera canvas.
pub fn camera_cloud(
    depth: &DepthMap,
    semantic: &LabelImage,
    intrinsics: &PinholeCamera,
    max_range: f64,
    mask: Option<&Image<bool>>,
) -> Result<Vec<Point3d>> {
    if !depth.same_shape(semantic) {
        return Err(AnovoxError::shape_mismatch(
            "semantic image pixels",
            depth.data().len(),
            semantic.data().len(),
        ));
    }
    check_canvas(depth, intrinsics)?;
    Ok(transform::depth_to_point_cloud(
        depth,
        intrinsics,
        max_range,
        mask,
        |u, v| semantic.get(u, v) as f32,
    ))
}

/// Score camera cloud from a per-pixel score map and the matching depth image.
pub fn score_cloud(
    depth: &DepthMap,
    scores: &ScoreImage,
    intrinsics: &PinholeCamera,
    max_range: f64,
    mask: Option<&Image<bool>>,
) -> Result<Vec<Point3d>> {
    if !depth.same_shape(scores) {
        return Err(AnovoxError::shape_mismatch(
            "score map pixels",
            depth.data().len(),
            scores.data().len(),
        ));
    }
    check_canvas(depth, intrinsics)?;
    Ok(transform::depth_to_point_cloud(
        depth,
        intrinsics,
        max_range,
        mask,
        |u, v| scores.get(u, v),
    ))
}

fn check_canvas(depth: &DepthMap, intrinsics: &PinholeCamera) -> Result<()> {
    if depth.width() != intrinsics.width || depth.height() != intrinsics.height {
        return Err(AnovoxError::shape_mismatch(
            "camera canvas pixels",
            intrinsics.width * intrinsics.height,
            depth.data().len(),
        ));
    }
    Ok(())
}

pub struct VoxelPipeline {
    config: config::Config,
    intrinsics: PinholeCamera,
    ground_truth: Voxelizer,
    scores: Voxelizer,
}

impl VoxelPipeline {
    pub fn default_values() -> VoxelPipeline {
        VoxelPipeline::new(config::Config::default_values())
    }

    pub fn new(config: config::Config) -> VoxelPipeline {
        let spec = config.grid_spec();
        VoxelPipeline {
            intrinsics: config.intrinsics(),
            ground_truth: Voxelizer::new(
                spec,
                config.aggregation,
                config.priority_label.map(|l| l as f32),
            ),
            // scores are continuous, no class gets priority
            scores: Voxelizer::new(spec, config.aggregation, None),
            config,
        }
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Merge every group's clouds in the vehicle frame.
    pub fn fuse(&self, groups: &[GroupFrame]) -> Result<Vec<Point3d>> {
        let mut merged = Vec::new();
        for group in groups {
            let mut group_points = Vec::new();
            match (&group.depth, &group.semantic) {
                (Some(depth), Some(semantic)) => group_points.extend(camera_cloud(
                    depth,
                    semantic,
                    &self.intrinsics,
                    self.config.max_depth_range,
                    None,
                )?),
                (None, None) => {}
                _ => warn!("camera frame without matching depth/semantic pair skipped"),
            }
            if let Some(cloud) = &group.semantic_lidar {
                group_points.extend(cloud.to_labeled_points());
            }
            group.mount.compensate(&mut group_points);
            merged.append(&mut group_points);
        }
        Ok(merged)
    }

    pub fn ground_truth_grid(&self, groups: &[GroupFrame]) -> Result<VoxelGrid> {
        let points = self.fuse(groups)?;
        Ok(self.ground_truth.voxelize(&points))
    }

    pub fn score_grid_from_image(
        &self,
        depth: &DepthMap,
        scores: &ScoreImage,
        mask: Option<&Image<bool>>,
    ) -> Result<VoxelGrid> {
        let points = score_cloud(
            depth,
            scores,
            &self.intrinsics,
            self.config.max_depth_range,
            mask,
        )?;
        Ok(self.scores.voxelize(&points))
    }

    pub fn score_grid_from_points(&self, points: &[Point3d]) -> VoxelGrid {
        self.scores.voxelize(points)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub written: usize,
    pub failed: usize,
}

/// One frame of work keyed on a single file: the grid it writes or the request list it reads.
pub struct FrameJob {
    pub name: String,
    pub frame: u32,
    pub path: PathBuf,
}

/// Run every job on a pool of `max_num_threads` workers (0 = one per core).
///
/// A failing job is logged with its frame and does not stop the others.
pub fn run_jobs<F>(jobs: &[FrameJob], max_num_threads: usize, work: F) -> Result<BatchSummary>
where
    F: Fn(&FrameJob) -> Result<()> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_num_threads)
        .build()
        .map_err(|e| AnovoxError::Config(e.to_string()))?;
    let outcomes: Vec<bool> = pool.install(|| {
        jobs.par_iter()
            .map(|job| match work(job) {
                Ok(()) => true,
                Err(e) => {
                    error!("{} frame {}: {}", job.name, job.frame, e);
                    false
                }
            })
            .collect()
    });
    let written = outcomes.iter().filter(|ok| **ok).count();
    Ok(BatchSummary {
        written,
        failed: outcomes.len() - written,
    })
}

fn modality_frames(group_dir: &Path, modality: Modality) -> Result<Vec<(u32, PathBuf)>> {
    let dir = group_dir.join(modality.dir_name());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    io::list_frames(&dir, modality.file_ending())
}

const FUSED_MODALITIES: [Modality; 3] = [
    Modality::Depth,
    Modality::SemanticImage,
    Modality::SemanticLidarPoints,
];

/// Load what every group recorded for `frame`.
pub fn load_group_frames(
    scenario_dir: &Path,
    groups: &[SensorGroup],
    frame: u32,
    far_plane: f64,
) -> Result<Vec<GroupFrame>> {
    groups
        .iter()
        .map(|group| {
            let mut group_frame = GroupFrame::new(group.mount);
            for modality in FUSED_MODALITIES {
                let path = group
                    .dir(scenario_dir)
                    .join(modality.dir_name())
                    .join(format!(
                        "{}_{}.{}",
                        modality.dir_name(),
                        frame,
                        modality.file_ending()
                    ));
                if path.exists() {
                    group_frame.insert(io::read_sensor_frame(&path, modality)?, far_plane);
                }
            }
            Ok(group_frame)
        })
        .collect()
}

/// Fuse every frame of a scenario into `VOXEL_GRID/VOXEL_GRID_<frame>.pcd`.
pub fn voxelize_scenario(pipeline: &VoxelPipeline, scenario_dir: &Path) -> Result<BatchSummary> {
    let name = io::scenario_id(scenario_dir);
    let groups = read_sensor_groups(scenario_dir)?;
    let mut frames = BTreeSet::new();
    for group in &groups {
        for modality in FUSED_MODALITIES {
            frames.extend(
                modality_frames(&group.dir(scenario_dir), modality)?
                    .into_iter()
                    .map(|(n, _)| n),
            );
        }
    }
    info!(
        "{}: {} frames from {} sensor groups",
        name,
        frames.len(),
        groups.len()
    );

    let output_dir = scenario_dir.join(VOXEL_GRID_DIR);
    std::fs::create_dir_all(&output_dir)?;
    let jobs: Vec<FrameJob> = frames
        .into_iter()
        .map(|frame| FrameJob {
            name: name.clone(),
            frame,
            path: output_dir.join(format!("{}_{}.pcd", VOXEL_GRID_DIR, frame)),
        })
        .collect();

    let far_plane = pipeline.config().depth_far_plane;
    run_jobs(&jobs, pipeline.config().max_num_threads, |job| {
        let group_frames = load_group_frames(scenario_dir, &groups, job.frame, far_plane)?;
        let grid = pipeline.ground_truth_grid(&group_frames)?;
        debug!("{} frame {}: {} voxels", job.name, job.frame, grid.len());
        io::write_voxel_grid(&job.path, &grid)
    })
}

/// Per-frame relabel request lists: `RELABEL/RELABEL_<frame>.json`.
pub const RELABEL_DIR: &str = "RELABEL";
/// Per-frame camera and lidar poses: `EXTRINSICS/EXTRINSICS_<frame>.json`.
pub const EXTRINSICS_DIR: &str = "EXTRINSICS";

fn frame_path(dir: &Path, name: &str, frame: u32, ending: &str) -> PathBuf {
    dir.join(name).join(format!("{}_{}.{}", name, frame, ending))
}

fn modality_path(dir: &Path, modality: Modality, frame: u32) -> PathBuf {
    frame_path(dir, modality.dir_name(), frame, modality.file_ending())
}

/// Relabel every frame that has a request list.
///
/// Relabeled `SEMANTIC_IMG/` and `SEMANTIC_PCD/` files go under `output_dir`,
/// which may be the scenario itself.
pub fn relabel_scenario(
    engine: &RelabelingEngine,
    scenario_dir: &Path,
    output_dir: &Path,
    max_num_threads: usize,
) -> Result<BatchSummary> {
    let name = io::scenario_id(scenario_dir);
    let request_dir = scenario_dir.join(RELABEL_DIR);
    if !request_dir.is_dir() {
        return Err(AnovoxError::Dataset(format!(
            "{}: no {} directory",
            name, RELABEL_DIR
        )));
    }
    let jobs: Vec<FrameJob> = io::list_frames(&request_dir, "json")?
        .into_iter()
        .map(|(frame, path)| FrameJob {
            name: name.clone(),
            frame,
            path,
        })
        .collect();
    info!("{}: {} frames with relabel requests", name, jobs.len());
    for modality in [Modality::SemanticImage, Modality::SemanticLidarPoints] {
        std::fs::create_dir_all(output_dir.join(modality.dir_name()))?;
    }

    run_jobs(&jobs, max_num_threads, |job| {
        let requests: Vec<RelabelRequest> = io::read_json(&job.path)?;
        let (camera_extrinsic, lidar_extrinsic) = io::read_extrinsics(&frame_path(
            scenario_dir,
            EXTRINSICS_DIR,
            job.frame,
            "json",
        ))?;
        let mut frame = GroundTruthFrame {
            semantic_image: io::read_semantic_png(&modality_path(
                scenario_dir,
                Modality::SemanticImage,
                job.frame,
            ))?,
            instance_image: io::read_rgb_png(&modality_path(
                scenario_dir,
                Modality::InstanceImage,
                job.frame,
            ))?,
            semantic_lidar: io::read_semantic_lidar(&modality_path(
                scenario_dir,
                Modality::SemanticLidarPoints,
                job.frame,
            ))?,
            camera_extrinsic,
            lidar_extrinsic,
        };
        let summary = engine.apply(&mut frame, &requests)?;
        debug!(
            "{} frame {}: {} pixels, {} points relabeled",
            job.name, job.frame, summary.pixels_relabeled, summary.points_relabeled
        );
        io::write_semantic_png(
            &modality_path(output_dir, Modality::SemanticImage, job.frame),
            &frame.semantic_image,
        )?;
        io::write_semantic_lidar(
            &modality_path(output_dir, Modality::SemanticLidarPoints, job.frame),
            &frame.semantic_lidar,
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    /// 16-bit score maps paired with the scenario's depth images.
    Camera,
    /// `x y z value` score clouds.
    Lidar,
}

/// Voxelize a directory of per-frame scores into `VOXEL_GRID_<frame>.pcd` files.
pub fn voxelize_scores(
    pipeline: &VoxelPipeline,
    source: ScoreSource,
    scores_dir: &Path,
    scenario_dir: &Path,
    output_dir: &Path,
    mask: Option<&Image<bool>>,
) -> Result<BatchSummary> {
    let name = io::scenario_id(scenario_dir);
    let extension = match source {
        ScoreSource::Camera => "png",
        ScoreSource::Lidar => "pcd",
    };
    let score_files = io::list_frames(scores_dir, extension)?;
    let depth_files: std::collections::BTreeMap<u32, PathBuf> =
        modality_frames(scenario_dir, Modality::Depth)?
            .into_iter()
            .collect();
    std::fs::create_dir_all(output_dir)?;

    let jobs: Vec<FrameJob> = score_files
        .iter()
        .map(|(frame, _)| FrameJob {
            name: name.clone(),
            frame: *frame,
            path: output_dir.join(format!("{}_{}.pcd", VOXEL_GRID_DIR, frame)),
        })
        .collect();
    let inputs: std::collections::BTreeMap<u32, PathBuf> = score_files.into_iter().collect();
    let far_plane = pipeline.config().depth_far_plane;

    run_jobs(&jobs, pipeline.config().max_num_threads, |job| {
        let score_path = &inputs[&job.frame];
        let grid = match source {
            ScoreSource::Camera => {
                let depth_path = depth_files.get(&job.frame).ok_or_else(|| {
                    AnovoxError::Dataset(format!("no depth image for frame {}", job.frame))
                })?;
                let depth = io::read_depth_png(depth_path, far_plane)?;
                let scores = io::read_score_png(score_path)?;
                pipeline.score_grid_from_image(&depth, &scores, mask)?
            }
            ScoreSource::Lidar => {
                pipeline.score_grid_from_points(&io::read_pcd_to_points(score_path)?)
            }
        };
        io::write_voxel_grid(&job.path, &grid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;

    fn small_config() -> config::Config {
        let mut config = config::Config::default_values();
        config.image_width = 4;
        config.image_height = 4;
        config.voxel_resolution = 1.0;
        config.grid_size = [20, 20, 20];
        config.max_num_threads = 2;
        config
    }

    #[test]
    fn camera_cloud_rejects_mismatched_images() {
        let cam = PinholeCamera::from_fov(4, 4, 90.0);
        let depth = DepthMap::filled(4, 4, 5.0);
        let semantic = LabelImage::filled(4, 3, 1);
        assert!(matches!(
            camera_cloud(&depth, &semantic, &cam, 100.0, None),
            Err(AnovoxError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn fuse_merges_every_group() {
        let pipeline = VoxelPipeline::new(small_config());
        let cloud = |x: f64, label: u32| {
            SemanticLidarCloud::new(vec![nalgebra::Point3::new(x, 0.0, 0.0)], vec![label], vec![1])
                .unwrap()
        };
        let mut front = GroupFrame::new(SensorGroup::root().mount);
        front.semantic_lidar = Some(cloud(2.0, 14));
        let mut rear = GroupFrame::new(MountPose {
            location: [1.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0],
        });
        rear.semantic_lidar = Some(cloud(4.0, labels::AIRPLANE_ANOMALY_ID));

        let points = pipeline.fuse(&[front, rear]).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].x, 3.0);

        let grid = pipeline.ground_truth_grid(&[GroupFrame::new(SensorGroup::root().mount)]);
        assert!(grid.unwrap().is_empty());
    }

    #[test]
    fn camera_and_lidar_land_in_one_grid() {
        let pipeline = VoxelPipeline::new(small_config());
        let mut group = GroupFrame::new(SensorGroup::root().mount);
        group.depth = Some(DepthMap::filled(4, 4, 3.0));
        group.semantic = Some(LabelImage::filled(4, 4, 1));
        group.semantic_lidar = Some(
            SemanticLidarCloud::new(vec![nalgebra::Point3::new(-5.0, 0.0, 0.0)], vec![33], vec![9])
                .unwrap(),
        );
        let grid = pipeline.ground_truth_grid(&[group]).unwrap();
        assert!(grid.contains_value(1.0));
        assert!(grid.contains_value(33.0));
    }

    #[test]
    fn failing_jobs_are_counted_not_fatal() {
        let jobs: Vec<FrameJob> = (0..5)
            .map(|frame| FrameJob {
                name: "Scenario_1".to_string(),
                frame,
                path: PathBuf::new(),
            })
            .collect();
        let summary = run_jobs(&jobs, 2, |job| {
            if job.frame == 3 {
                Err(AnovoxError::Dataset("corrupt".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                written: 4,
                failed: 1
            }
        );
    }
}
