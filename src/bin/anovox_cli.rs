use anovox::config::Config;
use anovox::error::Result;
use anovox::evaluation::dataset::{self, DataType, DetectionSensor, EvaluationSettings};
use anovox::io;
use anovox::labels;
use anovox::pipeline::{self, ScoreSource, VoxelPipeline};
use anovox::relabel::{GroundTruthFrame, RelabelRequest, RelabelingEngine};
use anovox::voxel_grid::{GridSpec, VoxelGrid};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub fn get_colors_for_voxels(grid: &VoxelGrid, min_val: f32, max_val: f32) -> Vec<(u8, u8, u8)> {
    let g = colorous::TURBO;
    grid.voxels()
        .iter()
        .map(|v| {
            let t = ((v.value - min_val) / (max_val - min_val)).clamp(0.0, 1.0);
            let c = g.eval_continuous(t.into());
            (c.r, c.g, c.b)
        })
        .collect()
}

fn write_preview(path: &Path, grid: &VoxelGrid, spec: &GridSpec) -> Result<()> {
    let colors = get_colors_for_voxels(grid, 0.0, 1.0);
    let points: Vec<io::ColoredPoint> = grid
        .voxels()
        .iter()
        .zip(colors)
        .map(|(v, (r, g, b))| {
            let c = spec.voxel_center(&v.key);
            io::ColoredPoint {
                x: c.x as f32,
                y: c.y as f32,
                z: c.z as f32,
                r,
                g,
                b,
            }
        })
        .collect();
    io::write_preview_pcd(path, &points)
}

#[derive(Clone, Copy, ValueEnum)]
enum Sensor {
    Camera,
    Lidar,
}

#[derive(Clone, Copy, ValueEnum)]
enum Datatype {
    Voxel,
    Image,
    Pointcloud,
}

#[derive(Subcommand)]
enum Command {
    /// Fuse ground truth of every scenario into VOXEL_GRID/
    Voxelize {
        /// dataset root or a single scenario directory
        path: PathBuf,
        /// treat `path` as one scenario
        #[arg(long)]
        single: bool,
    },
    /// Voxelize per-frame anomaly scores of one scenario
    VoxelizeScores {
        /// score maps (png) or score clouds (pcd), named *_<frame>
        scores: PathBuf,
        /// scenario holding DEPTH_IMG/
        scenario: PathBuf,
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Sensor::Camera)]
        sensor: Sensor,
        /// region-of-interest png
        #[arg(long)]
        mask: Option<PathBuf>,
        /// also write a TURBO-coloured pcd next to each grid
        #[arg(long)]
        preview: bool,
    },
    /// Apply a relabel request list to one frame
    Relabel {
        semantic: PathBuf,
        instance: PathBuf,
        semantic_lidar: PathBuf,
        extrinsics: PathBuf,
        requests: PathBuf,
        output: PathBuf,
    },
    /// Relabel every frame of a scenario that has RELABEL/RELABEL_<n>.json
    RelabelScenario {
        scenario: PathBuf,
        /// defaults to rewriting the scenario in place
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Score predictions against ground truth
    Evaluate {
        dataset: PathBuf,
        predictions: PathBuf,
        #[arg(long, default_value = "metrics.json")]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = Sensor::Camera)]
        sensor: Sensor,
        /// grids were intersected upstream and must agree row by row
        #[arg(long)]
        prealigned: bool,
        /// score voxel grids, camera pixels or lidar points
        #[arg(long, value_enum, default_value_t = Datatype::Voxel)]
        datatype: Datatype,
    },
    /// Write the default configuration
    WriteConfig {
        #[arg(default_value = "config.json")]
        path: String,
    },
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct AnovoxCli {
    /// json config, defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn relabel_frame(
    config: &Config,
    semantic: &Path,
    instance: &Path,
    semantic_lidar: &Path,
    extrinsics: &Path,
    requests: &Path,
    output: &Path,
) -> Result<()> {
    let (camera_extrinsic, lidar_extrinsic) = io::read_extrinsics(extrinsics)?;
    let mut frame = GroundTruthFrame {
        semantic_image: io::read_semantic_png(semantic)?,
        instance_image: io::read_rgb_png(instance)?,
        semantic_lidar: io::read_semantic_lidar(semantic_lidar)?,
        camera_extrinsic,
        lidar_extrinsic,
    };
    let requests: Vec<RelabelRequest> = io::read_json(requests)?;
    let summary = RelabelingEngine::new(config.intrinsics()).apply(&mut frame, &requests)?;
    info!(
        "{} pixels and {} points relabeled, not visible: {:?}",
        summary.pixels_relabeled, summary.points_relabeled, summary.not_visible
    );
    std::fs::create_dir_all(output)?;
    let name = |p: &Path| p.file_name().map(PathBuf::from).unwrap_or_default();
    io::write_semantic_png(&output.join(name(semantic)), &frame.semantic_image)?;
    io::write_rgb_png(
        &output.join("colorized.png"),
        &labels::colorize(&frame.semantic_image),
    )?;
    io::write_semantic_lidar(&output.join(name(semantic_lidar)), &frame.semantic_lidar)
}

fn run(cli: AnovoxCli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => io::json_to_config(path)?,
        None => Config::default_values(),
    };
    match cli.command {
        Command::Voxelize { path, single } => {
            let pipeline = VoxelPipeline::new(config);
            let scenarios = if single {
                vec![path]
            } else {
                io::list_scenarios(&path)?
            };
            for scenario in scenarios {
                let summary = pipeline::voxelize_scenario(&pipeline, &scenario)?;
                info!(
                    "{:?}: {} grids written, {} failed",
                    scenario, summary.written, summary.failed
                );
            }
        }
        Command::VoxelizeScores {
            scores,
            scenario,
            output,
            sensor,
            mask,
            preview,
        } => {
            let pipeline = VoxelPipeline::new(config);
            let mask = mask.map(|m| io::read_mask_png(&m)).transpose()?;
            let source = match sensor {
                Sensor::Camera => ScoreSource::Camera,
                Sensor::Lidar => ScoreSource::Lidar,
            };
            let summary = pipeline::voxelize_scores(
                &pipeline,
                source,
                &scores,
                &scenario,
                &output,
                mask.as_ref(),
            )?;
            info!("{} grids written, {} failed", summary.written, summary.failed);
            if preview {
                let spec = pipeline.config().grid_spec();
                let preview_dir = output.join("PREVIEW");
                std::fs::create_dir_all(&preview_dir)?;
                for (frame, path) in io::list_frames(&output, "pcd")? {
                    let grid = io::read_voxel_grid(&path)?;
                    let preview_path = preview_dir.join(format!("PREVIEW_{}.pcd", frame));
                    write_preview(&preview_path, &grid, &spec)?;
                }
            }
        }
        Command::Relabel {
            semantic,
            instance,
            semantic_lidar,
            extrinsics,
            requests,
            output,
        } => relabel_frame(
            &config,
            &semantic,
            &instance,
            &semantic_lidar,
            &extrinsics,
            &requests,
            &output,
        )?,
        Command::RelabelScenario { scenario, output } => {
            let engine = RelabelingEngine::new(config.intrinsics());
            let output = output.unwrap_or_else(|| scenario.clone());
            let summary =
                pipeline::relabel_scenario(&engine, &scenario, &output, config.max_num_threads)?;
            info!(
                "{:?}: {} frames relabeled, {} failed",
                scenario, summary.written, summary.failed
            );
        }
        Command::Evaluate {
            dataset: dataset_root,
            predictions,
            output,
            sensor,
            prealigned,
            datatype,
        } => {
            let sensor = match sensor {
                Sensor::Camera => DetectionSensor::Camera,
                Sensor::Lidar => DetectionSensor::Lidar,
            };
            let datatype = match datatype {
                Datatype::Voxel => DataType::VoxelGrid,
                Datatype::Image => DataType::Image,
                Datatype::Pointcloud => DataType::PointCloud,
            };
            let settings = EvaluationSettings::from_config(&config, sensor, prealigned)
                .with_datatype(datatype);
            let report = dataset::evaluate_dataset(
                &dataset_root,
                &predictions,
                &settings,
                config.max_num_threads,
            )?;
            info!(
                "auroc {:?}, aupr {:.4}, fpr95 {:?}",
                report.anomalies_only.auroc, report.anomalies_only.aupr, report.anomalies_only.fpr95
            );
            io::write_json(&output, &report)?;
        }
        Command::WriteConfig { path } => io::write_config_json(&path, &config)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = AnovoxCli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
