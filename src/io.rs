//! Dataset files: JSON documents, PCD clouds and grids, PNG sensor images.
use crate::config;
use crate::error::{AnovoxError, Result};
use crate::image::{DepthMap, Image, LabelImage, Modality, RgbImage, ScoreImage, SensorFrame};
use crate::point3d::{Point3d, SemanticLidarCloud, SemanticLidarPoint};
use crate::transform::{self, Extrinsic};
use crate::voxel_grid::{Voxel, VoxelGrid};
use crate::voxel_util::VoxelKey;
use log::warn;
use pcd_rs::{PcdDeserialize, PcdSerialize};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Scenario folder holding simulator configuration, not sensor data.
const CONFIGURATION_DIR: &str = "Scenario_Configuration_Files";

pub fn json_to_config(path: &str) -> Result<config::Config> {
    let config: config::Config = read_json(Path::new(path))?;
    config.validate()?;
    Ok(config)
}

pub fn write_config_json(path: &str, config: &config::Config) -> Result<()> {
    write_json(Path::new(path), config)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let j = serde_json::to_string_pretty(value)?;
    let mut file = fs::File::create(path)?;
    file.write_all(j.as_bytes())?;
    Ok(())
}

fn pcd_error(e: impl std::fmt::Display) -> AnovoxError {
    AnovoxError::Pcd(e.to_string())
}

fn read_pcd<T: PcdDeserialize>(path: &Path) -> Result<Vec<T>> {
    let reader = pcd_rs::Reader::open(path).map_err(pcd_error)?;
    let rows: std::result::Result<Vec<T>, _> = reader.collect();
    rows.map_err(pcd_error)
}

fn write_pcd<T: PcdSerialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = pcd_rs::WriterInit {
        width: rows.len() as u64,
        height: 1,
        viewpoint: Default::default(),
        data_kind: pcd_rs::DataKind::Ascii,
        schema: None,
    }
    .create(path)
    .map_err(pcd_error)?;
    for row in rows {
        writer.push(row).map_err(pcd_error)?;
    }
    writer.finish().map_err(pcd_error)?;
    Ok(())
}

pub fn read_pcd_to_points(path: &Path) -> Result<Vec<Point3d>> {
    read_pcd(path)
}

pub fn write_points_pcd(path: &Path, points: &[Point3d]) -> Result<()> {
    write_pcd(path, points)
}

pub fn read_semantic_lidar(path: &Path) -> Result<SemanticLidarCloud> {
    let rows: Vec<SemanticLidarPoint> = read_pcd(path)?;
    Ok(SemanticLidarCloud::from_rows(&rows))
}

pub fn write_semantic_lidar(path: &Path, cloud: &SemanticLidarCloud) -> Result<()> {
    write_pcd(path, &cloud.to_rows())
}

/// On-disk voxel row: cell indices and the aggregated value.
#[derive(PcdDeserialize, PcdSerialize, Debug, Clone, Copy, PartialEq)]
pub struct VoxelRecord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub value: f32,
}

pub fn read_voxel_grid(path: &Path) -> Result<VoxelGrid> {
    let rows: Vec<VoxelRecord> = read_pcd(path)?;
    Ok(VoxelGrid::from_voxels(
        rows.iter()
            .map(|r| Voxel {
                key: VoxelKey::new(r.x as i32, r.y as i32, r.z as i32),
                value: r.value,
            })
            .collect(),
    ))
}

pub fn write_voxel_grid(path: &Path, grid: &VoxelGrid) -> Result<()> {
    let rows: Vec<VoxelRecord> = grid
        .voxels()
        .iter()
        .map(|v| VoxelRecord {
            x: v.key.x as u32,
            y: v.key.y as u32,
            z: v.key.z as u32,
            value: v.value,
        })
        .collect();
    write_pcd(path, &rows)
}

/// Colourised preview point, readable by common PCD viewers.
#[derive(PcdSerialize, Debug, Clone, Copy, PartialEq)]
pub struct ColoredPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub fn write_preview_pcd(path: &Path, points: &[ColoredPoint]) -> Result<()> {
    write_pcd(path, points)
}

pub fn read_rgb_png(path: &Path) -> Result<RgbImage> {
    let img = ::image::open(path)?.to_rgb8();
    let (width, height) = img.dimensions();
    RgbImage::new(
        width as usize,
        height as usize,
        img.pixels().map(|p| p.0).collect(),
    )
}

/// Semantic ids live in the red channel.
pub fn read_semantic_png(path: &Path) -> Result<LabelImage> {
    Ok(read_rgb_png(path)?.map(|[r, _, _]| r as u32))
}

pub fn read_depth_png(path: &Path, far_plane: f64) -> Result<DepthMap> {
    Ok(transform::decode_depth_image(&read_rgb_png(path)?, far_plane))
}

/// 16-bit grayscale, normalised to `[0, 1]`.
pub fn read_score_png(path: &Path) -> Result<ScoreImage> {
    let img = ::image::open(path)?.to_luma16();
    let (width, height) = img.dimensions();
    ScoreImage::new(
        width as usize,
        height as usize,
        img.pixels().map(|p| p.0[0] as f32 / 65535.0).collect(),
    )
}

/// Inverse of [`read_score_png`]; scores are clamped to `[0, 1]`.
pub fn write_score_png(path: &Path, scores: &ScoreImage) -> Result<()> {
    let raw: Vec<u16> = scores
        .data()
        .iter()
        .map(|s| (s.clamp(0.0, 1.0) * 65535.0).round() as u16)
        .collect();
    let buffer = ::image::ImageBuffer::<::image::Luma<u16>, Vec<u16>>::from_raw(
        scores.width() as u32,
        scores.height() as u32,
        raw,
    )
    .ok_or_else(|| AnovoxError::shape_mismatch("png samples", scores.data().len(), 0))?;
    buffer.save(path)?;
    Ok(())
}

/// Region-of-interest mask; any non-zero pixel is kept.
pub fn read_mask_png(path: &Path) -> Result<Image<bool>> {
    let img = ::image::open(path)?.to_luma8();
    let (width, height) = img.dimensions();
    Image::new(
        width as usize,
        height as usize,
        img.pixels().map(|p| p.0[0] != 0).collect(),
    )
}

pub fn write_rgb_png(path: &Path, rgb: &RgbImage) -> Result<()> {
    let raw: Vec<u8> = rgb.data().iter().flatten().copied().collect();
    let buffer =
        ::image::RgbImage::from_raw(rgb.width() as u32, rgb.height() as u32, raw).ok_or_else(
            || AnovoxError::shape_mismatch("png bytes", rgb.width() * rgb.height() * 3, 0),
        )?;
    buffer.save(path)?;
    Ok(())
}

/// Writes ids into the red channel; ids above 255 cannot be represented.
pub fn write_semantic_png(path: &Path, semantic: &LabelImage) -> Result<()> {
    if let Some(id) = semantic.data().iter().find(|id| **id > u8::MAX as u32) {
        return Err(AnovoxError::Dataset(format!(
            "class id {} does not fit a semantic png",
            id
        )));
    }
    write_rgb_png(path, &semantic.map(|id| [id as u8, 0, 0]))
}

pub fn read_sensor_frame(path: &Path, modality: Modality) -> Result<SensorFrame> {
    Ok(match modality {
        Modality::Rgb => SensorFrame::Rgb(read_rgb_png(path)?),
        Modality::Depth => SensorFrame::Depth(read_rgb_png(path)?),
        Modality::SemanticImage => SensorFrame::SemanticImage(read_semantic_png(path)?),
        Modality::InstanceImage => SensorFrame::InstanceImage(read_rgb_png(path)?),
        Modality::LidarPoints => SensorFrame::LidarPoints(read_pcd_to_points(path)?),
        Modality::SemanticLidarPoints => {
            SensorFrame::SemanticLidarPoints(read_semantic_lidar(path)?)
        }
    })
}

/// Camera and lidar poses of one frame, row-major 4x4.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FrameExtrinsics {
    pub camera: [[f64; 4]; 4],
    pub lidar: [[f64; 4]; 4],
}

pub fn read_extrinsics(path: &Path) -> Result<(Extrinsic, Extrinsic)> {
    let extrinsics: FrameExtrinsics = read_json(path)?;
    Ok((
        Extrinsic::from_rows(&extrinsics.camera)?,
        Extrinsic::from_rows(&extrinsics.lidar)?,
    ))
}

/// Trailing `_<n>` of the file stem, e.g. `SEMANTIC_IMG_42.png` -> 42.
pub fn frame_number(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.rsplit('_').next()?.parse().ok()
}

/// Files with the given extension in `dir`, keyed and sorted by frame number.
pub fn list_frames(dir: &Path, extension: &str) -> Result<Vec<(u32, PathBuf)>> {
    let pattern = dir.join(format!("*.{}", extension));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| AnovoxError::Dataset(format!("non utf-8 path {:?}", dir)))?;
    let mut frames = Vec::new();
    for entry in glob::glob(pattern).map_err(|e| AnovoxError::Dataset(e.to_string()))? {
        let path = entry.map_err(|e| AnovoxError::Io(e.into_error()))?;
        match frame_number(&path) {
            Some(n) => frames.push((n, path)),
            None => warn!("skipping {:?}: no frame number", path),
        }
    }
    frames.sort_by_key(|(n, _)| *n);
    Ok(frames)
}

/// Scenario directories of a dataset root, sorted by name.
pub fn list_scenarios(root: &Path) -> Result<Vec<PathBuf>> {
    let mut scenarios = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() && path.file_name().map_or(false, |n| n != CONFIGURATION_DIR) {
            scenarios.push(path);
        }
    }
    scenarios.sort();
    Ok(scenarios)
}

pub fn scenario_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("anovox_io_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn frame_numbers_come_from_the_stem_suffix() {
        assert_eq!(frame_number(Path::new("a/SEMANTIC_IMG_42.png")), Some(42));
        assert_eq!(frame_number(Path::new("VOXEL_GRID_7.pcd")), Some(7));
        assert_eq!(frame_number(Path::new("readme.txt")), None);
    }

    #[test]
    fn score_png_clamps_out_of_range_scores() {
        let dir = temp_dir("score");
        let path = dir.join("scores_0.png");
        let scores = ScoreImage::new(3, 1, vec![-0.2, 0.5, 1.5]).unwrap();
        write_score_png(&path, &scores).unwrap();
        let back = read_score_png(&path).unwrap();
        assert_eq!(back.get(0, 0), 0.0);
        assert!((back.get(1, 0) - 0.5).abs() < 1e-4);
        assert_eq!(back.get(2, 0), 1.0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn voxel_grid_survives_disk() {
        let dir = temp_dir("grid");
        let path = dir.join("VOXEL_GRID_3.pcd");
        let grid = VoxelGrid::from_voxels(vec![
            Voxel {
                key: VoxelKey::new(1, 2, 3),
                value: 33.0,
            },
            Voxel {
                key: VoxelKey::new(999, 0, 63),
                value: 0.25,
            },
        ]);
        write_voxel_grid(&path, &grid).unwrap();
        assert_eq!(read_voxel_grid(&path).unwrap(), grid);
        assert_eq!(list_frames(&dir, "pcd").unwrap()[0].0, 3);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn semantic_png_keeps_ids_in_red_channel() {
        let dir = temp_dir("semantic");
        let path = dir.join("SEMANTIC_IMG_1.png");
        let semantic = LabelImage::new(3, 1, vec![0, 24, 33]).unwrap();
        write_semantic_png(&path, &semantic).unwrap();
        assert_eq!(read_semantic_png(&path).unwrap(), semantic);

        let too_large = LabelImage::new(1, 1, vec![300]).unwrap();
        assert!(write_semantic_png(&dir.join("bad.png"), &too_large).is_err());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn config_round_trip() {
        let dir = temp_dir("config");
        let path = dir.join("config.json");
        let path = path.to_str().unwrap();
        let config = config::Config::default_values();
        write_config_json(path, &config).unwrap();
        assert_eq!(json_to_config(path).unwrap(), config);
        fs::remove_dir_all(dir).unwrap();
    }
}
