use crate::error::{AnovoxError, Result};
use crate::transform::PinholeCamera;
use crate::voxel_grid::{Aggregation, GridSpec};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    // camera params
    pub image_width: usize,
    pub image_height: usize,
    pub camera_fov: f64,
    pub depth_far_plane: f64,
    pub max_depth_range: f64,

    // voxel params
    pub voxel_resolution: f64,
    pub grid_size: [u32; 3],
    pub offset: [f64; 3],
    pub aggregation: Aggregation,
    pub priority_label: Option<u32>,

    // evaluation params
    pub anomaly_class_id: u32,
    pub front_only: bool,
    pub match_radius: i32,

    // 0 = one per core
    pub max_num_threads: usize,
}

impl Config {
    pub fn default_values() -> Config {
        Config {
            image_width: 768,
            image_height: 512,
            camera_fov: 90.0,
            depth_far_plane: 1000.0,
            max_depth_range: 100.0,

            voxel_resolution: 0.5,
            grid_size: [1000, 1000, 64],
            offset: [0.0, 0.0, 0.0],
            aggregation: Aggregation::Centerpoint,
            // road line
            priority_label: Some(24),

            anomaly_class_id: 33,
            front_only: false,
            match_radius: 0,

            max_num_threads: 0,
        }
    }

    pub fn grid_spec(&self) -> GridSpec {
        GridSpec {
            resolution: self.voxel_resolution,
            grid_size: self.grid_size,
            offset: self.offset,
        }
    }

    pub fn intrinsics(&self) -> PinholeCamera {
        PinholeCamera::from_fov(self.image_width, self.image_height, self.camera_fov)
    }

    pub fn validate(&self) -> Result<()> {
        if self.voxel_resolution.is_nan() || self.voxel_resolution <= 0.0 {
            return Err(AnovoxError::Config(format!(
                "voxel_resolution must be positive, got {}",
                self.voxel_resolution
            )));
        }
        if self.grid_size.iter().any(|d| *d == 0) {
            return Err(AnovoxError::Config(format!(
                "grid_size must be non-zero, got {:?}",
                self.grid_size
            )));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(AnovoxError::Config("empty camera canvas".to_string()));
        }
        if self.camera_fov.is_nan() || self.camera_fov <= 0.0 || self.camera_fov >= 180.0 {
            return Err(AnovoxError::Config(format!(
                "camera_fov out of range: {}",
                self.camera_fov
            )));
        }
        if self.match_radius < 0 {
            return Err(AnovoxError::Config(format!(
                "match_radius must not be negative, got {}",
                self.match_radius
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default_values();
        assert!(config.validate().is_ok());
        approx::assert_relative_eq!(config.intrinsics().focal, 384.0, epsilon = 1e-9);
        assert_eq!(config.grid_spec(), GridSpec::default_values());
    }

    #[test]
    fn rejects_bad_resolution() {
        let mut config = Config::default_values();
        config.voxel_resolution = 0.0;
        assert!(matches!(config.validate(), Err(AnovoxError::Config(_))));
    }
}
