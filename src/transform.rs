//! Camera and lidar geometry.
//!
//! Frames involved:
//! - simulator sensor frame: x forward, y right, z up (what extrinsics map from/to world);
//! - projection frame: x right, y down, z forward (pinhole convention);
//! - fusion frame: x forward, y left, z up (lidar convention, also used for depth clouds).
//!
//! The sensor -> projection permutation `(x, y, z) -> (y, -z, x)` is fixed and
//! applied by [`camera_axes`]; forgetting it mirrors and transposes every projection.
//! Semantic lidar clouds are stored in the fusion frame; [`fusion_to_sensor`] flips
//! them back before any extrinsic is applied.

use crate::error::{AnovoxError, Result};
use crate::image::{DepthMap, Image, RgbImage};
use crate::point3d::Point3d;
use nalgebra as na;
use rayon::prelude::*;

/// 24-bit fixed-point depth normaliser, `256^3 - 1`.
const DEPTH_NORMALIZER: f64 = 16_777_215.0;

/// Rigid sensor pose with its cached inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsic {
    matrix: na::Matrix4<f64>,
    inverse: na::Matrix4<f64>,
}

impl Extrinsic {
    pub fn from_matrix(matrix: na::Matrix4<f64>) -> Result<Extrinsic> {
        let inverse = matrix
            .try_inverse()
            .ok_or_else(|| AnovoxError::Config(format!("singular extrinsic {}", matrix)))?;
        Ok(Extrinsic { matrix, inverse })
    }

    pub fn from_rows(rows: &[[f64; 4]; 4]) -> Result<Extrinsic> {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Extrinsic::from_matrix(na::Matrix4::from_row_slice(&flat))
    }

    pub fn from_isometry(pose: &na::Isometry3<f64>) -> Extrinsic {
        Extrinsic {
            matrix: pose.to_homogeneous(),
            inverse: pose.inverse().to_homogeneous(),
        }
    }

    pub fn identity() -> Extrinsic {
        Extrinsic {
            matrix: na::Matrix4::identity(),
            inverse: na::Matrix4::identity(),
        }
    }

    pub fn matrix(&self) -> &na::Matrix4<f64> {
        &self.matrix
    }

    pub fn inverse(&self) -> &na::Matrix4<f64> {
        &self.inverse
    }
}

pub fn to_sensor_frame(
    point_world: &na::Point3<f64>,
    extrinsic_inverse: &na::Matrix4<f64>,
) -> na::Point3<f64> {
    na::Point3::from_homogeneous(extrinsic_inverse * point_world.to_homogeneous())
        .unwrap_or(*point_world)
}

pub fn to_world_frame(
    point_sensor: &na::Point3<f64>,
    extrinsic: &na::Matrix4<f64>,
) -> na::Point3<f64> {
    na::Point3::from_homogeneous(extrinsic * point_sensor.to_homogeneous())
        .unwrap_or(*point_sensor)
}

/// Sensor frame (forward, right, up) to projection frame (right, down, forward).
#[inline]
pub fn camera_axes(point_sensor: &na::Point3<f64>) -> na::Vector3<f64> {
    na::Vector3::new(point_sensor.y, -point_sensor.z, point_sensor.x)
}

/// Fusion frame (y left) to simulator sensor frame (y right); the flip is its own inverse.
#[inline]
pub fn fusion_to_sensor(point: &na::Point3<f64>) -> na::Point3<f64> {
    na::Point3::new(point.x, -point.y, point.z)
}

pub fn focal_from_fov(image_width: usize, fov_degrees: f64) -> f64 {
    image_width as f64 / (2.0 * (fov_degrees.to_radians() / 2.0).tan())
}

/// Pinhole projection of a point already in the projection frame: `(u, v, depth)`.
pub fn project(
    point_camera: &na::Vector3<f64>,
    focal: f64,
    principal_point: (f64, f64),
) -> (f64, f64, f64) {
    let depth = point_camera.z;
    (
        focal * point_camera.x / depth + principal_point.0,
        focal * point_camera.y / depth + principal_point.1,
        depth,
    )
}

/// Zero-skew, square-pixel camera with the principal point at the image center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub width: usize,
    pub height: usize,
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PinholeCamera {
    pub fn from_fov(width: usize, height: usize, fov_degrees: f64) -> PinholeCamera {
        PinholeCamera {
            width,
            height,
            focal: focal_from_fov(width, fov_degrees),
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    pub fn project(&self, point_camera: &na::Vector3<f64>) -> (f64, f64, f64) {
        project(point_camera, self.focal, (self.cx, self.cy))
    }

    /// Strict canvas test; points on the border or behind the camera are rejected, never clamped.
    pub fn is_visible(&self, u: f64, v: f64, depth: f64) -> bool {
        u > 0.0 && u < self.width as f64 && v > 0.0 && v < self.height as f64 && depth > 0.0
    }

    /// Pixel `(u, v)` at metric depth `z` back to the projection frame.
    pub fn back_project(&self, u: f64, v: f64, depth: f64) -> na::Point3<f64> {
        na::Point3::new(
            (u - self.cx) * depth / self.focal,
            (v - self.cy) * depth / self.focal,
            depth,
        )
    }
}

pub fn decode_depth(rgb: [u8; 3], far_plane: f64) -> f64 {
    let [r, g, b] = rgb;
    far_plane * (r as f64 + g as f64 * 256.0 + b as f64 * 65_536.0) / DEPTH_NORMALIZER
}

pub fn decode_depth_image(encoded: &RgbImage, far_plane: f64) -> DepthMap {
    encoded.map(|rgb| decode_depth(rgb, far_plane))
}

/// Rotation composed as `Rx * Ry * Rz` from angles in degrees.
pub fn rotation_from_xyz_degrees(angles: [f64; 3]) -> na::Rotation3<f64> {
    let rx = na::Rotation3::from_axis_angle(&na::Vector3::x_axis(), angles[0].to_radians());
    let ry = na::Rotation3::from_axis_angle(&na::Vector3::y_axis(), angles[1].to_radians());
    let rz = na::Rotation3::from_axis_angle(&na::Vector3::z_axis(), angles[2].to_radians());
    rx * ry * rz
}

/// Projection frame to fusion frame for depth-derived clouds.
pub fn depth_cloud_rotation() -> na::Rotation3<f64> {
    rotation_from_xyz_degrees([-90.0, 90.0, 0.0])
}

/// Fusion-frame lidar points to integer pixel coordinates of every point the camera sees.
pub fn lidar_to_pixels(
    points_lidar: &[na::Point3<f64>],
    lidar: &Extrinsic,
    camera: &Extrinsic,
    intrinsics: &PinholeCamera,
) -> Vec<(usize, usize)> {
    let lidar_to_camera = camera.inverse() * lidar.matrix();
    points_lidar
        .iter()
        .filter_map(|p| {
            let sensor = to_world_frame(&fusion_to_sensor(p), &lidar_to_camera);
            let (u, v, depth) = intrinsics.project(&camera_axes(&sensor));
            if intrinsics.is_visible(u, v, depth) {
                Some((u as usize, v as usize))
            } else {
                None
            }
        })
        .collect()
}

/// Back-project a depth map into a labeled cloud in the fusion frame.
///
/// Pixels farther than `max_range` and pixels outside `mask` (when given) are skipped;
/// `value_at(u, v)` supplies the scalar attached to each point.
pub fn depth_to_point_cloud<F>(
    depth: &DepthMap,
    intrinsics: &PinholeCamera,
    max_range: f64,
    mask: Option<&Image<bool>>,
    value_at: F,
) -> Vec<Point3d>
where
    F: Fn(usize, usize) -> f32 + Sync,
{
    let rotation = depth_cloud_rotation();
    let max_range2 = max_range * max_range;
    (0..depth.height())
        .into_par_iter()
        .flat_map_iter(|v| {
            let value_at = &value_at;
            (0..depth.width()).filter_map(move |u| {
                if let Some(mask) = mask {
                    if !mask.get(u, v) {
                        return None;
                    }
                }
                let z = depth.get(u, v);
                let point = intrinsics.back_project(u as f64, v as f64, z);
                if point.coords.norm_squared() > max_range2 {
                    return None;
                }
                Some(Point3d::from_na(&(rotation * point), value_at(u, v)))
            })
        })
        .collect()
}

/// Mounting pose of a sensor group on the vehicle, as recorded in the sensor setup.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MountPose {
    pub location: [f64; 3],
    /// Degrees about x, y, z.
    pub rotation: [f64; 3],
}

impl MountPose {
    /// Undo the mount: rotate by the negated angles, then remove the offset.
    pub fn compensate(&self, points: &mut [Point3d]) {
        let rotation = rotation_from_xyz_degrees([
            -self.rotation[0],
            -self.rotation[1],
            -self.rotation[2],
        ]);
        let location = na::Vector3::from(self.location);
        points.par_iter_mut().for_each(|pt| {
            let p = rotation * pt.to_na_point3_f64() - location;
            pt.x = p.x as f32;
            pt.y = p.y as f32;
            pt.z = p.z as f32;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn focal_for_ninety_degrees_is_half_width() {
        assert_relative_eq!(focal_from_fov(768, 90.0), 384.0, epsilon = 1e-9);
    }

    #[test]
    fn back_projecting_center_gives_optical_axis() {
        for fov in [30.0, 60.0, 90.0, 120.0] {
            let cam = PinholeCamera::from_fov(640, 480, fov);
            let p = cam.back_project(cam.cx, cam.cy, 12.5);
            assert_relative_eq!(p.x, 0.0);
            assert_relative_eq!(p.y, 0.0);
            assert_relative_eq!(p.z, 12.5);
        }
    }

    #[test]
    fn project_inverts_back_project() {
        let cam = PinholeCamera::from_fov(768, 512, 90.0);
        let p = cam.back_project(100.0, 400.0, 7.0);
        let (u, v, d) = cam.project(&p.coords);
        assert_relative_eq!(u, 100.0, epsilon = 1e-9);
        assert_relative_eq!(v, 400.0, epsilon = 1e-9);
        assert_relative_eq!(d, 7.0);
    }

    #[test]
    fn axis_permutation_maps_forward_to_depth() {
        // 10 m ahead, 2 m right, 1 m up in the simulator sensor frame
        let sensor = na::Point3::new(10.0, 2.0, 1.0);
        let cam = camera_axes(&sensor);
        assert_eq!(cam, na::Vector3::new(2.0, -1.0, 10.0));

        let intrinsics = PinholeCamera::from_fov(800, 600, 90.0);
        let (u, v, depth) = intrinsics.project(&cam);
        assert!(u > intrinsics.cx, "right of the axis lands right of center");
        assert!(v < intrinsics.cy, "above the axis lands above center");
        assert!(intrinsics.is_visible(u, v, depth));

        let behind = camera_axes(&na::Point3::new(-10.0, 0.0, 0.0));
        let (u, v, depth) = intrinsics.project(&behind);
        assert!(!intrinsics.is_visible(u, v, depth));
    }

    #[test]
    fn lidar_and_depth_clouds_project_to_the_same_side() {
        let cam = PinholeCamera::from_fov(40, 40, 90.0);
        let mut depth = DepthMap::filled(40, 40, 0.0);
        depth.set(8, 20, 10.0);
        let cloud = depth_to_point_cloud(&depth, &cam, 100.0, None, |_, _| 0.0);
        let left = cloud.iter().find(|p| p.x > 1.0).unwrap();
        assert!(left.y > 0.0, "left of center is +y in the fusion frame");

        let pixels = lidar_to_pixels(
            &[left.to_na_point3_f64()],
            &Extrinsic::identity(),
            &Extrinsic::identity(),
            &cam,
        );
        // rotation round-off may move the hit by one pixel, never across the axis
        assert_eq!(pixels.len(), 1);
        assert!((7..=8).contains(&pixels[0].0), "{:?}", pixels);
    }

    #[test]
    fn visibility_is_strict_on_the_border() {
        let cam = PinholeCamera::from_fov(100, 50, 90.0);
        assert!(!cam.is_visible(0.0, 10.0, 1.0));
        assert!(!cam.is_visible(100.0, 10.0, 1.0));
        assert!(!cam.is_visible(10.0, 50.0, 1.0));
        assert!(!cam.is_visible(10.0, 10.0, 0.0));
        assert!(cam.is_visible(99.9, 49.9, 0.1));
    }

    #[test]
    fn depth_decoding() {
        assert_relative_eq!(decode_depth([0, 0, 0], 1000.0), 0.0);
        assert_relative_eq!(decode_depth([255, 255, 255], 1000.0), 1000.0);
        assert_relative_eq!(
            decode_depth([10, 1, 0], 1000.0),
            1000.0 * 266.0 / 16_777_215.0
        );
    }

    #[test]
    fn sensor_and_world_frames_are_inverse() {
        let pose = na::Isometry3::new(
            na::Vector3::new(4.0, -2.0, 1.5),
            na::Vector3::new(0.1, 0.2, 1.3),
        );
        let ext = Extrinsic::from_isometry(&pose);
        let p = na::Point3::new(3.0, 1.0, -0.5);
        let back = to_world_frame(&to_sensor_frame(&p, ext.inverse()), ext.matrix());
        assert_relative_eq!(back, p, epsilon = 1e-9);

        let from_rows = Extrinsic::from_rows(&[
            [1.0, 0.0, 0.0, 4.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
        .unwrap();
        let sensor = to_sensor_frame(&na::Point3::new(5.0, 0.0, 0.0), from_rows.inverse());
        assert_relative_eq!(sensor, na::Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn depth_rotation_aligns_with_lidar_axes() {
        let r = depth_cloud_rotation();
        // forward, down, right in the projection frame
        assert_relative_eq!(
            r * na::Vector3::new(0.0, 0.0, 1.0),
            na::Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            r * na::Vector3::new(0.0, 1.0, 0.0),
            na::Vector3::new(0.0, 0.0, -1.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            r * na::Vector3::new(1.0, 0.0, 0.0),
            na::Vector3::new(0.0, -1.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn depth_cloud_skips_far_and_masked_pixels() {
        let cam = PinholeCamera::from_fov(4, 2, 90.0);
        let mut depth = DepthMap::filled(4, 2, 5.0);
        depth.set(3, 1, 500.0);
        let mut mask = Image::filled(4, 2, true);
        mask.set(0, 0, false);
        let cloud = depth_to_point_cloud(&depth, &cam, 100.0, Some(&mask), |u, v| {
            (v * 4 + u) as f32
        });
        let values: Vec<f32> = cloud.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // pixel (2, 1) sits at the principal point: straight ahead in the fusion frame
        let center = cloud.iter().find(|p| p.value == 6.0).unwrap();
        assert_relative_eq!(center.x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(center.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(center.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn mount_compensation_removes_offset() {
        let mount = MountPose {
            location: [1.0, 0.0, 2.0],
            rotation: [0.0, 0.0, 0.0],
        };
        let mut pts = vec![Point3d::new(3.0, 1.0, 2.0, 9.0)];
        mount.compensate(&mut pts);
        assert_eq!(pts[0], Point3d::new(2.0, 1.0, 0.0, 9.0));
    }
}
