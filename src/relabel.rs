//! Anomaly ground-truth injection across camera and lidar.
//!
//! The semantic lidar knows exactly which points belong to an object; the camera
//! only knows instance blobs. Projecting the object's lidar points into the
//! instance image and voting picks the blob, and the whole blob is relabeled,
//! so the sparse lidar hits never under-label the silhouette.

use crate::error::{AnovoxError, Result};
use crate::image::{LabelImage, RgbImage};
use crate::labels;
use crate::point3d::SemanticLidarCloud;
use crate::transform::{self, Extrinsic, PinholeCamera};
use log::{debug, warn};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelabelRequest {
    pub label_type: String,
    pub instance_id: u32,
    pub target_semantic_id: u32,
}

impl RelabelRequest {
    pub fn new(label_type: &str, instance_id: u32, target_semantic_id: u32) -> RelabelRequest {
        RelabelRequest {
            label_type: label_type.to_string(),
            instance_id,
            target_semantic_id,
        }
    }
}

/// Everything one sensor group produced in one tick that carries ground truth.
#[derive(Debug, Clone)]
pub struct GroundTruthFrame {
    pub semantic_image: LabelImage,
    pub instance_image: RgbImage,
    pub semantic_lidar: SemanticLidarCloud,
    pub camera_extrinsic: Extrinsic,
    pub lidar_extrinsic: Extrinsic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelabelSummary {
    pub pixels_relabeled: usize,
    pub points_relabeled: usize,
    /// Requests whose object no camera pixel confirmed this tick.
    pub not_visible: Vec<u32>,
}

/// Fusion-frame positions of every point tagged with `instance_id`.
pub fn lidar_mask(cloud: &SemanticLidarCloud, instance_id: u32) -> Vec<na::Point3<f64>> {
    cloud
        .points()
        .iter()
        .zip(cloud.instances())
        .filter(|(_, id)| **id == instance_id)
        .map(|(p, _)| *p)
        .collect()
}

/// Most frequent instance color under the given pixels; ties go to the smallest color.
pub fn majority_instance_color(
    instance_image: &RgbImage,
    pixels: &[(usize, usize)],
) -> Option<[u8; 3]> {
    let mut votes: BTreeMap<[u8; 3], usize> = BTreeMap::new();
    for (u, v) in pixels {
        *votes.entry(instance_image.get(*u, *v)).or_insert(0) += 1;
    }
    let mut best: Option<([u8; 3], usize)> = None;
    for (color, count) in votes {
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((color, count)),
        }
    }
    best.map(|(color, _)| color)
}

/// Recolor the instance blob hit by `mask_points` with `target_semantic_id`.
///
/// Returns the voted instance color, or `None` when no point projects into the
/// canvas; the image is then left untouched.
pub fn relabel_semantic_image(
    semantic_image: &mut LabelImage,
    instance_image: &RgbImage,
    mask_points: &[na::Point3<f64>],
    lidar_extrinsic: &Extrinsic,
    camera_extrinsic: &Extrinsic,
    intrinsics: &PinholeCamera,
    target_semantic_id: u32,
) -> Result<Option<[u8; 3]>> {
    if !semantic_image.same_shape(instance_image) {
        return Err(AnovoxError::shape_mismatch(
            "instance image pixels",
            semantic_image.data().len(),
            instance_image.data().len(),
        ));
    }
    if instance_image.width() != intrinsics.width || instance_image.height() != intrinsics.height
    {
        return Err(AnovoxError::shape_mismatch(
            "camera canvas pixels",
            intrinsics.width * intrinsics.height,
            instance_image.data().len(),
        ));
    }

    let pixels =
        transform::lidar_to_pixels(mask_points, lidar_extrinsic, camera_extrinsic, intrinsics);
    let Some(color) = majority_instance_color(instance_image, &pixels) else {
        return Ok(None);
    };
    debug!("anomaly instance color: {:?} from {} hits", color, pixels.len());

    semantic_image
        .data_mut()
        .iter_mut()
        .zip(instance_image.data())
        .filter(|(_, instance)| **instance == color)
        .for_each(|(semantic, _)| *semantic = target_semantic_id);
    Ok(Some(color))
}

/// Overwrite the semantic tag of every point whose instance id is in `instance_ids`.
pub fn relabel_point_cloud(
    cloud: &mut SemanticLidarCloud,
    instance_ids: &[u32],
    target_semantic_id: u32,
) -> usize {
    let hits: Vec<usize> = cloud
        .instances()
        .iter()
        .enumerate()
        .filter(|(_, id)| instance_ids.contains(*id))
        .map(|(i, _)| i)
        .collect();
    let labels = cloud.labels_mut();
    for i in &hits {
        labels[*i] = target_semantic_id;
    }
    hits.len()
}

pub struct RelabelingEngine {
    intrinsics: PinholeCamera,
}

impl RelabelingEngine {
    pub fn new(intrinsics: PinholeCamera) -> RelabelingEngine {
        RelabelingEngine { intrinsics }
    }

    /// Apply requests in order; a later request overwrites an earlier one where they overlap.
    pub fn apply(
        &self,
        frame: &mut GroundTruthFrame,
        requests: &[RelabelRequest],
    ) -> Result<RelabelSummary> {
        let mut summary = RelabelSummary::default();
        for request in requests {
            if !labels::is_anomaly(request.target_semantic_id) {
                warn!(
                    "{} {} relabeled to non-anomaly class {}",
                    request.label_type, request.instance_id, request.target_semantic_id
                );
            }
            let mask = lidar_mask(&frame.semantic_lidar, request.instance_id);
            let voted = relabel_semantic_image(
                &mut frame.semantic_image,
                &frame.instance_image,
                &mask,
                &frame.lidar_extrinsic,
                &frame.camera_extrinsic,
                &self.intrinsics,
                request.target_semantic_id,
            )?;
            match voted {
                Some(color) => {
                    summary.pixels_relabeled += frame
                        .instance_image
                        .data()
                        .iter()
                        .filter(|c| **c == color)
                        .count();
                }
                None => {
                    debug!(
                        "{} {} not visible to camera ({} lidar points)",
                        request.label_type,
                        request.instance_id,
                        mask.len()
                    );
                    summary.not_visible.push(request.instance_id);
                }
            }
            summary.points_relabeled += relabel_point_cloud(
                &mut frame.semantic_lidar,
                &[request.instance_id],
                request.target_semantic_id,
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(instances: Vec<u32>) -> SemanticLidarCloud {
        let n = instances.len();
        SemanticLidarCloud::new(vec![na::Point3::new(5.0, 0.0, 0.0); n], vec![1; n], instances)
            .unwrap()
    }

    #[test]
    fn mask_selects_only_matching_instance() {
        let c = SemanticLidarCloud::new(
            vec![
                na::Point3::new(1.0, 0.0, 0.0),
                na::Point3::new(2.0, 0.0, 0.0),
                na::Point3::new(3.0, 0.0, 0.0),
            ],
            vec![1, 1, 1],
            vec![7, 8, 7],
        )
        .unwrap();
        let mask = lidar_mask(&c, 7);
        assert_eq!(mask.len(), 2);
        assert_eq!(mask[1].x, 3.0);
    }

    #[test]
    fn vote_tie_goes_to_smallest_color() {
        let img = RgbImage::new(2, 1, vec![[9, 0, 0], [3, 0, 0]]).unwrap();
        let color = majority_instance_color(&img, &[(0, 0), (1, 0)]);
        assert_eq!(color, Some([3, 0, 0]));
        let color = majority_instance_color(&img, &[(0, 0), (1, 0), (0, 0)]);
        assert_eq!(color, Some([9, 0, 0]));
        assert_eq!(majority_instance_color(&img, &[]), None);
    }

    #[test]
    fn point_relabel_matches_a_list_of_ids() {
        let mut c = cloud(vec![7, 8, 9, 7]);
        let n = relabel_point_cloud(&mut c, &[7, 9], 33);
        assert_eq!(n, 3);
        assert_eq!(c.labels(), &[33, 1, 33, 33]);
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let mut semantic = LabelImage::filled(4, 4, 0);
        let instance = RgbImage::filled(4, 3, [0, 0, 0]);
        let cam = PinholeCamera::from_fov(4, 4, 90.0);
        let err = relabel_semantic_image(
            &mut semantic,
            &instance,
            &[],
            &Extrinsic::identity(),
            &Extrinsic::identity(),
            &cam,
            33,
        );
        assert!(matches!(err, Err(AnovoxError::ShapeMismatch { .. })));
    }
}
