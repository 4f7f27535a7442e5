use crate::error::{AnovoxError, Result};
use crate::image::{LabelImage, ScoreImage};
use crate::voxel_grid::{Voxel, VoxelGrid};
use crate::voxel_hash_map::VoxelHashMap;

/// Per-voxel prediction scores and binary ground truth, index aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedScores {
    pub pred_scores: Vec<f32>,
    pub gt_binary: Vec<bool>,
}

impl AlignedScores {
    pub fn len(&self) -> usize {
        self.pred_scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pred_scores.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.gt_binary.iter().filter(|b| **b).count()
    }

    pub fn extend(&mut self, other: &AlignedScores) {
        self.pred_scores.extend_from_slice(&other.pred_scores);
        self.gt_binary.extend_from_slice(&other.gt_binary);
    }
}

/// Keep only ground-truth voxels ahead of the ego vehicle (`ix > Dx / 2`).
pub fn front_only(gt: &VoxelGrid, grid_size: &[u32; 3]) -> VoxelGrid {
    let half = (grid_size[0] / 2) as i32;
    VoxelGrid::from_voxels(
        gt.voxels()
            .iter()
            .filter(|v| v.key.x > half)
            .copied()
            .collect(),
    )
}

/// Match predicted voxels to ground-truth voxels by key.
///
/// Predicted voxels without a ground-truth counterpart are dropped. With
/// `match_radius > 0` the nearest ground-truth voxel inside that many cells is
/// accepted instead of an exact hit.
pub fn align_grids(
    pred: &VoxelGrid,
    gt: &VoxelGrid,
    anomaly_class_id: u32,
    match_radius: i32,
) -> AlignedScores {
    let index = VoxelHashMap::from_grid(gt);
    let mut aligned = AlignedScores::default();
    if index.is_empty() {
        return aligned;
    }
    let anomaly = anomaly_class_id as f32;
    for voxel in pred.voxels() {
        if let Some(row) = index.get_closest_neighbor(&voxel.key, match_radius) {
            aligned.pred_scores.push(voxel.value);
            aligned.gt_binary.push(gt.voxels()[row].value == anomaly);
        }
    }
    aligned
}

/// Grids that were already intersected upstream must agree row by row.
pub fn align_prealigned(
    pred: &VoxelGrid,
    gt: &VoxelGrid,
    anomaly_class_id: u32,
) -> Result<AlignedScores> {
    if pred.len() != gt.len() {
        return Err(AnovoxError::shape_mismatch(
            "prealigned voxels",
            gt.len(),
            pred.len(),
        ));
    }
    if let Some((row, _)) = pred
        .voxels()
        .iter()
        .zip(gt.voxels())
        .enumerate()
        .find(|(_, (p, g))| p.key != g.key)
    {
        return Err(AnovoxError::Dataset(format!(
            "prealigned grids disagree at row {}",
            row
        )));
    }
    let anomaly = anomaly_class_id as f32;
    Ok(AlignedScores {
        pred_scores: pred.voxels().iter().map(|v| v.value).collect(),
        gt_binary: gt.voxels().iter().map(|v: &Voxel| v.value == anomaly).collect(),
    })
}

/// Per-pixel scores against the anomaly mask of a semantic image of the same size.
pub fn align_image(
    pred: &ScoreImage,
    gt: &LabelImage,
    anomaly_class_id: u32,
) -> Result<AlignedScores> {
    if !pred.same_shape(gt) {
        return Err(AnovoxError::shape_mismatch(
            "score image pixels",
            gt.data().len(),
            pred.data().len(),
        ));
    }
    Ok(AlignedScores {
        pred_scores: pred.data().to_vec(),
        gt_binary: gt.data().iter().map(|id| *id == anomaly_class_id).collect(),
    })
}

/// Per-point scores against semantic lidar labels, row by row.
pub fn align_points(
    pred_scores: &[f32],
    gt_labels: &[u32],
    anomaly_class_id: u32,
) -> Result<AlignedScores> {
    if pred_scores.len() != gt_labels.len() {
        return Err(AnovoxError::shape_mismatch(
            "scored points",
            gt_labels.len(),
            pred_scores.len(),
        ));
    }
    Ok(AlignedScores {
        pred_scores: pred_scores.to_vec(),
        gt_binary: gt_labels.iter().map(|id| *id == anomaly_class_id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel_util::VoxelKey;

    fn voxel(x: i32, value: f32) -> Voxel {
        Voxel {
            key: VoxelKey::new(x, 0, 0),
            value,
        }
    }

    #[test]
    fn unmatched_predictions_are_dropped() {
        let pred = VoxelGrid::from_voxels(vec![voxel(1, 0.9), voxel(2, 0.1), voxel(7, 0.5)]);
        let gt = VoxelGrid::from_voxels(vec![voxel(1, 33.0), voxel(2, 3.0)]);
        let aligned = align_grids(&pred, &gt, 33, 0);
        assert_eq!(aligned.pred_scores, vec![0.9, 0.1]);
        assert_eq!(aligned.gt_binary, vec![true, false]);
        assert_eq!(aligned.anomaly_count(), 1);
    }

    #[test]
    fn radius_matches_neighbouring_cells() {
        let pred = VoxelGrid::from_voxels(vec![voxel(3, 0.8)]);
        let gt = VoxelGrid::from_voxels(vec![voxel(2, 33.0)]);
        assert!(align_grids(&pred, &gt, 33, 0).is_empty());
        let aligned = align_grids(&pred, &gt, 33, 1);
        assert_eq!(aligned.gt_binary, vec![true]);
    }

    #[test]
    fn front_filter_keeps_upper_half() {
        let gt = VoxelGrid::from_voxels(vec![voxel(10, 1.0), voxel(500, 1.0), voxel(501, 1.0)]);
        let front = front_only(&gt, &[1000, 1000, 64]);
        assert_eq!(front.len(), 1);
        assert_eq!(front.voxels()[0].key.x, 501);
    }

    #[test]
    fn prealigned_length_mismatch_is_an_error() {
        let pred = VoxelGrid::from_voxels(vec![voxel(1, 0.2)]);
        let gt = VoxelGrid::from_voxels(vec![voxel(1, 33.0), voxel(2, 1.0)]);
        assert!(matches!(
            align_prealigned(&pred, &gt, 33),
            Err(AnovoxError::ShapeMismatch { .. })
        ));
        let gt = VoxelGrid::from_voxels(vec![voxel(1, 33.0)]);
        assert_eq!(align_prealigned(&pred, &gt, 33).unwrap().gt_binary, vec![true]);
    }

    #[test]
    fn image_scores_follow_the_anomaly_mask() {
        let pred = ScoreImage::new(2, 2, vec![0.9, 0.1, 0.4, 0.3]).unwrap();
        let gt = LabelImage::new(2, 2, vec![33, 1, 33, 24]).unwrap();
        let aligned = align_image(&pred, &gt, 33).unwrap();
        assert_eq!(aligned.pred_scores, vec![0.9, 0.1, 0.4, 0.3]);
        assert_eq!(aligned.gt_binary, vec![true, false, true, false]);

        let wide = ScoreImage::filled(4, 1, 0.5);
        assert!(matches!(
            align_image(&wide, &gt, 33),
            Err(AnovoxError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn point_scores_need_one_label_each() {
        let aligned = align_points(&[0.2, 0.8], &[1, 33], 33).unwrap();
        assert_eq!(aligned.gt_binary, vec![false, true]);
        assert!(matches!(
            align_points(&[0.2], &[1, 33], 33),
            Err(AnovoxError::ShapeMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }
}
