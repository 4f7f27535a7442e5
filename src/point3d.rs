use crate::error::{AnovoxError, Result};
use nalgebra as na;
use pcd_rs::{PcdDeserialize, PcdSerialize};

/// A point paired with one scalar: class id, instance id or anomaly score.
#[derive(PcdDeserialize, PcdSerialize, Debug, Clone, Copy, PartialEq)]
pub struct Point3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub value: f32,
}

impl Point3d {
    pub fn new(x: f32, y: f32, z: f32, value: f32) -> Point3d {
        Point3d { x, y, z, value }
    }
    pub fn from_na(point: &na::Point3<f64>, value: f32) -> Point3d {
        Point3d {
            x: point.x as f32,
            y: point.y as f32,
            z: point.z as f32,
            value,
        }
    }
    pub fn to_na_vec_f64(&self) -> na::Vector3<f64> {
        na::Vector3::<f64>::new(self.x as f64, self.y as f64, self.z as f64)
    }
    pub fn to_na_point3_f64(&self) -> na::Point3<f64> {
        na::Point3::<f64>::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// On-disk row of a semantic lidar sweep.
#[derive(PcdDeserialize, PcdSerialize, Debug, Clone, Copy, PartialEq)]
pub struct SemanticLidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub label: u32,
    pub instance: u32,
}

/// Semantic lidar sweep split into parallel arrays: positions, semantic tags and instance ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticLidarCloud {
    points: Vec<na::Point3<f64>>,
    labels: Vec<u32>,
    instances: Vec<u32>,
}

impl SemanticLidarCloud {
    pub fn new(
        points: Vec<na::Point3<f64>>,
        labels: Vec<u32>,
        instances: Vec<u32>,
    ) -> Result<SemanticLidarCloud> {
        if labels.len() != points.len() {
            return Err(AnovoxError::shape_mismatch(
                "semantic lidar labels",
                points.len(),
                labels.len(),
            ));
        }
        if instances.len() != points.len() {
            return Err(AnovoxError::shape_mismatch(
                "semantic lidar instances",
                points.len(),
                instances.len(),
            ));
        }
        Ok(SemanticLidarCloud {
            points,
            labels,
            instances,
        })
    }

    pub fn from_rows(rows: &[SemanticLidarPoint]) -> SemanticLidarCloud {
        SemanticLidarCloud {
            points: rows
                .iter()
                .map(|r| na::Point3::new(r.x as f64, r.y as f64, r.z as f64))
                .collect(),
            labels: rows.iter().map(|r| r.label).collect(),
            instances: rows.iter().map(|r| r.instance).collect(),
        }
    }

    pub fn to_rows(&self) -> Vec<SemanticLidarPoint> {
        self.points
            .iter()
            .zip(self.labels.iter().zip(self.instances.iter()))
            .map(|(p, (label, instance))| SemanticLidarPoint {
                x: p.x as f32,
                y: p.y as f32,
                z: p.z as f32,
                label: *label,
                instance: *instance,
            })
            .collect()
    }

    /// Positions paired with their semantic tag, ready for fusion.
    pub fn to_labeled_points(&self) -> Vec<Point3d> {
        self.points
            .iter()
            .zip(self.labels.iter())
            .map(|(p, label)| Point3d::from_na(p, *label as f32))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[na::Point3<f64>] {
        &self.points
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut [u32] {
        &mut self.labels
    }

    pub fn instances(&self) -> &[u32] {
        &self.instances
    }
}
