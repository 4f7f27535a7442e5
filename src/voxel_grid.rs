//! Sparse voxel grid construction.
//!
//! Points are translated into grid space, keyed by cell, grouped with a stable
//! sort on the linear cell hash and reduced run by run. No dense array and no
//! hash map is built, so the output order (ascending hash) only depends on the input.

use crate::point3d::Point3d;
use crate::voxel_util::{self, VoxelKey};
use nalgebra as na;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Value of the point with the smallest within-cell remainder.
    Centerpoint,
    Mean,
    Median,
    /// Most frequent value; ties go to the smallest.
    Majority,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub resolution: f64,
    /// Cell count along x, y, z.
    pub grid_size: [u32; 3],
    /// World offset added before the half-extent shift.
    pub offset: [f64; 3],
}

impl GridSpec {
    pub fn default_values() -> GridSpec {
        GridSpec {
            resolution: 0.5,
            grid_size: [1000, 1000, 64],
            offset: [0.0, 0.0, 0.0],
        }
    }

    /// `offset + resolution * grid_size / 2`, mapping the fusion origin to the grid center.
    pub fn translation(&self) -> na::Vector3<f64> {
        na::Vector3::new(
            self.offset[0] + self.resolution * self.grid_size[0] as f64 / 2.0,
            self.offset[1] + self.resolution * self.grid_size[1] as f64 / 2.0,
            self.offset[2] + self.resolution * self.grid_size[2] as f64 / 2.0,
        )
    }

    pub fn contains(&self, translated: &na::Vector3<f64>) -> bool {
        (0..3).all(|i| {
            translated[i] >= 0.0 && translated[i] < self.grid_size[i] as f64 * self.resolution
        })
    }

    /// Center of a cell in the untranslated frame.
    pub fn voxel_center(&self, key: &VoxelKey) -> na::Point3<f64> {
        let corner = key.cast::<f64>() * self.resolution;
        let half = na::Vector3::repeat(self.resolution / 2.0);
        na::Point3::from(corner + half - self.translation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub key: VoxelKey,
    pub value: f32,
}

/// One row per occupied cell, unique keys, ascending linear hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelGrid {
    voxels: Vec<Voxel>,
}

impl VoxelGrid {
    pub fn from_voxels(voxels: Vec<Voxel>) -> VoxelGrid {
        VoxelGrid { voxels }
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn contains_value(&self, value: f32) -> bool {
        self.voxels.iter().any(|v| v.value == value)
    }
}

struct CellEntry {
    hash: u64,
    key: VoxelKey,
    remainder2: f64,
    value: f32,
}

pub struct Voxelizer {
    spec: GridSpec,
    aggregation: Aggregation,
    priority_label: Option<f32>,
}

impl Voxelizer {
    pub fn new(spec: GridSpec, aggregation: Aggregation, priority_label: Option<f32>) -> Voxelizer {
        Voxelizer {
            spec,
            aggregation,
            priority_label,
        }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn voxelize(&self, point_cloud: &[Point3d]) -> VoxelGrid {
        let translation = self.spec.translation();
        let resolution = self.spec.resolution;
        let grid_size = self.spec.grid_size;

        // translate, crop to the grid volume, key
        let entries: Vec<CellEntry> = point_cloud
            .par_iter()
            .filter_map(|pt| {
                let translated = pt.to_na_vec_f64() + translation;
                if !self.spec.contains(&translated) {
                    return None;
                }
                let (key, remainder) = voxel_util::point_to_voxel(&translated, resolution);
                Some(CellEntry {
                    hash: voxel_util::linear_hash(&key, &grid_size),
                    key,
                    remainder2: remainder.norm_squared(),
                    value: pt.value,
                })
            })
            .collect();

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| entries[i].hash);

        let mut voxels = Vec::new();
        let mut start = 0;
        while start < order.len() {
            let hash = entries[order[start]].hash;
            let mut end = start + 1;
            while end < order.len() && entries[order[end]].hash == hash {
                end += 1;
            }
            let run: Vec<&CellEntry> = order[start..end].iter().map(|&i| &entries[i]).collect();
            voxels.push(Voxel {
                key: run[0].key,
                value: self.aggregate(&run),
            });
            start = end;
        }
        VoxelGrid { voxels }
    }

    fn aggregate(&self, run: &[&CellEntry]) -> f32 {
        if let Some(priority) = self.priority_label {
            if run.iter().any(|e| e.value == priority) {
                return priority;
            }
        }
        match self.aggregation {
            Aggregation::Centerpoint => {
                let mut best = run[0];
                for e in &run[1..] {
                    if e.remainder2 < best.remainder2 {
                        best = e;
                    }
                }
                best.value
            }
            Aggregation::Mean => {
                let sum: f64 = run.iter().map(|e| e.value as f64).sum();
                (sum / run.len() as f64) as f32
            }
            Aggregation::Median => {
                let values = sorted_values(run);
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[mid]
                } else {
                    ((values[mid - 1] as f64 + values[mid] as f64) / 2.0) as f32
                }
            }
            Aggregation::Majority => {
                let values = sorted_values(run);
                let mut best = (values[0], 0usize);
                let mut i = 0;
                while i < values.len() {
                    let mut j = i + 1;
                    while j < values.len() && values[j] == values[i] {
                        j += 1;
                    }
                    if j - i > best.1 {
                        best = (values[i], j - i);
                    }
                    i = j;
                }
                best.0
            }
        }
    }
}

fn sorted_values(run: &[&CellEntry]) -> Vec<f32> {
    let mut values: Vec<f32> = run.iter().map(|e| e.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}
