use std::collections::HashMap;

use crate::voxel_grid::VoxelGrid;
use crate::voxel_util::VoxelKey;

/// Cell key -> row of a ground-truth grid.
pub struct VoxelHashMap {
    map: HashMap<VoxelKey, usize>,
}

fn get_adjacent_voxels(voxel: &VoxelKey, adjacent_voxels: i32) -> Vec<VoxelKey> {
    let mut voxel_neighborhood = Vec::<VoxelKey>::new();
    for x in voxel.x - adjacent_voxels..voxel.x + adjacent_voxels + 1 {
        for y in voxel.y - adjacent_voxels..voxel.y + adjacent_voxels + 1 {
            for z in voxel.z - adjacent_voxels..voxel.z + adjacent_voxels + 1 {
                voxel_neighborhood.push(VoxelKey::new(x, y, z));
            }
        }
    }
    voxel_neighborhood
}

impl VoxelHashMap {
    /// First occurrence wins if a key repeats.
    pub fn from_grid(grid: &VoxelGrid) -> VoxelHashMap {
        let mut map = HashMap::with_capacity(grid.len());
        for (row, voxel) in grid.voxels().iter().enumerate() {
            map.entry(voxel.key).or_insert(row);
        }
        VoxelHashMap { map }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, key: &VoxelKey) -> Option<usize> {
        self.map.get(key).copied()
    }

    /// Exact match, else the nearest key within `radius` cells (ties to the lowest row).
    pub fn get_closest_neighbor(&self, key: &VoxelKey, radius: i32) -> Option<usize> {
        if let Some(row) = self.get(key) {
            return Some(row);
        }
        if radius <= 0 {
            return None;
        }
        get_adjacent_voxels(key, radius)
            .iter()
            .filter_map(|query_voxel| {
                self.map.get(query_voxel).map(|row| {
                    let d = (query_voxel - key).cast::<f64>().norm_squared();
                    (*row, d)
                })
            })
            .reduce(|acc, neighbor| {
                if acc.1 < neighbor.1 || (acc.1 == neighbor.1 && acc.0 < neighbor.0) {
                    acc
                } else {
                    neighbor
                }
            })
            .map(|(row, _)| row)
    }
}
