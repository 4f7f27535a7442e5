use nalgebra as na;

/// Integer cell index `(ix, iy, iz)`.
pub type VoxelKey = na::Vector3<i32>;

/// `floor(coord / resolution)`, corrected so that `coord == k * resolution` always yields `k`.
///
/// Plain division can land one ulp below an integer (e.g. `0.3 / 0.1`); the
/// result is nudged until `idx * resolution <= coord < (idx + 1) * resolution`.
pub fn floor_index(coord: f64, resolution: f64) -> i64 {
    let mut idx = (coord / resolution).floor() as i64;
    if (idx + 1) as f64 * resolution <= coord {
        idx += 1;
    } else if idx as f64 * resolution > coord {
        idx -= 1;
    }
    idx
}

/// Cell key and within-cell remainder of a point already translated into grid space.
pub fn point_to_voxel(point: &na::Vector3<f64>, resolution: f64) -> (VoxelKey, na::Vector3<f64>) {
    let ix = floor_index(point.x, resolution);
    let iy = floor_index(point.y, resolution);
    let iz = floor_index(point.z, resolution);
    let remainder = na::Vector3::new(
        point.x - ix as f64 * resolution,
        point.y - iy as f64 * resolution,
        point.z - iz as f64 * resolution,
    );
    (VoxelKey::new(ix as i32, iy as i32, iz as i32), remainder)
}

/// `ix + iy * Dx + iz * Dx * Dy`; injective for keys inside the grid.
#[inline]
pub fn linear_hash(key: &VoxelKey, grid_size: &[u32; 3]) -> u64 {
    let dx = grid_size[0] as u64;
    let dy = grid_size[1] as u64;
    key.x as u64 + key.y as u64 * dx + key.z as u64 * dx * dy
}
