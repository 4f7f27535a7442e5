use anovox::point3d::Point3d;
use anovox::voxel_grid::{Aggregation, GridSpec, VoxelGrid, Voxelizer};
use anovox::voxel_util::VoxelKey;

const POLICIES: [Aggregation; 4] = [
    Aggregation::Centerpoint,
    Aggregation::Mean,
    Aggregation::Median,
    Aggregation::Majority,
];

fn spec(resolution: f64) -> GridSpec {
    GridSpec {
        resolution,
        grid_size: [16, 16, 16],
        offset: [0.0, 0.0, 0.0],
    }
}

fn single_key(grid: &VoxelGrid) -> VoxelKey {
    assert_eq!(grid.len(), 1);
    grid.voxels()[0].key
}

#[test]
fn boundary_points_fall_in_their_own_cell_on_every_axis() {
    for resolution in [0.5, 0.25, 1.0] {
        let spec = spec(resolution);
        let half = spec.translation();
        let vox = Voxelizer::new(spec, Aggregation::Centerpoint, None);
        for k in 0..16 {
            // translated coordinate lands exactly on k * resolution
            let on_boundary = (k as f64 * resolution - half.x) as f32;
            let inside = (0.5 * resolution - half.x) as f32;

            let grid = vox.voxelize(&[Point3d::new(on_boundary, inside, inside, 1.0)]);
            assert_eq!(single_key(&grid), VoxelKey::new(k, 0, 0), "x, res {resolution}");
            let grid = vox.voxelize(&[Point3d::new(inside, on_boundary, inside, 1.0)]);
            assert_eq!(single_key(&grid), VoxelKey::new(0, k, 0), "y, res {resolution}");
            let grid = vox.voxelize(&[Point3d::new(inside, inside, on_boundary, 1.0)]);
            assert_eq!(single_key(&grid), VoxelKey::new(0, 0, k), "z, res {resolution}");
        }
    }
}

#[test]
fn upper_boundary_of_the_volume_is_excluded() {
    let spec = spec(0.5);
    let edge = (16.0 * 0.5 - spec.translation().x) as f32;
    let grid = Voxelizer::new(spec, Aggregation::Mean, None)
        .voxelize(&[Point3d::new(edge, 0.0, 0.0, 1.0)]);
    assert!(grid.is_empty());
}

#[test]
fn one_point_per_cell_is_policy_independent() {
    let points: Vec<Point3d> = (0..8)
        .map(|i| Point3d::new(i as f32 * 0.5 - 3.9, 0.1, -0.2, i as f32 * 1.5))
        .collect();
    let grids: Vec<VoxelGrid> = POLICIES
        .iter()
        .map(|policy| Voxelizer::new(spec(0.5), *policy, None).voxelize(&points))
        .collect();
    assert_eq!(grids[0].len(), 8);
    for grid in &grids[1..] {
        assert_eq!(grid, &grids[0]);
    }
}

#[test]
fn priority_label_survives_a_crowded_cell() {
    let road = 24.0;
    let building = 3.0;
    // centerpoint keys on the within-cell remainder; the road point has the largest one
    let mut points = vec![Point3d::new(0.45, 0.45, 0.45, road)];
    for i in 0..9 {
        let d = 0.01 + i as f32 * 0.01;
        points.push(Point3d::new(d, d, d, building));
    }

    let with_priority = Voxelizer::new(spec(0.5), Aggregation::Centerpoint, Some(road));
    assert_eq!(with_priority.voxelize(&points).voxels()[0].value, road);
    let majority_priority = Voxelizer::new(spec(0.5), Aggregation::Majority, Some(road));
    assert_eq!(majority_priority.voxelize(&points).voxels()[0].value, road);

    let centerpoint = Voxelizer::new(spec(0.5), Aggregation::Centerpoint, None);
    assert_eq!(centerpoint.voxelize(&points).voxels()[0].value, building);
    let majority = Voxelizer::new(spec(0.5), Aggregation::Majority, None);
    assert_eq!(majority.voxelize(&points).voxels()[0].value, building);
}

#[test]
fn identical_input_gives_identical_grid() {
    let points: Vec<Point3d> = (0..500)
        .map(|i| {
            let t = i as f32 * 0.37;
            Point3d::new(t.sin() * 3.0, t.cos() * 3.0, (t * 0.1).sin(), (i % 7) as f32)
        })
        .collect();
    for policy in POLICIES {
        let vox = Voxelizer::new(spec(0.5), policy, Some(3.0));
        assert_eq!(vox.voxelize(&points), vox.voxelize(&points));
    }
}
