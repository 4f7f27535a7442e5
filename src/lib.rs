pub mod config;
pub mod error;
pub mod evaluation;
pub mod image;
pub mod io;
pub mod labels;
pub mod pipeline;
pub mod point3d;
pub mod relabel;
pub mod transform;
pub mod voxel_grid;
pub mod voxel_hash_map;
pub mod voxel_util;
