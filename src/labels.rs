//! Semantic class catalogue shared by the simulator output and the voxel grids.
//!
//! Ids follow the CARLA semantic tags; the anomaly classes (29..=34, 100) are
//! synthetic and only ever produced by relabeling.

use crate::image::{LabelImage, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub name: &'static str,
    pub id: u32,
    /// Actor runs under a behaviour agent instead of autopilot and is better ignored in evaluation.
    pub agent_mode: bool,
    pub color: [u8; 3],
}

const fn label(name: &'static str, id: u32, agent_mode: bool, color: [u8; 3]) -> Label {
    Label {
        name,
        id,
        agent_mode,
        color,
    }
}

pub const UNLABELED_ID: u32 = 0;
pub const ROAD_ID: u32 = 1;
pub const ROAD_LINE_ID: u32 = 24;
pub const AIRPLANE_ANOMALY_ID: u32 = 33;
pub const GENERIC_ANOMALY_ID: u32 = 100;

pub const LABELS: &[Label] = &[
    label("unlabeled", 0, false, [0, 0, 0]),
    label("road", 1, false, [128, 64, 128]),
    label("sidewalk", 2, false, [244, 35, 232]),
    label("building", 3, false, [70, 70, 70]),
    label("wall", 4, false, [102, 102, 156]),
    label("fence", 5, false, [190, 153, 153]),
    label("pole", 6, false, [153, 153, 153]),
    label("traffic light", 7, false, [250, 170, 30]),
    label("traffic sign", 8, false, [220, 220, 0]),
    label("vegetation", 9, false, [107, 142, 35]),
    label("terrain", 10, false, [152, 251, 152]),
    label("sky", 11, false, [70, 130, 180]),
    label("pedestrian", 12, false, [220, 20, 60]),
    label("rider", 13, false, [255, 0, 0]),
    label("car", 14, false, [0, 0, 142]),
    label("truck", 15, false, [0, 0, 70]),
    label("bus", 16, false, [0, 60, 100]),
    label("train", 17, false, [0, 80, 100]),
    label("motorcycle", 18, false, [0, 0, 230]),
    label("bicycle", 19, false, [119, 11, 32]),
    label("static", 20, false, [110, 190, 160]),
    label("dynamic", 21, false, [170, 120, 50]),
    label("other", 22, false, [55, 90, 80]),
    label("water", 23, false, [45, 60, 150]),
    label("road line", 24, false, [157, 234, 50]),
    label("ground", 25, false, [81, 0, 81]),
    label("bridge", 26, false, [150, 100, 100]),
    label("rail track", 27, false, [230, 150, 140]),
    label("guard rail", 28, false, [180, 165, 180]),
    // anomalies
    label("home", 29, false, [245, 29, 0]),
    label("animal", 30, false, [245, 30, 0]),
    label("nature", 31, false, [245, 31, 0]),
    label("special", 32, false, [245, 32, 0]),
    label("airplane", 33, false, [245, 33, 0]),
    label("falling", 34, false, [245, 34, 0]),
    label("anomaly", 100, false, [245, 0, 0]),
    // agents
    label("agent_pedestrian", 112, true, [220, 20, 61]),
    label("agent_rider", 113, true, [255, 0, 1]),
    label("agent_car", 114, true, [3, 0, 143]),
    label("agent_truck", 115, true, [0, 0, 71]),
    label("agent_bus", 116, true, [0, 60, 101]),
    label("agent_motorcycle", 118, true, [0, 0, 231]),
    label("agent_bicycle", 119, true, [119, 11, 33]),
    // misc
    label("ego_vehicle", 214, true, [0, 0, 1]),
];

pub fn by_id(id: u32) -> Option<&'static Label> {
    LABELS.iter().find(|l| l.id == id)
}

pub fn by_name(name: &str) -> Option<&'static Label> {
    LABELS.iter().find(|l| l.name == name)
}

pub fn by_color(color: [u8; 3]) -> Option<&'static Label> {
    LABELS.iter().find(|l| l.color == color)
}

pub fn is_anomaly(id: u32) -> bool {
    (29..=34).contains(&id) || id == GENERIC_ANOMALY_ID
}

/// Map a semantic id image to the palette; unknown ids render black.
pub fn colorize(semantic: &LabelImage) -> RgbImage {
    semantic.map(|id| by_id(id).map(|l| l.color).unwrap_or([0, 0, 0]))
}
