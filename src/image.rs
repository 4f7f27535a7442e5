//! Dense row-major image buffers and the per-tick sensor frame union.
use crate::error::{AnovoxError, Result};
use crate::point3d::{Point3d, SemanticLidarCloud};

/// Owned row-major buffer; `(u, v)` is `(column, row)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// One class id per pixel.
pub type LabelImage = Image<u32>;
/// Instance colors, encoded depth or plain RGB.
pub type RgbImage = Image<[u8; 3]>;
/// Continuous per-pixel anomaly score.
pub type ScoreImage = Image<f32>;
/// Decoded depth in meters.
pub type DepthMap = Image<f64>;

impl<T: Copy> Image<T> {
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(AnovoxError::shape_mismatch(
                "image buffer",
                width * height,
                data.len(),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, u: usize, v: usize) -> T {
        self.data[v * self.width + u]
    }

    #[inline]
    pub fn set(&mut self, u: usize, v: usize, value: T) {
        self.data[v * self.width + u] = value;
    }

    pub fn same_shape<U>(&self, other: &Image<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Image<U> {
        Image {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|p| f(*p)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Rgb,
    Depth,
    SemanticImage,
    InstanceImage,
    LidarPoints,
    SemanticLidarPoints,
}

impl Modality {
    /// Directory name used for this modality inside a scenario.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Modality::Rgb => "RGB_IMG",
            Modality::Depth => "DEPTH_IMG",
            Modality::SemanticImage => "SEMANTIC_IMG",
            Modality::InstanceImage => "INSTANCE_IMG",
            Modality::LidarPoints => "PCD",
            Modality::SemanticLidarPoints => "SEMANTIC_PCD",
        }
    }

    pub fn file_ending(&self) -> &'static str {
        match self {
            Modality::LidarPoints | Modality::SemanticLidarPoints => "pcd",
            _ => "png",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SensorFrame {
    Rgb(RgbImage),
    Depth(RgbImage),
    SemanticImage(LabelImage),
    InstanceImage(RgbImage),
    LidarPoints(Vec<Point3d>),
    SemanticLidarPoints(SemanticLidarCloud),
}

impl SensorFrame {
    pub fn modality(&self) -> Modality {
        match self {
            SensorFrame::Rgb(_) => Modality::Rgb,
            SensorFrame::Depth(_) => Modality::Depth,
            SensorFrame::SemanticImage(_) => Modality::SemanticImage,
            SensorFrame::InstanceImage(_) => Modality::InstanceImage,
            SensorFrame::LidarPoints(_) => Modality::LidarPoints,
            SensorFrame::SemanticLidarPoints(_) => Modality::SemanticLidarPoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_is_column_row() {
        let mut img = LabelImage::filled(3, 2, 0);
        img.set(2, 1, 7);
        assert_eq!(img.data()[5], 7);
        assert_eq!(img.get(2, 1), 7);
        assert_eq!(img.get(1, 0), 0);
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(matches!(
            RgbImage::new(2, 2, vec![[0, 0, 0]; 3]),
            Err(AnovoxError::ShapeMismatch {
                expected: 4,
                found: 3,
                ..
            })
        ));
        assert_eq!(RgbImage::new(2, 2, vec![[0, 0, 0]; 4]).unwrap().width(), 2);
    }
}
