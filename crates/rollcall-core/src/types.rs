use serde::{Deserialize, Serialize};

/// A 2D point in frame pixel coordinates.
pub type Point = (f32, f32);

/// Number of points in the standard facial landmark layout.
pub const LANDMARK_COUNT: usize = 68;

const RIGHT_EYE: std::ops::Range<usize> = 36..42;
const LEFT_EYE: std::ops::Range<usize> = 42..48;

/// Axis-aligned bounding box for a detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clamp the box to a `width` x `height` frame, returning integer pixel
    /// bounds `(x0, y0, x1, y1)` (exclusive end). `None` if nothing is left.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let x0 = self.x.max(0.0).floor() as usize;
        let y0 = self.y.max(0.0).floor() as usize;
        let x1 = (self.right().min(width as f32).ceil().max(0.0)) as usize;
        let y1 = (self.bottom().min(height as f32).ceil().max(0.0)) as usize;
        if x1 > x0 && y1 > y0 {
            Some((x0, y0, x1, y1))
        } else {
            None
        }
    }
}

/// 68-point facial landmarks in frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point>,
}

impl FaceLandmarks {
    /// Wrap a landmark set. Returns `None` unless exactly 68 points are given.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        (points.len() == LANDMARK_COUNT).then_some(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Right eye contour, indices 36–41.
    pub fn right_eye(&self) -> [Point; 6] {
        eye(&self.points[RIGHT_EYE])
    }

    /// Left eye contour, indices 42–47.
    pub fn left_eye(&self) -> [Point; 6] {
        eye(&self.points[LEFT_EYE])
    }
}

fn eye(slice: &[Point]) -> [Point; 6] {
    std::array::from_fn(|i| slice[i])
}

/// Face embedding vector produced by the recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Only meaningful for equal lengths; over a length mismatch this is the
    /// distance of the common prefix. The matcher skips such pairs.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered identity with every embedding produced by training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub id: String,
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

impl KnownIdentity {
    /// Label written to the attendance log, e.g. `"101 - Alice"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.id, self.name)
    }
}
