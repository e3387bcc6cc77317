use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A 2D point in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned face rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let inter_h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Named facial landmarks. Any point may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Option<Point>,
    pub right_eye: Option<Point>,
    pub nose: Option<Point>,
    pub left_mouth: Option<Point>,
    pub right_mouth: Option<Point>,
}

impl Landmarks {
    /// Build from the five-point layout used by InsightFace-style detectors:
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub fn from_five_points(points: [(f32, f32); 5]) -> Self {
        let [le, re, n, lm, rm] = points.map(|(x, y)| Some(Point::new(x, y)));
        Self {
            left_eye: le,
            right_eye: re,
            nose: n,
            left_mouth: lm,
            right_mouth: rm,
        }
    }

    /// Both eye positions, if the detector produced them.
    pub fn eyes(&self) -> Option<(Point, Point)> {
        Some((self.left_eye?, self.right_eye?))
    }
}

/// One face found by the localization collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub landmarks: Landmarks,
    /// Detector score, when the backend reports one.
    pub confidence: Option<f32>,
}

impl FaceDetection {
    pub fn new(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            landmarks: Landmarks::default(),
            confidence: None,
        }
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = landmarks;
        self
    }
}

/// Two embeddings could not be compared.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompareError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Face embedding vector (512-dimensional for the shipped model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "edgeface_s").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    fn check_dim(&self, other: &Embedding) -> Result<(), CompareError> {
        if self.values.len() != other.values.len() {
            return Err(CompareError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        Ok(())
    }

    /// Cosine similarity in [-1, 1]. A zero-magnitude side yields 0.
    ///
    /// Always processes every dimension; there is no early exit on the data.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, CompareError> {
        self.check_dim(other)?;

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        Ok(if denom > 0.0 { dot / denom } else { 0.0 })
    }

    /// Euclidean (L2) distance. Lower means more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, CompareError> {
        self.check_dim(other)?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// One of the three captured head orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pose {
    Front,
    Left,
    Right,
}

impl Pose {
    pub const ALL: [Pose; 3] = [Pose::Front, Pose::Left, Pose::Right];
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pose::Front => "front",
            Pose::Left => "left",
            Pose::Right => "right",
        })
    }
}

/// A registered identity: one embedding per pose, keyed by user name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_name: String,
    pub front: Embedding,
    pub left: Embedding,
    pub right: Embedding,
}

impl UserRecord {
    pub fn new(user_name: impl Into<String>, front: Embedding, left: Embedding, right: Embedding) -> Self {
        Self {
            user_name: user_name.into(),
            front,
            left,
            right,
        }
    }

    pub fn embedding(&self, pose: Pose) -> &Embedding {
        match pose {
            Pose::Front => &self.front,
            Pose::Left => &self.left,
            Pose::Right => &self.right,
        }
    }

    /// Embeddings in [front, left, right] order.
    pub fn embeddings(&self) -> [&Embedding; 3] {
        [&self.front, &self.left, &self.right]
    }

    /// Shared dimension of all three embeddings, or `None` if they disagree
    /// or are empty.
    pub fn dimension(&self) -> Option<usize> {
        let dim = self.front.dim();
        (dim > 0 && self.left.dim() == dim && self.right.dim() == dim).then_some(dim)
    }
}

/// Outcome of comparing a live capture against stored embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_match: bool,
    /// Best clamped cosine similarity, in [0, 1].
    pub score: f32,
}

impl VerificationResult {
    pub const NO_MATCH: VerificationResult = VerificationResult {
        is_match: false,
        score: 0.0,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding::new(values, None)
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![0.3, -0.2, 0.9]);
        assert!((a.similarity(&a).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![-1.0, 0.0]);
        assert!((a.similarity(&b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = emb(vec![0.1, 0.7, -0.4, 0.2]);
        let b = emb(vec![0.5, -0.1, 0.3, 0.9]);
        assert_eq!(a.similarity(&b).unwrap(), b.similarity(&a).unwrap());
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_error() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(
            a.similarity(&b),
            Err(CompareError::DimensionMismatch { left: 3, right: 2 })
        );
        assert!(a.euclidean_distance(&b).is_err());
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(vec![0.0, 3.0]);
        let b = emb(vec![4.0, 0.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_landmarks_eyes_require_both() {
        let mut lm = Landmarks::from_five_points([
            (10.0, 20.0),
            (30.0, 20.0),
            (20.0, 30.0),
            (12.0, 40.0),
            (28.0, 40.0),
        ]);
        assert!(lm.eyes().is_some());
        lm.right_eye = None;
        assert!(lm.eyes().is_none());
    }

    #[test]
    fn test_record_dimension() {
        let e = emb(vec![1.0; 4]);
        let mut record = UserRecord::new("alice", e.clone(), e.clone(), e);
        assert_eq!(record.dimension(), Some(4));
        record.left = emb(vec![1.0; 3]);
        assert_eq!(record.dimension(), None);
    }
}
