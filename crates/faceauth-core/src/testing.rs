//! Deterministic stand-ins for the detector and the embedding network.

use crate::alignment::AlignConfig;
use crate::detector::{DetectorError, FaceLocator};
use crate::embedder::{Embedder, EmbedderConfig, EmbedderError, InferenceBackend};
use crate::pipeline::EmbeddingPipeline;
use crate::preprocess::Preprocessor;
use crate::types::{BoundingBox, FaceDetection, Landmarks, Point};
use image::{Rgb, RgbImage};
use ndarray::ArrayView4;

pub const LEFT_EYE_RGB: Rgb<u8> = Rgb([230, 30, 30]);
pub const RIGHT_EYE_RGB: Rgb<u8> = Rgb([30, 30, 230]);

/// A 200×200 cartoon face rotated by `angle_deg` about the image center.
///
/// Eyes are solid marker colors so [`MarkerLocator`] can find them.
pub fn synthetic_face(angle_deg: f32) -> RgbImage {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    RgbImage::from_fn(200, 200, |x, y| {
        let dx = x as f32 - 100.0;
        let dy = y as f32 - 100.0;
        let lx = cos * dx + sin * dy;
        let ly = -sin * dx + cos * dy;

        let within = |cx: f32, cy: f32, r: f32| (lx - cx).powi(2) + (ly - cy).powi(2) <= r * r;
        if within(-20.0, -15.0, 5.0) {
            LEFT_EYE_RGB
        } else if within(20.0, -15.0, 5.0) {
            RIGHT_EYE_RGB
        } else if lx.abs() <= 15.0 && (ly - 20.0).abs() <= 3.0 {
            Rgb([60, 30, 30])
        } else if (lx / 45.0).powi(2) + (ly / 55.0).powi(2) <= 1.0 {
            Rgb([200, 160, 140])
        } else {
            Rgb([90, 90, 90])
        }
    })
}

fn centroid(image: &RgbImage, color: Rgb<u8>) -> Option<Point> {
    let (mut sx, mut sy, mut n) = (0.0f32, 0.0f32, 0u32);
    for (x, y, px) in image.enumerate_pixels() {
        if *px == color {
            sx += x as f32;
            sy += y as f32;
            n += 1;
        }
    }
    (n > 0).then(|| Point::new(sx / n as f32, sy / n as f32))
}

/// Finds the eye markers drawn by [`synthetic_face`].
pub struct MarkerLocator;

impl FaceLocator for MarkerLocator {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError> {
        let (Some(left), Some(right)) = (centroid(image, LEFT_EYE_RGB), centroid(image, RIGHT_EYE_RGB)) else {
            return Ok(Vec::new());
        };
        let d = ((right.x - left.x).powi(2) + (right.y - left.y).powi(2)).sqrt();
        let (mx, my) = ((left.x + right.x) / 2.0, (left.y + right.y) / 2.0);
        let bbox = BoundingBox::new(mx - 1.2 * d, my - 0.8 * d, 2.4 * d, 2.8 * d);
        Ok(vec![FaceDetection::new(bbox).with_landmarks(Landmarks {
            left_eye: Some(left),
            right_eye: Some(right),
            ..Landmarks::default()
        })])
    }
}

pub struct NoFaceLocator;

impl FaceLocator for NoFaceLocator {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Folds the input tensor into `embedding_dim` bins by flat index.
pub struct PixelSumBackend;

impl InferenceBackend for PixelSumBackend {
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, EmbedderError> {
        let dim = EmbedderConfig::default().embedding_dim;
        let mut out = vec![0.0f32; dim];
        for (j, v) in input.iter().enumerate() {
            out[j % dim] += v;
        }
        Ok(out)
    }
}

pub fn pipeline<L: FaceLocator>(locator: L) -> EmbeddingPipeline<L, PixelSumBackend> {
    EmbeddingPipeline::new(
        Preprocessor::new(locator, AlignConfig::default()),
        Embedder::new(PixelSumBackend, EmbedderConfig::default()),
    )
}
