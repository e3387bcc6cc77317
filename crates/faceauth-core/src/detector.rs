//! Face localization.
//!
//! [`FaceLocator`] is the seam to whatever detector the host provides.
//! [`ScrfdLocator`] implements it with the SCRFD model over ONNX Runtime:
//! letterboxed 640×640 input, anchor-free decoding on three strides, and
//! non-maximum suppression.

use crate::types::{BoundingBox, FaceDetection, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in an RGB image.
///
/// Implementations return every face found; an empty list means "no face".
pub trait FaceLocator {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError>;
}

/// Decoding thresholds for [`ScrfdLocator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Scale and offset applied when letterboxing into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Letterboxed model coordinates back to source-image coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output slots `(score, bbox, kps)` for one stride.
type StrideSlots = (usize, usize, usize);

/// SCRFD detector session.
pub struct ScrfdLocator {
    session: Session,
    config: DetectorConfig,
    slots: [StrideSlots; 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                names.len()
            )));
        }

        Ok(Self {
            session,
            config,
            slots: output_slots(&names),
        })
    }

    /// Letterbox and normalize into a 1×3×640×640 tensor.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = image.dimensions();
        let size = SCRFD_INPUT_SIZE as usize;
        let letterbox = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);

        let new_w = ((width as f32 * letterbox.scale).round() as u32).max(1);
        let new_h = ((height as f32 * letterbox.scale).round() as u32).max(1);
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        // Padding stays at 0.0, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
        for (x, y, px) in resized.enumerate_pixels() {
            let (tx, ty) = (ox + x as usize, oy + y as usize);
            if tx >= size || ty >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocator for ScrfdLocator {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.slots[level];
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level_out = StrideOutput {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(level_out.decode(&letterbox, self.config.confidence_threshold));
        }

        let faces = non_max_suppression(candidates, self.config.nms_threshold);
        tracing::debug!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Map output tensors to stride slots by name (`score_8`, `bbox_16`, ...),
/// falling back to the standard positional export order.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let named: Option<Vec<StrideSlots>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw head outputs for one stride level.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideOutput<'_> {
    fn decode(&self, letterbox: &Letterbox, threshold: f32) -> Vec<FaceDetection> {
        let grid = SCRFD_INPUT_SIZE as usize / self.stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let step = self.stride as f32;

        (0..anchors)
            .filter_map(|idx| {
                let score = *self.scores.get(idx)?;
                if score <= threshold {
                    return None;
                }
                let cell = idx / SCRFD_ANCHORS_PER_CELL;
                let ax = (cell % grid) as f32 * step;
                let ay = (cell / grid) as f32 * step;

                let b = self.bboxes.get(idx * 4..idx * 4 + 4)?;
                let (x1, y1) = letterbox.unmap(ax - b[0] * step, ay - b[1] * step);
                let (x2, y2) = letterbox.unmap(ax + b[2] * step, ay + b[3] * step);

                let landmarks = self
                    .kps
                    .get(idx * 10..idx * 10 + 10)
                    .map(|k| {
                        Landmarks::from_five_points(std::array::from_fn(|i| {
                            letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
                        }))
                    })
                    .unwrap_or_default();

                Some(FaceDetection {
                    bounding_box: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
                    landmarks,
                    confidence: Some(score),
                })
            })
            .collect()
    }
}

/// Greedy NMS by confidence; the result is sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .partial_cmp(&a.confidence.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceDetection> = Vec::new();
    for candidate in candidates {
        if keep
            .iter()
            .all(|k| k.bounding_box.iou(&candidate.bounding_box) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceDetection {
        FaceDetection {
            bounding_box: BoundingBox::new(x, y, w, h),
            landmarks: Landmarks::default(),
            confidence: Some(conf),
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = non_max_suppression(
            vec![
                face(5.0, 5.0, 100.0, 100.0, 0.8),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
                face(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confs: Vec<f32> = result.iter().filter_map(|f| f.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 128]));
        let (tensor, lb) = ScrfdLocator::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding rows normalize to zero.
        assert_eq!(tensor[[0, 0, 0, 10]], 0.0);
        let row = lb.pad_y as usize + 10;
        assert!((tensor[[0, 0, row, 10]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
        assert!((tensor[[0, 1, row, 10]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
    }

    #[test]
    fn test_output_slots_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_slots(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_slots_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_slots(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_single_anchor() {
        // Stride 32 → 20×20 grid, 800 anchors. Light up anchor for cell (2, 1).
        let grid = 20;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0; anchors * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let mut kps = vec![0.0; anchors * 10];
        kps[idx * 10] = -0.5;

        let level = StrideOutput {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let identity = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let dets = level.decode(&identity, 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bounding_box, BoundingBox::new(32.0, 0.0, 64.0, 64.0));
        let left_eye = dets[0].landmarks.left_eye.unwrap();
        assert_eq!((left_eye.x, left_eye.y), (48.0, 32.0));
    }
}
