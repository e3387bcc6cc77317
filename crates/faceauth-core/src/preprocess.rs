//! Face localization + alignment: raw image → canonical face.

use crate::alignment::{self, AlignConfig, AlignError, CanonicalFace};
use crate::detector::{DetectorError, FaceLocator};
use crate::types::FaceDetection;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("alignment failed: {0}")]
    AlignmentFailed(#[from] AlignError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// A canonical face together with the detection it came from.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub face: CanonicalFace,
    pub detection: FaceDetection,
}

/// Pick the detection with the largest box area; ties keep the first one.
pub fn largest_face(detections: &[FaceDetection]) -> Option<&FaceDetection> {
    let mut best: Option<&FaceDetection> = None;
    for det in detections {
        if best.map_or(true, |b| det.bounding_box.area() > b.bounding_box.area()) {
            best = Some(det);
        }
    }
    best
}

pub struct Preprocessor<L> {
    locator: L,
    align: AlignConfig,
}

impl<L: FaceLocator> Preprocessor<L> {
    pub fn new(locator: L, align: AlignConfig) -> Self {
        Self { locator, align }
    }

    pub fn align_config(&self) -> &AlignConfig {
        &self.align
    }

    /// Localize the single largest face and align it.
    pub fn preprocess(&mut self, image: &RgbImage) -> Result<CanonicalFace, PreprocessError> {
        self.preprocess_with_details(image).map(|p| p.face)
    }

    /// Like [`preprocess`](Self::preprocess), also returning the chosen detection.
    pub fn preprocess_with_details(&mut self, image: &RgbImage) -> Result<Preprocessed, PreprocessError> {
        let detections = self.locator.detect(image)?;
        let detection = largest_face(&detections).ok_or(PreprocessError::NoFaceDetected)?;

        tracing::debug!(
            faces = detections.len(),
            bbox = ?detection.bounding_box,
            has_eyes = detection.landmarks.eyes().is_some(),
            "face selected"
        );

        let face = alignment::align(image, detection, &self.align)?;
        Ok(Preprocessed {
            face,
            detection: detection.clone(),
        })
    }
}
