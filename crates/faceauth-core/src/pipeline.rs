//! Image → embedding, composed from preprocessing and the embedder.

use crate::alignment::{AlignConfig, AlignError, CanonicalFace};
use crate::detector::{DetectorConfig, DetectorError, FaceLocator, ScrfdLocator};
use crate::embedder::{Embedder, EmbedderConfig, EmbedderError, InferenceBackend, OnnxBackend};
use crate::preprocess::{PreprocessError, Preprocessor};
use crate::types::{Embedding, FaceDetection};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("alignment failed: {0}")]
    AlignmentFailed(AlignError),
    #[error("detector error: {0}")]
    Detector(DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

impl PipelineError {
    /// True for capture-quality failures that a new capture may fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::NoFaceDetected | PipelineError::AlignmentFailed(_))
    }
}

impl From<PreprocessError> for PipelineError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::NoFaceDetected => PipelineError::NoFaceDetected,
            PreprocessError::AlignmentFailed(e) => PipelineError::AlignmentFailed(e),
            PreprocessError::Detector(e) => PipelineError::Detector(e),
        }
    }
}

/// Geometry and model settings for the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub alignment: AlignConfig,
    pub detector: DetectorConfig,
    pub embedder: EmbedderConfig,
}

/// Embedding plus the intermediates that produced it.
#[derive(Debug, Clone)]
pub struct EmbeddingOutcome {
    pub embedding: Embedding,
    pub face: CanonicalFace,
    pub detection: FaceDetection,
}

pub struct EmbeddingPipeline<L, B> {
    preprocessor: Preprocessor<L>,
    embedder: Embedder<B>,
}

impl EmbeddingPipeline<ScrfdLocator, OnnxBackend> {
    /// Load both ONNX models. Fails if either artifact is missing.
    pub fn load(detector_model: &Path, embedder_model: &Path, config: PipelineConfig) -> Result<Self, PipelineError> {
        let locator = ScrfdLocator::load(detector_model, config.detector).map_err(PipelineError::Detector)?;
        let embedder = Embedder::load(embedder_model, config.embedder)?;
        Ok(Self::new(Preprocessor::new(locator, config.alignment), embedder))
    }
}

impl<L: FaceLocator, B: InferenceBackend> EmbeddingPipeline<L, B> {
    pub fn new(preprocessor: Preprocessor<L>, embedder: Embedder<B>) -> Self {
        Self { preprocessor, embedder }
    }

    pub fn is_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    pub fn model_version(&self) -> &str {
        &self.embedder.config().model_version
    }

    /// Release the inference backend.
    pub fn release(&mut self) {
        self.embedder.release();
    }

    /// Embed the largest face in `image`.
    ///
    /// No face or failed alignment yields `Ok(None)`; detector and backend
    /// failures are returned as errors.
    pub fn generate_embedding(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        match self.generate_embedding_with_details(image) {
            Ok(outcome) => Ok(Some(outcome.embedding)),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(reason = %e, "no embedding for capture");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Embed the largest face in `image`, reporting which stage failed.
    pub fn generate_embedding_with_details(&mut self, image: &RgbImage) -> Result<EmbeddingOutcome, PipelineError> {
        if !self.embedder.is_ready() {
            return Err(EmbedderError::BackendUnavailable.into());
        }

        let pre = self.preprocessor.preprocess_with_details(image)?;
        let embedding = self.embedder.embed(&pre.face)?;

        tracing::debug!(
            dim = embedding.dim(),
            head = ?&embedding.values[..embedding.dim().min(5)],
            "embedding generated"
        );

        Ok(EmbeddingOutcome {
            embedding,
            face: pre.face,
            detection: pre.detection,
        })
    }
}
