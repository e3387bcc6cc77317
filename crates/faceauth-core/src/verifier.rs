//! Verification: compare a live capture against a user's stored pose embeddings.
//!
//! The score is the best clamped cosine similarity across the stored poses,
//! so a capture only has to resemble one pose closely. Failure to find or
//! align a face is reported as a plain non-match.

use crate::detector::FaceLocator;
use crate::embedder::InferenceBackend;
use crate::pipeline::{EmbeddingPipeline, PipelineError};
use crate::types::{CompareError, Embedding, VerificationResult};
use image::RgbImage;
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("embedding dimension mismatch: probe {probe}, stored {stored}")]
    DimensionMismatch { probe: usize, stored: usize },
    #[error("model version mismatch: probe {probe}, stored {stored}")]
    ModelVersionMismatch { probe: String, stored: String },
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Cosine similarity clamped into [0, 1].
///
/// Negative similarity is reported as 0, indistinguishable from orthogonal.
pub fn match_score(probe: &Embedding, stored: &Embedding) -> Result<f32, VerifyError> {
    if let (Some(p), Some(s)) = (&probe.model_version, &stored.model_version) {
        if p != s {
            return Err(VerifyError::ModelVersionMismatch {
                probe: p.clone(),
                stored: s.clone(),
            });
        }
    }

    let sim = probe.similarity(stored).map_err(|e| match e {
        CompareError::DimensionMismatch { left, right } => VerifyError::DimensionMismatch {
            probe: left,
            stored: right,
        },
    })?;
    Ok(sim.clamp(0.0, 1.0))
}

/// Strategy for scoring a probe against a user's stored embeddings.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, stored: &[&Embedding], threshold: f32) -> Result<VerificationResult, VerifyError>;
}

/// Max clamped cosine similarity over all stored embeddings.
///
/// Every stored embedding is scored; there is no early exit on a match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxCosineMatcher;

impl Matcher for MaxCosineMatcher {
    fn compare(&self, probe: &Embedding, stored: &[&Embedding], threshold: f32) -> Result<VerificationResult, VerifyError> {
        let mut best = 0.0f32;
        for (i, candidate) in stored.iter().enumerate() {
            let score = match_score(probe, candidate)?;
            tracing::debug!(pose = i, score, "pose similarity");
            best = best.max(score);
        }

        let is_match = !stored.is_empty() && best >= threshold;
        tracing::debug!(score = best, threshold, is_match, "verification decision");
        Ok(VerificationResult { is_match, score: best })
    }
}

pub struct Verifier<M = MaxCosineMatcher> {
    threshold: f32,
    matcher: M,
}

impl Verifier {
    pub fn new(threshold: f32) -> Self {
        Self::with_matcher(threshold, MaxCosineMatcher)
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl<M: Matcher> Verifier<M> {
    pub fn with_matcher(threshold: f32, matcher: M) -> Self {
        Self { threshold, matcher }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score an already computed probe embedding.
    pub fn verify_embedding(&self, probe: &Embedding, stored: &[&Embedding]) -> Result<VerificationResult, VerifyError> {
        self.matcher.compare(probe, stored, self.threshold)
    }

    /// Embed `captured` and compare it against the three stored poses.
    ///
    /// No detectable face yields `{ is_match: false, score: 0 }`. Embedding
    /// skew (length or model version) and backend failures are errors.
    pub fn verify<L: FaceLocator, B: InferenceBackend>(
        &self,
        pipeline: &mut EmbeddingPipeline<L, B>,
        captured: &RgbImage,
        stored: [&Embedding; 3],
    ) -> Result<VerificationResult, VerifyError> {
        let Some(probe) = pipeline.generate_embedding(captured)? else {
            return Ok(VerificationResult::NO_MATCH);
        };
        self.verify_embedding(&probe, &stored)
    }
}
