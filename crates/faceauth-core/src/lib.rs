//! faceauth-core — face-to-embedding pipeline and verification.
//!
//! Localizes a face (SCRFD via ONNX Runtime, or any [`FaceLocator`]), aligns
//! it to a canonical 112×112 crop, embeds it with a fixed network behind
//! [`InferenceBackend`], and decides matches by cosine similarity.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod pipeline;
pub mod preprocess;
pub mod types;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use alignment::{AlignConfig, CanonicalFace, FallbackCrop};
pub use detector::{FaceLocator, ScrfdLocator};
pub use embedder::{Embedder, InferenceBackend, OnnxBackend};
pub use pipeline::{EmbeddingPipeline, PipelineConfig, PipelineError};
pub use types::{BoundingBox, Embedding, FaceDetection, Landmarks, Point, Pose, UserRecord, VerificationResult};
pub use verifier::{Verifier, VerifyError};
