//! Embedder adapter: canonical face crop → L2-normalized embedding.
//!
//! Pixels are mapped from [0, 255] to [-1, 1] and fed to a fixed-size face
//! embedding network (112×112×3 in, 512 floats out). The network itself sits
//! behind [`InferenceBackend`]; [`OnnxBackend`] runs it with ONNX Runtime.

use crate::alignment::{CanonicalFace, CANONICAL_SIZE};
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array4, ArrayView4};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

pub const EMBEDDING_DIM: usize = 512;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5; // symmetric: 0 → -1.0, 255 → 1.0

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference backend is not initialized")]
    BackendUnavailable,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model input tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// 1×3×H×W, the usual ONNX export.
    #[default]
    Nchw,
    /// 1×H×W×3, as exported from TFLite.
    Nhwc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub input_size: u32,
    pub embedding_dim: usize,
    pub layout: TensorLayout,
    /// Tag stored with every embedding this model produces.
    pub model_version: String,
    pub intra_threads: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: CANONICAL_SIZE,
            embedding_dim: EMBEDDING_DIM,
            layout: TensorLayout::Nchw,
            model_version: "edgeface_s".to_string(),
            intra_threads: 2,
        }
    }
}

/// A loaded embedding network.
///
/// Calls take `&mut self`: one handle serves one caller at a time.
pub trait InferenceBackend {
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, EmbedderError>;
}

/// Embedding network running on ONNX Runtime.
pub struct OnnxBackend {
    session: Session,
}

impl OnnxBackend {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }
}

impl InferenceBackend for OnnxBackend {
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, EmbedderError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input)?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;
        Ok(raw.to_vec())
    }
}

/// Divide by the Euclidean norm. A zero vector is returned unchanged.
pub fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Owns the inference backend from load until [`Embedder::release`].
pub struct Embedder<B> {
    backend: Option<B>,
    config: EmbedderConfig,
}

impl Embedder<OnnxBackend> {
    /// Load the ONNX embedding model.
    pub fn load(model_path: &Path, config: EmbedderConfig) -> Result<Self, EmbedderError> {
        let backend = OnnxBackend::load(model_path, config.intra_threads)?;
        Ok(Self::new(backend, config))
    }
}

impl<B: InferenceBackend> Embedder<B> {
    pub fn new(backend: B, config: EmbedderConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    /// Drop the backend. Later `embed` calls fail with `BackendUnavailable`.
    pub fn release(&mut self) {
        if self.backend.take().is_some() {
            tracing::info!(model_version = %self.config.model_version, "embedding backend released");
        }
    }

    /// Embed a canonical face.
    pub fn embed(&mut self, face: &CanonicalFace) -> Result<Embedding, EmbedderError> {
        let backend = self.backend.as_mut().ok_or(EmbedderError::BackendUnavailable)?;

        let size = self.config.input_size;
        let image = if face.dimensions() == (size, size) {
            Cow::Borrowed(face.image())
        } else {
            tracing::debug!(from = ?face.dimensions(), to = size, "resizing face to model input");
            Cow::Owned(imageops::resize(face.image(), size, size, FilterType::Triangle))
        };

        let input = to_tensor(&image, self.config.layout);
        let raw = backend.infer(input.view())?;

        if raw.len() != self.config.embedding_dim {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.config.embedding_dim,
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw), Some(self.config.model_version.clone())))
    }
}

/// Normalize an RGB raster into a float tensor in the given layout.
fn to_tensor(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
    };

    for (x, y, px) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (px[c] as f32 - INPUT_MEAN) / INPUT_STD;
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
            }
        }
    }

    tensor
}
