use crate::config::Config;
use faceauth_core::detector::FaceLocator;
use faceauth_core::embedder::InferenceBackend;
use faceauth_core::{
    Embedding, EmbeddingPipeline, PipelineError, Pose, UserRecord, VerificationResult, Verifier, VerifyError,
};
use faceauth_store::{RecordStore, SaveOutcome, SqliteRecordStore, StoreError};
use image::RgbImage;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// No usable face in this pose; nothing was stored.
    Recapture { pose: Pose },
    Saved(SaveOutcome),
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        images: Box<[RgbImage; 3]>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Verify {
        name: String,
        image: RgbImage,
        reply: oneshot::Sender<Result<VerificationResult, EngineError>>,
    },
    Record {
        name: String,
        reply: oneshot::Sender<Result<Option<UserRecord>, EngineError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Register `name` from front, left and right captures, in that order.
    pub async fn enroll(&self, name: &str, images: [RgbImage; 3]) -> Result<EnrollOutcome, EngineError> {
        let name = name.to_string();
        let images = Box::new(images);
        self.request(|reply| EngineRequest::Enroll { name, images, reply }).await
    }

    /// Verify a capture against the record registered under `name`.
    pub async fn verify(&self, name: &str, image: RgbImage) -> Result<VerificationResult, EngineError> {
        let name = name.to_string();
        self.request(|reply| EngineRequest::Verify { name, image, reply }).await
    }

    pub async fn record(&self, name: &str) -> Result<Option<UserRecord>, EngineError> {
        let name = name.to_string();
        self.request(|reply| EngineRequest::Record { name, reply }).await
    }

    /// Delete every registered record.
    pub async fn clear(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Clear { reply }).await
    }

    /// Release the inference backend and stop the engine thread.
    ///
    /// Requests sent afterwards fail with `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(EngineRequest::Shutdown { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }

        let thread = self.thread.lock().ok().and_then(|mut guard| guard.take());
        if let Some(thread) = thread {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("engine thread did not exit cleanly");
            }
        }
        Ok(())
    }
}

/// Load both ONNX models and open the record store, then spawn the engine.
///
/// Fails fast if any resource is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector_path = config.detector_model_path();
    let embedder_path = config.embedder_model_path();
    let pipeline = EmbeddingPipeline::load(&detector_path, &embedder_path, config.pipeline_config())?;
    tracing::info!(
        detector = %detector_path.display(),
        embedder = %embedder_path.display(),
        model_version = %config.model_version,
        "models loaded"
    );

    let store = SqliteRecordStore::open(config.db_path())?;
    spawn_engine_with(pipeline, store, config.similarity_threshold)
}

/// Spawn the engine on a dedicated OS thread that owns `pipeline` and `store`.
pub fn spawn_engine_with<L, B, S>(
    pipeline: EmbeddingPipeline<L, B>,
    store: S,
    threshold: f32,
) -> Result<EngineHandle, EngineError>
where
    L: FaceLocator + Send + 'static,
    B: InferenceBackend + Send + 'static,
    S: RecordStore + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut engine = Engine {
        pipeline,
        store,
        verifier: Verifier::new(threshold),
    };

    let thread = std::thread::Builder::new()
        .name("faceauth-engine".into())
        .spawn(move || {
            tracing::info!(threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { name, images, reply } => {
                        let _ = reply.send(engine.enroll(&name, &images));
                    }
                    EngineRequest::Verify { name, image, reply } => {
                        let _ = reply.send(engine.verify(&name, &image));
                    }
                    EngineRequest::Record { name, reply } => {
                        let _ = reply.send(engine.store.get_by_name(&name).map_err(EngineError::from));
                    }
                    EngineRequest::Clear { reply } => {
                        let _ = reply.send(engine.store.delete_all().map_err(EngineError::from));
                    }
                    EngineRequest::Shutdown { reply } => {
                        engine.pipeline.release();
                        let _ = reply.send(());
                        break;
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        thread: Arc::new(Mutex::new(Some(thread))),
    })
}

struct Engine<L, B, S> {
    pipeline: EmbeddingPipeline<L, B>,
    store: S,
    verifier: Verifier,
}

impl<L: FaceLocator, B: InferenceBackend, S: RecordStore> Engine<L, B, S> {
    /// Embed all three poses; store the record only if every pose produced one.
    fn enroll(&mut self, name: &str, images: &[RgbImage; 3]) -> Result<EnrollOutcome, EngineError> {
        let [front, left, right] = images;
        let Some(front) = self.embed_pose(name, Pose::Front, front)? else {
            return Ok(EnrollOutcome::Recapture { pose: Pose::Front });
        };
        let Some(left) = self.embed_pose(name, Pose::Left, left)? else {
            return Ok(EnrollOutcome::Recapture { pose: Pose::Left });
        };
        let Some(right) = self.embed_pose(name, Pose::Right, right)? else {
            return Ok(EnrollOutcome::Recapture { pose: Pose::Right });
        };

        let outcome = self.store.save(&UserRecord::new(name, front, left, right))?;
        tracing::info!(user = name, ?outcome, "enroll: record saved");
        Ok(EnrollOutcome::Saved(outcome))
    }

    fn embed_pose(&mut self, name: &str, pose: Pose, image: &RgbImage) -> Result<Option<Embedding>, EngineError> {
        let embedding = self.pipeline.generate_embedding(image)?;
        if embedding.is_none() {
            tracing::info!(user = name, %pose, "enroll: pose needs recapture");
        }
        Ok(embedding)
    }

    /// The capture is embedded before the record lookup, so an unknown name
    /// costs the same pipeline run as a registered one.
    fn verify(&mut self, name: &str, image: &RgbImage) -> Result<VerificationResult, EngineError> {
        let probe = self.pipeline.generate_embedding(image)?;
        let record = self.store.get_by_name(name)?;

        let (Some(probe), Some(record)) = (probe, record) else {
            tracing::info!(user = name, "verify: no match");
            return Ok(VerificationResult::NO_MATCH);
        };

        let result = self.verifier.verify_embedding(&probe, &record.embeddings())?;
        tracing::info!(user = name, is_match = result.is_match, score = result.score, "verify: decision");
        Ok(result)
    }
}
