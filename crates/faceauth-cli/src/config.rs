use faceauth_core::alignment::{AlignConfig, FallbackCrop};
use faceauth_core::detector::DetectorConfig;
use faceauth_core::embedder::{EmbedderConfig, TensorLayout};
use faceauth_core::verifier::DEFAULT_THRESHOLD;
use faceauth_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "FACEAUTH_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration.
///
/// Layered: built-in defaults, then the TOML file named by `FACEAUTH_CONFIG`,
/// then `FACEAUTH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Face localization model, relative to `model_dir`.
    pub detector_model: String,
    /// Embedding model, relative to `model_dir`.
    pub embedder_model: String,
    /// Tag stored with every embedding; records from another version are refused.
    pub model_version: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Clamped cosine similarity needed for a positive match.
    pub similarity_threshold: f32,
    /// Timeout in seconds for a verify operation.
    pub verify_timeout_secs: u64,
    /// ONNX Runtime intra-op threads for each model.
    pub inference_threads: usize,
    pub alignment: AlignConfig,
    pub detector: DetectorSection,
    pub embedder: EmbedderSection,
}

/// `[detector]` section. Thread count comes from `inference_threads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSection {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorSection {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            confidence_threshold: defaults.confidence_threshold,
            nms_threshold: defaults.nms_threshold,
        }
    }
}

/// `[embedder]` section. The version tag and thread count are top-level keys
/// so there is exactly one place to set them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbedderSection {
    pub layout: TensorLayout,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            detector_model: "det_10g.onnx".to_string(),
            embedder_model: "edgeface_s.onnx".to_string(),
            model_version: EmbedderConfig::default().model_version,
            db_path: data_dir.join("faces.db"),
            similarity_threshold: DEFAULT_THRESHOLD,
            verify_timeout_secs: 10,
            inference_threads: 2,
            alignment: AlignConfig::default(),
            detector: DetectorSection::default(),
            embedder: EmbedderSection::default(),
        }
    }
}

impl Config {
    /// Load from the process environment and the file it names, if any.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "config file loaded");
                Some(text)
            }
            None => None,
        };
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from optional TOML text and an environment lookup.
    pub fn from_sources(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(text) => toml::from_str(text)?,
            None => Self::default(),
        };
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("FACEAUTH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACEAUTH_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = env("FACEAUTH_EMBEDDER_MODEL") {
            self.embedder_model = v;
        }
        if let Some(v) = env("FACEAUTH_MODEL_VERSION") {
            self.model_version = v;
        }
        if let Some(v) = env("FACEAUTH_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        override_parsed(&env, "FACEAUTH_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&env, "FACEAUTH_VERIFY_TIMEOUT_SECS", &mut self.verify_timeout_secs);
        override_parsed(&env, "FACEAUTH_INFERENCE_THREADS", &mut self.inference_threads);
        override_parsed(&env, "FACEAUTH_TARGET_SIZE", &mut self.alignment.target_size);
        override_parsed(&env, "FACEAUTH_DETECTION_THRESHOLD", &mut self.detector.confidence_threshold);

        match env("FACEAUTH_FALLBACK_CROP").as_deref() {
            Some("standard") => self.alignment.fallback = FallbackCrop::Standard,
            Some("simple") => self.alignment.fallback = FallbackCrop::Simple,
            Some(other) => tracing::warn!(value = other, "ignoring FACEAUTH_FALLBACK_CROP"),
            None => {}
        }
        match env("FACEAUTH_EMBEDDER_LAYOUT").as_deref() {
            Some("nchw") => self.embedder.layout = TensorLayout::Nchw,
            Some("nhwc") => self.embedder.layout = TensorLayout::Nhwc,
            Some(other) => tracing::warn!(value = other, "ignoring FACEAUTH_EMBEDDER_LAYOUT"),
            None => {}
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.verify_timeout_secs == 0 {
            return Err(ConfigError::Invalid("verify_timeout_secs must be positive".into()));
        }
        if self.alignment.target_size == 0 {
            return Err(ConfigError::Invalid("alignment.target_size must be positive".into()));
        }
        let eye_distance = self.alignment.eye_distance_fraction;
        if !(eye_distance > 0.0 && eye_distance <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "alignment.eye_distance_fraction must be within (0, 1], got {eye_distance}"
            )));
        }
        let eye_line = self.alignment.eye_line_fraction;
        if !(eye_line > 0.0 && eye_line < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "alignment.eye_line_fraction must be within (0, 1), got {eye_line}"
            )));
        }
        for (key, value) in [
            ("detector.confidence_threshold", self.detector.confidence_threshold),
            ("detector.nms_threshold", self.detector.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{key} must be within [0, 1], got {value}")));
            }
        }
        if self.model_version.is_empty() {
            return Err(ConfigError::Invalid("model_version must not be empty".into()));
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    /// Per-stage pipeline settings, with the top-level model version and
    /// thread count filled in.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            alignment: self.alignment.clone(),
            detector: DetectorConfig {
                confidence_threshold: self.detector.confidence_threshold,
                nms_threshold: self.detector.nms_threshold,
                intra_threads: self.inference_threads,
            },
            embedder: EmbedderConfig {
                layout: self.embedder.layout,
                model_version: self.model_version.clone(),
                intra_threads: self.inference_threads,
                ..EmbedderConfig::default()
            },
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// `$XDG_DATA_HOME/faceauth`, falling back to `~/.local/share/faceauth`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceauth")
}

fn override_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = env(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}
