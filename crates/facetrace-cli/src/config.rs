use facetrace_core::discovery::DEFAULT_EXTENSIONS;
use facetrace_core::error::RunError;
use facetrace_core::matching::DEFAULT_MATCH_THRESHOLD;
use facetrace_core::{PipelineConfig, DETECTION_MODEL_FILE, EMBEDDING_MODEL_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the model directory.
pub const MODEL_DIR_ENV: &str = "FACETRACE_MODEL_DIR";

/// Run configuration, loaded from a JSON or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Directory receiving every output of the run.
    pub workspace: PathBuf,
    /// Corpus searched for faces.
    #[serde(alias = "imagesPath")]
    pub images_path: PathBuf,
    /// Corpus of known individuals; required when recognition is on.
    #[serde(default)]
    pub wanted_faces: Option<PathBuf>,
    #[serde(default = "default_true", alias = "doRecognition")]
    pub do_recognition: bool,
    #[serde(default)]
    pub models: ModelPaths,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// Detection and matching tunables.
    ///
    /// `pipeline.match_threshold` defaults to 0.6, a Euclidean cut-off tuned
    /// for unnormalized 128-d descriptors. The shipped ArcFace model emits unit
    /// vectors, where 0.6 only accepts pairs with cosine similarity of at
    /// least 0.82. Set a threshold measured on your own data when recognition
    /// is on.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Where the ONNX models live. Explicit file paths win over the directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPaths {
    pub dir: Option<PathBuf>,
    pub detector: Option<PathBuf>,
    pub embedder: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl ModelPaths {
    /// Model directory: `env_dir`, else the configured one, else the default.
    fn resolve_dir(&self, env_dir: Option<PathBuf>) -> PathBuf {
        env_dir
            .or_else(|| self.dir.clone())
            .unwrap_or_else(facetrace_core::default_model_dir)
    }

    pub fn detector_path(&self, env_dir: Option<PathBuf>) -> PathBuf {
        self.detector
            .clone()
            .unwrap_or_else(|| self.resolve_dir(env_dir).join(DETECTION_MODEL_FILE))
    }

    pub fn embedder_path(&self, env_dir: Option<PathBuf>) -> PathBuf {
        self.embedder
            .clone()
            .unwrap_or_else(|| self.resolve_dir(env_dir).join(EMBEDDING_MODEL_FILE))
    }
}

/// `FACETRACE_MODEL_DIR`, when set and non-empty.
pub fn model_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(MODEL_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl RunConfig {
    /// Read and validate a configuration file. `.toml` files are parsed as
    /// TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = std::fs::read_to_string(path).map_err(|e| unreadable(path, e))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            Self::from_toml(&text, path)?
        } else {
            Self::from_json(&text, path)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Syntax errors are unreadable files; shape errors are invalid values.
    fn from_json(text: &str, path: &Path) -> Result<Self, RunError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| unreadable(path, e))?;
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    fn from_toml(text: &str, path: &Path) -> Result<Self, RunError> {
        let table: toml::Table = text.parse().map_err(|e| unreadable(path, e))?;
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.do_recognition && self.wanted_faces.is_none() {
            return Err(invalid("wanted_faces is required when recognition is enabled".into()));
        }
        self.pipeline.validate().map_err(RunError::ConfigInvalid)
    }

    /// True when recognition runs with the uncalibrated default threshold.
    pub fn threshold_needs_calibration(&self) -> bool {
        self.do_recognition && self.pipeline.match_threshold == DEFAULT_MATCH_THRESHOLD
    }

    pub fn extensions(&self) -> Vec<&str> {
        match &self.extensions {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => DEFAULT_EXTENSIONS.to_vec(),
        }
    }
}

fn unreadable(path: &Path, e: impl std::fmt::Display) -> RunError {
    RunError::ConfigUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn invalid(reason: String) -> RunError {
    RunError::ConfigInvalid(facetrace_core::config::ConfigError::Invalid {
        field: "configuration",
        reason,
    })
}
