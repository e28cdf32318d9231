//! Run-level failures and their process exit codes.

use crate::config::ConfigError;
use crate::detector::DetectorError;
use crate::discovery::DiscoveryError;
use crate::matching::MatchError;
use crate::pipeline::PipelineError;
use crate::recognizer::RecognizerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid size bounds: {0}")]
    InvalidBounds(#[source] ConfigError),
    #[error("cannot read configuration {path}: {reason}")]
    ConfigUnreadable { path: String, reason: String },
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[source] ConfigError),
    #[error(transparent)]
    CorpusMissing(#[from] DiscoveryError),
    #[error("cannot load embedding model: {0}")]
    EmbeddingModel(#[source] RecognizerError),
    #[error("cannot load detection model: {0}")]
    DetectionModel(#[source] DetectorError),
    #[error("no faces found in the known-individuals corpus")]
    NoKnownFaces,
    #[error("no faces found in the target corpus")]
    NoFacesFound,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("{0}")]
    Other(String),
}

impl RunError {
    /// Stable process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::InvalidBounds(_) => 1,
            RunError::ConfigUnreadable { .. } => 2,
            RunError::ConfigInvalid(_) => 3,
            RunError::CorpusMissing(_) => 4,
            RunError::EmbeddingModel(_) => 5,
            RunError::DetectionModel(_) => 7,
            RunError::NoKnownFaces => 8,
            RunError::NoFacesFound => 9,
            RunError::Inference(_) => 10,
            RunError::Other(_) => 11,
        }
    }
}

impl From<PipelineError> for RunError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Detector(_) | PipelineError::Alignment(_) => {
                RunError::Inference(e.to_string())
            }
            other => RunError::Other(other.to_string()),
        }
    }
}

impl From<RecognizerError> for RunError {
    fn from(e: RecognizerError) -> Self {
        RunError::Inference(e.to_string())
    }
}

impl From<MatchError> for RunError {
    fn from(e: MatchError) -> Self {
        RunError::Other(e.to_string())
    }
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        RunError::Other(e.to_string())
    }
}
