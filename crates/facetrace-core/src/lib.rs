//! facetrace-core: tiled face detection and cross-corpus face matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. The detection pass only sees
//! the collaborator traits in [`model`].

pub mod alignment;
pub mod config;
pub mod convert;
pub mod corpus;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod matching;
pub mod model;
pub mod pipeline;
pub mod recognizer;
pub mod report;
pub mod tiler;
pub mod types;

pub use config::{PipelineConfig, SizeBounds};
pub use convert::PixelConverter;
pub use corpus::{CorpusEntry, CorpusIndex};
pub use error::RunError;
pub use matching::{reconcile, reconcile_flat, CorpusEmbeddings, Match, MatchReport};
pub use model::{ChipExtractor, Detector, EmbeddingModel, LandmarkModel};
pub use pipeline::{DetectionOrchestrator, DetectionOutcome};
pub use report::{ForensicReport, ReportEntry, ReportSink};
pub use types::{ChipSpec, DetectionBox, Embedding, FaceChip, FaceLandmarks, Image, PixelLayout};

use std::path::PathBuf;

/// SCRFD detection model file name.
pub const DETECTION_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace embedding model file name.
pub const EMBEDDING_MODEL_FILE: &str = "w600k_r50.onnx";

/// Directory searched for ONNX models when none is configured.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetrace")
        .join("models")
}
