//! Seams between the pipeline and the pre-trained models it drives.
//!
//! The pipeline only talks to these traits; ONNX-backed implementations live
//! in [`detector`](crate::detector), [`alignment`](crate::alignment) and
//! [`recognizer`](crate::recognizer).

use crate::alignment::AlignmentError;
use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{ChipSpec, DetectionBox, Embedding, FaceChip, FaceLandmarks, Image};

/// Locates faces in an RGB buffer.
pub trait Detector {
    /// Boxes in the buffer's own coordinate space, highest confidence first.
    fn detect(&mut self, image: &Image) -> Result<Vec<DetectionBox>, DetectorError>;
}

/// Locates the five alignment landmarks of a detected face.
pub trait LandmarkModel {
    fn locate(&self, image: &Image, face: &DetectionBox) -> Result<FaceLandmarks, DetectorError>;
}

/// Cuts a normalized face chip out of a buffer given its landmarks.
pub trait ChipExtractor {
    fn extract(
        &self,
        image: &Image,
        landmarks: &FaceLandmarks,
        spec: ChipSpec,
    ) -> Result<FaceChip, AlignmentError>;
}

/// Maps face chips to embeddings, index-aligned with the input.
pub trait EmbeddingModel {
    fn embed(&mut self, chips: &[FaceChip]) -> Result<Vec<Embedding>, RecognizerError>;
}
