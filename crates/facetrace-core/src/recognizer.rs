//! ArcFace face recognizer via ONNX Runtime.
//!
//! Turns padded face chips into 512-dimensional L2-normalized embeddings,
//! using the w600k_r50 ArcFace model.

use crate::model::EmbeddingModel;
use crate::types::{ChipSpec, Embedding, FaceChip, Image, PixelLayout};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0, ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face chip must be RGB, got {0:?}")]
    UnsupportedLayout(PixelLayout),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based embedding model.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    fn embed_one(&mut self, chip: &FaceChip) -> Result<Embedding, RecognizerError> {
        let input = Self::preprocess(chip)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// Strip the chip margin, resize to 112x112 and build a NCHW float tensor.
    fn preprocess(chip: &FaceChip) -> Result<Array4<f32>, RecognizerError> {
        if chip.image.layout != PixelLayout::Rgb {
            return Err(RecognizerError::UnsupportedLayout(chip.image.layout));
        }

        let (x, y, side) = face_square(chip.spec, chip.image.width.min(chip.image.height));
        let face = chip.image.crop(x, y, side, side);
        let size = ARCFACE_INPUT_SIZE as u32;

        let buffer = face.into_rgb_buffer().ok_or_else(|| {
            RecognizerError::InferenceFailed("chip buffer does not match its dimensions".into())
        })?;
        let resized = if buffer.dimensions() == (size, size) {
            buffer
        } else {
            imageops::resize(&buffer, size, size, FilterType::Triangle)
        };
        let face = Image::from_rgb_buffer(resized);

        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (i, px) in face.data.chunks_exact(3).enumerate() {
            let (y, x) = (i / size, i % size);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        Ok(tensor)
    }
}

impl EmbeddingModel for ArcFaceEmbedder {
    fn embed(&mut self, chips: &[FaceChip]) -> Result<Vec<Embedding>, RecognizerError> {
        let embeddings = chips
            .iter()
            .map(|chip| self.embed_one(chip))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = embeddings.len(), "embedded face chips");
        Ok(embeddings)
    }
}

/// The canonical face square `(x, y, side)` inside a padded chip of `side_px` pixels.
fn face_square(spec: ChipSpec, side_px: u32) -> (u32, u32, u32) {
    let span = 1.0 + 2.0 * spec.padding.max(0.0);
    let offset = (spec.padding.max(0.0) / span * side_px as f32).round() as u32;
    let side = (side_px as f32 / span).round().max(1.0) as u32;
    (offset, offset, side.min(side_px.saturating_sub(offset)).max(1))
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(size: u32, padding: f32, fill: u8) -> FaceChip {
        let mut image = Image::blank(size, size, PixelLayout::Rgb);
        image.data.fill(fill);
        FaceChip {
            image,
            spec: ChipSpec { size, padding },
        }
    }

    #[test]
    fn test_face_square_default_chip() {
        // 150px chip with 0.25 padding: face spans [25, 125)
        assert_eq!(face_square(ChipSpec::default(), 150), (25, 25, 100));
    }

    #[test]
    fn test_face_square_unpadded() {
        assert_eq!(face_square(ChipSpec { size: 112, padding: 0.0 }, 112), (0, 0, 112));
    }

    #[test]
    fn test_preprocess_output_shape() {
        let tensor = ArcFaceEmbedder::preprocess(&chip(150, 0.25, 128)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let tensor = ArcFaceEmbedder::preprocess(&chip(112, 0.0, 128)).unwrap();
        // 128 - 127.5 = 0.5, / 127.5 ≈ 0.00392
        let val = tensor[[0, 0, 0, 0]];
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_drops_the_margin() {
        // Bright border in the padding, dark face square in the middle.
        let mut c = chip(150, 0.25, 255);
        let stride = c.image.row_stride();
        for y in 25..125 {
            c.image.data[y * stride + 25 * 3..y * stride + 125 * 3].fill(0);
        }
        let tensor = ArcFaceEmbedder::preprocess(&c).unwrap();
        let black = (0.0 - ARCFACE_MEAN) / ARCFACE_STD;
        for &(y, x) in &[(0, 0), (0, 111), (111, 0), (111, 111), (56, 56)] {
            assert!((tensor[[0, 1, y, x]] - black).abs() < 1e-6, "margin leaked at ({x}, {y})");
        }
    }

    #[test]
    fn test_preprocess_rejects_non_rgb() {
        let mut c = chip(112, 0.0, 0);
        c.image = Image::blank(112, 112, PixelLayout::Bgr);
        assert!(matches!(
            ArcFaceEmbedder::preprocess(&c),
            Err(RecognizerError::UnsupportedLayout(PixelLayout::Bgr))
        ));
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ArcFaceEmbedder::load(Path::new("/nonexistent/w600k_r50.onnx")).err().unwrap();
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}
