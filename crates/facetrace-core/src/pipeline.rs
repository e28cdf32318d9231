//! Detection pass over an image corpus.
//!
//! Each image is brought to its working resolution, split into tiles, and
//! every tile is converted, optionally upscaled and run through the detector.
//! Faces become chips in one flat sequence; the corpus index records how
//! many each image contributed.

use crate::alignment::AlignmentError;
use crate::config::{PipelineConfig, SizeBounds};
use crate::convert::{ConvertError, PixelConverter};
use crate::corpus::CorpusIndex;
use crate::detector::DetectorError;
use crate::model::{ChipExtractor, Detector, LandmarkModel};
use crate::report::{ReportEntry, ReportSink};
use crate::tiler::{self, Tile};
use crate::types::{DetectionBox, FaceChip, Image};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PROGRESS_INTERVAL: usize = 100;
const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 3;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot load {path}: {source}")]
    Load {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("cannot save annotated image {path}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("annotation directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("chip extraction failed: {0}")]
    Alignment(#[from] AlignmentError),
    #[error("{width}x{height} tile buffer does not match its dimensions")]
    MalformedTile { width: u32, height: u32 },
    #[error("upscaling a {width}x{height} tile by {factor} overflows")]
    UpscaleOverflow { width: u32, height: u32, factor: u32 },
}

/// Faces found in one corpus.
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    /// Chips of every face, in image order then detection order.
    pub chips: Vec<FaceChip>,
    pub index: CorpusIndex,
    pub total_faces: usize,
    /// Images with at least one face, recorded when annotating.
    pub images_with_faces: Vec<PathBuf>,
}

/// Drives the detection collaborators over a list of images.
pub struct DetectionOrchestrator<'a> {
    detector: &'a mut dyn Detector,
    landmarks: &'a dyn LandmarkModel,
    extractor: &'a dyn ChipExtractor,
    converter: PixelConverter,
    config: PipelineConfig,
    annotation_dir: Option<PathBuf>,
    report: Option<&'a mut dyn ReportSink>,
}

impl<'a> DetectionOrchestrator<'a> {
    pub fn new(
        detector: &'a mut dyn Detector,
        landmarks: &'a dyn LandmarkModel,
        extractor: &'a dyn ChipExtractor,
        converter: PixelConverter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            landmarks,
            extractor,
            converter,
            config,
            annotation_dir: None,
            report: None,
        }
    }

    /// Save annotated copies of images with faces into `dir`.
    pub fn with_annotation_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.annotation_dir = Some(dir.into());
        self
    }

    pub fn with_report(mut self, sink: &'a mut dyn ReportSink) -> Self {
        self.report = Some(sink);
        self
    }

    /// Detect faces in every image, in order. The first failure aborts the pass.
    pub fn process_images(
        &mut self,
        paths: &[PathBuf],
        bounds: SizeBounds,
        annotate: bool,
    ) -> Result<DetectionOutcome, PipelineError> {
        if annotate {
            if let Some(dir) = &self.annotation_dir {
                std::fs::create_dir_all(dir)?;
            }
        }

        let mut outcome = DetectionOutcome::default();

        for (position, path) in paths.iter().enumerate() {
            let (count, canvas) = self.process_one(path, bounds, annotate, &mut outcome.chips)?;
            outcome.index.push(path.clone(), count);
            outcome.total_faces += count;

            if let Some(canvas) = canvas.filter(|_| count > 0) {
                if let Some(dir) = &self.annotation_dir {
                    let out = dir.join(annotated_name(position, path));
                    canvas
                        .save(&out)
                        .map_err(|source| PipelineError::Save { path: out.clone(), source })?;
                    tracing::debug!(path = %out.display(), "saved annotated image");
                }
                outcome.images_with_faces.push(path.clone());
            }

            if (position + 1) % PROGRESS_INTERVAL == 0 {
                tracing::info!(
                    processed = position + 1,
                    total = paths.len(),
                    faces = outcome.total_faces,
                    "detection progress"
                );
            }
        }

        tracing::info!(
            images = paths.len(),
            faces = outcome.total_faces,
            "detection pass complete"
        );
        Ok(outcome)
    }

    /// Run one image through the tiles. Returns its face count and, when
    /// annotating, the full-resolution copy with boxes drawn.
    fn process_one(
        &mut self,
        path: &Path,
        bounds: SizeBounds,
        annotate: bool,
        chips: &mut Vec<FaceChip>,
    ) -> Result<(usize, Option<RgbImage>), PipelineError> {
        let decoded = image::open(path).map_err(|source| PipelineError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let original_size = (decoded.width(), decoded.height());
        let working_size = bounds.working_size(original_size.0, original_size.1);

        let mut canvas = annotate.then(|| decoded.to_rgb8());
        let working = to_working(decoded, working_size);
        // Floor halving makes the two axis ratios differ.
        let to_original = (
            axis_ratio(original_size.0, working_size.0),
            axis_ratio(original_size.1, working_size.1),
        );

        let grid = tiler::split(&working, self.config.tile_max_height, self.config.tile_max_width);
        if !grid.is_lossless() {
            tracing::warn!(
                path = %path.display(),
                uncovered_rows = grid.uncovered_rows,
                uncovered_cols = grid.uncovered_cols,
                "tile grid does not cover the whole image"
            );
        }
        tracing::debug!(
            path = %path.display(),
            original = ?original_size,
            working = ?working_size,
            rows = grid.rows,
            cols = grid.cols,
            "tiled image"
        );

        let mut boxes = Vec::new();
        for tile in &grid.tiles {
            for face in self.detect_tile(tile, chips)? {
                let mapped = face.scaled_xy(to_original.0, to_original.1);
                if let Some(canvas) = canvas.as_mut() {
                    draw_box(canvas, &mapped);
                }
                boxes.push(mapped);
            }
        }

        let count = boxes.len();
        if let Some(report) = self.report.as_mut() {
            report.record(ReportEntry {
                identity: path.to_path_buf(),
                face_count: count,
                original_size,
                working_size,
                boxes,
            });
        }

        Ok((count, canvas))
    }

    /// Detect, chip and map back to working-image coordinates the faces of one tile.
    fn detect_tile(
        &mut self,
        tile: &Tile,
        chips: &mut Vec<FaceChip>,
    ) -> Result<Vec<DetectionBox>, PipelineError> {
        if tile.image.area() == 0 {
            return Ok(Vec::new());
        }

        let converted = self.converter.convert(&tile.image)?;
        let factor = self.config.upscale_factor.max(1);
        let floor = self.config.resolution_floor;
        let (buffer, factor) =
            if factor > 1 && (converted.width < floor || converted.height < floor) {
                (upscale(converted, factor)?, factor)
            } else {
                (converted, 1)
            };

        let faces = self.detector.detect(&buffer)?;
        let mut mapped = Vec::with_capacity(faces.len());
        for face in faces {
            let landmarks = self.landmarks.locate(&buffer, &face)?;
            chips.push(self.extractor.extract(&buffer, &landmarks, self.config.chip)?);
            mapped.push(
                face.scaled(1.0 / factor as f32)
                    .translated(tile.x_offset as f32, tile.y_offset as f32),
            );
        }
        Ok(mapped)
    }
}

fn to_working(decoded: DynamicImage, (width, height): (u32, u32)) -> Image {
    if (decoded.width(), decoded.height()) == (width, height) {
        Image::from_dynamic(decoded)
    } else {
        Image::from_dynamic(decoded.resize_exact(width, height, FilterType::Triangle))
    }
}

fn axis_ratio(original: u32, working: u32) -> f32 {
    if working == 0 {
        1.0
    } else {
        original as f32 / working as f32
    }
}

fn upscale(image: Image, factor: u32) -> Result<Image, PipelineError> {
    let (width, height) = (image.width, image.height);
    let (Some(up_w), Some(up_h)) = (width.checked_mul(factor), height.checked_mul(factor)) else {
        return Err(PipelineError::UpscaleOverflow { width, height, factor });
    };
    let buffer = image
        .into_rgb_buffer()
        .ok_or(PipelineError::MalformedTile { width, height })?;
    let resized = image::imageops::resize(&buffer, up_w, up_h, FilterType::Triangle);
    Ok(Image::from_rgb_buffer(resized))
}

fn draw_box(canvas: &mut RgbImage, face: &DetectionBox) {
    let left = face.left.round() as i32;
    let top = face.top.round() as i32;
    let width = face.width().round().max(1.0) as i32;
    let height = face.height().round().max(1.0) as i32;
    for t in 0..BOX_THICKNESS {
        let rect = Rect::at(left - t, top - t).of_size((width + 2 * t) as u32, (height + 2 * t) as u32);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

fn annotated_name(position: usize, path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{position:05}_{stem}.png")
}
