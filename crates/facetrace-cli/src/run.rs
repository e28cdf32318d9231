//! One batch run: detect faces in both corpora, embed, match, write outputs.

use crate::config::{model_dir_from_env, RunConfig};
use anyhow::Context;
use facetrace_core::alignment::AlignedChipExtractor;
use facetrace_core::detector::{ScrfdDetector, ScrfdLandmarks};
use facetrace_core::discovery::discover_images;
use facetrace_core::recognizer::ArcFaceEmbedder;
use facetrace_core::{
    reconcile, ChipExtractor, CorpusEmbeddings, DetectionOrchestrator, Detector, EmbeddingModel,
    ForensicReport, LandmarkModel, MatchReport, PixelConverter, RunError, SizeBounds,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const ANNOTATED_DIR: &str = "annotated";
pub const FACES_FOUND_FILE: &str = "faces_found.txt";
pub const WANTED_FILE: &str = "wanted.txt";
pub const MATCHES_FILE: &str = "matches.txt";
pub const REPORT_FILE: &str = "report.json";

/// Totals of a completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub target_images: usize,
    pub target_faces: usize,
    pub known_faces: usize,
    pub matches: usize,
}

/// Loaded models a run drives. `embedder` is `None` when recognition is off.
pub struct Models<'m> {
    pub detector: &'m mut dyn Detector,
    pub landmarks: &'m dyn LandmarkModel,
    pub extractor: &'m dyn ChipExtractor,
    pub embedder: Option<&'m mut dyn EmbeddingModel>,
}

/// Both image lists of a run, in processing order.
pub struct Corpora {
    pub known: Vec<PathBuf>,
    pub target: Vec<PathBuf>,
}

pub fn run(config: &RunConfig, bounds: SizeBounds) -> Result<RunSummary, RunError> {
    tracing::info!(min = bounds.min, max = bounds.max, "size bounds");

    let extensions = config.extensions();
    let known = match (&config.wanted_faces, config.do_recognition) {
        (Some(dir), true) => discover_images(dir, &extensions)?,
        _ => Vec::new(),
    };
    let target = discover_images(&config.images_path, &extensions)?;
    tracing::info!(
        targets = target.len(),
        known = known.len(),
        "found images to search"
    );

    let env_dir = model_dir_from_env();
    let mut embedder = if config.do_recognition {
        let path = config.models.embedder_path(env_dir.clone());
        Some(ArcFaceEmbedder::load(&path).map_err(RunError::EmbeddingModel)?)
    } else {
        None
    };
    let mut detector = ScrfdDetector::load(&config.models.detector_path(env_dir))
        .map_err(RunError::DetectionModel)?
        .with_confidence_threshold(config.pipeline.detection_confidence);

    if config.threshold_needs_calibration() {
        tracing::warn!(
            threshold = config.pipeline.match_threshold,
            "match_threshold is the default tuned for other descriptors; \
             calibrate it for the ArcFace model"
        );
    }

    let models = Models {
        detector: &mut detector,
        landmarks: &ScrfdLandmarks,
        extractor: &AlignedChipExtractor,
        embedder: embedder.as_mut().map(|e| e as &mut dyn EmbeddingModel),
    };
    detect_and_match(config, bounds, &Corpora { known, target }, models)
}

/// Everything after model loading: both detection passes, outputs, matching.
///
/// Only the target pass is recorded in the report.
pub fn detect_and_match(
    config: &RunConfig,
    bounds: SizeBounds,
    corpora: &Corpora,
    models: Models<'_>,
) -> Result<RunSummary, RunError> {
    let Models {
        detector,
        landmarks,
        extractor,
        embedder,
    } = models;

    std::fs::create_dir_all(&config.workspace)?;
    let mut report = ForensicReport::new("facetrace", env!("CARGO_PKG_VERSION"));
    let mut summary = RunSummary {
        target_images: corpora.target.len(),
        ..RunSummary::default()
    };

    let known = if config.do_recognition {
        tracing::info!("searching faces in known images");
        let mut orchestrator = DetectionOrchestrator::new(
            &mut *detector,
            landmarks,
            extractor,
            converter()?,
            config.pipeline.clone(),
        );
        let known = orchestrator.process_images(&corpora.known, bounds, false)?;
        if known.total_faces == 0 {
            return Err(RunError::NoKnownFaces);
        }
        Some(known)
    } else {
        None
    };

    tracing::info!("searching faces in target images");
    let target = {
        let mut orchestrator = DetectionOrchestrator::new(
            detector,
            landmarks,
            extractor,
            converter()?,
            config.pipeline.clone(),
        )
        .with_annotation_dir(config.workspace.join(ANNOTATED_DIR))
        .with_report(&mut report);
        orchestrator.process_images(&corpora.target, bounds, true)?
    };

    summary.target_faces = target.total_faces;
    write_lines(
        &config.workspace.join(FACES_FOUND_FILE),
        target.images_with_faces.iter().map(|p| file_name(p)),
    )?;

    if target.total_faces == 0 {
        write_report(&report, &config.workspace)?;
        return Err(RunError::NoFacesFound);
    }
    tracing::info!(faces = target.total_faces, "faces extracted from target images");

    if let (Some(known), Some(embedder)) = (known, embedder) {
        summary.known_faces = known.total_faces;

        let started = std::time::Instant::now();
        let known_emb = embedder.embed(&known.chips)?;
        let target_emb = embedder.embed(&target.chips)?;
        let matches = reconcile(
            CorpusEmbeddings::new(&known.index, &known_emb),
            CorpusEmbeddings::new(&target.index, &target_emb),
            config.pipeline.match_threshold,
        )?;
        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            images = matches.images_with_matches.len(),
            "recognition finished"
        );

        summary.matches = matches.matches.len();
        write_matches(&matches, &config.workspace)?;
    }

    write_report(&report, &config.workspace)?;
    Ok(summary)
}

fn converter() -> Result<PixelConverter, RunError> {
    PixelConverter::new().map_err(|e| RunError::Other(e.to_string()))
}

fn write_matches(matches: &MatchReport, workspace: &Path) -> Result<(), RunError> {
    write_lines(
        &workspace.join(WANTED_FILE),
        matches.images_with_matches.iter().map(|p| file_name(p)),
    )?;
    write_lines(
        &workspace.join(MATCHES_FILE),
        matches.matches.iter().map(|m| {
            format!(
                "Match: {} with {}, distance: {}",
                file_name(&m.known_image),
                file_name(&m.target_image),
                m.distance
            )
        }),
    )
}

fn write_report(report: &ForensicReport, workspace: &Path) -> Result<(), RunError> {
    let path = workspace.join(REPORT_FILE);
    report
        .write_json(&path)
        .with_context(|| format!("writing {}", path.display()))
        .map_err(other)
}

fn write_lines<I>(path: &Path, lines: I) -> Result<(), RunError>
where
    I: IntoIterator,
    I::Item: std::fmt::Display,
{
    let write = || -> anyhow::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for line in lines {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        Ok(())
    };
    write()
        .with_context(|| format!("writing {}", path.display()))
        .map_err(other)
}

fn other(e: anyhow::Error) -> RunError {
    RunError::Other(format!("{e:#}"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
