//! Per-image forensic record of a detection run.
//!
//! Modelled on DFXML: a creator block describing the program and its
//! execution environment, then one file object per processed image carrying
//! its size, digest and the faces found in it.

use crate::types::DetectionBox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything after this marker in a file name is stripped from the report.
const ID_DELIMITER: &str = "__id__";

const DFXML_VERSION: &str = "1.1.1";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of the detection pass over one image.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub identity: PathBuf,
    pub face_count: usize,
    pub original_size: (u32, u32),
    pub working_size: (u32, u32),
    /// Boxes in original-image coordinates.
    pub boxes: Vec<DetectionBox>,
}

/// Receives one entry per processed image.
pub trait ReportSink {
    fn record(&mut self, entry: ReportEntry);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    pub program: String,
    pub version: String,
    pub build_environment: Vec<Library>,
    pub start_date: DateTime<Utc>,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashDigest {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacialDetection {
    pub number_faces: usize,
    pub original_size: String,
    pub working_size: String,
    pub faces: Vec<FaceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub filename: String,
    pub filesize: Option<u64>,
    pub hashdigest: Option<HashDigest>,
    pub facial_detection: FacialDetection,
}

/// JSON forensic report, filled through [`ReportSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicReport {
    pub version: String,
    pub creator: Creator,
    pub fileobjects: Vec<FileObject>,
}

impl ForensicReport {
    pub fn new(program: &str, version: &str) -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        Self {
            version: DFXML_VERSION.to_string(),
            creator: Creator {
                program: program.to_string(),
                version: version.to_string(),
                build_environment: vec![
                    Library {
                        name: "onnxruntime".to_string(),
                        version: "ort 2".to_string(),
                    },
                    Library {
                        name: "image".to_string(),
                        version: "0.25".to_string(),
                    },
                ],
                start_date: Utc::now(),
                username,
            },
            fileobjects: Vec::new(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        tracing::info!(path = %path.display(), files = self.fileobjects.len(), "wrote report");
        Ok(())
    }
}

impl ReportSink for ForensicReport {
    fn record(&mut self, entry: ReportEntry) {
        let filesize = match std::fs::metadata(&entry.identity) {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                tracing::warn!(path = %entry.identity.display(), error = %e, "cannot stat file");
                None
            }
        };
        let hashdigest = match sha256_file(&entry.identity) {
            Ok(value) => Some(HashDigest {
                kind: "sha256".to_string(),
                value,
            }),
            Err(e) => {
                tracing::warn!(path = %entry.identity.display(), error = %e, "cannot hash file");
                None
            }
        };

        self.fileobjects.push(FileObject {
            filename: report_filename(&entry.identity),
            filesize,
            hashdigest,
            facial_detection: FacialDetection {
                number_faces: entry.face_count,
                original_size: format_size(entry.original_size),
                working_size: format_size(entry.working_size),
                faces: entry
                    .boxes
                    .iter()
                    .map(|b| FaceRecord {
                        left: b.left,
                        top: b.top,
                        right: b.right,
                        bottom: b.bottom,
                        confidence: b.confidence,
                    })
                    .collect(),
            },
        });
    }
}

/// File name up to the first `__id__` marker.
fn report_filename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(ID_DELIMITER) {
        Some(pos) => name[..pos].to_string(),
        None => name,
    }
}

fn format_size((w, h): (u32, u32)) -> String {
    format!("{w}x{h}")
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
