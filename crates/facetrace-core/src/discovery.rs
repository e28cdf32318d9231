//! Image corpus enumeration.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions picked up when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "bmp", "gif", "png"];

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("image corpus not found: {0}")]
    NotFound(PathBuf),
}

/// Every image file under `root`, recursively, sorted by path.
///
/// Extension matching is case-insensitive. A single file is accepted as a
/// one-image corpus.
pub fn discover_images(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::NotFound(root.to_path_buf()));
    }

    let mut images = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable corpus entry");
                None
            }
        })
    {
        let path = entry.path();

        if path.is_file() && has_extension(path, extensions) {
            images.push(path.to_path_buf());
        }
    }

    // Sort by path for consistent ordering
    images.sort();

    tracing::debug!(root = %root.display(), count = images.len(), "discovered images");
    Ok(images)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension().is_some_and(|ext| {
        let ext = ext.to_string_lossy();
        extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    })
}
