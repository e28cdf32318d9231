use crate::detector::SCRFD_CONFIDENCE_THRESHOLD;
use crate::matching::DEFAULT_MATCH_THRESHOLD;
use crate::types::ChipSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lower pixel-area bound of the working resolution.
pub const DEFAULT_MIN_AREA: u64 = 1200 * 1200;
/// Default upper pixel-area bound of the working resolution.
pub const DEFAULT_MAX_AREA: u64 = 2500 * 2500;
/// Largest accepted tile upscale factor.
pub const MAX_UPSCALE_FACTOR: u32 = 8;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("size bounds must be non-negative, got min {min} max {max}")]
    NegativeBound { min: i64, max: i64 },
    #[error("max size {max} is smaller than min size {min}")]
    InvertedBounds { min: i64, max: i64 },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Pixel-area limits images are scaled into before tiling.
///
/// A zero `min` disables doubling. A zero `max` is only reachable together
/// with a zero `min` and disables scaling altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min: u64,
    pub max: u64,
}

impl SizeBounds {
    /// Validate raw command-line bounds.
    pub fn new(min: i64, max: i64) -> Result<Self, ConfigError> {
        if min < 0 || max < 0 {
            return Err(ConfigError::NegativeBound { min, max });
        }
        if max < min {
            return Err(ConfigError::InvertedBounds { min, max });
        }
        Ok(Self { min: min as u64, max: max as u64 })
    }

    /// No scaling at all.
    pub fn unbounded() -> Self {
        Self { min: 0, max: 0 }
    }

    /// Dimensions after halving while the area exceeds `max`, then doubling
    /// while it is below `min`.
    pub fn working_size(&self, width: u32, height: u32) -> (u32, u32) {
        let (mut w, mut h) = (width as u64, height as u64);
        if w == 0 || h == 0 {
            return (width, height);
        }
        if self.max > 0 {
            while w * h > self.max && w > 1 && h > 1 {
                w /= 2;
                h /= 2;
            }
        }
        if self.min > 0 {
            while w * h < self.min && (self.max == 0 || 4 * w * h <= self.max) {
                w *= 2;
                h *= 2;
            }
        }
        (
            w.min(u32::MAX as u64) as u32,
            h.min(u32::MAX as u64) as u32,
        )
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_AREA,
            max: DEFAULT_MAX_AREA,
        }
    }
}

/// Tunables of the detection pass and the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tile_max_height: u32,
    pub tile_max_width: u32,
    /// Tiles with either side below this are upscaled before detection.
    pub resolution_floor: u32,
    pub upscale_factor: u32,
    /// Minimum detector score for a face to be kept.
    pub detection_confidence: f32,
    pub chip: ChipSpec,
    pub match_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_max_height: 2000,
            tile_max_width: 2000,
            resolution_floor: 1500,
            upscale_factor: 2,
            detection_confidence: SCRFD_CONFIDENCE_THRESHOLD,
            chip: ChipSpec::default(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_max_height < 2 {
            return Err(invalid("tile_max_height", "must be at least 2"));
        }
        if self.tile_max_width < 2 {
            return Err(invalid("tile_max_width", "must be at least 2"));
        }
        if self.upscale_factor == 0 || self.upscale_factor > MAX_UPSCALE_FACTOR {
            return Err(invalid("upscale_factor", "must be between 1 and 8"));
        }
        if !(self.detection_confidence > 0.0 && self.detection_confidence <= 1.0) {
            return Err(invalid("detection_confidence", "must be in (0, 1]"));
        }
        if self.chip.size == 0 {
            return Err(invalid("chip.size", "must be positive"));
        }
        if !self.chip.padding.is_finite() || self.chip.padding < 0.0 {
            return Err(invalid("chip.padding", "must be a non-negative number"));
        }
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(invalid("match_threshold", "must be a positive number"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
