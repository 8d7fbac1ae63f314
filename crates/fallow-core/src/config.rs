//! Pipeline configuration. Every field has a default, so `{}` is a valid
//! config file.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierKind;
use crate::raster::{BBox, GeoTransform};
use crate::{Error, Result};

/// A derived `(a - b) / (a + b)` band, e.g. NDVI from NIR and red.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDifference {
    pub name: String,
    pub a: String,
    pub b: String,
}

/// Where ROC scores come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocConfig {
    /// Score each training geometry by the maximum of this band over its
    /// pixels. `None` scores the test partition with the classifier instead.
    #[serde(default)]
    pub score_band: Option<String>,
    /// Label treated as the target class.
    pub positive_class: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feature bands, in feature order. May name derived indices.
    pub bands: Vec<String>,
    pub classifier: ClassifierKind,
    /// Probability that a sample lands in the training partition.
    pub split_fraction: f64,
    pub split_seed: u64,
    pub roc_steps: usize,
    pub roc: Option<RocConfig>,
    /// Sampling cell size in map units; `None` samples at native resolution.
    pub scale: Option<f64>,
    /// Integer property of each training feature holding its class.
    pub class_property: String,
    pub indices: Vec<NormalizedDifference>,
    pub roi: Option<BBox>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    /// Hex colours per class, in the ascending order of the model's classes.
    pub palette: Vec<String>,
    /// Fallback georeferencing for rasters without GeoTIFF tags.
    pub transform: Option<GeoTransform>,
    pub crs: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bands: vec!["B5".into(), "B4".into(), "B3".into()],
            classifier: ClassifierKind::default(),
            split_fraction: 0.7,
            split_seed: 42,
            roc_steps: 1000,
            roc: None,
            scale: None,
            class_property: "landcover".into(),
            indices: Vec::new(),
            roi: None,
            date_start: None,
            date_end: None,
            palette: vec!["70FF00".into(), "FF2D00".into()],
            transform: None,
            crs: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bands.is_empty() {
            return Err(Error::invalid("bands", "[]", "at least one band is required"));
        }
        if !(self.split_fraction > 0.0 && self.split_fraction < 1.0) {
            return Err(Error::invalid("split_fraction", self.split_fraction, "must lie in (0, 1)"));
        }
        if self.roc_steps < 2 {
            return Err(Error::invalid("roc_steps", self.roc_steps, "need at least 2 thresholds"));
        }
        if let Some(s) = self.scale {
            if !(s.is_finite() && s > 0.0) {
                return Err(Error::invalid("scale", s, "must be positive and finite"));
            }
        }
        if let (Some(start), Some(end)) = (self.date_start, self.date_end) {
            if start >= end {
                return Err(Error::invalid("date_end", end, "must be after date_start"));
            }
        }
        if let Some(roi) = &self.roi {
            if !(roi.min_x < roi.max_x && roi.min_y < roi.max_y) {
                return Err(Error::invalid("roi", format!("{roi:?}"), "min must be below max"));
            }
        }
        self.palette_rgb()?;
        Ok(())
    }

    /// Palette entries parsed to RGB.
    pub fn palette_rgb(&self) -> Result<Vec<[u8; 3]>> {
        self.palette.iter().map(|hex| parse_hex_color(hex)).collect()
    }
}

/// `RRGGBB`, with or without a leading `#`.
pub fn parse_hex_color(hex: &str) -> Result<[u8; 3]> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    let bad = || Error::invalid("palette", hex, "expected RRGGBB hex");
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(bad());
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| bad());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
