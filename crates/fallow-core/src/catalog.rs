//! Local scene catalog and least-cloudy scene selection.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::raster::BBox;

/// One acquisition: where it is, when, how cloudy, and a file per band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMeta {
    pub id: String,
    pub acquired: NaiveDate,
    /// Percent of the scene under cloud.
    pub cloud_cover: f32,
    pub footprint: BBox,
    pub bands: BTreeMap<String, PathBuf>,
}

/// Least cloudy scene whose footprint touches `roi` and whose acquisition
/// date falls in `[start, end)`. Equal cloud cover keeps catalog order.
pub fn select_scene<'a>(
    scenes: &'a [SceneMeta],
    roi: &BBox,
    start: NaiveDate,
    end: NaiveDate,
) -> Option<&'a SceneMeta> {
    let mut matching: Vec<&SceneMeta> = scenes
        .iter()
        .filter(|s| s.footprint.intersects(roi) && s.acquired >= start && s.acquired < end)
        .collect();
    debug!(total = scenes.len(), matching = matching.len(), "filtered scene catalog");
    matching.sort_by(|a, b| a.cloud_cover.total_cmp(&b.cloud_cover));
    let chosen = matching.first().copied();
    if let Some(s) = chosen {
        info!(id = %s.id, acquired = %s.acquired, cloud_cover = s.cloud_cover, "selected scene");
    }
    chosen
}
