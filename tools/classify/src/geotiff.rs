//! Single-band GeoTIFF loading.
//!
//! Georeferencing comes from ModelPixelScale + ModelTiepoint; GDAL's nodata
//! tag is honoured when present. Every sample type is widened to `f32`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fallow_core::raster::GeoTransform;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

pub struct GeoBand {
    pub width: usize,
    pub height: usize,
    /// Row-major, nodata already replaced by NaN.
    pub data: Vec<f32>,
    pub transform: Option<GeoTransform>,
}

pub fn read_band(path: &Path) -> Result<GeoBand> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("Not a valid TIFF: {}", path.display()))?;
    let (w, h) = decoder
        .dimensions()
        .with_context(|| format!("Dimensions error: {}", path.display()))?;

    let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?.map(|v| v.into_f64_vec()).transpose()?;
    let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?.map(|v| v.into_f64_vec()).transpose()?;
    let nodata = decoder
        .find_tag(Tag::GdalNodata)?
        .map(|v| v.into_string())
        .transpose()?
        .and_then(|s| s.trim_end_matches('\0').trim().parse::<f32>().ok());

    let img = decoder
        .read_image()
        .with_context(|| format!("read_image error: {}", path.display()))?;
    let mut data = widen(img);
    let (width, height) = (w as usize, h as usize);
    if data.len() != width * height {
        bail!(
            "{}: expected {} single-band samples, found {} (multi-sample TIFFs are not supported)",
            path.display(),
            width * height,
            data.len()
        );
    }
    if let Some(nd) = nodata {
        for v in &mut data {
            if *v == nd {
                *v = f32::NAN;
            }
        }
    }

    let transform = match (scale, tiepoint) {
        (Some(s), Some(t)) => transform_from_tags(&s, &t),
        _ => None,
    };
    Ok(GeoBand { width, height, data, transform })
}

/// North-up transform from a pixel scale `[sx, sy, sz]` and the first tiepoint
/// `[i, j, k, x, y, z]`.
pub fn transform_from_tags(scale: &[f64], tiepoint: &[f64]) -> Option<GeoTransform> {
    let (&sx, &sy) = (scale.first()?, scale.get(1)?);
    let (i, j, x, y) = (*tiepoint.first()?, *tiepoint.get(1)?, *tiepoint.get(3)?, *tiepoint.get(4)?);
    if sx == 0.0 || sy == 0.0 {
        return None;
    }
    Some(GeoTransform::new(x - i * sx, y + j * sy, sx, -sy))
}

fn widen(img: DecodingResult) -> Vec<f32> {
    match img {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}
