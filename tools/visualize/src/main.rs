//! Renders a classified raster (`classified.json`) to a palette PNG.
//! Classes take palette colours in ascending label order; unclassified
//! pixels are black.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fallow_core::config::{parse_hex_color, PipelineConfig};
use fallow_core::raster::ClassRaster;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MASKED: [u8; 3] = [0, 0, 0];

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render a classified raster to PNG")]
struct Args {
    /// Classified raster JSON written by `classify`
    #[arg(short, long, default_value = "out/classified.json")]
    input: PathBuf,

    /// Output PNG
    #[arg(short, long, default_value = "out/classified.png")]
    output: PathBuf,

    /// Take the palette from this pipeline config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated RRGGBB colours; overrides the config palette
    #[arg(long, value_delimiter = ',')]
    palette: Vec<String>,

    /// Integer upscaling factor per pixel
    #[arg(long, default_value = "1")]
    zoom: u32,
}

/// Colour per class: the i-th class the model knows takes palette entry `i`
/// (wrapping when there are more classes than colours). Rasters written
/// without a class list fall back to the classes present.
fn class_colors(raster: &ClassRaster, palette: &[[u8; 3]]) -> BTreeMap<i64, [u8; 3]> {
    let classes: Vec<i64> = if raster.classes.is_empty() {
        raster.class_counts().into_keys().collect()
    } else {
        raster.classes.clone()
    };
    classes
        .into_iter()
        .enumerate()
        .map(|(i, class)| (class, palette[i % palette.len()]))
        .collect()
}

fn render(raster: &ClassRaster, palette: &[[u8; 3]], zoom: u32) -> Result<image::RgbImage> {
    let scaled = |n: usize| u32::try_from(n).ok().and_then(|n| n.checked_mul(zoom));
    let (Some(w), Some(h)) = (scaled(raster.width), scaled(raster.height)) else {
        bail!("{}×{} at zoom {zoom} exceeds the PNG size limit", raster.width, raster.height);
    };
    let colors = class_colors(raster, palette);
    Ok(image::RgbImage::from_fn(w, h, |x, y| {
        let (col, row) = ((x / zoom) as usize, (y / zoom) as usize);
        let rgb = raster
            .get(row, col)
            .and_then(|class| colors.get(&class).copied())
            .unwrap_or(MASKED);
        image::Rgb(rgb)
    }))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    let args = Args::parse();
    if args.zoom == 0 {
        bail!("--zoom must be at least 1");
    }

    let palette: Vec<[u8; 3]> = if !args.palette.is_empty() {
        args.palette.iter().map(|h| parse_hex_color(h)).collect::<Result<_, _>>()?
    } else if let Some(p) = &args.config {
        let json = fs::read_to_string(p).with_context(|| format!("Cannot read {}", p.display()))?;
        PipelineConfig::from_json(&json)
            .with_context(|| format!("Invalid config: {}", p.display()))?
            .palette_rgb()?
    } else {
        PipelineConfig::default().palette_rgb()?
    };
    if palette.is_empty() {
        bail!("palette is empty");
    }

    let json = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let raster: ClassRaster = serde_json::from_str(&json)
        .with_context(|| format!("Invalid classified raster: {}", args.input.display()))?;
    if raster.data.len() != raster.width * raster.height {
        bail!(
            "{}: {} labels for a {}×{} raster",
            args.input.display(),
            raster.data.len(),
            raster.width,
            raster.height
        );
    }

    let img = render(&raster, &palette, args.zoom)?;
    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    img.save(&args.output)
        .with_context(|| format!("Write failed: {}", args.output.display()))?;
    info!(output = %args.output.display(), width = img.width(), height = img.height(), "wrote classification map");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallow_core::raster::GeoTransform;

    const GREEN: [u8; 3] = [0x70, 0xFF, 0x00];
    const RED: [u8; 3] = [0xFF, 0x2D, 0x00];

    fn raster() -> ClassRaster {
        ClassRaster {
            width: 2,
            height: 2,
            transform: GeoTransform::new(0.0, 60.0, 30.0, -30.0),
            crs: "EPSG:32611".into(),
            classes: vec![0, 1],
            data: vec![Some(0), Some(1), None, Some(1)],
        }
    }

    #[test]
    fn classes_take_palette_in_label_order() {
        let img = render(&raster(), &[GREEN, RED], 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, GREEN);
        assert_eq!(img.get_pixel(1, 0).0, RED);
        assert_eq!(img.get_pixel(0, 1).0, MASKED);
        assert_eq!(img.get_pixel(1, 1).0, RED);
    }

    #[test]
    fn zoom_repeats_pixels() {
        let img = render(&raster(), &[GREEN, RED], 3).unwrap();
        assert_eq!(img.dimensions(), (6, 6));
        assert_eq!(img.get_pixel(2, 2).0, GREEN);
        assert_eq!(img.get_pixel(3, 0).0, RED);
        assert_eq!(img.get_pixel(0, 5).0, MASKED);
    }

    #[test]
    fn palette_wraps_for_extra_classes() {
        let mut r = raster();
        r.classes = vec![3, 5, 7];
        r.data = vec![Some(3), Some(5), Some(7), None];
        let colors = class_colors(&r, &[GREEN, RED]);
        assert_eq!(colors[&3], GREEN);
        assert_eq!(colors[&5], RED);
        assert_eq!(colors[&7], GREEN);
    }

    #[test]
    fn single_class_scene_keeps_its_colour() {
        let mut r = raster();
        r.data = vec![Some(1); 4];
        let palette = PipelineConfig::default().palette_rgb().unwrap();
        let img = render(&r, &palette, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, RED);
    }

    #[test]
    fn missing_class_list_falls_back_to_present_classes() {
        let mut r = raster();
        r.classes.clear();
        r.data = vec![Some(4), Some(9), None, Some(9)];
        let colors = class_colors(&r, &[GREEN, RED]);
        assert_eq!(colors[&4], GREEN);
        assert_eq!(colors[&9], RED);
    }

    #[test]
    fn oversized_zoom_is_rejected() {
        assert!(render(&raster(), &[GREEN, RED], u32::MAX).is_err());
    }
}
