//! Land-cover classification driver: loads a scene (from a catalog of
//! per-band GeoTIFFs or a serialised band stack) and labelled GeoJSON
//! samples, runs the pipeline, and writes the classified raster and the
//! accuracy report as JSON.

mod geotiff;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use fallow_core::catalog::{select_scene, SceneMeta};
use fallow_core::config::PipelineConfig;
use fallow_core::geometry::parse_feature_collection;
use fallow_core::pipeline;
use fallow_core::raster::{BBox, Band, RasterBandStack};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "classify", about = "Supervised land-cover classification of one scene")]
struct Args {
    /// Pipeline config JSON (omit for defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scene catalog JSON; the least cloudy matching scene is classified
    #[arg(long, required_unless_present = "stack", conflicts_with = "stack")]
    catalog: Option<PathBuf>,

    /// Pre-built band stack JSON
    #[arg(long)]
    stack: Option<PathBuf>,

    /// GeoJSON FeatureCollection of labelled points / polygons
    #[arg(long)]
    samples: PathBuf,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Also write the model trained on all samples
    #[arg(long)]
    dump_model: bool,

    /// -v for debug, -vv for trace (RUST_LOG overrides)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ── Scene loading ────────────────────────────────────────────────────────────

/// Band files needed by the config: feature bands, index inputs and the ROC
/// score band, minus the names the pipeline derives itself.
fn required_bands(config: &PipelineConfig) -> BTreeSet<String> {
    let derived: BTreeSet<&str> = config.indices.iter().map(|nd| nd.name.as_str()).collect();
    let mut names: BTreeSet<String> = config.bands.iter().cloned().collect();
    for nd in &config.indices {
        names.insert(nd.a.clone());
        names.insert(nd.b.clone());
    }
    if let Some(band) = config.roc.as_ref().and_then(|r| r.score_band.as_ref()) {
        names.insert(band.clone());
    }
    names.retain(|n| !derived.contains(n.as_str()));
    names
}

fn load_catalog_scene(path: &Path, config: &PipelineConfig) -> Result<RasterBandStack> {
    let json = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let scenes: Vec<SceneMeta> =
        serde_json::from_str(&json).with_context(|| format!("Invalid catalog: {}", path.display()))?;

    let everywhere = BBox::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY);
    let roi = config.roi.unwrap_or(everywhere);
    let start = config.date_start.unwrap_or(NaiveDate::MIN);
    let end = config.date_end.unwrap_or(NaiveDate::MAX);
    let Some(scene) = select_scene(&scenes, &roi, start, end) else {
        bail!("No scene in {} matches the ROI and date window", path.display());
    };

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut bands = Vec::new();
    let mut shape = None;
    let mut transform = config.transform;
    for name in required_bands(config) {
        let Some(rel) = scene.bands.get(&name) else {
            bail!("Scene {} has no file for band {name}", scene.id);
        };
        let file = base.join(rel);
        let band = geotiff::read_band(&file)?;
        match shape {
            None => shape = Some((band.width, band.height)),
            Some(s) if s != (band.width, band.height) => bail!(
                "{}: {}×{} does not match the scene's {}×{}",
                file.display(),
                band.width,
                band.height,
                s.0,
                s.1
            ),
            Some(_) => {}
        }
        if transform.is_none() {
            transform = band.transform;
        }
        info!(band = %name, file = %file.display(), "loaded band");
        bands.push(Band::new(name, band.data));
    }

    let Some((width, height)) = shape else {
        bail!("No bands requested");
    };
    let Some(transform) = transform else {
        bail!("Scene {} carries no georeferencing; set `transform` in the config", scene.id);
    };
    let crs = config.crs.clone().unwrap_or_else(|| {
        warn!("no `crs` in config; recording the scene CRS as unknown");
        "unknown".to_string()
    });
    Ok(RasterBandStack::new(bands, width, height, transform, crs)?)
}

fn load_stack(path: &Path) -> Result<RasterBandStack> {
    let json = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid band stack: {}", path.display()))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(p) => {
            let json = fs::read_to_string(p).with_context(|| format!("Cannot read {}", p.display()))?;
            PipelineConfig::from_json(&json).with_context(|| format!("Invalid config: {}", p.display()))?
        }
        None => PipelineConfig::default(),
    };

    let stack = match (&args.catalog, &args.stack) {
        (Some(catalog), _) => load_catalog_scene(catalog, &config)?,
        (None, Some(stack)) => load_stack(stack)?,
        (None, None) => bail!("one of --catalog or --stack is required"),
    };

    let geojson = fs::read_to_string(&args.samples)
        .with_context(|| format!("Cannot read {}", args.samples.display()))?;
    let geometries = parse_feature_collection(&geojson, &config.class_property)
        .with_context(|| format!("Invalid samples: {}", args.samples.display()))?;
    info!(geometries = geometries.len(), "loaded training geometries");

    let result = pipeline::run(&stack, &geometries, &config)?;
    let report = &result.report;
    info!("testing error matrix\n{}", report.confusion);
    info!(accuracy = ?report.accuracy, kappa = report.kappa, "testing accuracy");
    if let Some(roc) = &report.roc {
        info!(auc = roc.auc, best_threshold = roc.best.threshold, "ROC");
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    write_json(&args.output.join("classified.json"), &result.classified)?;
    write_json(&args.output.join("report.json"), report)?;
    if args.dump_model {
        write_json(&args.output.join("model.json"), &result.model)?;
    }
    info!(output = %args.output.display(), "done");
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Write failed: {}", path.display()))
}
