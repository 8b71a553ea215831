//! Boundary analysis CLI.
//!
//! Reads a boundary and optional feature layers from GeoJSON, runs the
//! analysis pipeline and writes JSON, CSV and GeoJSON outputs.

mod geojson;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use geo::MultiPolygon;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cityscope::models::{BoundarySource, Crs, GridShape, LandUseFeature, PointFeature};
use cityscope::{
    AnalysisConfig, AnalysisInput, AnalysisReport, CrsProjector, Layer, NeighborhoodSource,
    Pipeline,
};

use crate::geojson::{read_features, write_features, FeatureFile};

#[derive(Parser, Debug)]
#[command(name = "analyze")]
#[command(about = "Land-use composition and POI density within an administrative boundary")]
struct Args {
    /// GeoJSON file with the boundary polygon
    #[arg(short, long)]
    boundary: PathBuf,

    /// GeoJSON land-use polygons
    #[arg(long)]
    landuse: Option<PathBuf>,

    /// GeoJSON points of interest
    #[arg(long)]
    pois: Option<PathBuf>,

    /// GeoJSON neighborhood polygons, used as extra density units
    #[arg(long)]
    neighborhoods: Option<PathBuf>,

    /// GeoJSON building footprints
    #[arg(long)]
    buildings: Option<PathBuf>,

    /// TOML analysis config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CRS of inputs that do not declare one (default EPSG:4326)
    #[arg(long)]
    input_crs: Option<Crs>,

    /// Grid cell size in metres
    #[arg(long)]
    cell_size: Option<f64>,

    /// Grid shape: square or hexagon
    #[arg(long)]
    shape: Option<GridShape>,

    /// Projected CRS for measurement, e.g. EPSG:32720
    #[arg(long)]
    analysis_crs: Option<Crs>,

    /// Boundary identifier, e.g. R5167559
    #[arg(long)]
    source_id: Option<String>,

    /// Administrative level of the boundary
    #[arg(long)]
    admin_level: Option<u8>,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Cityscope analysis");
    info!("Boundary: {}", args.boundary.display());

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load_from_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(size) = args.cell_size {
        config.cell_size_m = size;
    }
    if let Some(shape) = args.shape {
        config.grid_shape = shape;
    }
    if args.analysis_crs.is_some() {
        config.analysis_crs = args.analysis_crs;
    }
    let pipeline = Pipeline::new(config).context("Invalid analysis configuration")?;
    let default_crs = args.input_crs.unwrap_or(Crs::Wgs84);

    let input = load_input(&args, pipeline.config(), default_crs)?;
    let storage_crs = input.boundary.crs;
    let report = pipeline.run(&input)?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    write_outputs(&args.output, &report, pipeline.config(), storage_crs)?;

    info!("Outputs written to {}", args.output.display());
    Ok(())
}

fn load_input(args: &Args, config: &AnalysisConfig, default_crs: Crs) -> Result<AnalysisInput> {
    let file = read_features(&args.boundary)?;
    let crs = file.crs.unwrap_or(default_crs);

    let parts: Vec<_> = file
        .features
        .iter()
        .filter_map(|f| f.multi_polygon())
        .flat_map(|mp| mp.0)
        .collect();
    if parts.is_empty() {
        bail!("{} holds no polygon", args.boundary.display());
    }
    let first = file.features.first();
    let source_id = args
        .source_id
        .clone()
        .or_else(|| first.and_then(|f| f.property(&["@id", "id", "osm_id"])).map(str::to_string))
        .unwrap_or_else(|| file_stem(&args.boundary));

    let mut boundary = BoundarySource::new(MultiPolygon::new(parts), crs, source_id);
    let admin_level = args.admin_level.or_else(|| {
        first
            .and_then(|f| f.property(&["admin_level"]))
            .and_then(|level| level.parse().ok())
    });
    if let Some(level) = admin_level {
        boundary = boundary.with_admin_level(level);
    }
    if let Some(name) = first.and_then(|f| f.property(&["name"])) {
        boundary = boundary.with_name(name);
    }

    let mut input = AnalysisInput::new(boundary);

    if let Some(path) = &args.landuse {
        let file = read_features(path)?;
        let crs = file.crs.unwrap_or(default_crs);
        let features = polygons(&file, path, |geometry, f| {
            LandUseFeature::from_tags(geometry, f.properties.clone(), &config.landuse.tag_priority)
        });
        input.landuse = Some(Layer::new(features, crs));
    }

    if let Some(path) = &args.pois {
        let file = read_features(path)?;
        let crs = file.crs.unwrap_or(default_crs);
        let mut skipped = 0;
        let points: Vec<PointFeature> = file
            .features
            .iter()
            .filter_map(|f| match f.point() {
                Some(point) => Some(PointFeature::from_tags(
                    point,
                    &f.properties,
                    &config.poi.tag_priority,
                )),
                None => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            warn!("{}: ignored {} non-point features", path.display(), skipped);
        }
        input.points = Some(Layer::new(points, crs));
    }

    if let Some(path) = &args.neighborhoods {
        let file = read_features(path)?;
        let crs = file.crs.unwrap_or(default_crs);
        let mut position = 0;
        let neighborhoods = polygons(&file, path, |geometry, f| {
            position += 1;
            NeighborhoodSource {
                name: f
                    .property(&["name", "nombre", "id"])
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("neighborhood_{position}")),
                geometry,
            }
        });
        input.neighborhoods = Some(Layer::new(neighborhoods, crs));
    }

    if let Some(path) = &args.buildings {
        let file = read_features(path)?;
        let crs = file.crs.unwrap_or(default_crs);
        let buildings = polygons(&file, path, |geometry, _| geometry);
        input.buildings = Some(Layer::new(buildings, crs));
    }

    Ok(input)
}

/// Map every polygonal feature, warning about the rest.
fn polygons<T>(
    file: &FeatureFile,
    path: &Path,
    mut build: impl FnMut(MultiPolygon<f64>, &geojson::RawFeature) -> T,
) -> Vec<T> {
    let mut out = Vec::with_capacity(file.features.len());
    for feature in &file.features {
        match feature.multi_polygon() {
            Some(geometry) => out.push(build(geometry, feature)),
            None => warn!("{}: ignoring a non-polygon feature", path.display()),
        }
    }
    out
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("boundary")
        .to_string()
}

fn write_outputs(
    dir: &Path,
    report: &AnalysisReport,
    config: &AnalysisConfig,
    storage_crs: Crs,
) -> Result<()> {
    let summary = json!({
        "boundary": report.boundary.metadata(),
        "grid": {
            "shape": config.grid_shape,
            "cell_size_m": config.cell_size_m,
            "cells": report.grid.len(),
        },
        "landuse": report.landuse.as_ref().map(|l| json!({
            "summaries": l.summaries,
            "diagnostics": l.diagnostics,
        })),
        "category_density": report.category_density,
        "neighborhood_density": report.neighborhood_density.as_ref().map(|d| json!({
            "records": d.records,
            "totals": d.totals,
        })),
        "diagnostics": report.diagnostics,
    });
    let path = dir.join("report.json");
    fs::write(&path, serde_json::to_vec_pretty(&summary)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if let Some(landuse) = &report.landuse {
        write_csv(&dir.join("landuse_summary.csv"), &landuse.summaries)?;
    }
    if let Some(density) = &report.grid_density {
        write_csv(&dir.join("grid_density.csv"), &density.records)?;
        write_csv(&dir.join("grid_totals.csv"), &density.totals)?;
    }
    if let Some(density) = &report.neighborhood_density {
        write_csv(&dir.join("neighborhood_density.csv"), &density.records)?;
    }
    if let Some(footprints) = &report.footprints {
        write_csv(&dir.join("grid_buildings.csv"), &footprints.records)?;
    }

    write_grid(&dir.join("grid.geojson"), report, storage_crs)?;

    if let Some(visualization) = report.boundary.visualization() {
        let mut props = Map::new();
        props.insert("source_id".into(), json!(report.boundary.source_id()));
        props.insert("tolerance_m".into(), json!(visualization.tolerance_m));
        write_features(
            &dir.join("boundary.geojson"),
            &[(visualization.geometry.clone(), props)],
            visualization.crs,
        )?;
    }
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Grid cells in the storage CRS, with their POI and building figures.
fn write_grid(path: &Path, report: &AnalysisReport, storage_crs: Crs) -> Result<()> {
    let projector = CrsProjector::new(report.boundary.analysis_crs())?;

    let totals: BTreeMap<String, Value> = report
        .grid_density
        .iter()
        .flat_map(|d| &d.totals)
        .map(|t| {
            (
                t.unit_id.to_string(),
                json!({ "poi_count": t.count, "poi_density_km2": t.density_per_km2 }),
            )
        })
        .collect();
    let buildings: BTreeMap<String, Value> = report
        .footprints
        .iter()
        .flat_map(|f| &f.records)
        .map(|r| {
            (
                r.unit_id.to_string(),
                json!({
                    "building_count": r.buildings,
                    "building_density_km2": r.buildings_per_km2,
                    "footprint_coverage_pct": r.coverage_pct,
                }),
            )
        })
        .collect();

    let mut features = Vec::with_capacity(report.grid.len());
    for cell in &report.grid {
        let id = cell.id.to_string();
        let geometry = projector.to_storage(&cell.geometry, storage_crs)?;
        let mut props = Map::new();
        props.insert("cell_id".into(), json!(id));
        props.insert("area_km2".into(), json!(cell.area_km2));
        props.insert("coverage_ratio".into(), json!(cell.coverage_ratio()));
        for extra in [totals.get(&id), buildings.get(&id)].into_iter().flatten() {
            if let Some(extra) = extra.as_object() {
                props.extend(extra.clone());
            }
        }
        features.push((geometry, props));
    }
    write_features(path, &features, storage_crs)?;
    info!("Wrote {} grid cells to {}", features.len(), path.display());
    Ok(())
}
