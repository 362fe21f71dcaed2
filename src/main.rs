mod data;
mod errors;
mod etl;
mod sources;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{error, info};
use rayon::prelude::*;
use regex::Regex;
use structured_logger::json::new_writer;
use structured_logger::Builder;
use walkdir::WalkDir;

use crate::errors::Result;
use crate::etl::road_attributes::RoadAttributesEtl;
use crate::etl::Etl;
use crate::sources::{JsonPartitionSource, TopologyGeometryIndex};

/// Decoded road-attribute layers that get the anchor-resolution treatment.
const INPUT_LAYERS: &[&str] = &[
    "topology-attributes",
    "advanced-navigation-attributes",
    "complex-road-attributes",
    "navigation-attributes",
    "road-attributes",
    "traffic-patterns",
    "sign-text",
    "generalized-junctions-signs",
    "bicycle-attributes",
    "address-attributes",
    "adas-attributes",
    "truck-attributes",
    "recreational-vehicle-attributes",
];

#[derive(Parser, Debug)]
#[command(
    name = "road-attributes-geojson",
    version,
    about = "Resolve decoded map-partition road attributes into GeoJSON feature collections"
)]
struct Args {
    /// Path of the partition folder tree with decoded layer files
    partition_path: PathBuf,

    /// Regenerate GeoJSON result files that exist already
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Worker threads for layer-file processing (0 = rayon default)
    #[arg(long, default_value_t = 0)]
    jobs: usize,
}

#[derive(Debug)]
struct LayerFile {
    dir: PathBuf,
    file_name: String,
    version: Option<u64>,
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

/// Walks the partition tree for decoded layer files named
/// `<layer>_<partition>_v<version>.json`.
fn find_layer_files(root: &Path) -> Vec<LayerFile> {
    let layer_pattern =
        Regex::new(&format!(r"^(?:{})_.*\.json$", INPUT_LAYERS.join("|"))).unwrap();
    let version_pattern = Regex::new(r"v(\d+)").unwrap();

    let mut layer_files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|entry| entry.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !layer_pattern.is_match(file_name) {
            continue;
        }
        let version = version_pattern
            .captures(file_name)
            .and_then(|captures| captures[1].parse().ok());
        layer_files.push(LayerFile {
            dir: entry.path().parent().unwrap_or(root).to_path_buf(),
            file_name: file_name.to_string(),
            version,
        });
    }
    layer_files
}

/// Runs the full pipeline for one layer file and returns the
/// street-section partition references it surfaced.
fn process_layer_file(file: &LayerFile, overwrite: bool) -> Result<BTreeSet<String>> {
    info!(
        file = file.file_name.as_str(),
        version = file.version.unwrap_or_default();
        "Processing decoded layer file"
    );
    let source = JsonPartitionSource;
    let geometry_index = TopologyGeometryIndex::from_partition_dir(&file.dir)?;
    let mut etl = RoadAttributesEtl::new(file.file_name.clone(), &source, &geometry_index);
    if overwrite {
        etl.clean(&file.dir)?;
    }
    etl.process(&file.dir)?;
    Ok(etl.into_street_section_refs())
}

fn main() -> Result<()> {
    setup_logging();
    let args = Args::parse();

    if args.jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.jobs)
            .build_global()
            .expect("Could not configure worker pool.");
    }

    let layer_files = find_layer_files(&args.partition_path);
    info!(count = layer_files.len() as u64; "Found decoded road-attribute layer files");

    let results: Vec<(&LayerFile, Result<BTreeSet<String>>)> = layer_files
        .par_iter()
        .map(|file| (file, process_layer_file(file, args.overwrite)))
        .collect();

    let mut street_section_refs = BTreeSet::new();
    let mut failed: u64 = 0;
    for (file, result) in results {
        match result {
            Ok(refs) => street_section_refs.extend(refs),
            Err(err) => {
                failed += 1;
                error!(file = file.file_name.as_str(), err = err.to_string(); "Layer file processing failed");
            }
        }
    }

    if !street_section_refs.is_empty() {
        // Input for the external street-names downloader.
        let partitions = street_section_refs.iter().cloned().collect::<Vec<_>>().join(", ");
        info!(
            count = street_section_refs.len() as u64,
            partitions = partitions;
            "Street-section reference partitions for street-names retrieval"
        );
    }
    info!(
        processed = layer_files.len() as u64 - failed,
        failed = failed;
        "Finished"
    );

    Ok(())
}
