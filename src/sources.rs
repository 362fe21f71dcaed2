use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use geo::{Coord, LineString, Point};
use log::warn;
use regex::Regex;
use serde::Deserialize;

use crate::data::partition::PartitionRecord;
use crate::errors::{Error, Result};

/// Supplies decoded partition records. Implementations must be shareable
/// across worker threads.
pub trait PartitionSource: Sync {
    fn decoded_partition(&self, path: &Path) -> Result<PartitionRecord>;
}

/// Reads a decoded layer file (JSON) from disk.
pub struct JsonPartitionSource;

impl PartitionSource for JsonPartitionSource {
    fn decoded_partition(&self, path: &Path) -> Result<PartitionRecord> {
        let file = File::open(path).map_err(|err| Error::PartitionUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::PartitionUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

/// Read-only geometry lookups keyed by the identifier scheme used inside
/// `segmentRef`/`nodeRef`. Absence is a normal outcome, not an error.
pub trait GeometryIndex: Sync {
    fn resolve_segment_geometry(&self, identifier: &str) -> Option<LineString<f64>>;
    fn resolve_node_geometry(&self, identifier: &str) -> Option<Point<f64>>;
}

/// Geometry index built from the decoded `topology-geometry` layer that
/// sits next to the attribute layer files of a partition. Immutable after
/// construction, so concurrent lookups need no synchronization.
#[derive(Debug, Default)]
pub struct TopologyGeometryIndex {
    segments: HashMap<String, LineString<f64>>,
    nodes: HashMap<String, Point<f64>>,
}

#[derive(Debug, Deserialize)]
struct TopologyGeometryLayer {
    #[serde(default)]
    segment: Vec<TopologySegment>,
    #[serde(default)]
    node: Vec<TopologyNode>,
}

#[derive(Debug, Deserialize)]
struct TopologySegment {
    identifier: String,
    geometry: Polyline,
}

#[derive(Debug, Deserialize)]
struct Polyline {
    #[serde(default)]
    point: Vec<Coordinate2d>,
}

#[derive(Debug, Deserialize)]
struct TopologyNode {
    identifier: String,
    geometry: Coordinate2d,
}

#[derive(Debug, Deserialize)]
struct Coordinate2d {
    latitude: f64,
    longitude: f64,
}

impl Coordinate2d {
    fn coord(&self) -> Coord<f64> {
        // GeoJSON axis order: x = longitude, y = latitude.
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }
}

impl TopologyGeometryIndex {
    /// Builds the index from the topology-geometry layer file found in
    /// `dir`. A directory without one yields an empty index: every anchor
    /// of the partition will then drop with a warning instead of failing
    /// the run.
    pub fn from_partition_dir(dir: &Path) -> Result<TopologyGeometryIndex> {
        let pattern = Regex::new(r"^topology-geometry_.*\.json$").unwrap();
        let mut layer_path = None;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if pattern.is_match(name) {
                    layer_path = Some(entry.path());
                    break;
                }
            }
        }

        match layer_path {
            Some(path) => Self::from_layer_file(&path),
            None => {
                warn!(dir = dir.display().to_string(); "No topology-geometry layer in partition directory");
                Ok(TopologyGeometryIndex::default())
            }
        }
    }

    pub fn from_layer_file(path: &Path) -> Result<TopologyGeometryIndex> {
        let file = File::open(path)?;
        let layer: TopologyGeometryLayer = serde_json::from_reader(BufReader::new(file))?;

        let mut index = TopologyGeometryIndex::default();
        for segment in layer.segment {
            if segment.geometry.point.len() < 2 {
                warn!(identifier = segment.identifier.as_str(); "Skipping segment with degenerate geometry");
                continue;
            }
            let line = LineString::new(
                segment.geometry.point.iter().map(Coordinate2d::coord).collect(),
            );
            index.segments.insert(segment.identifier, line);
        }
        for node in layer.node {
            index.nodes.insert(node.identifier, node.geometry.coord().into());
        }
        Ok(index)
    }

    #[cfg(test)]
    pub fn from_parts(
        segments: Vec<(&str, LineString<f64>)>,
        nodes: Vec<(&str, Point<f64>)>,
    ) -> TopologyGeometryIndex {
        TopologyGeometryIndex {
            segments: segments.into_iter().map(|(id, line)| (id.to_string(), line)).collect(),
            nodes: nodes.into_iter().map(|(id, point)| (id.to_string(), point)).collect(),
        }
    }
}

impl GeometryIndex for TopologyGeometryIndex {
    fn resolve_segment_geometry(&self, identifier: &str) -> Option<LineString<f64>> {
        self.segments.get(identifier).cloned()
    }

    fn resolve_node_geometry(&self, identifier: &str) -> Option<Point<f64>> {
        self.nodes.get(identifier).cloned()
    }
}
