use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use tqdm::tqdm;

use crate::data::geojson::{Feature, FeatureCollection, Geometry};
use crate::data::partition::PartitionRecord;
use crate::errors::{Error, Result};
use crate::etl::{anchor_geometry, attribute_index, cross_reference, Etl};
use crate::sources::{GeometryIndex, PartitionSource};

pub const ETL_NAME: &str = "road_attributes";
pub const SEGMENTS_SUFFIX: &str = "_segments.geojson";
pub const NODES_SUFFIX: &str = "_nodes.geojson";

/// Whether the emitter wrote a collection or found it on disk already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Written,
    Skipped,
}

pub struct LayerOutput {
    pub segments: Option<FeatureCollection>,
    pub nodes: Option<FeatureCollection>,
}

/// Resolves one decoded road-attribute layer file into a pair of GeoJSON
/// feature collections next to it. Collections are resolved fully in
/// memory before the first byte is written, so a failed run never leaves
/// a partial output file behind.
pub struct RoadAttributesEtl<'a> {
    layer_file_name: String,
    source: &'a dyn PartitionSource,
    geometry_index: &'a dyn GeometryIndex,
    street_section_refs: BTreeSet<String>,
}

impl<'a> RoadAttributesEtl<'a> {
    pub fn new(
        layer_file_name: String,
        source: &'a dyn PartitionSource,
        geometry_index: &'a dyn GeometryIndex,
    ) -> RoadAttributesEtl<'a> {
        RoadAttributesEtl {
            layer_file_name,
            source,
            geometry_index,
            street_section_refs: BTreeSet::new(),
        }
    }

    pub fn segments_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.layer_file_name, SEGMENTS_SUFFIX))
    }

    pub fn nodes_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.layer_file_name, NODES_SUFFIX))
    }

    /// Street-section partition names collected while transforming; empty
    /// when the run was served from cache.
    pub fn into_street_section_refs(self) -> BTreeSet<String> {
        self.street_section_refs
    }

    fn resolve_segment_geometries(
        &self,
        partition: &PartitionRecord,
    ) -> Result<Vec<Option<Geometry>>> {
        let mut geometries = Vec::with_capacity(partition.segment_anchor.len());
        for (anchor_index, anchor) in tqdm(partition.segment_anchor.iter().enumerate()) {
            match anchor_geometry::resolve_segment_anchor_geometry(
                &partition.partition_name,
                anchor_index,
                anchor,
                self.geometry_index,
            ) {
                Ok(geometry) => geometries.push(Some(geometry)),
                Err(Error::UnresolvedGeometry { identifier, .. }) => {
                    warn!(
                        partition = partition.partition_name.as_str(),
                        anchor_index = anchor_index as u64,
                        identifier = identifier.as_str();
                        "Dropping segment anchor without resolvable geometry"
                    );
                    geometries.push(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(geometries)
    }

    fn resolve_node_geometries(
        &self,
        partition: &PartitionRecord,
    ) -> Result<Vec<Option<Geometry>>> {
        let mut geometries = Vec::with_capacity(partition.node_anchor.len());
        for (anchor_index, anchor) in tqdm(partition.node_anchor.iter().enumerate()) {
            match anchor_geometry::resolve_node_anchor_geometry(
                &partition.partition_name,
                anchor_index,
                anchor,
                self.geometry_index,
            ) {
                Ok(geometry) => geometries.push(Some(geometry)),
                Err(Error::UnresolvedGeometry { identifier, .. }) => {
                    warn!(
                        partition = partition.partition_name.as_str(),
                        anchor_index = anchor_index as u64,
                        identifier = identifier.as_str(),
                        ref_partition = anchor.node_ref.partition_name.as_str();
                        "Dropping node anchor without resolvable geometry"
                    );
                    geometries.push(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(geometries)
    }

    /// One feature per anchor that produced a geometry, in anchor order.
    fn collect_features<'p>(
        properties: impl Iterator<Item = &'p serde_json::Map<String, serde_json::Value>>,
        geometries: Vec<Option<Geometry>>,
    ) -> Option<FeatureCollection> {
        let features: Vec<Feature> = properties
            .zip(geometries)
            .filter_map(|(properties, geometry)| {
                geometry.map(|geometry| Feature::new(geometry, properties.clone()))
            })
            .collect();
        if features.is_empty() {
            None
        } else {
            Some(FeatureCollection::new(features))
        }
    }
}

impl Etl for RoadAttributesEtl<'_> {
    type Input = PartitionRecord;
    type Output = LayerOutput;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(self.segments_path(dir).exists() && self.nodes_path(dir).exists())
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        for path in [self.segments_path(dir), self.nodes_path(dir)] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        self.source.decoded_partition(&dir.join(&self.layer_file_name))
    }

    fn transform(&mut self, mut partition: Self::Input) -> Result<Self::Output> {
        info!(
            partition = partition.partition_name.as_str(),
            tile_id = format!("{:?}", partition.tile_id),
            segment_anchors = partition.segment_anchor.len() as u64,
            node_anchors = partition.node_anchor.len() as u64;
            "Resolving partition"
        );
        if partition.segment_anchor.is_empty() && partition.node_anchor.is_empty() {
            warn!(partition = partition.partition_name.as_str(); "Partition has no anchor collections, skipping");
            return Ok(LayerOutput { segments: None, nodes: None });
        }

        self.street_section_refs = attribute_index::merge_attribute_collections(&mut partition)?;

        let segment_geometries = self.resolve_segment_geometries(&partition)?;
        let node_geometries = self.resolve_node_geometries(&partition)?;

        cross_reference::resolve_cross_references(
            &mut partition.segment_anchor,
            &mut partition.node_anchor,
        );

        let segments = Self::collect_features(
            partition.segment_anchor.iter().map(|anchor| &anchor.properties),
            segment_geometries,
        );
        let nodes = Self::collect_features(
            partition.node_anchor.iter().map(|anchor| &anchor.properties),
            node_geometries,
        );
        Ok(LayerOutput { segments, nodes })
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        if let Some(collection) = output.segments {
            emit_collection(&self.segments_path(dir), &collection)?;
        }
        if let Some(collection) = output.nodes {
            emit_collection(&self.nodes_path(dir), &collection)?;
        }
        Ok(())
    }
}

/// Write-or-skip: an existing target file is left untouched so a
/// directory tree can be reprocessed cheaply. `clean` (the overwrite
/// flag) is the only way to regenerate.
pub fn emit_collection(path: &Path, collection: &FeatureCollection) -> Result<EmitOutcome> {
    if path.exists() {
        info!(path = path.display().to_string(); "Output exists already, skipping");
        return Ok(EmitOutcome::Skipped);
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    collection.write_pretty(&mut writer)?;
    writer.flush()?;
    info!(path = path.display().to_string(), features = collection.features.len() as u64; "Wrote feature collection");
    Ok(EmitOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TopologyGeometryIndex;
    use geo::{Coord, LineString, Point};
    use serde_json::json;

    struct FixturePartitionSource {
        raw: serde_json::Value,
    }

    impl PartitionSource for FixturePartitionSource {
        fn decoded_partition(&self, path: &Path) -> Result<PartitionRecord> {
            serde_json::from_value(self.raw.clone()).map_err(|err| Error::PartitionUnavailable {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
        }
    }

    fn fixture_partition() -> serde_json::Value {
        json!({
            "partitionName": "23611420",
            "tileId": 23611420,
            "segmentAnchor": [
                {"orientedSegmentRef": [{"segmentRef": {"partitionName": "23611420", "identifier": "seg:1"}}]},
                {"orientedSegmentRef": [{"segmentRef": {"partitionName": "23611420", "identifier": "seg:gone"}}]}
            ],
            "nodeAnchor": [
                {"nodeRef": {"partitionName": "23611420", "identifier": "node:1"}}
            ],
            "speedLimit": [
                {"segmentAnchorIndex": [0, 1], "value": 50}
            ],
            "intersectionCategory": [
                {"nodeAnchorIndex": 0, "category": "ROUNDABOUT"},
                {"nodeAnchorIndex": 0, "category": "ROUNDABOUT", "segmentAnchorIndex": [0, 7]}
            ]
        })
    }

    fn fixture_index() -> TopologyGeometryIndex {
        TopologyGeometryIndex::from_parts(
            vec![(
                "seg:1",
                LineString::new(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 }]),
            )],
            vec![("node:1", Point::new(5.0, 5.0))],
        )
    }

    #[test]
    fn unresolvable_anchor_is_dropped_while_siblings_survive() {
        let source = FixturePartitionSource { raw: fixture_partition() };
        let index = fixture_index();
        let mut etl = RoadAttributesEtl::new("road-attributes_23611420_v7066.json".to_string(), &source, &index);

        let dir = tempfile::tempdir().unwrap();
        let partition = etl.extract(dir.path()).unwrap();
        let output = etl.transform(partition).unwrap();

        // Anchor 1 references a segment with no geometry: exactly one
        // segment feature remains, and it is anchor 0's.
        let segments = output.segments.unwrap();
        assert_eq!(segments.features.len(), 1);
        assert_eq!(
            segments.features[0].geometry,
            Geometry::LineString { coordinates: vec![[0.0, 0.0], [10.0, 0.0]] }
        );
        assert_eq!(segments.features[0].properties["speedLimit"], json!({"value": 50}));

        let nodes = output.nodes.unwrap();
        assert_eq!(nodes.features.len(), 1);
        assert_eq!(nodes.features[0].geometry, Geometry::Point { coordinates: [5.0, 5.0] });
        // The node attribute embeds segmentAnchorIndex [0, 7]; 7 has no
        // peer and is omitted, 0 resolves to the segment's property map.
        assert_eq!(
            nodes.features[0].properties["intersectionCategory"]["resolvedSegmentAnchors"],
            json!([{"speedLimit": {"value": 50}}])
        );
    }

    #[test]
    fn emitter_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("road-attributes_1_v1.json_segments.geojson");
        let collection = FeatureCollection::new(vec![Feature::new(
            Geometry::Point { coordinates: [1.0, 2.0] },
            serde_json::Map::new(),
        )]);

        assert_eq!(emit_collection(&path, &collection).unwrap(), EmitOutcome::Written);
        let first = fs::read(&path).unwrap();

        // Second run with different content must skip and leave the file alone.
        let other = FeatureCollection::new(Vec::new());
        assert_eq!(emit_collection(&path, &other).unwrap(), EmitOutcome::Skipped);
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn process_skips_when_both_outputs_exist() {
        let source = FixturePartitionSource { raw: fixture_partition() };
        let index = fixture_index();
        let file_name = "road-attributes_23611420_v7066.json".to_string();

        let dir = tempfile::tempdir().unwrap();
        let mut etl = RoadAttributesEtl::new(file_name.clone(), &source, &index);
        etl.process(dir.path()).unwrap();
        assert!(etl.segments_path(dir.path()).exists());
        assert!(etl.nodes_path(dir.path()).exists());
        let first = fs::read(etl.segments_path(dir.path())).unwrap();

        let mut second_run = RoadAttributesEtl::new(file_name, &source, &index);
        assert!(second_run.is_cached(dir.path()).unwrap());
        second_run.process(dir.path()).unwrap();
        let second = fs::read(second_run.segments_path(dir.path())).unwrap();
        assert_eq!(first, second);
        // Cached runs never re-read the partition, so no refs are collected.
        assert!(second_run.into_street_section_refs().is_empty());
    }

    #[test]
    fn clean_removes_both_outputs() {
        let source = FixturePartitionSource { raw: fixture_partition() };
        let index = fixture_index();
        let dir = tempfile::tempdir().unwrap();
        let mut etl = RoadAttributesEtl::new("road-attributes_23611420_v7066.json".to_string(), &source, &index);
        etl.process(dir.path()).unwrap();
        etl.clean(dir.path()).unwrap();
        assert!(!etl.segments_path(dir.path()).exists());
        assert!(!etl.nodes_path(dir.path()).exists());
    }
}
