use serde_json::{Map, Value};

use crate::data::partition::{
    NodeAnchor, SegmentAnchor, NODE_ANCHOR_INDEX, SEGMENT_ANCHOR_INDEX,
};

pub const RESOLVED_NODE_ANCHORS: &str = "resolvedNodeAnchors";
pub const RESOLVED_SEGMENT_ANCHORS: &str = "resolvedSegmentAnchors";

/// Resolves embedded anchor-index references in both directions: property
/// records of segment anchors that carry a `nodeAnchorIndex` get a
/// `resolvedNodeAnchors` list, property records of node anchors that
/// carry a `segmentAnchorIndex` get a `resolvedSegmentAnchors` list.
///
/// Peer snapshots are taken from both collections before any record is
/// augmented, so resolution is exactly one level deep and independent of
/// iteration order. Indices without a peer are omitted from the resolved
/// list; unlike the attribute merge, a dangling cross-reference is not an
/// error.
pub fn resolve_cross_references(
    segment_anchors: &mut [SegmentAnchor],
    node_anchors: &mut [NodeAnchor],
) {
    let segment_snapshots: Vec<Map<String, Value>> = segment_anchors
        .iter()
        .map(|anchor| anchor.properties.clone())
        .collect();
    let node_snapshots: Vec<Map<String, Value>> = node_anchors
        .iter()
        .map(|anchor| anchor.properties.clone())
        .collect();

    for anchor in segment_anchors.iter_mut() {
        augment_properties(
            &mut anchor.properties,
            NODE_ANCHOR_INDEX,
            RESOLVED_NODE_ANCHORS,
            &node_snapshots,
        );
    }
    for anchor in node_anchors.iter_mut() {
        augment_properties(
            &mut anchor.properties,
            SEGMENT_ANCHOR_INDEX,
            RESOLVED_SEGMENT_ANCHORS,
            &segment_snapshots,
        );
    }
}

fn augment_properties(
    properties: &mut Map<String, Value>,
    index_field: &str,
    resolved_key: &str,
    peer_snapshots: &[Map<String, Value>],
) {
    for value in properties.values_mut() {
        let Some(record) = value.as_object_mut() else {
            continue;
        };
        let Some(index_value) = record.get(index_field) else {
            continue;
        };

        let resolved: Vec<Value> = embedded_indices(index_value)
            .into_iter()
            .filter_map(|index| peer_snapshots.get(index))
            .map(|snapshot| Value::Object(snapshot.clone()))
            .collect();
        record.insert(resolved_key.to_string(), Value::Array(resolved));
    }
}

fn embedded_indices(index_value: &Value) -> Vec<usize> {
    match index_value {
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_u64)
            .map(|index| index as usize)
            .collect(),
        scalar => scalar
            .as_u64()
            .map(|index| vec![index as usize])
            .unwrap_or_default(),
    }
}
