use serde::Deserialize;
use serde_json::{Map, Value};

pub const SEGMENT_ANCHOR_INDEX: &str = "segmentAnchorIndex";
pub const NODE_ANCHOR_INDEX: &str = "nodeAnchorIndex";
pub const ORIGIN_SEGMENT_ANCHOR_INDEX: &str = "originSegmentAnchorIndex";
pub const ORIGINATING_SEGMENT_ANCHOR_INDEX: &str = "originatingSegmentAnchorIndex";

/// One decoded road-attribute layer tile. The two anchor collections are
/// pulled out into typed vectors; every remaining top-level entry is kept
/// as-is in `collections` (the array-of-record entries among them are the
/// attribute collections).

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRecord {
    pub partition_name: String,
    /// Scalar on road-attribute layers, an array on some index layers.
    #[serde(default)]
    pub tile_id: Option<Value>,
    #[serde(default)]
    pub segment_anchor: Vec<SegmentAnchor>,
    #[serde(default)]
    pub node_anchor: Vec<NodeAnchor>,
    #[serde(flatten)]
    pub collections: Map<String, Value>,
}

/// An anchor's identity is its position in the collection; indices are
/// never reassigned while a partition is being resolved.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAnchor {
    #[serde(default)]
    pub oriented_segment_ref: Vec<OrientedSegmentRef>,
    #[serde(default)]
    pub first_segment_start_offset: Option<f64>,
    #[serde(default)]
    pub last_segment_end_offset: Option<f64>,
    /// Merged attribute records, attribute-collection name -> residual record.
    #[serde(skip)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAnchor {
    pub node_ref: PartitionReference,
    #[serde(skip)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientedSegmentRef {
    pub segment_ref: PartitionReference,
    /// Traversal direction along the referenced segment. Offsets are
    /// measured from the geometry start regardless of direction, so this
    /// is carried but never interpreted here.
    #[serde(default)]
    #[allow(dead_code)]
    pub direction: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionReference {
    #[serde(default)]
    pub partition_name: String,
    pub identifier: String,
}

/// Which anchor-index field an attribute collection carries. Decided once
/// per collection from its first element; detection is by field presence,
/// never by value truthiness (index 0 is a valid index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeIndexKind {
    SegmentAnchorIndex,
    OriginSegmentAnchorIndex,
    OriginatingSegmentAnchorIndex,
    NodeAnchorIndex,
    /// Not an anchor-attribute collection; skipped by the indexer.
    NoIndex,
}

impl AttributeIndexKind {
    pub fn detect(first: &Value) -> AttributeIndexKind {
        let Some(record) = first.as_object() else {
            return AttributeIndexKind::NoIndex;
        };
        if record.contains_key(SEGMENT_ANCHOR_INDEX) {
            AttributeIndexKind::SegmentAnchorIndex
        } else if record.contains_key(ORIGIN_SEGMENT_ANCHOR_INDEX) {
            AttributeIndexKind::OriginSegmentAnchorIndex
        } else if record.contains_key(ORIGINATING_SEGMENT_ANCHOR_INDEX) {
            AttributeIndexKind::OriginatingSegmentAnchorIndex
        } else if record.contains_key(NODE_ANCHOR_INDEX) {
            AttributeIndexKind::NodeAnchorIndex
        } else {
            AttributeIndexKind::NoIndex
        }
    }

    /// The index field this kind reads from attribute records, if any.
    pub fn field_name(&self) -> Option<&'static str> {
        match self {
            AttributeIndexKind::SegmentAnchorIndex => Some(SEGMENT_ANCHOR_INDEX),
            AttributeIndexKind::OriginSegmentAnchorIndex => Some(ORIGIN_SEGMENT_ANCHOR_INDEX),
            AttributeIndexKind::OriginatingSegmentAnchorIndex => {
                Some(ORIGINATING_SEGMENT_ANCHOR_INDEX)
            }
            AttributeIndexKind::NodeAnchorIndex => Some(NODE_ANCHOR_INDEX),
            AttributeIndexKind::NoIndex => None,
        }
    }

    /// All three segment-flavoured index fields attach to segment anchors.
    pub fn targets_segment_anchors(&self) -> bool {
        matches!(
            self,
            AttributeIndexKind::SegmentAnchorIndex
                | AttributeIndexKind::OriginSegmentAnchorIndex
                | AttributeIndexKind::OriginatingSegmentAnchorIndex
        )
    }
}
