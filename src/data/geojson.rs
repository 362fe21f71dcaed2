use std::io;

use geo::{LineString, Point};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;

/// A position in the native planar coordinate space of the input, `[x, y]`.
pub type Position = [f64; 2];

/// The two geometry shapes this pipeline derives. Whether a sliced anchor
/// comes out as a Point or a LineString is decided by the resolver, so the
/// distinction is kept explicit here.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    LineString { coordinates: Vec<Position> },
}

impl From<Point<f64>> for Geometry {
    fn from(value: Point<f64>) -> Self {
        Geometry::Point {
            coordinates: [value.x(), value.y()],
        }
    }
}

impl From<&LineString<f64>> for Geometry {
    fn from(value: &LineString<f64>) -> Self {
        Geometry::LineString {
            coordinates: value.0.iter().map(|coord| [coord.x, coord.y]).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub feature_type: String,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Feature {
        Feature {
            feature_type: "Feature".to_string(),
            geometry,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub collection_type: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            collection_type: "FeatureCollection".to_string(),
            features,
        }
    }

    /// Serializes with four-space indentation. serde_json keeps map keys
    /// sorted, so two runs over the same input produce identical bytes.
    pub fn write_pretty<W: io::Write>(&self, writer: W) -> Result<()> {
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
        self.serialize(&mut serializer)?;
        Ok(())
    }
}
