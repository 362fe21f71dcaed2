use geo::{Coord, EuclideanLength, Line, LineString};

use crate::data::geojson::Geometry;
use crate::data::partition::{NodeAnchor, SegmentAnchor};
use crate::errors::{Error, Result};
use crate::sources::GeometryIndex;

/// Derives the drawable geometry for one segment anchor. The first
/// oriented segment reference whose identifier resolves in the index
/// supplies the reference line; it is then sliced by the anchor's
/// fractional offsets. Remaining references contribute to properties
/// only, never to geometry.
pub fn resolve_segment_anchor_geometry(
    partition_name: &str,
    anchor_index: usize,
    anchor: &SegmentAnchor,
    index: &dyn GeometryIndex,
) -> Result<Geometry> {
    let line = anchor
        .oriented_segment_ref
        .iter()
        .find_map(|oriented| index.resolve_segment_geometry(&oriented.segment_ref.identifier));
    let Some(line) = line else {
        return Err(Error::UnresolvedGeometry {
            partition: partition_name.to_string(),
            anchor_kind: "segment",
            anchor_index,
            identifier: anchor
                .oriented_segment_ref
                .first()
                .map(|oriented| oriented.segment_ref.identifier.clone())
                .unwrap_or_default(),
        });
    };

    let start_offset = anchor.first_segment_start_offset.unwrap_or(0.0);
    let end_offset = anchor.last_segment_end_offset.unwrap_or(1.0);
    if !(0.0..=1.0).contains(&start_offset) || !(0.0..=1.0).contains(&end_offset) {
        return Err(Error::InvalidOffsetRange {
            partition: partition_name.to_string(),
            anchor_index,
            start: start_offset,
            end: end_offset,
        });
    }

    Ok(line_substring(&line, start_offset, end_offset))
}

/// Point geometry for one node anchor, looked up by node identifier.
pub fn resolve_node_anchor_geometry(
    partition_name: &str,
    anchor_index: usize,
    anchor: &NodeAnchor,
    index: &dyn GeometryIndex,
) -> Result<Geometry> {
    index
        .resolve_node_geometry(&anchor.node_ref.identifier)
        .map(Geometry::from)
        .ok_or_else(|| Error::UnresolvedGeometry {
            partition: partition_name.to_string(),
            anchor_kind: "node",
            anchor_index,
            identifier: anchor.node_ref.identifier.clone(),
        })
}

/// Arc-length substring of `line` between two fractional offsets, both
/// measured from the line start. Interior vertices are kept in their
/// original order; the boundary points are interpolated. Equal offsets
/// collapse to a Point, which changes the emitted GeoJSON geometry type.
pub fn line_substring(line: &LineString<f64>, start_fraction: f64, end_fraction: f64) -> Geometry {
    let (start_fraction, end_fraction, reversed) = if start_fraction <= end_fraction {
        (start_fraction, end_fraction, false)
    } else {
        (end_fraction, start_fraction, true)
    };

    let total_length: f64 = line.lines().map(|segment| segment.euclidean_length()).sum();
    let start_distance = start_fraction * total_length;
    let end_distance = end_fraction * total_length;

    if start_distance == end_distance {
        return Geometry::Point {
            coordinates: coord_to_position(point_along(line, start_distance)),
        };
    }

    let mut coords: Vec<Coord<f64>> = Vec::new();
    let mut walked = 0.0;
    let mut started = false;

    for segment in line.lines() {
        let segment_length = segment.euclidean_length();
        let segment_end = walked + segment_length;

        if !started {
            if segment_end >= start_distance {
                coords.push(interpolate(&segment, start_distance - walked));
                started = true;
                if segment_end >= end_distance {
                    coords.push(interpolate(&segment, end_distance - walked));
                    break;
                }
                coords.push(segment.end);
            }
        } else if segment_end >= end_distance {
            coords.push(interpolate(&segment, end_distance - walked));
            break;
        } else {
            coords.push(segment.end);
        }
        walked = segment_end;
    }

    coords.dedup();
    if reversed {
        coords.reverse();
    }
    Geometry::LineString {
        coordinates: coords.into_iter().map(coord_to_position).collect(),
    }
}

/// The point at `distance` along the line, clamped to its endpoints.
fn point_along(line: &LineString<f64>, distance: f64) -> Coord<f64> {
    let mut walked = 0.0;
    let mut last = line.0[0];
    for segment in line.lines() {
        let segment_length = segment.euclidean_length();
        if walked + segment_length >= distance {
            return interpolate(&segment, distance - walked);
        }
        walked += segment_length;
        last = segment.end;
    }
    last
}

fn interpolate(segment: &Line<f64>, distance_on_segment: f64) -> Coord<f64> {
    let length = segment.euclidean_length();
    if length == 0.0 {
        return segment.start;
    }
    let t = distance_on_segment / length;
    Coord {
        x: segment.start.x + (segment.end.x - segment.start.x) * t,
        y: segment.start.y + (segment.end.y - segment.start.y) * t,
    }
}

fn coord_to_position(coord: Coord<f64>) -> [f64; 2] {
    [coord.x, coord.y]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::partition::{OrientedSegmentRef, PartitionReference};
    use crate::sources::TopologyGeometryIndex;
    use geo::Point;

    fn straight_line() -> LineString<f64> {
        // Two points, length 10, along the x axis.
        LineString::new(vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 }])
    }

    fn anchor_for(identifiers: &[&str], start: Option<f64>, end: Option<f64>) -> SegmentAnchor {
        SegmentAnchor {
            oriented_segment_ref: identifiers
                .iter()
                .map(|identifier| OrientedSegmentRef {
                    segment_ref: PartitionReference {
                        partition_name: "23611420".to_string(),
                        identifier: identifier.to_string(),
                    },
                    direction: None,
                })
                .collect(),
            first_segment_start_offset: start,
            last_segment_end_offset: end,
            properties: Default::default(),
        }
    }

    #[test]
    fn first_half_of_a_straight_line() {
        let result = line_substring(&straight_line(), 0.0, 0.5);
        assert_eq!(
            result,
            Geometry::LineString {
                coordinates: vec![[0.0, 0.0], [5.0, 0.0]]
            }
        );
    }

    #[test]
    fn equal_offsets_collapse_to_a_point() {
        let result = line_substring(&straight_line(), 0.3, 0.3);
        assert_eq!(result, Geometry::Point { coordinates: [3.0, 0.0] });
    }

    #[test]
    fn full_range_returns_the_original_geometry() {
        let line = LineString::new(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 4.0, y: 0.0 },
            Coord { x: 4.0, y: 3.0 },
        ]);
        let result = line_substring(&line, 0.0, 1.0);
        assert_eq!(
            result,
            Geometry::LineString {
                coordinates: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 3.0]]
            }
        );
    }

    #[test]
    fn interior_vertices_between_the_offsets_are_kept() {
        // Total length 16; slice from 2 to 10 keeps both bends.
        let line = LineString::new(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 4.0, y: 0.0 },
            Coord { x: 4.0, y: 4.0 },
            Coord { x: 12.0, y: 4.0 },
        ]);
        let result = line_substring(&line, 0.125, 0.625);
        assert_eq!(
            result,
            Geometry::LineString {
                coordinates: vec![[2.0, 0.0], [4.0, 0.0], [4.0, 4.0], [6.0, 4.0]]
            }
        );
    }

    #[test]
    fn reversed_offsets_reverse_the_vertex_order() {
        let result = line_substring(&straight_line(), 0.5, 0.0);
        assert_eq!(
            result,
            Geometry::LineString {
                coordinates: vec![[5.0, 0.0], [0.0, 0.0]]
            }
        );
    }

    #[test]
    fn uses_the_first_resolvable_segment_reference() {
        let index = TopologyGeometryIndex::from_parts(
            vec![("seg:known", straight_line())],
            Vec::new(),
        );
        let anchor = anchor_for(&["seg:missing", "seg:known"], None, Some(0.5));
        let geometry =
            resolve_segment_anchor_geometry("23611420", 0, &anchor, &index).unwrap();
        assert_eq!(
            geometry,
            Geometry::LineString {
                coordinates: vec![[0.0, 0.0], [5.0, 0.0]]
            }
        );
    }

    #[test]
    fn unresolvable_anchor_reports_unresolved_geometry() {
        let index = TopologyGeometryIndex::from_parts(Vec::new(), Vec::new());
        let anchor = anchor_for(&["seg:missing"], None, None);
        let err = resolve_segment_anchor_geometry("23611420", 4, &anchor, &index).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedGeometry { anchor_index: 4, anchor_kind: "segment", .. }
        ));
    }

    #[test]
    fn offsets_outside_unit_range_are_fatal() {
        let index = TopologyGeometryIndex::from_parts(
            vec![("seg:known", straight_line())],
            Vec::new(),
        );
        let anchor = anchor_for(&["seg:known"], Some(-0.1), Some(1.5));
        let err = resolve_segment_anchor_geometry("23611420", 0, &anchor, &index).unwrap_err();
        assert!(matches!(err, Error::InvalidOffsetRange { .. }));
    }

    #[test]
    fn node_geometry_is_looked_up_by_identifier() {
        let index = TopologyGeometryIndex::from_parts(
            Vec::new(),
            vec![("node:1", Point::new(-3.05, 51.05))],
        );
        let anchor = NodeAnchor {
            node_ref: PartitionReference {
                partition_name: "23611420".to_string(),
                identifier: "node:1".to_string(),
            },
            properties: Default::default(),
        };
        let geometry = resolve_node_anchor_geometry("23611420", 0, &anchor, &index).unwrap();
        assert_eq!(geometry, Geometry::Point { coordinates: [-3.05, 51.05] });

        let missing = NodeAnchor {
            node_ref: PartitionReference {
                partition_name: "23611420".to_string(),
                identifier: "node:unknown".to_string(),
            },
            properties: Default::default(),
        };
        let err = resolve_node_anchor_geometry("23611420", 1, &missing, &index).unwrap_err();
        assert!(matches!(err, Error::UnresolvedGeometry { anchor_kind: "node", .. }));
    }
}
