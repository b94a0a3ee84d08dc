// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! WKB codec and the few in-process geometry checks the integrator needs.
//! Spatial predicates (buffer intersection, snap, split) stay in PostGIS;
//! this module only moves geometries across the WKB boundary and validates
//! edited lines before classification.

use crate::error::IntegratorError;
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Distance, Euclidean};
use geo_types::{Geometry, Line, LineString, Point};
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};
use itertools::Itertools;

pub fn decode_geometry(wkb: &[u8]) -> Result<Geometry<f64>, IntegratorError> {
    Wkb(wkb.to_vec())
        .to_geo()
        .map_err(|e| IntegratorError::Geometry(e.to_string()))
}

pub fn decode_point(wkb: &[u8]) -> Result<Point<f64>, IntegratorError> {
    match decode_geometry(wkb)? {
        Geometry::Point(point) => Ok(point),
        other => Err(IntegratorError::Geometry(format!(
            "expected a point, got {other:?}"
        ))),
    }
}

pub fn decode_line(wkb: &[u8]) -> Result<LineString<f64>, IntegratorError> {
    match decode_geometry(wkb)? {
        Geometry::LineString(line) => Ok(line),
        other => Err(IntegratorError::Geometry(format!(
            "expected a linestring, got {other:?}"
        ))),
    }
}

pub fn encode_point(point: &Point<f64>) -> Result<Vec<u8>, IntegratorError> {
    Geometry::Point(*point)
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| IntegratorError::Geometry(e.to_string()))
}

pub fn encode_line(line: &LineString<f64>) -> Result<Vec<u8>, IntegratorError> {
    Geometry::LineString(line.clone())
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| IntegratorError::Geometry(e.to_string()))
}

/// Whether two points coincide under the configured tolerance.
pub fn points_close(a: &Point<f64>, b: &Point<f64>, tolerance: f64) -> bool {
    Euclidean.distance(*a, *b) <= tolerance
}

/// Validity check for an edited line, run before any classification.
/// Returns the diagnostic that ends up in the `InvalidRouteSegmentOperation`
/// notification.
pub fn validate_line(line: &LineString<f64>) -> Result<(), String> {
    if line.0.len() < 2 {
        return Err("linestring has fewer than two vertices".to_string());
    }
    let first = line.0[0];
    if line.0.iter().all(|c| *c == first) {
        return Err("linestring has fewer than two distinct vertices".to_string());
    }
    let length: f64 = line
        .lines()
        .map(|l| Euclidean.distance(l.start_point(), l.end_point()))
        .sum();
    if length <= 0.0 {
        return Err("linestring has zero length".to_string());
    }

    let segments: Vec<Line<f64>> = line.lines().collect();
    let last = segments.len() - 1;
    let closed = line.is_closed();
    for ((i, a), (j, b)) in segments.iter().enumerate().tuple_combinations() {
        // consecutive segments legitimately share a vertex, as do the two
        // ends of a closed line
        let adjacent = j == i + 1 || (closed && i == 0 && j == last);
        match line_intersection(*a, *b) {
            None => {}
            Some(LineIntersection::SinglePoint { is_proper, .. }) => {
                if !adjacent || is_proper {
                    return Err("linestring is self-intersecting".to_string());
                }
            }
            Some(LineIntersection::Collinear { .. }) => {
                return Err("linestring overlaps itself".to_string());
            }
        }
    }
    Ok(())
}

/// The linestrings inside the geometry `ST_Split` hands back (a geometry
/// collection, or a bare multi/linestring depending on the server).
pub fn split_lines(wkb: &[u8]) -> Result<Vec<LineString<f64>>, IntegratorError> {
    let lines = match decode_geometry(wkb)? {
        Geometry::GeometryCollection(collection) => collection
            .0
            .into_iter()
            .filter_map(|g| match g {
                Geometry::LineString(line) => Some(line),
                _ => None,
            })
            .collect(),
        Geometry::MultiLineString(multi) => multi.0,
        Geometry::LineString(line) => vec![line],
        other => {
            return Err(IntegratorError::Geometry(format!(
                "split returned unexpected geometry {other:?}"
            )));
        }
    };
    if lines.is_empty() {
        return Err(IntegratorError::Geometry(
            "split returned no linestrings".to_string(),
        ));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{GeometryCollection, line_string, point};

    #[test]
    fn point_wkb_round_trip() {
        let p = point! {x: 565931.44, y: 6_197_297.75};
        let wkb = encode_point(&p).unwrap();
        assert_eq!(decode_point(&wkb).unwrap(), p);
    }

    #[test]
    fn line_wkb_round_trip() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 4.0, y: 2.0), (x: 9.0, y: 2.0)];
        let wkb = encode_line(&line).unwrap();
        assert_eq!(decode_line(&wkb).unwrap(), line);
    }

    #[test]
    fn decoding_wrong_geometry_kind_fails() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)];
        let wkb = encode_line(&line).unwrap();
        assert!(decode_point(&wkb).is_err());
    }

    #[test]
    fn straight_line_is_valid() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 3.0)];
        assert!(validate_line(&line).is_ok());
    }

    #[test]
    fn single_vertex_is_invalid() {
        let line = LineString::new(vec![geo_types::coord! {x: 1.0, y: 1.0}]);
        assert!(validate_line(&line).is_err());
    }

    #[test]
    fn repeated_vertex_only_is_invalid() {
        let line = line_string![(x: 1.0, y: 1.0), (x: 1.0, y: 1.0)];
        assert!(
            validate_line(&line)
                .unwrap_err()
                .contains("distinct vertices")
        );
    }

    #[test]
    fn bowtie_is_self_intersecting() {
        let line = line_string![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 10.0)
        ];
        assert!(
            validate_line(&line)
                .unwrap_err()
                .contains("self-intersecting")
        );
    }

    #[test]
    fn backtracking_line_is_invalid() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 5.0, y: 0.0)];
        assert!(validate_line(&line).is_err());
    }

    #[test]
    fn closed_ring_is_valid() {
        let line = line_string![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 0.0)
        ];
        assert!(validate_line(&line).is_ok());
    }

    #[test]
    fn split_collection_parses_to_linestrings() {
        let collection = Geometry::GeometryCollection(GeometryCollection::from(vec![
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0)]),
            Geometry::LineString(line_string![(x: 5.0, y: 0.0), (x: 10.0, y: 0.0)]),
        ]));
        let wkb = collection.to_wkb(CoordDimensions::xy()).unwrap();
        let lines = split_lines(&wkb).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0.len(), 2);
    }

    #[test]
    fn split_of_point_geometry_is_an_error() {
        let wkb = encode_point(&point! {x: 0.0, y: 0.0}).unwrap();
        assert!(split_lines(&wkb).is_err());
    }

    #[test]
    fn points_close_respects_tolerance() {
        let a = point! {x: 0.0, y: 0.0};
        let b = point! {x: 0.005, y: 0.0};
        assert!(points_close(&a, &b, 0.01));
        assert!(!points_close(&a, &b, 0.001));
    }
}
