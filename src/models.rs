// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::error::IntegratorError;
use crate::geometry;
use geo_types::{LineString, Point};
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// A point of the route network graph. The `coord` field is the WKB of a
/// point geometry exactly as stored in PostGIS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNode {
    pub mrid: Uuid,
    #[serde(with = "serde_bytes")]
    pub coord: Vec<u8>,
    pub work_task_mrid: Option<Uuid>,
    pub user_name: Option<String>,
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_info: Option<String>,
    #[serde(default)]
    pub marked_to_be_deleted: bool,
    #[serde(default)]
    pub delete_me: bool,
}

/// An edge of the route network graph. The `coord` field is the WKB of a
/// linestring with exactly two logical endpoints, each of which must
/// coincide (within tolerance) with a route node once the edit settles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub mrid: Uuid,
    #[serde(with = "serde_bytes")]
    pub coord: Vec<u8>,
    pub work_task_mrid: Option<Uuid>,
    pub user_name: Option<String>,
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_info: Option<String>,
    #[serde(default)]
    pub marked_to_be_deleted: bool,
    #[serde(default)]
    pub delete_me: bool,
}

impl RouteNode {
    /// A node invented by the integrator at the given point. Provenance is
    /// inherited from the edit that caused it; the application name is this
    /// system's own, so the echo of the insert is discarded on re-entry.
    pub fn at_point(
        point: &Point<f64>,
        work_task_mrid: Option<Uuid>,
        user_name: Option<String>,
        application_name: &str,
    ) -> Result<RouteNode, IntegratorError> {
        Ok(RouteNode {
            mrid: Uuid::new_v4(),
            coord: geometry::encode_point(point)?,
            work_task_mrid,
            user_name,
            application_name: Some(application_name.to_string()),
            application_info: None,
            marked_to_be_deleted: false,
            delete_me: false,
        })
    }

    pub fn point(&self) -> Result<Point<f64>, IntegratorError> {
        geometry::decode_point(&self.coord)
    }
}

impl RouteSegment {
    pub fn line(&self) -> Result<LineString<f64>, IntegratorError> {
        geometry::decode_line(&self.coord)
    }

    pub fn start_point(&self) -> Result<Point<f64>, IntegratorError> {
        let line = self.line()?;
        line.points()
            .next()
            .ok_or_else(|| IntegratorError::Geometry("empty linestring".to_string()))
    }

    pub fn end_point(&self) -> Result<Point<f64>, IntegratorError> {
        let line = self.line()?;
        line.points()
            .next_back()
            .ok_or_else(|| IntegratorError::Geometry("empty linestring".to_string()))
    }

    /// The node the integrator creates when this segment's start point has
    /// no existing node within tolerance.
    pub fn node_at_start(&self, application_name: &str) -> Result<RouteNode, IntegratorError> {
        RouteNode::at_point(
            &self.start_point()?,
            self.work_task_mrid,
            self.user_name.clone(),
            application_name,
        )
    }

    pub fn node_at_end(&self, application_name: &str) -> Result<RouteNode, IntegratorError> {
        RouteNode::at_point(
            &self.end_point()?,
            self.work_task_mrid,
            self.user_name.clone(),
            application_name,
        )
    }

    /// One of the (at most two) segments that replace a split segment.
    /// Keeps the provenance of the segment it replaces, but is authored by
    /// the integrator itself.
    pub fn replacement(
        original: &RouteSegment,
        line: &LineString<f64>,
        application_name: &str,
    ) -> Result<RouteSegment, IntegratorError> {
        Ok(RouteSegment {
            mrid: Uuid::new_v4(),
            coord: geometry::encode_line(line)?,
            work_task_mrid: original.work_task_mrid,
            user_name: original.user_name.clone(),
            application_name: Some(application_name.to_string()),
            application_info: None,
            marked_to_be_deleted: false,
            delete_me: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, point};

    fn segment(line: LineString<f64>) -> RouteSegment {
        RouteSegment {
            mrid: Uuid::new_v4(),
            coord: geometry::encode_line(&line).unwrap(),
            user_name: Some("editor".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn endpoints_of_segment() {
        let seg = segment(line_string![(x: 1.0, y: 2.0), (x: 3.0, y: 4.0), (x: 5.0, y: 4.0)]);
        assert_eq!(seg.start_point().unwrap(), point! {x: 1.0, y: 2.0});
        assert_eq!(seg.end_point().unwrap(), point! {x: 5.0, y: 4.0});
    }

    #[test]
    fn invented_node_carries_provenance_and_own_application_name() {
        let seg = segment(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]);
        let node = seg.node_at_start("GDB_INTEGRATOR").unwrap();
        assert_eq!(node.point().unwrap(), point! {x: 0.0, y: 0.0});
        assert_eq!(node.user_name.as_deref(), Some("editor"));
        assert_eq!(node.application_name.as_deref(), Some("GDB_INTEGRATOR"));
        assert!(!node.marked_to_be_deleted);
    }

    #[test]
    fn replacement_segment_gets_fresh_mrid() {
        let seg = segment(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]);
        let half = line_string![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0)];
        let repl = RouteSegment::replacement(&seg, &half, "GDB_INTEGRATOR").unwrap();
        assert_ne!(repl.mrid, seg.mrid);
        assert_eq!(repl.user_name, seg.user_name);
        assert_eq!(repl.application_name.as_deref(), Some("GDB_INTEGRATOR"));
        assert_eq!(repl.line().unwrap(), half);
    }
}
