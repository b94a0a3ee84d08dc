// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Scripted in-memory stand-in for [`GeoDatabase`], used by the classifier
//! and mutator tests. Query answers are set up front; every mutation is
//! recorded so tests can assert on what was written and in which order.

use super::GeoDatabase;
use crate::error::IntegratorError;
use crate::models::{RouteNode, RouteSegment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    InsertNode(Uuid),
    InsertSegment(Uuid),
    MarkDeleteSegment(Uuid),
    DeleteNode(Uuid),
    DeleteSegment(Uuid),
    InsertNodeShadow(Uuid),
    InsertSegmentShadow(Uuid),
    UpdateNodeShadow(Uuid),
    UpdateSegmentShadow(Uuid),
}

#[derive(Default)]
pub struct Script {
    pub node_shadow: HashMap<Uuid, RouteNode>,
    pub segment_shadow: HashMap<Uuid, RouteSegment>,
    pub start_nodes: Vec<RouteNode>,
    pub end_nodes: Vec<RouteNode>,
    pub interior_nodes: Vec<RouteNode>,
    pub nodes_near_node: Vec<RouteNode>,
    pub segments_near_node: Vec<RouteSegment>,
    pub segments_near_line: Vec<RouteSegment>,
    pub start_segments: Vec<RouteSegment>,
    pub end_segments: Vec<RouteSegment>,
    pub split_result: Option<Vec<u8>>,
    pub ops: Vec<Op>,
}

#[derive(Default)]
pub struct ScriptedGeoDatabase {
    pub script: Mutex<Script>,
}

impl ScriptedGeoDatabase {
    pub fn new(script: Script) -> ScriptedGeoDatabase {
        ScriptedGeoDatabase {
            script: Mutex::new(script),
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.script.lock().unwrap().ops.clone()
    }

    fn record(&self, op: Op) {
        self.script.lock().unwrap().ops.push(op);
    }
}

#[async_trait]
impl GeoDatabase for ScriptedGeoDatabase {
    async fn route_node_shadow(&self, mrid: Uuid) -> Result<Option<RouteNode>, IntegratorError> {
        Ok(self.script.lock().unwrap().node_shadow.get(&mrid).cloned())
    }

    async fn route_segment_shadow(
        &self,
        mrid: Uuid,
    ) -> Result<Option<RouteSegment>, IntegratorError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .segment_shadow
            .get(&mrid)
            .cloned())
    }

    async fn intersecting_start_nodes(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        Ok(self.script.lock().unwrap().start_nodes.clone())
    }

    async fn intersecting_end_nodes(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        Ok(self.script.lock().unwrap().end_nodes.clone())
    }

    async fn intersecting_interior_nodes(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        Ok(self.script.lock().unwrap().interior_nodes.clone())
    }

    async fn intersecting_nodes(
        &self,
        _node: &RouteNode,
    ) -> Result<Vec<RouteNode>, IntegratorError> {
        Ok(self.script.lock().unwrap().nodes_near_node.clone())
    }

    async fn intersecting_segments_by_node(
        &self,
        _node: &RouteNode,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        Ok(self.script.lock().unwrap().segments_near_node.clone())
    }

    async fn intersecting_segments(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        Ok(self.script.lock().unwrap().segments_near_line.clone())
    }

    async fn intersecting_start_segments(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        Ok(self.script.lock().unwrap().start_segments.clone())
    }

    async fn intersecting_end_segments(
        &self,
        _segment: &RouteSegment,
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        Ok(self.script.lock().unwrap().end_segments.clone())
    }

    async fn split_segment_at_point(
        &self,
        _segment_mrid: Uuid,
        _point_wkb: &[u8],
    ) -> Result<Vec<u8>, IntegratorError> {
        self.script
            .lock()
            .unwrap()
            .split_result
            .clone()
            .ok_or_else(|| IntegratorError::Geometry("no split scripted".to_string()))
    }

    async fn insert_route_node(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::InsertNode(node.mrid));
        script.node_shadow.insert(node.mrid, node.clone());
        Ok(())
    }

    async fn insert_route_segment(&self, segment: &RouteSegment) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::InsertSegment(segment.mrid));
        script.segment_shadow.insert(segment.mrid, segment.clone());
        Ok(())
    }

    async fn mark_delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        self.record(Op::MarkDeleteSegment(mrid));
        Ok(())
    }

    async fn delete_route_node(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        self.record(Op::DeleteNode(mrid));
        Ok(())
    }

    async fn delete_route_segment(&self, mrid: Uuid) -> Result<(), IntegratorError> {
        self.record(Op::DeleteSegment(mrid));
        Ok(())
    }

    async fn insert_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::InsertNodeShadow(node.mrid));
        script.node_shadow.entry(node.mrid).or_insert(node.clone());
        Ok(())
    }

    async fn insert_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::InsertSegmentShadow(segment.mrid));
        script
            .segment_shadow
            .entry(segment.mrid)
            .or_insert(segment.clone());
        Ok(())
    }

    async fn update_route_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::UpdateNodeShadow(node.mrid));
        script.node_shadow.insert(node.mrid, node.clone());
        Ok(())
    }

    async fn update_route_segment_shadow(
        &self,
        segment: &RouteSegment,
    ) -> Result<(), IntegratorError> {
        let mut script = self.script.lock().unwrap();
        script.ops.push(Op::UpdateSegmentShadow(segment.mrid));
        script.segment_shadow.insert(segment.mrid, segment.clone());
        Ok(())
    }
}
