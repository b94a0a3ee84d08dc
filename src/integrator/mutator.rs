// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::ApplicationSettings;
use crate::error::IntegratorError;
use crate::events::{DomainEvent, RouteSegmentRemoved};
use crate::geometry;
use crate::integrator::classifier::SegmentEnd;
use crate::models::{RouteNode, RouteSegment};
use crate::store::GeoDatabase;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Executes the structural consequence of one classified edit against the
/// store and returns the domain events describing it, already in
/// publication order: node-creation events before the segment events that
/// depend on them, and a removal before the additions that replace it.
pub struct TopologyMutator {
    db: Arc<dyn GeoDatabase>,
    settings: ApplicationSettings,
}

impl TopologyMutator {
    pub fn new(db: Arc<dyn GeoDatabase>, settings: ApplicationSettings) -> TopologyMutator {
        TopologyMutator { db, settings }
    }

    pub async fn handle_node_digitized(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.db.insert_route_node_shadow(node).await?;
        Ok(Vec::new())
    }

    pub async fn handle_node_geometry_updated(
        &self,
        node: &RouteNode,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.db.update_route_node_shadow(node).await?;
        Ok(Vec::new())
    }

    pub async fn handle_invalid_node(
        &self,
        node: &RouteNode,
        message: String,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        warn!(mrid = %node.mrid, %message, "deleting route node");
        self.db.delete_route_node(node.mrid).await?;
        Ok(vec![DomainEvent::InvalidRouteNodeOperation {
            event_id,
            route_node: node.clone(),
            message,
        }])
    }

    pub async fn handle_invalid_segment(
        &self,
        segment: &RouteSegment,
        message: String,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        warn!(mrid = %segment.mrid, %message, "deleting route segment");
        self.db.delete_route_segment(segment.mrid).await?;
        Ok(vec![DomainEvent::InvalidRouteSegmentOperation {
            event_id,
            route_segment: segment.clone(),
            message,
        }])
    }

    pub async fn handle_new_lonely_segment(
        &self,
        segment: &RouteSegment,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.connect_segment(segment, None, None, event_id).await
    }

    pub async fn handle_segment_between_nodes(
        &self,
        segment: &RouteSegment,
        start_node: RouteNode,
        end_node: RouteNode,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.connect_segment(segment, Some(start_node), Some(end_node), event_id)
            .await
    }

    pub async fn handle_segment_to_existing_node(
        &self,
        segment: &RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.connect_segment(segment, start_node, end_node, event_id)
            .await
    }

    /// Shared tail of every new-segment decision: invent the endpoint nodes
    /// that are missing, record the segment in the shadow mirror, and emit
    /// node events before the segment event that references them.
    async fn connect_segment(
        &self,
        segment: &RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        let mut events = Vec::new();
        let start_node = match start_node {
            Some(node) => node,
            None => {
                let node = segment.node_at_start(&self.settings.application_name)?;
                self.db.insert_route_node(&node).await?;
                events.push(DomainEvent::RouteNodeAdded {
                    event_id,
                    route_node: node.clone(),
                });
                node
            }
        };
        let end_node = match end_node {
            Some(node) => node,
            None => {
                let node = segment.node_at_end(&self.settings.application_name)?;
                self.db.insert_route_node(&node).await?;
                events.push(DomainEvent::RouteNodeAdded {
                    event_id,
                    route_node: node.clone(),
                });
                node
            }
        };
        self.upsert_segment_shadow(segment).await?;
        events.push(DomainEvent::RouteSegmentAdded {
            event_id,
            route_segment: segment.clone(),
            start_route_node_id: Some(start_node.mrid),
            end_route_node_id: Some(end_node.mrid),
        });
        Ok(events)
    }

    /// An existing node sits strictly inside the edited segment: the edit
    /// is recorded, then superseded by its two halves.
    pub async fn handle_segment_split_by_interior_node(
        &self,
        segment: &RouteSegment,
        split_node: &RouteNode,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.upsert_segment_shadow(segment).await?;
        let replacements = self.split_segment(segment, &split_node.coord).await?;
        let removed = RouteSegmentRemoved::new(
            event_id,
            segment.mrid,
            replacements.iter().map(|r| r.mrid).collect(),
            "RouteSegmentRemoved",
        )?;
        info!(mrid = %segment.mrid, at = %split_node.mrid, "splitting edited segment at interior node");

        self.db.mark_delete_route_segment(segment.mrid).await?;
        let mut events = vec![DomainEvent::RouteSegmentRemoved(removed)];
        for replacement in &replacements {
            self.db.insert_route_segment(replacement).await?;
        }
        for replacement in replacements {
            events.push(self.segment_added(replacement, event_id).await?);
        }
        Ok(events)
    }

    /// A free endpoint of the edited segment lands on the interior of
    /// `target`: a node is created there, `target` is split at it, and the
    /// edited segment connects to the new node.
    pub async fn handle_segment_end_splits_segment(
        &self,
        segment: &RouteSegment,
        end: SegmentEnd,
        target: &RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        let mut events = Vec::new();

        let split_node = match end {
            SegmentEnd::Start => segment.node_at_start(&self.settings.application_name)?,
            SegmentEnd::End => segment.node_at_end(&self.settings.application_name)?,
        };
        self.db.insert_route_node(&split_node).await?;
        events.push(DomainEvent::RouteNodeAdded {
            event_id,
            route_node: split_node.clone(),
        });

        // resolve the opposite endpoint, inventing its node if nothing is there
        let (start_node, end_node) = match end {
            SegmentEnd::Start => {
                let other = match end_node {
                    Some(node) => node,
                    None => {
                        let node = segment.node_at_end(&self.settings.application_name)?;
                        self.db.insert_route_node(&node).await?;
                        events.push(DomainEvent::RouteNodeAdded {
                            event_id,
                            route_node: node.clone(),
                        });
                        node
                    }
                };
                (split_node.clone(), other)
            }
            SegmentEnd::End => {
                let other = match start_node {
                    Some(node) => node,
                    None => {
                        let node = segment.node_at_start(&self.settings.application_name)?;
                        self.db.insert_route_node(&node).await?;
                        events.push(DomainEvent::RouteNodeAdded {
                            event_id,
                            route_node: node.clone(),
                        });
                        node
                    }
                };
                (other, split_node.clone())
            }
        };

        let replacements = self.split_segment(target, &split_node.coord).await?;
        let removed = RouteSegmentRemoved::new(
            event_id,
            target.mrid,
            replacements.iter().map(|r| r.mrid).collect(),
            "RouteSegmentRemoved",
        )?;
        info!(mrid = %target.mrid, at = %split_node.mrid, "splitting crossed segment at new endpoint node");

        self.db.mark_delete_route_segment(target.mrid).await?;
        events.push(DomainEvent::RouteSegmentRemoved(removed));
        for replacement in &replacements {
            self.db.insert_route_segment(replacement).await?;
        }
        for replacement in replacements {
            events.push(self.segment_added(replacement, event_id).await?);
        }

        self.upsert_segment_shadow(segment).await?;
        events.push(DomainEvent::RouteSegmentAdded {
            event_id,
            route_segment: segment.clone(),
            start_route_node_id: Some(start_node.mrid),
            end_route_node_id: Some(end_node.mrid),
        });
        Ok(events)
    }

    /// A node digitized onto the interior of an existing segment splits it.
    pub async fn handle_node_splits_segment(
        &self,
        node: &RouteNode,
        target: &RouteSegment,
        event_id: Uuid,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        self.upsert_node_shadow(node).await?;
        let mut events = vec![DomainEvent::RouteNodeAdded {
            event_id,
            route_node: node.clone(),
        }];

        let replacements = self.split_segment(target, &node.coord).await?;
        let removed = RouteSegmentRemoved::new(
            event_id,
            target.mrid,
            replacements.iter().map(|r| r.mrid).collect(),
            "RouteSegmentRemoved",
        )?;
        info!(mrid = %target.mrid, at = %node.mrid, "splitting segment at digitized node");

        self.db.mark_delete_route_segment(target.mrid).await?;
        events.push(DomainEvent::RouteSegmentRemoved(removed));
        for replacement in &replacements {
            self.db.insert_route_segment(replacement).await?;
        }
        for replacement in replacements {
            events.push(self.segment_added(replacement, event_id).await?);
        }
        Ok(events)
    }

    /// Snap-then-split the stored target line at the point, and wrap each
    /// resulting piece as a replacement segment authored by this system.
    async fn split_segment(
        &self,
        target: &RouteSegment,
        point_wkb: &[u8],
    ) -> Result<Vec<RouteSegment>, IntegratorError> {
        let pieces_wkb = self
            .db
            .split_segment_at_point(target.mrid, point_wkb)
            .await?;
        let lines = geometry::split_lines(&pieces_wkb)?;
        let mut replacements = Vec::with_capacity(lines.len());
        for line in &lines {
            replacements.push(RouteSegment::replacement(
                target,
                line,
                &self.settings.application_name,
            )?);
        }
        Ok(replacements)
    }

    async fn segment_added(
        &self,
        segment: RouteSegment,
        event_id: Uuid,
    ) -> Result<DomainEvent, IntegratorError> {
        let start_route_node_id = self
            .db
            .intersecting_start_nodes(&segment)
            .await?
            .first()
            .map(|n| n.mrid);
        let end_route_node_id = self
            .db
            .intersecting_end_nodes(&segment)
            .await?
            .first()
            .map(|n| n.mrid);
        Ok(DomainEvent::RouteSegmentAdded {
            event_id,
            route_segment: segment,
            start_route_node_id,
            end_route_node_id,
        })
    }

    async fn upsert_node_shadow(&self, node: &RouteNode) -> Result<(), IntegratorError> {
        self.db.insert_route_node_shadow(node).await?;
        self.db.update_route_node_shadow(node).await
    }

    async fn upsert_segment_shadow(&self, segment: &RouteSegment) -> Result<(), IntegratorError> {
        self.db.insert_route_segment_shadow(segment).await?;
        self.db.update_route_segment_shadow(segment).await
    }
}
