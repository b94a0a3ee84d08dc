// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::error::IntegratorError;
use crate::models::{RouteNode, RouteSegment};
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Events published to the outbound stream after an edit has been applied.
///
/// A closed sum type: every variant is matched exhaustively wherever events
/// are consumed, so adding one is a compile-time-checked change. The
/// `eventType` tag on the wire carries the variant name. All events produced
/// from one inbound edit share the same `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    RouteNodeAdded {
        event_id: Uuid,
        route_node: RouteNode,
    },
    RouteSegmentAdded {
        event_id: Uuid,
        route_segment: RouteSegment,
        start_route_node_id: Option<Uuid>,
        end_route_node_id: Option<Uuid>,
    },
    RouteSegmentRemoved(RouteSegmentRemoved),
    InvalidRouteNodeOperation {
        event_id: Uuid,
        route_node: RouteNode,
        message: String,
    },
    InvalidRouteSegmentOperation {
        event_id: Uuid,
        route_segment: RouteSegment,
        message: String,
    },
}

impl DomainEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            DomainEvent::RouteNodeAdded { event_id, .. } => *event_id,
            DomainEvent::RouteSegmentAdded { event_id, .. } => *event_id,
            DomainEvent::RouteSegmentRemoved(removed) => removed.event_id,
            DomainEvent::InvalidRouteNodeOperation { event_id, .. } => *event_id,
            DomainEvent::InvalidRouteSegmentOperation { event_id, .. } => *event_id,
        }
    }
}

/// Notification that a segment was superseded by the (at most two) segments
/// created when it was split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegmentRemoved {
    pub cmd_id: Uuid,
    pub event_id: Uuid,
    pub event_ts: String,
    pub segment_id: Uuid,
    pub replaced_by_segments: Vec<Uuid>,
    pub cmd_type: String,
}

impl RouteSegmentRemoved {
    /// Fails when more than two replacement ids are handed in: a single
    /// split point on a simple line yields at most two pieces, so a third
    /// id means the classifier went wrong, and the event must not be
    /// constructed at all.
    pub fn new(
        event_id: Uuid,
        segment_id: Uuid,
        replaced_by_segments: Vec<Uuid>,
        cmd_type: &str,
    ) -> Result<RouteSegmentRemoved, IntegratorError> {
        if replaced_by_segments.len() > 2 {
            return Err(IntegratorError::TooManyReplacementSegments(
                replaced_by_segments.len(),
            ));
        }
        Ok(RouteSegmentRemoved {
            cmd_id: Uuid::new_v4(),
            event_id,
            event_ts: Utc::now().to_rfc3339(),
            segment_id,
            replaced_by_segments,
            cmd_type: cmd_type.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_segment_removed_sets_initial_values_on_construction() {
        let event_id = Uuid::new_v4();
        let segment_id = Uuid::new_v4();
        let replaced = vec![Uuid::new_v4(), Uuid::new_v4()];

        let removed =
            RouteSegmentRemoved::new(event_id, segment_id, replaced.clone(), "RouteSegmentRemoved")
                .unwrap();

        assert!(!removed.cmd_id.is_nil());
        assert_eq!(removed.event_id, event_id);
        assert_eq!(removed.segment_id, segment_id);
        assert_eq!(removed.replaced_by_segments, replaced);
        assert_eq!(removed.cmd_type, "RouteSegmentRemoved");
        assert!(!removed.event_ts.is_empty());
    }

    #[test]
    fn route_segment_removed_accepts_zero_replacements() {
        let removed =
            RouteSegmentRemoved::new(Uuid::new_v4(), Uuid::new_v4(), vec![], "RouteSegmentRemoved");
        assert!(removed.is_ok());
    }

    #[test]
    fn route_segment_removed_rejects_more_than_two_replacements() {
        let replaced = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let removed = RouteSegmentRemoved::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            replaced,
            "RouteSegmentRemoved",
        );
        assert!(matches!(
            removed,
            Err(IntegratorError::TooManyReplacementSegments(3))
        ));
    }

    #[test]
    fn events_serialize_with_event_type_tag() {
        let event = DomainEvent::RouteNodeAdded {
            event_id: Uuid::new_v4(),
            route_node: RouteNode::default(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "RouteNodeAdded");
        assert!(json["routeNode"].is_object());
    }

    #[test]
    fn removed_event_serializes_with_event_type_tag() {
        let removed = RouteSegmentRemoved::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![Uuid::new_v4()],
            "RouteSegmentRemoved",
        )
        .unwrap();
        let json = serde_json::to_value(DomainEvent::RouteSegmentRemoved(removed)).unwrap();
        assert_eq!(json["eventType"], "RouteSegmentRemoved");
        assert!(json["replacedBySegments"].is_array());
    }
}
