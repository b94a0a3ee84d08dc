// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::config::ApplicationSettings;
use crate::error::IntegratorError;
use crate::geometry;
use crate::models::{RouteNode, RouteSegment};
use crate::store::GeoDatabase;
use geo_types::Point;
use std::sync::Arc;
use tracing::debug;

/// Which end of an edited segment is under consideration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    Start,
    End,
}

/// The topological meaning of one inbound edit.
///
/// A closed sum type; the dispatcher matches it exhaustively, so every
/// variant has exactly one handler and adding a variant is a compile-time
/// break everywhere it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Self-authored echo or no-op delta. Nothing to do.
    Ignore,
    /// A brand-new node with no nearby geometry. Recorded in the shadow
    /// mirror, no authoritative mutation, no events.
    NodeDigitized { node: RouteNode },
    /// A known node whose geometry was corrected within tolerance.
    NodeGeometryUpdated { node: RouteNode },
    /// A node edit that cannot be reconciled; the offending row is deleted.
    InvalidNode { node: RouteNode, message: String },
    /// A segment edit that cannot be reconciled; the offending row is deleted.
    InvalidSegment {
        segment: RouteSegment,
        message: String,
    },
    /// A node digitized onto the interior of an existing segment, which
    /// must be split at that node.
    NodeSplitsSegment {
        node: RouteNode,
        segment: RouteSegment,
    },
    /// A segment with no nearby geometry at all: both endpoints become
    /// brand-new nodes.
    NewLonelySegment { segment: RouteSegment },
    NewSegmentBetweenExistingNodes {
        segment: RouteSegment,
        start_node: RouteNode,
        end_node: RouteNode,
    },
    /// Exactly one endpoint coincides with an existing node; the other
    /// becomes a new node.
    NewSegmentToExistingNode {
        segment: RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
    },
    /// An existing node lies strictly inside the edited segment's line;
    /// the edited segment is split at it.
    SegmentSplitByInteriorNode {
        segment: RouteSegment,
        split_node: RouteNode,
    },
    /// A free endpoint of the edited segment lands on the interior of an
    /// existing segment: that segment is split at a node created there,
    /// then the edited segment connects to it.
    SegmentEndSplitsSegment {
        segment: RouteSegment,
        end: SegmentEnd,
        target: RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
    },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Ignore => "Ignore",
            Decision::NodeDigitized { .. } => "NodeDigitized",
            Decision::NodeGeometryUpdated { .. } => "NodeGeometryUpdated",
            Decision::InvalidNode { .. } => "InvalidNode",
            Decision::InvalidSegment { .. } => "InvalidSegment",
            Decision::NodeSplitsSegment { .. } => "NodeSplitsSegment",
            Decision::NewLonelySegment { .. } => "NewLonelySegment",
            Decision::NewSegmentBetweenExistingNodes { .. } => "NewSegmentBetweenExistingNodes",
            Decision::NewSegmentToExistingNode { .. } => "NewSegmentToExistingNode",
            Decision::SegmentSplitByInteriorNode { .. } => "SegmentSplitByInteriorNode",
            Decision::SegmentEndSplitsSegment { .. } => "SegmentEndSplitsSegment",
        }
    }
}

/// Classifies one edit at a time against the reconciled state of the
/// network. Stateless apart from the injected gateway: every query result
/// is fetched per edit and never cached across edits.
pub struct Classifier {
    db: Arc<dyn GeoDatabase>,
    settings: ApplicationSettings,
}

impl Classifier {
    pub fn new(db: Arc<dyn GeoDatabase>, settings: ApplicationSettings) -> Classifier {
        Classifier { db, settings }
    }

    fn is_own_edit(&self, application_name: Option<&str>) -> bool {
        application_name == Some(self.settings.application_name.as_str())
    }

    pub async fn classify_node_edit(
        &self,
        node: &RouteNode,
    ) -> Result<Decision, IntegratorError> {
        if self.is_own_edit(node.application_name.as_deref()) {
            debug!(mrid = %node.mrid, "discarding self-authored node edit");
            return Ok(Decision::Ignore);
        }
        let shadow = self.db.route_node_shadow(node.mrid).await?;
        if let Some(shadow) = &shadow {
            if shadow.coord == node.coord
                && shadow.marked_to_be_deleted == node.marked_to_be_deleted
            {
                debug!(mrid = %node.mrid, "node edit matches shadow state, nothing changed");
                return Ok(Decision::Ignore);
            }
        }
        let point = match node.point() {
            Ok(point) => point,
            Err(e) => {
                return Ok(Decision::InvalidNode {
                    node: node.clone(),
                    message: format!("unreadable point geometry: {e}"),
                });
            }
        };

        let duplicates = self.db.intersecting_nodes(node).await?;
        if let Some(duplicate) = duplicates.first() {
            return Ok(Decision::InvalidNode {
                node: node.clone(),
                message: format!("coincides with existing route node {}", duplicate.mrid),
            });
        }

        let old_point = shadow
            .as_ref()
            .and_then(|s| geometry::decode_point(&s.coord).ok());
        let candidates = self.db.intersecting_segments_by_node(node).await?;
        let mut interior = Vec::new();
        for segment in candidates {
            if self.touches_interior(&point, old_point.as_ref(), &segment)? {
                interior.push(segment);
            }
        }

        match interior.len() {
            0 => Ok(if shadow.is_some() {
                Decision::NodeGeometryUpdated { node: node.clone() }
            } else {
                Decision::NodeDigitized { node: node.clone() }
            }),
            1 => Ok(Decision::NodeSplitsSegment {
                node: node.clone(),
                segment: interior.remove(0),
            }),
            n => Ok(Decision::InvalidNode {
                node: node.clone(),
                message: format!("lies on the interior of {n} route segments"),
            }),
        }
    }

    /// A buffer hit counts as an interior hit only when the node sits away
    /// from both of the segment's endpoints; a node at tolerance distance
    /// from an endpoint is an endpoint match, never a split. The node's
    /// previous position is checked too, so a moved node does not split its
    /// own incident segments.
    fn touches_interior(
        &self,
        point: &Point<f64>,
        old_point: Option<&Point<f64>>,
        segment: &RouteSegment,
    ) -> Result<bool, IntegratorError> {
        let tolerance = self.settings.tolerance;
        let start = segment.start_point()?;
        let end = segment.end_point()?;
        let endpoint_hit = geometry::points_close(&start, point, tolerance)
            || geometry::points_close(&end, point, tolerance)
            || old_point.is_some_and(|old| {
                geometry::points_close(&start, old, tolerance)
                    || geometry::points_close(&end, old, tolerance)
            });
        Ok(!endpoint_hit)
    }

    pub async fn classify_segment_edit(
        &self,
        segment: &RouteSegment,
    ) -> Result<Decision, IntegratorError> {
        if self.is_own_edit(segment.application_name.as_deref()) {
            debug!(mrid = %segment.mrid, "discarding self-authored segment edit");
            return Ok(Decision::Ignore);
        }
        if let Some(shadow) = self.db.route_segment_shadow(segment.mrid).await? {
            if shadow.coord == segment.coord
                && shadow.marked_to_be_deleted == segment.marked_to_be_deleted
            {
                debug!(mrid = %segment.mrid, "segment edit matches shadow state, nothing changed");
                return Ok(Decision::Ignore);
            }
        }
        let line = match segment.line() {
            Ok(line) => line,
            Err(e) => {
                return Ok(Decision::InvalidSegment {
                    segment: segment.clone(),
                    message: format!("unreadable line geometry: {e}"),
                });
            }
        };
        if let Err(reason) = geometry::validate_line(&line) {
            return Ok(Decision::InvalidSegment {
                segment: segment.clone(),
                message: reason,
            });
        }

        let start_nodes = self.db.intersecting_start_nodes(segment).await?;
        let end_nodes = self.db.intersecting_end_nodes(segment).await?;
        let mut interior_nodes = self.db.intersecting_interior_nodes(segment).await?;

        if start_nodes.len() > 1 || end_nodes.len() > 1 {
            return Ok(Decision::InvalidSegment {
                segment: segment.clone(),
                message: "more than one route node within tolerance of an endpoint".to_string(),
            });
        }
        match interior_nodes.len() {
            0 => {}
            1 => {
                return Ok(Decision::SegmentSplitByInteriorNode {
                    segment: segment.clone(),
                    split_node: interior_nodes.remove(0),
                });
            }
            n => {
                return Ok(Decision::InvalidSegment {
                    segment: segment.clone(),
                    message: format!("{n} route nodes within tolerance of the line interior"),
                });
            }
        }

        self.classify_by_endpoints(
            segment,
            start_nodes.into_iter().next(),
            end_nodes.into_iter().next(),
        )
        .await
    }

    async fn classify_by_endpoints(
        &self,
        segment: &RouteSegment,
        start_node: Option<RouteNode>,
        end_node: Option<RouteNode>,
    ) -> Result<Decision, IntegratorError> {
        match (start_node, end_node) {
            (Some(start_node), Some(end_node)) => Ok(Decision::NewSegmentBetweenExistingNodes {
                segment: segment.clone(),
                start_node,
                end_node,
            }),
            (Some(start_node), None) => {
                let mut crossed = self.db.intersecting_end_segments(segment).await?;
                match crossed.len() {
                    0 => Ok(Decision::NewSegmentToExistingNode {
                        segment: segment.clone(),
                        start_node: Some(start_node),
                        end_node: None,
                    }),
                    1 => Ok(Decision::SegmentEndSplitsSegment {
                        segment: segment.clone(),
                        end: SegmentEnd::End,
                        target: crossed.remove(0),
                        start_node: Some(start_node),
                        end_node: None,
                    }),
                    _ => Ok(Decision::InvalidSegment {
                        segment: segment.clone(),
                        message: "end point lands on more than one route segment".to_string(),
                    }),
                }
            }
            (None, Some(end_node)) => {
                let mut crossed = self.db.intersecting_start_segments(segment).await?;
                match crossed.len() {
                    0 => Ok(Decision::NewSegmentToExistingNode {
                        segment: segment.clone(),
                        start_node: None,
                        end_node: Some(end_node),
                    }),
                    1 => Ok(Decision::SegmentEndSplitsSegment {
                        segment: segment.clone(),
                        end: SegmentEnd::Start,
                        target: crossed.remove(0),
                        start_node: None,
                        end_node: Some(end_node),
                    }),
                    _ => Ok(Decision::InvalidSegment {
                        segment: segment.clone(),
                        message: "start point lands on more than one route segment".to_string(),
                    }),
                }
            }
            (None, None) => {
                let mut start_hits = self.db.intersecting_start_segments(segment).await?;
                let mut end_hits = self.db.intersecting_end_segments(segment).await?;
                match (start_hits.len(), end_hits.len()) {
                    (0, 0) => {
                        if self.db.intersecting_segments(segment).await?.is_empty() {
                            Ok(Decision::NewLonelySegment {
                                segment: segment.clone(),
                            })
                        } else {
                            Ok(Decision::InvalidSegment {
                                segment: segment.clone(),
                                message:
                                    "crosses the interior of an existing route segment"
                                        .to_string(),
                            })
                        }
                    }
                    (1, 0) => Ok(Decision::SegmentEndSplitsSegment {
                        segment: segment.clone(),
                        end: SegmentEnd::Start,
                        target: start_hits.remove(0),
                        start_node: None,
                        end_node: None,
                    }),
                    (0, 1) => Ok(Decision::SegmentEndSplitsSegment {
                        segment: segment.clone(),
                        end: SegmentEnd::End,
                        target: end_hits.remove(0),
                        start_node: None,
                        end_node: None,
                    }),
                    _ => Ok(Decision::InvalidSegment {
                        segment: segment.clone(),
                        message: "both end points land on existing route segments".to_string(),
                    }),
                }
            }
        }
    }
}
