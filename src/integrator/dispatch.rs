// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::error::IntegratorError;
use crate::events::DomainEvent;
use crate::integrator::classifier::Decision;
use crate::integrator::mutator::TopologyMutator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Sink for outbound domain events. The Kafka producer implements this in
/// production; tests substitute a recorder.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), IntegratorError>;
}

/// Routes each decision to its one handler and publishes the resulting
/// events, in order, before returning. The dispatch table is this single
/// exhaustive `match`: one arm per variant, resolved at compile time, so a
/// new decision without a handler does not build.
///
/// Dispatch is synchronous from the caller's perspective; the stream
/// adapter awaits it before acknowledging the inbound message, and any
/// handler or publisher error propagates and prevents the acknowledgment.
pub struct Dispatcher {
    mutator: TopologyMutator,
    publisher: Arc<dyn EventPublisher>,
}

impl Dispatcher {
    pub fn new(mutator: TopologyMutator, publisher: Arc<dyn EventPublisher>) -> Dispatcher {
        Dispatcher { mutator, publisher }
    }

    pub async fn dispatch(
        &self,
        decision: Decision,
    ) -> Result<Vec<DomainEvent>, IntegratorError> {
        // one fresh id correlates every event produced from this edit
        let event_id = Uuid::new_v4();
        info!(decision = decision.label(), %event_id, "applying decision");

        let events = match decision {
            Decision::Ignore => Vec::new(),
            Decision::NodeDigitized { node } => {
                self.mutator.handle_node_digitized(&node).await?
            }
            Decision::NodeGeometryUpdated { node } => {
                self.mutator.handle_node_geometry_updated(&node).await?
            }
            Decision::InvalidNode { node, message } => {
                self.mutator
                    .handle_invalid_node(&node, message, event_id)
                    .await?
            }
            Decision::InvalidSegment { segment, message } => {
                self.mutator
                    .handle_invalid_segment(&segment, message, event_id)
                    .await?
            }
            Decision::NodeSplitsSegment { node, segment } => {
                self.mutator
                    .handle_node_splits_segment(&node, &segment, event_id)
                    .await?
            }
            Decision::NewLonelySegment { segment } => {
                self.mutator
                    .handle_new_lonely_segment(&segment, event_id)
                    .await?
            }
            Decision::NewSegmentBetweenExistingNodes {
                segment,
                start_node,
                end_node,
            } => {
                self.mutator
                    .handle_segment_between_nodes(&segment, start_node, end_node, event_id)
                    .await?
            }
            Decision::NewSegmentToExistingNode {
                segment,
                start_node,
                end_node,
            } => {
                self.mutator
                    .handle_segment_to_existing_node(&segment, start_node, end_node, event_id)
                    .await?
            }
            Decision::SegmentSplitByInteriorNode {
                segment,
                split_node,
            } => {
                self.mutator
                    .handle_segment_split_by_interior_node(&segment, &split_node, event_id)
                    .await?
            }
            Decision::SegmentEndSplitsSegment {
                segment,
                end,
                target,
                start_node,
                end_node,
            } => {
                self.mutator
                    .handle_segment_end_splits_segment(
                        &segment, end, &target, start_node, end_node, event_id,
                    )
                    .await?
            }
        };

        for event in &events {
            self.publisher.publish(event).await?;
        }
        Ok(events)
    }
}
