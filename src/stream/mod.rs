// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Kafka adapters: the inbound edit subscriber and the outbound domain
//! event producer. One logical worker per partition, strictly in arrival
//! order; a message is acknowledged only after its decision has been fully
//! applied and every resulting event published.

use crate::config::KafkaSettings;
use crate::error::IntegratorError;
use crate::events::DomainEvent;
use crate::integrator::classifier::Classifier;
use crate::integrator::dispatch::{Dispatcher, EventPublisher};
use crate::models::{RouteNode, RouteSegment};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Offset;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

/// One inbound node edit as the editing tool's change feed reports it.
/// An absent `mrid` signals deletion of the entity rather than an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNodeEditMessage {
    pub mrid: Option<Uuid>,
    #[serde(with = "serde_bytes", default)]
    pub coord: Vec<u8>,
    pub work_task_mrid: Option<Uuid>,
    pub user_name: Option<String>,
    pub application_name: Option<String>,
    #[serde(default)]
    pub marked_to_be_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegmentEditMessage {
    pub mrid: Option<Uuid>,
    #[serde(with = "serde_bytes", default)]
    pub coord: Vec<u8>,
    pub work_task_mrid: Option<Uuid>,
    pub user_name: Option<String>,
    pub application_name: Option<String>,
    #[serde(default)]
    pub marked_to_be_deleted: bool,
}

impl RouteNodeEditMessage {
    /// `None` means the edit is a deletion signal.
    pub fn into_route_node(self) -> Option<RouteNode> {
        Some(RouteNode {
            mrid: self.mrid?,
            coord: self.coord,
            work_task_mrid: self.work_task_mrid,
            user_name: self.user_name,
            application_name: self.application_name,
            application_info: None,
            marked_to_be_deleted: self.marked_to_be_deleted,
            delete_me: false,
        })
    }
}

impl RouteSegmentEditMessage {
    pub fn into_route_segment(self) -> Option<RouteSegment> {
        Some(RouteSegment {
            mrid: self.mrid?,
            coord: self.coord,
            work_task_mrid: self.work_task_mrid,
            user_name: self.user_name,
            application_name: self.application_name,
            application_info: None,
            marked_to_be_deleted: self.marked_to_be_deleted,
            delete_me: false,
        })
    }
}

/// Publishes domain events to the outbound topic, keyed by the correlation
/// id so every event of one edit lands on the same partition, in order.
pub struct KafkaEventProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventProducer {
    pub fn new(settings: &KafkaSettings) -> Result<KafkaEventProducer, IntegratorError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(KafkaEventProducer {
            producer,
            topic: settings.event_topic.clone(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventProducer {
    async fn publish(&self, event: &DomainEvent) -> Result<(), IntegratorError> {
        let payload = serde_json::to_vec(event)?;
        let key = event.event_id().to_string();
        self.producer
            .send(
                FutureRecord::to(&self.topic).key(&key).payload(&payload),
                PRODUCE_TIMEOUT,
            )
            .await
            .map_err(|(e, _)| IntegratorError::Kafka(e))?;
        Ok(())
    }
}

/// Subscribes to the node and segment edit topics and feeds each message
/// through the classifier and dispatcher before committing its offset.
pub struct RouteNetworkSubscriber {
    consumer: StreamConsumer,
    classifier: Classifier,
    dispatcher: Dispatcher,
    node_topic: String,
    segment_topic: String,
}

impl RouteNetworkSubscriber {
    pub fn new(
        settings: &KafkaSettings,
        classifier: Classifier,
        dispatcher: Dispatcher,
    ) -> Result<RouteNetworkSubscriber, IntegratorError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &settings.consumer_group)
            .set("bootstrap.servers", &settings.brokers)
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[
            settings.route_node_topic.as_str(),
            settings.route_segment_topic.as_str(),
        ])?;
        Ok(RouteNetworkSubscriber {
            consumer,
            classifier,
            dispatcher,
            node_topic: settings.route_node_topic.clone(),
            segment_topic: settings.route_segment_topic.clone(),
        })
    }

    /// Processes edits strictly in arrival order, forever. On a processing
    /// failure the offset stays uncommitted and the consumer seeks back, so
    /// the same message is redelivered after a backoff.
    pub async fn run(&self) -> Result<(), IntegratorError> {
        info!(
            node_topic = %self.node_topic,
            segment_topic = %self.segment_topic,
            "listening for route network edits"
        );
        loop {
            let message = match self.consumer.recv().await {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "kafka receive failed");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };
            match self.handle_message(&message).await {
                Ok(()) => {
                    self.consumer.commit_message(&message, CommitMode::Async)?;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        topic = message.topic(),
                        offset = message.offset(),
                        "failed to process edit, retrying"
                    );
                    if let Err(seek_error) = self.consumer.seek(
                        message.topic(),
                        message.partition(),
                        Offset::Offset(message.offset()),
                        PRODUCE_TIMEOUT,
                    ) {
                        warn!(
                            error = %seek_error,
                            "seek back failed, edit is only retried after a restart"
                        );
                    }
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_message(
        &self,
        message: &BorrowedMessage<'_>,
    ) -> Result<(), IntegratorError> {
        let Some(payload) = message.payload() else {
            debug!(topic = message.topic(), "skipping message without payload");
            return Ok(());
        };
        if message.topic() == self.node_topic {
            // a payload we cannot decode is a poison pill, not a transient
            // failure; log it and move on
            let edit: RouteNodeEditMessage = match serde_json::from_slice(payload) {
                Ok(edit) => edit,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable route node edit");
                    return Ok(());
                }
            };
            match edit.into_route_node() {
                None => info!("route node deleted upstream, nothing to reconcile"),
                Some(node) => {
                    let decision = self.classifier.classify_node_edit(&node).await?;
                    self.dispatcher.dispatch(decision).await?;
                }
            }
        } else if message.topic() == self.segment_topic {
            let edit: RouteSegmentEditMessage = match serde_json::from_slice(payload) {
                Ok(edit) => edit,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable route segment edit");
                    return Ok(());
                }
            };
            match edit.into_route_segment() {
                None => info!("route segment deleted upstream, nothing to reconcile"),
                Some(segment) => {
                    let decision = self.classifier.classify_segment_edit(&segment).await?;
                    self.dispatcher.dispatch(decision).await?;
                }
            }
        } else {
            debug!(topic = message.topic(), "message from unexpected topic");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_message_without_mrid_is_a_deletion_signal() {
        let edit: RouteSegmentEditMessage = serde_json::from_str("{}").unwrap();
        assert!(edit.into_route_segment().is_none());
    }

    #[test]
    fn edit_message_round_trips_through_json() {
        let mrid = Uuid::new_v4();
        let edit = RouteNodeEditMessage {
            mrid: Some(mrid),
            coord: vec![1, 2, 3],
            work_task_mrid: None,
            user_name: Some("editor".to_string()),
            application_name: Some("GIS_EDITOR".to_string()),
            marked_to_be_deleted: false,
        };
        let json = serde_json::to_string(&edit).unwrap();
        let parsed: RouteNodeEditMessage = serde_json::from_str(&json).unwrap();
        let node = parsed.into_route_node().unwrap();
        assert_eq!(node.mrid, mrid);
        assert_eq!(node.coord, vec![1, 2, 3]);
        assert_eq!(node.application_name.as_deref(), Some("GIS_EDITOR"));
    }

    #[test]
    fn camel_case_payload_parses() {
        let json = r#"{
            "mrid": "f1f1f1f1-0000-0000-0000-000000000001",
            "coord": [1, 2],
            "userName": "editor",
            "applicationName": "GIS_EDITOR",
            "markedToBeDeleted": true
        }"#;
        let edit: RouteNodeEditMessage = serde_json::from_str(json).unwrap();
        let node = edit.into_route_node().unwrap();
        assert!(node.marked_to_be_deleted);
        assert_eq!(node.user_name.as_deref(), Some("editor"));
    }
}
