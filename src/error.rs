// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use thiserror::Error;

/// Failure taxonomy of the integrator.
///
/// Invalid geometry and ambiguous topology never show up here: those are
/// resolved inside the classifier by emitting an `Invalid*` decision. This
/// type carries infrastructure failures (store, transport, serialization),
/// which bubble to the stream adapter so the inbound message stays
/// unacknowledged, plus the replacement-count violation, which indicates a
/// classifier bug and fails event construction immediately.
#[derive(Debug, Error)]
pub enum IntegratorError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("a removed segment is replaced by at most two segments, got {0}")]
    TooManyReplacementSegments(usize),
}
