//! Recording helpers shared by the gateway handler and the relay.

use prometheus::{Encoder, TextEncoder};

use super::{
    BUS_RECONNECTS_TOTAL, DUPLICATE_RESPONSES_TOTAL, FRAMES_RECEIVED_TOTAL,
    PROTOCOL_VIOLATIONS_TOTAL, RESPONSES_RELAYED_TOTAL, TOPIC_PUSHES_TOTAL,
};

/// Render the default registry in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording inbound frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    /// Record a validated frame of a known kind
    pub fn record_kind(kind: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a frame rejected by envelope validation
    pub fn record_violation() {
        PROTOCOL_VIOLATIONS_TOTAL.inc();
    }
}

/// Helper struct for recording response relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record a successful response delivered to a client
    pub fn record_success() {
        RESPONSES_RELAYED_TOTAL.with_label_values(&["success"]).inc();
    }

    /// Record a business error delivered to a client
    pub fn record_error() {
        RESPONSES_RELAYED_TOTAL.with_label_values(&["error"]).inc();
    }

    /// Record a late duplicate response dropped by correlation id
    pub fn record_duplicate() {
        DUPLICATE_RESPONSES_TOTAL.inc();
    }

    /// Record a topic message fanned out to subscribers
    pub fn record_topic_push() {
        TOPIC_PUSHES_TOTAL.inc();
    }

    /// Record a bus reconnection attempt
    pub fn record_reconnect() {
        BUS_RECONNECTS_TOTAL.inc();
    }
}
