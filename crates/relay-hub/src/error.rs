//! Error types for the hub.

use thiserror::Error;

/// Why a unit could not be handed to a viewer sink.
///
/// Any of these detaches the sink; none of them reach the producer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The viewer's outbound queue is full.
    #[error("Viewer queue full")]
    QueueFull,

    /// The viewer's receiving side has gone away.
    #[error("Viewer disconnected")]
    Closed,

    /// Transport-specific failure.
    #[error("Delivery failed: {0}")]
    Transport(String),
}
