use thiserror::Error;
use trellis_bus::broker::BrokerError;

/// Errors raised by the in-memory broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The broker was toggled offline; stands in for connectivity loss.
    #[error("broker connection lost")]
    Offline,

    /// The queue does not exist.
    #[error("unknown queue {0}")]
    UnknownQueue(String),

    /// The subscription does not exist.
    #[error("unknown subscription {0}")]
    UnknownSubscription(String),

    /// The delivery handle is stale or unknown; the message was already
    /// deleted or has been redelivered under a new handle.
    #[error("delivery handle is stale or unknown")]
    InvalidHandle,

    /// The payload could not be wrapped in the wire envelope.
    #[error("failed to build wire envelope")]
    Envelope(#[from] trellis_bus::envelope::Error),
}

impl BrokerError for Error {}
