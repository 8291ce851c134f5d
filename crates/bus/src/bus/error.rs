use std::error::Error as StdError;

use thiserror::Error;

use super::BusState;

/// Errors raised by the service bus adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation is not valid in the bus's current state.
    #[error("expected bus state {expected:?} but found {found:?}")]
    InvalidState {
        /// The state the operation requires.
        expected: BusState,
        /// The state the bus was actually in.
        found: BusState,
    },

    /// `run()` was called with an empty handler registry.
    #[error("no handlers registered")]
    NoHandlers,

    /// A registered handler's message type has no topic binding.
    #[error("no topic bound for message type {0}")]
    UnboundMessageType(&'static str),

    /// A topic in the closure has no broker routing identifier yet.
    #[error("topic {0} has no broker routing identifier")]
    TopicNotProvisioned(String),

    /// A broker provisioning call failed. Fatal; startup is aborted.
    #[error("broker provisioning failed")]
    Provisioning(#[source] Box<dyn StdError + Send + Sync>),

    /// The codec could not encode an outbound message.
    #[error("failed to encode outbound message")]
    Encode(#[source] Box<dyn StdError + Send + Sync>),

    /// The broker rejected a send.
    #[error("failed to send message to broker")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
}
