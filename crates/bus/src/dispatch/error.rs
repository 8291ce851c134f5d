use std::error::Error as StdError;

use thiserror::Error;

/// Errors raised during registration or dispatch.
#[derive(Debug, Error)]
pub enum Error {
    /// A second handler was registered for the same message type.
    #[error("message type {0} already has a registered handler")]
    DuplicateHandler(&'static str),

    /// The codec could not decode the payload.
    #[error("failed to decode message payload")]
    Decode(#[source] Box<dyn StdError + Send + Sync>),

    /// No handler is registered for the decoded message type.
    #[error("no handler registered for message type {0}")]
    MissingHandler(String),

    /// The decoded payload is not the type registered under its tag.
    #[error("decoded payload does not match the type registered as {0}")]
    TypeMismatch(String),

    /// The handler itself failed.
    #[error("handler for message type {0} failed")]
    Handler(String, #[source] Box<dyn StdError + Send + Sync>),
}
