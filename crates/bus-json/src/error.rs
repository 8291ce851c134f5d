use thiserror::Error;

/// Errors raised by the JSON codec.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload was not the expected JSON shape.
    #[error("malformed json payload")]
    Json(#[from] serde_json::Error),

    /// The wire tag is not registered with this codec.
    #[error("message type {0} is not registered with the codec")]
    UnknownType(String),

    /// The outbound value is not the concrete type registered under its tag.
    #[error("outbound message is not the type registered as {0}")]
    TypeMismatch(&'static str),

    /// The message type has no topic binding in the hierarchy.
    #[error("message type {0} has no topic binding")]
    UnboundType(&'static str),
}
