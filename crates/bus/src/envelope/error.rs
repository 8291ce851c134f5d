use thiserror::Error;

/// Errors raised while reading or writing the broker wire envelope.
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope JSON was malformed.
    #[error("malformed wire envelope")]
    Json(#[from] serde_json::Error),

    /// The payload was not valid UTF-8 and cannot be carried as the
    /// envelope's message string.
    #[error("payload is not valid utf-8")]
    NonUtf8Payload(#[from] std::string::FromUtf8Error),
}
