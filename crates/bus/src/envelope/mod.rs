mod error;

pub use error::Error;

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::message::{attribute, Headers};

/// One attribute value in the wire envelope.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WireAttribute {
    #[serde(rename = "Value")]
    value: String,
}

/// The JSON body the broker delivers to consumer queues.
///
/// Topic fan-out and direct queue sends both use this shape, so the
/// consumption path parses every delivery the same way.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WireEnvelope {
    #[serde(rename = "Message")]
    message: String,

    #[serde(rename = "MessageId")]
    message_id: String,

    #[serde(rename = "MessageAttributes", default)]
    attributes: HashMap<String, WireAttribute>,
}

impl WireEnvelope {
    /// Wraps a payload for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid UTF-8.
    pub fn new(
        message_id: impl Into<String>,
        payload: &Bytes,
        attributes: &Headers,
    ) -> Result<Self, Error> {
        Ok(Self {
            message: String::from_utf8(payload.to_vec())?,
            message_id: message_id.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.clone(), WireAttribute { value: v.clone() }))
                .collect(),
        })
    }

    /// Serializes the envelope to its JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// A parsed inbound delivery: id, flattened headers, payload, and the
/// request/response attributes when present.
#[derive(Debug)]
pub struct InboundEnvelope {
    message_id: String,
    headers: Headers,
    payload: Bytes,
    correlation_id: Option<String>,
    reply_to: Option<String>,
}

impl InboundEnvelope {
    /// Parses a broker delivery body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a valid wire envelope.
    pub fn parse(body: &Bytes) -> Result<Self, Error> {
        let wire: WireEnvelope = serde_json::from_slice(body)?;
        let headers: Headers = wire
            .attributes
            .into_iter()
            .map(|(k, a)| (k, a.value))
            .collect();

        Ok(Self {
            message_id: wire.message_id,
            correlation_id: headers.get(attribute::CORRELATION_ID).cloned(),
            reply_to: headers.get(attribute::REPLY_TO).cloned(),
            payload: Bytes::from(wire.message.into_bytes()),
            headers,
        })
    }

    /// The broker envelope id.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The flattened attribute map.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The codec-decodable payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The caller's correlation id, if the message carries one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The caller's reply queue address, if the message carries one.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_attributes() {
        let body = Bytes::from_static(
            br#"{
                "Message": "{\"type\":\"ping\"}",
                "MessageId": "m-1",
                "MessageAttributes": {
                    "correlation_id": {"Value": "c-1"},
                    "reply_to": {"Value": "replies"},
                    "trace": {"Value": "abc"}
                }
            }"#,
        );

        let envelope = InboundEnvelope::parse(&body).unwrap();
        assert_eq!(envelope.message_id(), "m-1");
        assert_eq!(envelope.correlation_id(), Some("c-1"));
        assert_eq!(envelope.reply_to(), Some("replies"));
        assert_eq!(envelope.headers().get("trace").unwrap(), "abc");
        assert_eq!(envelope.payload(), &Bytes::from_static(b"{\"type\":\"ping\"}"));
    }

    #[test]
    fn parse_tolerates_missing_attributes() {
        let body = Bytes::from_static(br#"{"Message": "x", "MessageId": "m-2"}"#);
        let envelope = InboundEnvelope::parse(&body).unwrap();
        assert!(envelope.correlation_id().is_none());
        assert!(envelope.reply_to().is_none());
        assert!(envelope.headers().is_empty());
    }

    #[test]
    fn parse_rejects_garbage() {
        let body = Bytes::from_static(b"not json");
        assert!(matches!(
            InboundEnvelope::parse(&body),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn wire_roundtrip() {
        let mut attributes = Headers::new();
        attributes.insert("correlation_id".to_string(), "c-9".to_string());

        let payload = Bytes::from_static(b"{\"type\":\"pong\"}");
        let wire = WireEnvelope::new("m-9", &payload, &attributes).unwrap();
        let envelope = InboundEnvelope::parse(&wire.to_bytes().unwrap()).unwrap();

        assert_eq!(envelope.message_id(), "m-9");
        assert_eq!(envelope.correlation_id(), Some("c-9"));
        assert_eq!(envelope.payload(), &payload);
    }
}
