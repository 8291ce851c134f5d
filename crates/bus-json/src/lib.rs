//! JSON implementation of the bus codec seam.
//!
//! Payloads take the shape `{"type": <tag>, "data": <message>}`. Every
//! message type a process decodes or encodes must be registered explicitly;
//! there is no reflection.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trellis_bus::codec::MessageCodec;
use trellis_bus::message::{BusMessage, Decoded, Headers, Outbound};
use trellis_bus::topic::TopicHierarchy;

#[derive(Deserialize, Serialize)]
struct Wire {
    #[serde(rename = "type")]
    type_tag: String,
    data: serde_json::Value,
}

type DecodeFn = dyn Fn(serde_json::Value) -> Result<Decoded, Error> + Send + Sync;
type EncodeFn = dyn Fn(&Outbound) -> Result<serde_json::Value, Error> + Send + Sync;

/// A codec decoding and encoding registered serde types as tagged JSON.
#[derive(Default)]
pub struct JsonCodec {
    decoders: HashMap<&'static str, Arc<DecodeFn>>,
    encoders: HashMap<&'static str, Arc<EncodeFn>>,
}

impl Debug for JsonCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().collect();
        tags.sort_unstable();
        f.debug_struct("JsonCodec").field("types", &tags).finish()
    }
}

impl JsonCodec {
    /// Creates a codec with no registered types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers message type `M` for decoding and encoding.
    #[must_use]
    pub fn register<M>(mut self) -> Self
    where
        M: BusMessage + Serialize + DeserializeOwned,
    {
        self.decoders.insert(
            M::TYPE_TAG,
            Arc::new(|value| Ok(Decoded::new(serde_json::from_value::<M>(value)?))),
        );
        self.encoders.insert(
            M::TYPE_TAG,
            Arc::new(|outbound| {
                let message = outbound
                    .downcast_ref::<M>()
                    .ok_or(Error::TypeMismatch(M::TYPE_TAG))?;
                Ok(serde_json::to_value(message)?)
            }),
        );
        self
    }
}

impl MessageCodec for JsonCodec {
    type DecodeError = Error;
    type EncodeError = Error;

    fn decode(
        &self,
        _hierarchy: &TopicHierarchy,
        headers: &Headers,
        payload: &Bytes,
    ) -> Result<(Headers, Decoded), Error> {
        let wire: Wire = serde_json::from_slice(payload)?;
        let decoder = self
            .decoders
            .get(wire.type_tag.as_str())
            .ok_or_else(|| Error::UnknownType(wire.type_tag.clone()))?;
        Ok((headers.clone(), decoder(wire.data)?))
    }

    fn encode(
        &self,
        hierarchy: &TopicHierarchy,
        message: &Outbound,
    ) -> Result<(String, Bytes), Error> {
        let tag = message.type_tag();
        let encoder = self
            .encoders
            .get(tag)
            .ok_or_else(|| Error::UnknownType(tag.to_string()))?;
        let data = encoder(message)?;

        let topic = hierarchy
            .resolve(tag)
            .ok_or(Error::UnboundType(tag))?
            .name()
            .to_string();
        let body = serde_json::to_vec(&Wire {
            type_tag: tag.to_string(),
            data,
        })?;

        Ok((topic, Bytes::from(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use trellis_bus::topic::TopicSpec;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct OrderCreated {
        order_id: String,
        total_cents: u64,
    }

    impl BusMessage for OrderCreated {
        const TYPE_TAG: &'static str = "order_created";
    }

    #[derive(Debug, Deserialize, Serialize)]
    struct Unregistered;

    impl BusMessage for Unregistered {
        const TYPE_TAG: &'static str = "unregistered";
    }

    fn hierarchy() -> TopicHierarchy {
        TopicHierarchy::builder()
            .topic(TopicSpec::new("orders.created"))
            .bind::<OrderCreated>("orders.created")
            .build()
            .unwrap()
    }

    #[test]
    fn encode_then_decode_yields_original() {
        let codec = JsonCodec::new().register::<OrderCreated>();
        let hierarchy = hierarchy();

        let outbound = Outbound::new(OrderCreated {
            order_id: "o-1".to_string(),
            total_cents: 1250,
        });
        let (topic, payload) = codec.encode(&hierarchy, &outbound).unwrap();
        assert_eq!(topic, "orders.created");

        let (_headers, decoded) = codec.decode(&hierarchy, &Headers::new(), &payload).unwrap();
        assert_eq!(decoded.type_tag(), "order_created");
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let codec = JsonCodec::new();
        let payload = Bytes::from_static(br#"{"type":"mystery","data":{}}"#);
        let result = codec.decode(&hierarchy(), &Headers::new(), &payload);
        assert!(matches!(result, Err(Error::UnknownType(_))));
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let codec = JsonCodec::new().register::<OrderCreated>();
        let payload = Bytes::from_static(b"nope");
        let result = codec.decode(&hierarchy(), &Headers::new(), &payload);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn encode_rejects_unbound_type() {
        let codec = JsonCodec::new().register::<Unregistered>();
        let outbound = Outbound::new(Unregistered);
        let result = codec.encode(&hierarchy(), &outbound);
        assert!(matches!(result, Err(Error::UnboundType(_))));
    }

    #[test]
    fn headers_pass_through() {
        let codec = JsonCodec::new().register::<OrderCreated>();
        let hierarchy = hierarchy();
        let mut headers = Headers::new();
        headers.insert("trace".to_string(), "t-1".to_string());

        let outbound = Outbound::new(OrderCreated {
            order_id: "o-2".to_string(),
            total_cents: 1,
        });
        let (_topic, payload) = codec.encode(&hierarchy, &outbound).unwrap();
        let (returned, _decoded) = codec.decode(&hierarchy, &headers, &payload).unwrap();
        assert_eq!(returned, headers);
    }
}
