use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

/// Header/attribute map carried alongside every message.
pub type Headers = HashMap<String, String>;

/// Well-known message attribute keys.
pub mod attribute {
    /// Correlates a command response with the originating request.
    pub const CORRELATION_ID: &str = "correlation_id";

    /// Queue address the caller is consuming responses from.
    pub const REPLY_TO: &str = "reply_to";

    /// Broker envelope id of the inbound command a response answers.
    pub const MESSAGE_ID: &str = "message_id";
}

/// A typed event or command carried over the bus.
///
/// The tag is the explicit type descriptor used for handler registration,
/// topic binding, and the codec's wire-level type field. It must be stable
/// and agreed fleet-wide.
pub trait BusMessage: Debug + Send + Sync + 'static {
    /// Stable wire tag identifying this message type.
    const TYPE_TAG: &'static str;
}

/// A decoded inbound message: its wire tag plus the type-erased typed value.
#[derive(Debug)]
pub struct Decoded {
    type_tag: String,
    body: Box<dyn Any + Send + Sync>,
}

impl Decoded {
    /// Wraps a typed message, tagging it with the type's wire tag.
    #[must_use]
    pub fn new<M>(message: M) -> Self
    where
        M: BusMessage,
    {
        Self {
            type_tag: M::TYPE_TAG.to_string(),
            body: Box::new(message),
        }
    }

    /// The wire tag of the decoded message.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub(crate) fn into_body(self) -> Box<dyn Any + Send + Sync> {
        self.body
    }
}

/// A type-erased outbound message (a publish or a command response).
#[derive(Debug)]
pub struct Outbound {
    type_tag: &'static str,
    body: Box<dyn Any + Send + Sync>,
}

/// The value a command handler returns, transmitted to the caller's
/// `reply_to` queue.
pub type CommandResponse = Outbound;

impl Outbound {
    /// Wraps a typed message for encoding.
    #[must_use]
    pub fn new<M>(message: M) -> Self
    where
        M: BusMessage,
    {
        Self {
            type_tag: M::TYPE_TAG,
            body: Box::new(message),
        }
    }

    /// The wire tag of the wrapped message.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Borrows the wrapped message as its concrete type, if `M` matches.
    #[must_use]
    pub fn downcast_ref<M>(&self) -> Option<&M>
    where
        M: BusMessage,
    {
        self.body.downcast_ref::<M>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl BusMessage for Ping {
        const TYPE_TAG: &'static str = "ping";
    }

    #[derive(Debug)]
    struct Pong;

    impl BusMessage for Pong {
        const TYPE_TAG: &'static str = "pong";
    }

    #[test]
    fn outbound_roundtrips_concrete_type() {
        let outbound = Outbound::new(Ping { seq: 7 });
        assert_eq!(outbound.type_tag(), "ping");
        assert_eq!(outbound.downcast_ref::<Ping>(), Some(&Ping { seq: 7 }));
        assert!(outbound.downcast_ref::<Pong>().is_none());
    }

    #[test]
    fn decoded_carries_tag() {
        let decoded = Decoded::new(Ping { seq: 1 });
        assert_eq!(decoded.type_tag(), "ping");
        assert!(decoded.into_body().downcast::<Ping>().is_ok());
    }
}
