use std::error::Error;
use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::message::Headers;

/// Marker trait for broker errors.
pub trait BrokerError: Error + Send + Sync + 'static {}

/// Address of a provisioned consumer queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueAddress(String);

impl QueueAddress {
    /// Wraps a broker-native queue address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queried attributes of a queue; carries the native identifier
/// subscriptions are bound against.
#[derive(Clone, Debug)]
pub struct QueueAttributes {
    native_id: String,
}

impl QueueAttributes {
    /// Wraps a queue's native identifier.
    #[must_use]
    pub fn new(native_id: impl Into<String>) -> Self {
        Self {
            native_id: native_id.into(),
        }
    }

    /// The broker-native queue identifier.
    #[must_use]
    pub fn native_id(&self) -> &str {
        &self.native_id
    }
}

/// Identifier of a broker-level topic-to-queue subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Wraps a broker-native subscription identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-delivery handle used to acknowledge (delete) one delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(String);

impl DeliveryHandle {
    /// Wraps a broker-native delivery handle.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One message returned by a poll.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The raw wire-envelope body.
    pub body: Bytes,

    /// Handle acknowledging this particular delivery.
    pub handle: DeliveryHandle,

    /// How many times the broker has delivered this message.
    pub receive_count: u32,
}

/// Where a send lands: a topic's fan-out or a queue directly (replies).
#[derive(Clone, Debug)]
pub enum Destination {
    /// Publish through a topic's fan-out, by the topic's routing identifier.
    Topic(String),

    /// Send straight to a queue, bypassing topic routing.
    Queue(QueueAddress),
}

/// Control-plane and data-plane operations the bus needs from a broker.
///
/// Provisioning calls must be idempotent: re-creating an existing queue or
/// re-subscribing an already-subscribed pair is a no-op returning the
/// existing resource.
#[async_trait]
pub trait BrokerClient
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the broker.
    type Error: BrokerError;

    /// Ensures a durable queue exists, returning its address.
    async fn ensure_queue(&self, name: &str) -> Result<QueueAddress, Self::Error>;

    /// Queries a queue's attributes (its native identifier).
    async fn queue_attributes(&self, queue: &QueueAddress)
        -> Result<QueueAttributes, Self::Error>;

    /// Ensures the queue is subscribed to the topic's fan-out.
    async fn ensure_subscription(
        &self,
        topic_routing_id: &str,
        queue: &QueueAttributes,
    ) -> Result<SubscriptionId, Self::Error>;

    /// Tears down one subscription. Best-effort on `stop()`.
    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<(), Self::Error>;

    /// Long-polls the queue for up to `max_messages`, waiting at most `wait`.
    async fn receive(
        &self,
        queue: &QueueAddress,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, Self::Error>;

    /// Acknowledges one delivery. Only issued after successful dispatch.
    async fn delete(&self, queue: &QueueAddress, handle: &DeliveryHandle)
        -> Result<(), Self::Error>;

    /// Publishes a payload plus attributes to a destination.
    async fn send(
        &self,
        destination: &Destination,
        payload: Bytes,
        attributes: Headers,
    ) -> Result<(), Self::Error>;
}
