mod error;

pub use error::Error;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;
use trellis_bus::broker::{
    BrokerClient, Delivery, DeliveryHandle, Destination, QueueAddress, QueueAttributes,
    SubscriptionId,
};
use trellis_bus::envelope::WireEnvelope;
use trellis_bus::message::Headers;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Debug)]
struct StoredMessage {
    body: Bytes,
    handle: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Vec<StoredMessage>>,
    // subscription id -> (topic routing id, queue name)
    subscriptions: HashMap<String, (String, String)>,
    fanout: HashMap<String, BTreeSet<String>>,
    deletes: u64,
}

/// An in-memory topic-fanout + queue broker.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    visibility_timeout: Duration,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a broker with a 30 second visibility timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            visibility_timeout: Duration::from_secs(30),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the visibility timeout applied to received messages.
    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Simulates connectivity loss: while offline, polls fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of messages currently in the queue, visible or not.
    pub async fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().await.queues.get(queue).map(Vec::len)
    }

    /// Number of active subscriptions across all topics.
    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    /// Total acknowledgements (deletes) issued against this broker.
    pub async fn delete_count(&self) -> u64 {
        self.state.lock().await.deletes
    }

    /// Injects a pre-built wire-envelope body straight into a queue,
    /// bypassing routing. Test support for crafting exact envelopes.
    pub async fn inject(&self, queue: &str, body: Bytes) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::UnknownQueue(queue.to_string()))?;
        messages.push(StoredMessage {
            body,
            handle: None,
            invisible_until: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn enqueue(&self, queue: &str, body: &Bytes) -> Result<(), Error> {
        self.inject(queue, body.clone()).await
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    type Error = Error;

    async fn ensure_queue(&self, name: &str) -> Result<QueueAddress, Error> {
        let mut state = self.state.lock().await;
        if !state.queues.contains_key(name) {
            state.queues.insert(name.to_string(), Vec::new());
            debug!(queue = name, "queue created");
        }
        Ok(QueueAddress::new(name))
    }

    async fn queue_attributes(&self, queue: &QueueAddress) -> Result<QueueAttributes, Error> {
        let state = self.state.lock().await;
        if !state.queues.contains_key(queue.as_str()) {
            return Err(Error::UnknownQueue(queue.as_str().to_string()));
        }
        Ok(QueueAttributes::new(queue.as_str()))
    }

    async fn ensure_subscription(
        &self,
        topic_routing_id: &str,
        queue: &QueueAttributes,
    ) -> Result<SubscriptionId, Error> {
        let mut state = self.state.lock().await;

        let existing = state.subscriptions.iter().find_map(|(id, (topic, q))| {
            (topic == topic_routing_id && q == queue.native_id()).then(|| id.clone())
        });
        if let Some(id) = existing {
            return Ok(SubscriptionId::new(id));
        }

        let id = format!("{topic_routing_id}:{}", queue.native_id());
        state.subscriptions.insert(
            id.clone(),
            (topic_routing_id.to_string(), queue.native_id().to_string()),
        );
        state
            .fanout
            .entry(topic_routing_id.to_string())
            .or_default()
            .insert(queue.native_id().to_string());
        debug!(topic = topic_routing_id, queue = queue.native_id(), "subscription created");

        Ok(SubscriptionId::new(id))
    }

    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let (topic, queue) = state
            .subscriptions
            .remove(subscription.as_str())
            .ok_or_else(|| Error::UnknownSubscription(subscription.as_str().to_string()))?;
        if let Some(queues) = state.fanout.get_mut(&topic) {
            queues.remove(&queue);
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueAddress,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, Error> {
        let deadline = Instant::now() + wait;

        loop {
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Offline);
            }

            {
                let mut state = self.state.lock().await;
                let messages = state
                    .queues
                    .get_mut(queue.as_str())
                    .ok_or_else(|| Error::UnknownQueue(queue.as_str().to_string()))?;

                let now = Instant::now();
                let mut deliveries = Vec::new();
                for message in messages.iter_mut() {
                    if deliveries.len() == max_messages {
                        break;
                    }
                    if message.invisible_until.is_some_and(|until| until > now) {
                        continue;
                    }

                    message.receive_count += 1;
                    message.invisible_until = Some(now + self.visibility_timeout);
                    let handle = Uuid::new_v4().to_string();
                    message.handle = Some(handle.clone());

                    deliveries.push(Delivery {
                        body: message.body.clone(),
                        handle: DeliveryHandle::new(handle),
                        receive_count: message.receive_count,
                    });
                }

                if !deliveries.is_empty() {
                    return Ok(deliveries);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn delete(&self, queue: &QueueAddress, handle: &DeliveryHandle) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let messages = state
            .queues
            .get_mut(queue.as_str())
            .ok_or_else(|| Error::UnknownQueue(queue.as_str().to_string()))?;

        let position = messages
            .iter()
            .position(|m| m.handle.as_deref() == Some(handle.as_str()))
            .ok_or(Error::InvalidHandle)?;
        messages.remove(position);
        state.deletes += 1;
        Ok(())
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: Bytes,
        attributes: Headers,
    ) -> Result<(), Error> {
        let envelope = WireEnvelope::new(Uuid::new_v4().to_string(), &payload, &attributes)?;
        let body = envelope.to_bytes()?;

        match destination {
            Destination::Queue(queue) => self.enqueue(queue.as_str(), &body).await,
            Destination::Topic(routing_id) => {
                let queues: Vec<String> = {
                    let state = self.state.lock().await;
                    state
                        .fanout
                        .get(routing_id)
                        .map(|queues| queues.iter().cloned().collect())
                        .unwrap_or_default()
                };
                // A topic with no subscribers delivers to nothing.
                for queue in queues {
                    self.enqueue(&queue, &body).await?;
                }
                Ok(())
            }
        }
    }
}
