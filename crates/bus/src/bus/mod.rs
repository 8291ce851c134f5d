mod error;

pub use error::Error;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerClient, Delivery, Destination, QueueAddress, SubscriptionId};
use crate::codec::MessageCodec;
use crate::dispatch::DispatchCore;
use crate::envelope::InboundEnvelope;
use crate::message::{attribute, BusMessage, Headers, Outbound};

/// Lifecycle states of a [`ServiceBus`] instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusState {
    /// Constructed, not yet provisioned.
    Created,
    /// `run()` is provisioning the queue and subscriptions.
    Provisioning,
    /// The consumption worker is polling.
    Running,
    /// `stop()` was requested; the worker is draining its current cycle.
    Stopping,
    /// The worker has exited (requested stop or connectivity loss).
    Stopped,
}

/// Tunables for one bus instance.
#[derive(Clone, Debug)]
pub struct BusOptions {
    /// Prefix of the derived consumer queue name.
    pub queue_prefix: String,

    /// Upper bound on messages fetched per poll cycle. A batch bound, not a
    /// concurrency degree; messages are still processed one at a time.
    pub prefetch: usize,

    /// Long-poll wait time per receive call.
    pub wait_time: Duration,

    /// Sleep between empty polls.
    pub idle_backoff: Duration,

    /// Poison policy: `None` redelivers failing messages forever (the
    /// broker's visibility timeout is the only retry mechanism); `Some(n)`
    /// drops a failing message once its receive count reaches `n`.
    pub max_deliveries: Option<u32>,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            queue_prefix: "bus".to_string(),
            prefetch: 10,
            wait_time: Duration::from_secs(1),
            idle_backoff: Duration::from_millis(100),
            max_deliveries: None,
        }
    }
}

/// The broker adapter: provisions topic-closure routing for the registered
/// handlers and drives the single consumption worker.
///
/// Two instances with the same handler set derive the same queue name and
/// become competing consumers of one durable queue.
#[derive(Debug)]
pub struct ServiceBus<B, C>
where
    B: BrokerClient,
    C: MessageCodec,
{
    broker: B,
    dispatch: Arc<DispatchCore<C>>,
    options: BusOptions,
    state: Arc<Mutex<BusState>>,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<B, C> Clone for ServiceBus<B, C>
where
    B: BrokerClient,
    C: MessageCodec,
{
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            dispatch: self.dispatch.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            subscriptions: self.subscriptions.clone(),
            shutdown_token: self.shutdown_token.clone(),
            task_tracker: self.task_tracker.clone(),
        }
    }
}

impl<B, C> ServiceBus<B, C>
where
    B: BrokerClient,
    C: MessageCodec,
{
    /// Creates a bus in the `Created` state.
    #[must_use]
    pub fn new(broker: B, dispatch: DispatchCore<C>, options: BusOptions) -> Self {
        // Closed from the start so stop() and wait() return even when the
        // worker was never spawned; spawning still tracks on a closed
        // tracker.
        let task_tracker = TaskTracker::new();
        task_tracker.close();

        Self {
            broker,
            dispatch: Arc::new(dispatch),
            options,
            state: Arc::new(Mutex::new(BusState::Created)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            shutdown_token: CancellationToken::new(),
            task_tracker,
        }
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> BusState {
        *self.state.lock().await
    }

    /// The deterministic consumer queue name for this instance's handler
    /// set.
    ///
    /// # Errors
    ///
    /// Returns an error if no handlers are registered or a handler's type
    /// has no topic binding.
    pub fn queue_name(&self) -> Result<String, Error> {
        Ok(derive_queue_name(
            &self.options.queue_prefix,
            &self.topic_closure()?,
        ))
    }

    /// Provisions broker routing and starts the consumption worker.
    ///
    /// # Errors
    ///
    /// Any provisioning failure aborts startup; nothing is retried.
    pub async fn run(&self) -> Result<(), Error> {
        {
            let mut state = self.state.lock().await;
            if *state != BusState::Created {
                return Err(Error::InvalidState {
                    expected: BusState::Created,
                    found: *state,
                });
            }
            *state = BusState::Provisioning;
        }

        let queue = match self.provision().await {
            Ok(queue) => queue,
            Err(e) => {
                *self.state.lock().await = BusState::Stopped;
                return Err(e);
            }
        };

        *self.state.lock().await = BusState::Running;

        self.task_tracker.spawn(Self::consume(
            self.broker.clone(),
            self.dispatch.clone(),
            queue,
            self.options.clone(),
            self.shutdown_token.clone(),
            self.state.clone(),
        ));

        Ok(())
    }

    /// Requests a cooperative stop and tears down subscriptions.
    ///
    /// The worker finishes its current poll cycle; no in-flight handler is
    /// preempted. Subscription teardown is best-effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus was never started.
    pub async fn stop(&self) -> Result<(), Error> {
        {
            let mut state = self.state.lock().await;
            match *state {
                BusState::Running | BusState::Stopping => *state = BusState::Stopping,
                BusState::Stopped => {}
                found => {
                    return Err(Error::InvalidState {
                        expected: BusState::Running,
                        found,
                    });
                }
            }
        }

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        let subscriptions: Vec<_> = self.subscriptions.lock().await.drain(..).collect();
        for subscription in subscriptions {
            if let Err(e) = self.broker.unsubscribe(&subscription).await {
                debug!(
                    subscription = subscription.as_str(),
                    error = %e,
                    "best-effort unsubscribe failed"
                );
            }
        }

        *self.state.lock().await = BusState::Stopped;
        Ok(())
    }

    /// Waits for the consumption worker to exit.
    pub async fn wait(&self) {
        self.task_tracker.wait().await;
    }

    /// Publishes a message to its bound topic's fan-out.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be encoded, its topic lacks a
    /// routing identifier, or the broker rejects the send. Callers doing
    /// best-effort publishing may ignore the error.
    pub async fn publish<M>(&self, message: M) -> Result<(), Error>
    where
        M: BusMessage,
    {
        self.publish_with_headers(message, Headers::new()).await
    }

    /// Publishes a message with explicit attributes (e.g. `correlation_id`
    /// and `reply_to` on an outbound command).
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish).
    pub async fn publish_with_headers<M>(&self, message: M, headers: Headers) -> Result<(), Error>
    where
        M: BusMessage,
    {
        let outbound = Outbound::new(message);
        let (topic, payload) = self
            .dispatch
            .encode(&outbound)
            .map_err(|e| Error::Encode(Box::new(e)))?;
        let routing_id = self
            .dispatch
            .hierarchy()
            .routing_id(&topic)
            .ok_or_else(|| Error::TopicNotProvisioned(topic.clone()))?
            .to_string();

        self.broker
            .send(&Destination::Topic(routing_id), payload, headers)
            .await
            .map_err(|e| Error::Transport(Box::new(e)))
    }

    /// The union of the descendant closures of every registered handler's
    /// topic.
    fn topic_closure(&self) -> Result<BTreeSet<String>, Error> {
        let registry = self.dispatch.registry();
        if registry.is_empty() {
            return Err(Error::NoHandlers);
        }

        let hierarchy = self.dispatch.hierarchy();
        let mut closure = BTreeSet::new();
        for tag in registry.type_tags() {
            let topic = hierarchy
                .resolve(tag)
                .ok_or(Error::UnboundMessageType(tag))?;
            if let Some(expanded) = hierarchy.expand(topic.name()) {
                closure.extend(expanded);
            }
        }
        Ok(closure)
    }

    async fn provision(&self) -> Result<QueueAddress, Error> {
        let closure = self.topic_closure()?;
        let queue_name = derive_queue_name(&self.options.queue_prefix, &closure);

        let queue = self
            .broker
            .ensure_queue(&queue_name)
            .await
            .map_err(|e| Error::Provisioning(Box::new(e)))?;
        let attributes = self
            .broker
            .queue_attributes(&queue)
            .await
            .map_err(|e| Error::Provisioning(Box::new(e)))?;

        for topic in &closure {
            let routing_id = self
                .dispatch
                .hierarchy()
                .routing_id(topic)
                .ok_or_else(|| Error::TopicNotProvisioned(topic.clone()))?;
            let subscription = self
                .broker
                .ensure_subscription(routing_id, &attributes)
                .await
                .map_err(|e| Error::Provisioning(Box::new(e)))?;
            self.subscriptions.lock().await.push(subscription);
        }

        info!(
            queue = %queue,
            topics = closure.len(),
            "service bus provisioned"
        );
        Ok(queue)
    }

    async fn consume(
        broker: B,
        dispatch: Arc<DispatchCore<C>>,
        queue: QueueAddress,
        options: BusOptions,
        shutdown_token: CancellationToken,
        state: Arc<Mutex<BusState>>,
    ) {
        debug!(queue = %queue, "consumption worker started");

        loop {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => break,
                result = broker.receive(&queue, options.prefetch, options.wait_time) => {
                    match result {
                        Ok(deliveries) if deliveries.is_empty() => {
                            tokio::time::sleep(options.idle_backoff).await;
                        }
                        Ok(deliveries) => {
                            // Sequential, one message at a time.
                            for delivery in deliveries {
                                Self::process(&broker, &dispatch, &queue, &options, delivery)
                                    .await;
                            }
                        }
                        Err(e) => {
                            // No reconnect policy: the instance stops
                            // consuming and must be monitored externally.
                            error!(
                                queue = %queue,
                                error = %e,
                                "poll failed, consumption worker stopping"
                            );
                            break;
                        }
                    }
                }
            }
        }

        *state.lock().await = BusState::Stopped;
        debug!(queue = %queue, "consumption worker exited");
    }

    async fn process(
        broker: &B,
        dispatch: &DispatchCore<C>,
        queue: &QueueAddress,
        options: &BusOptions,
        delivery: Delivery,
    ) {
        let envelope = match InboundEnvelope::parse(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "unparseable delivery, leaving for redelivery");
                Self::maybe_drop_poison(broker, queue, options, &delivery).await;
                return;
            }
        };

        match dispatch.handle(&envelope).await {
            Ok((headers, response)) => {
                if let Some(response) = response {
                    if let Some(reply_to) = envelope.reply_to() {
                        if let Err(e) = Self::send_response(
                            broker, dispatch, &envelope, headers, reply_to, &response,
                        )
                        .await
                        {
                            // Inbound handling already succeeded; the
                            // message is still acknowledged below.
                            error!(
                                message_id = envelope.message_id(),
                                error = %e,
                                "failed to transmit command response"
                            );
                        }
                    } else {
                        debug!(
                            message_id = envelope.message_id(),
                            "command carried no reply_to, response dropped"
                        );
                    }
                }

                if let Err(e) = broker.delete(queue, &delivery.handle).await {
                    error!(
                        message_id = envelope.message_id(),
                        error = %e,
                        "failed to acknowledge message"
                    );
                }
            }
            Err(e) => {
                error!(
                    message_id = envelope.message_id(),
                    error = %e,
                    "handling failed, leaving message for redelivery"
                );
                Self::maybe_drop_poison(broker, queue, options, &delivery).await;
            }
        }
    }

    async fn maybe_drop_poison(
        broker: &B,
        queue: &QueueAddress,
        options: &BusOptions,
        delivery: &Delivery,
    ) {
        let Some(cap) = options.max_deliveries else {
            return;
        };
        if delivery.receive_count >= cap {
            warn!(
                receive_count = delivery.receive_count,
                cap, "dropping poison message"
            );
            if let Err(e) = broker.delete(queue, &delivery.handle).await {
                error!(error = %e, "failed to drop poison message");
            }
        }
    }

    async fn send_response(
        broker: &B,
        dispatch: &DispatchCore<C>,
        envelope: &InboundEnvelope,
        headers: Headers,
        reply_to: &str,
        response: &Outbound,
    ) -> Result<(), Error> {
        let (_topic, payload) = dispatch
            .encode(response)
            .map_err(|e| Error::Encode(Box::new(e)))?;

        // The codec's decoded headers travel with the response. Responses
        // are terminal; the request's reply routing must not carry over.
        let mut attributes = headers;
        attributes.remove(attribute::REPLY_TO);
        attributes.insert(
            attribute::MESSAGE_ID.to_string(),
            envelope.message_id().to_string(),
        );
        if let Some(correlation_id) = envelope.correlation_id() {
            attributes.insert(
                attribute::CORRELATION_ID.to_string(),
                correlation_id.to_string(),
            );
        }

        broker
            .send(
                &Destination::Queue(QueueAddress::new(reply_to)),
                payload,
                attributes,
            )
            .await
            .map_err(|e| Error::Transport(Box::new(e)))
    }
}

/// Derives the durable queue name from the sorted topic closure, so that
/// instances with identical handler sets share one queue.
fn derive_queue_name(prefix: &str, closure: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    for topic in closure {
        hasher.update(topic.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    format!("{prefix}-{}", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closure(topics: &[&str]) -> BTreeSet<String> {
        topics.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn queue_name_is_order_independent() {
        let a = closure(&["orders", "orders.created", "orders.created.priority"]);
        let b = closure(&["orders.created.priority", "orders", "orders.created"]);
        assert_eq!(derive_queue_name("bus", &a), derive_queue_name("bus", &b));
    }

    #[test]
    fn queue_name_differs_per_closure() {
        let a = closure(&["orders", "orders.created"]);
        let b = closure(&["orders"]);
        assert_ne!(derive_queue_name("bus", &a), derive_queue_name("bus", &b));
    }

    #[test]
    fn queue_name_is_prefixed_and_bounded() {
        let name = derive_queue_name("bus", &closure(&["payments"]));
        assert!(name.starts_with("bus-"));
        assert_eq!(name.len(), "bus-".len() + 32);
    }
}
