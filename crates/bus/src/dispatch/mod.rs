mod error;

pub use error::Error;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::codec::MessageCodec;
use crate::envelope::InboundEnvelope;
use crate::handler::{CommandHandler, EventHandler};
use crate::message::{BusMessage, Headers, Outbound};
use crate::topic::TopicHierarchy;

/// A registered handler with its concrete message type erased.
#[async_trait]
trait ErasedHandler: Debug + Send + Sync + 'static {
    async fn invoke(&self, body: Box<dyn Any + Send + Sync>) -> Result<Option<Outbound>, Error>;
}

#[derive(Debug)]
struct EventAdapter<H, E> {
    handler: H,
    _marker: PhantomData<E>,
}

#[async_trait]
impl<H, E> ErasedHandler for EventAdapter<H, E>
where
    H: EventHandler<E>,
    E: BusMessage,
{
    async fn invoke(&self, body: Box<dyn Any + Send + Sync>) -> Result<Option<Outbound>, Error> {
        let event = body
            .downcast::<E>()
            .map_err(|_| Error::TypeMismatch(E::TYPE_TAG.to_string()))?;

        self.handler
            .apply(*event)
            .await
            .map_err(|e| Error::Handler(E::TYPE_TAG.to_string(), Box::new(e)))?;

        Ok(None)
    }
}

#[derive(Debug)]
struct CommandAdapter<H, C> {
    handler: H,
    _marker: PhantomData<C>,
}

#[async_trait]
impl<H, C> ErasedHandler for CommandAdapter<H, C>
where
    H: CommandHandler<C>,
    C: BusMessage,
{
    async fn invoke(&self, body: Box<dyn Any + Send + Sync>) -> Result<Option<Outbound>, Error> {
        let command = body
            .downcast::<C>()
            .map_err(|_| Error::TypeMismatch(C::TYPE_TAG.to_string()))?;

        let response = self
            .handler
            .apply(*command)
            .await
            .map_err(|e| Error::Handler(C::TYPE_TAG.to_string(), Box::new(e)))?;

        Ok(Some(Outbound::new(response)))
    }
}

/// The constructed-once set of handler registrations for one bus instance.
///
/// At most one handler per message type; duplicates are rejected here, at
/// construction time, never resolved at dispatch time.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event handler for message type `E`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if `E` already has a handler.
    pub fn register_event_handler<E, H>(&mut self, handler: H) -> Result<(), Error>
    where
        E: BusMessage,
        H: EventHandler<E>,
    {
        self.insert(
            E::TYPE_TAG,
            Arc::new(EventAdapter {
                handler,
                _marker: PhantomData,
            }),
        )
    }

    /// Registers a command handler for message type `C`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHandler`] if `C` already has a handler.
    pub fn register_command_handler<C, H>(&mut self, handler: H) -> Result<(), Error>
    where
        C: BusMessage,
        H: CommandHandler<C>,
    {
        self.insert(
            C::TYPE_TAG,
            Arc::new(CommandAdapter {
                handler,
                _marker: PhantomData,
            }),
        )
    }

    fn insert(&mut self, tag: &'static str, handler: Arc<dyn ErasedHandler>) -> Result<(), Error> {
        if self.handlers.contains_key(tag) {
            return Err(Error::DuplicateHandler(tag));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// The tags of all registered message types, sorted.
    #[must_use]
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Decodes inbound envelopes and routes them to the one registered handler
/// for their type.
#[derive(Debug)]
pub struct DispatchCore<C>
where
    C: MessageCodec,
{
    codec: C,
    hierarchy: Arc<TopicHierarchy>,
    registry: HandlerRegistry,
}

impl<C> DispatchCore<C>
where
    C: MessageCodec,
{
    /// Creates a dispatch core from a built registry.
    #[must_use]
    pub const fn new(registry: HandlerRegistry, codec: C, hierarchy: Arc<TopicHierarchy>) -> Self {
        Self {
            codec,
            hierarchy,
            registry,
        }
    }

    /// The handler registrations.
    #[must_use]
    pub const fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The shared topic hierarchy.
    #[must_use]
    pub const fn hierarchy(&self) -> &Arc<TopicHierarchy> {
        &self.hierarchy
    }

    /// Encodes an outbound message through the injected codec.
    ///
    /// # Errors
    ///
    /// Returns the codec's encode error.
    pub fn encode(&self, message: &Outbound) -> Result<(String, Bytes), C::EncodeError> {
        self.codec.encode(&self.hierarchy, message)
    }

    /// Decodes the envelope payload, invokes the matching handler to
    /// completion, and returns the codec's (possibly augmented) headers
    /// alongside the command response if one was produced.
    ///
    /// # Errors
    ///
    /// Decode failures, missing handlers, and handler failures all surface
    /// here; the caller decides ack/retry policy.
    pub async fn handle(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<(Headers, Option<Outbound>), Error> {
        let (headers, decoded) = self
            .codec
            .decode(&self.hierarchy, envelope.headers(), envelope.payload())
            .map_err(|e| Error::Decode(Box::new(e)))?;

        let handler = self
            .registry
            .handlers
            .get(decoded.type_tag())
            .ok_or_else(|| Error::MissingHandler(decoded.type_tag().to_string()))?
            .clone();

        let response = handler.invoke(decoded.into_body()).await?;
        Ok((headers, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::message::{Decoded, Headers};
    use crate::topic::TopicSpec;

    #[derive(Debug)]
    struct Ping {
        seq: u32,
    }

    impl BusMessage for Ping {
        const TYPE_TAG: &'static str = "ping";
    }

    #[derive(Debug)]
    struct Reserve {
        amount: u32,
    }

    impl BusMessage for Reserve {
        const TYPE_TAG: &'static str = "reserve";
    }

    #[derive(Debug)]
    struct Reserved {
        amount: u32,
    }

    impl BusMessage for Reserved {
        const TYPE_TAG: &'static str = "reserved";
    }

    /// Payloads of the form `tag:number`. Decoding stamps the tag into the
    /// headers it returns.
    #[derive(Debug)]
    struct TestCodec;

    #[derive(Debug, thiserror::Error)]
    #[error("unknown payload")]
    struct TestCodecError;

    impl MessageCodec for TestCodec {
        type DecodeError = TestCodecError;
        type EncodeError = TestCodecError;

        fn decode(
            &self,
            _hierarchy: &TopicHierarchy,
            headers: &Headers,
            payload: &Bytes,
        ) -> Result<(Headers, Decoded), Self::DecodeError> {
            let text = std::str::from_utf8(payload).map_err(|_| TestCodecError)?;
            let (tag, value) = text.split_once(':').ok_or(TestCodecError)?;
            let value: u32 = value.parse().map_err(|_| TestCodecError)?;

            let decoded = match tag {
                "ping" => Decoded::new(Ping { seq: value }),
                "reserve" => Decoded::new(Reserve { amount: value }),
                _ => return Err(TestCodecError),
            };
            let mut headers = headers.clone();
            headers.insert("decoded_tag".to_string(), tag.to_string());
            Ok((headers, decoded))
        }

        fn encode(
            &self,
            _hierarchy: &TopicHierarchy,
            message: &Outbound,
        ) -> Result<(String, Bytes), Self::EncodeError> {
            let reserved = message.downcast_ref::<Reserved>().ok_or(TestCodecError)?;
            Ok((
                "replies".to_string(),
                Bytes::from(format!("reserved:{}", reserved.amount)),
            ))
        }
    }

    #[derive(Clone, Debug, Default)]
    struct CountingHandler {
        invocations: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler<Ping> for CountingHandler {
        type Error = TestCodecError;

        async fn apply(&self, _event: Ping) -> Result<(), Self::Error> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Debug)]
    struct FailingHandler;

    #[async_trait]
    impl EventHandler<Ping> for FailingHandler {
        type Error = TestCodecError;

        async fn apply(&self, _event: Ping) -> Result<(), Self::Error> {
            Err(TestCodecError)
        }
    }

    #[derive(Clone, Debug)]
    struct ReserveHandler;

    #[async_trait]
    impl CommandHandler<Reserve> for ReserveHandler {
        type Error = TestCodecError;
        type Response = Reserved;

        async fn apply(&self, command: Reserve) -> Result<Reserved, Self::Error> {
            Ok(Reserved {
                amount: command.amount * 2,
            })
        }
    }

    fn hierarchy() -> Arc<TopicHierarchy> {
        Arc::new(
            TopicHierarchy::builder()
                .topic(TopicSpec::new("pings"))
                .topic(TopicSpec::new("reservations"))
                .bind::<Ping>("pings")
                .bind::<Reserve>("reservations")
                .build()
                .unwrap(),
        )
    }

    fn envelope(payload: &str) -> InboundEnvelope {
        let body = crate::envelope::WireEnvelope::new(
            "m-1",
            &Bytes::from(payload.to_string()),
            &Headers::new(),
        )
        .unwrap()
        .to_bytes()
        .unwrap();
        InboundEnvelope::parse(&body).unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_event_handler::<Ping, _>(CountingHandler::default())
            .unwrap();
        let result = registry.register_event_handler::<Ping, _>(CountingHandler::default());
        assert!(matches!(result, Err(Error::DuplicateHandler("ping"))));
    }

    #[test]
    fn type_tags_are_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command_handler::<Reserve, _>(ReserveHandler)
            .unwrap();
        registry
            .register_event_handler::<Ping, _>(CountingHandler::default())
            .unwrap();
        assert_eq!(registry.type_tags(), vec!["ping", "reserve"]);
    }

    #[tokio::test]
    async fn event_dispatch_invokes_handler_and_yields_no_response() {
        let handler = CountingHandler::default();
        let mut registry = HandlerRegistry::new();
        registry
            .register_event_handler::<Ping, _>(handler.clone())
            .unwrap();
        let core = DispatchCore::new(registry, TestCodec, hierarchy());

        let (_headers, outcome) = core.handle(&envelope("ping:1")).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_returns_codec_augmented_headers() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_event_handler::<Ping, _>(CountingHandler::default())
            .unwrap();
        let core = DispatchCore::new(registry, TestCodec, hierarchy());

        let (headers, _outcome) = core.handle(&envelope("ping:1")).await.unwrap();
        assert_eq!(headers.get("decoded_tag").map(String::as_str), Some("ping"));
    }

    #[tokio::test]
    async fn command_dispatch_yields_response() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command_handler::<Reserve, _>(ReserveHandler)
            .unwrap();
        let core = DispatchCore::new(registry, TestCodec, hierarchy());

        let (_headers, outcome) = core.handle(&envelope("reserve:21")).await.unwrap();
        let outcome = outcome.unwrap();
        assert_eq!(outcome.type_tag(), "reserved");
        assert_eq!(outcome.downcast_ref::<Reserved>().unwrap().amount, 42);
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let core = DispatchCore::new(HandlerRegistry::new(), TestCodec, hierarchy());
        let result = core.handle(&envelope("ping:1")).await;
        assert!(matches!(result, Err(Error::MissingHandler(_))));
    }

    #[tokio::test]
    async fn decode_failure_propagates() {
        let core = DispatchCore::new(HandlerRegistry::new(), TestCodec, hierarchy());
        let result = core.handle(&envelope("garbage")).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn handler_failure_propagates() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_event_handler::<Ping, _>(FailingHandler)
            .unwrap();
        let core = DispatchCore::new(registry, TestCodec, hierarchy());

        let result = core.handle(&envelope("ping:1")).await;
        assert!(matches!(result, Err(Error::Handler(_, _))));
    }
}
