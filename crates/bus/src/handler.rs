use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::message::BusMessage;

/// Processes one event type. Events produce no response.
#[async_trait]
pub trait EventHandler<E>
where
    Self: Clone + Debug + Send + Sync + 'static,
    E: BusMessage,
{
    /// The error type for the handler.
    type Error: Error + Send + Sync + 'static;

    /// Applies the event.
    async fn apply(&self, event: E) -> Result<(), Self::Error>;
}

/// Processes one command type, producing a response for the caller.
#[async_trait]
pub trait CommandHandler<C>
where
    Self: Clone + Debug + Send + Sync + 'static,
    C: BusMessage,
{
    /// The error type for the handler.
    type Error: Error + Send + Sync + 'static;

    /// The response type returned to the caller's reply queue.
    type Response: BusMessage;

    /// Applies the command.
    async fn apply(&self, command: C) -> Result<Self::Response, Self::Error>;
}
