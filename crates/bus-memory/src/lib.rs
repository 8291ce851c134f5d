//! In-memory implementation of the bus broker interface.
//!
//! The reference transport for tests and local development: topic fan-out,
//! durable named queues, idempotent provisioning, and visibility-timeout
//! redelivery. Clones share one broker's state, standing in for one broker
//! deployment.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;

pub use broker::{Error, MemoryBroker};
