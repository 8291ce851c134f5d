//! Topic-hierarchical, queue-backed service bus.
//!
//! Handlers register for strongly-typed events and commands; the bus expands
//! each handler's topic into its descendant closure, provisions one durable
//! competing-consumer queue plus a subscription per topic, and runs a single
//! poll/dispatch/ack worker with at-least-once semantics. Command handlers
//! produce responses which are correlated back to the caller's reply queue.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Broker control-plane and data-plane interface implemented per transport.
pub mod broker;

/// The service bus adapter: provisioning, the consumption worker, replies.
pub mod bus;

/// Codec seam for turning raw payloads into typed messages and back.
pub mod codec;

/// Handler registration and type-erased dispatch.
pub mod dispatch;

/// The broker wire envelope and its inbound parsed form.
pub mod envelope;

/// Typed messages, headers, and well-known message attributes.
pub mod message;

/// Static topic topology, type bindings, and closure expansion.
pub mod topic;

/// Event and command handler contracts.
pub mod handler;
