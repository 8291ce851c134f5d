use std::error::Error;
use std::fmt::Debug;

use bytes::Bytes;

use crate::message::{Decoded, Headers, Outbound};
use crate::topic::TopicHierarchy;

/// Translates between raw payload bytes and typed messages.
///
/// The codec is an external collaborator; the bus only requires that decode
/// and encode agree on the wire tags declared by [`BusMessage::TYPE_TAG`].
///
/// [`BusMessage::TYPE_TAG`]: crate::message::BusMessage::TYPE_TAG
pub trait MessageCodec: Debug + Send + Sync + 'static {
    /// Error produced when a payload cannot be decoded.
    type DecodeError: Error + Send + Sync + 'static;

    /// Error produced when a message cannot be encoded.
    type EncodeError: Error + Send + Sync + 'static;

    /// Decodes a raw payload into a typed message.
    ///
    /// Returns the (possibly augmented) headers alongside the decoded
    /// message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed or its type is unknown
    /// to the codec.
    fn decode(
        &self,
        hierarchy: &TopicHierarchy,
        headers: &Headers,
        payload: &Bytes,
    ) -> Result<(Headers, Decoded), Self::DecodeError>;

    /// Encodes an outbound message, resolving its topic through the shared
    /// type binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the message type is unknown to the codec or has
    /// no topic binding.
    fn encode(
        &self,
        hierarchy: &TopicHierarchy,
        message: &Outbound,
    ) -> Result<(String, Bytes), Self::EncodeError>;
}
