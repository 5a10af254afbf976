//! Error types shared by the chat test client, the STOMP transport and the
//! echo broker.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors reported by `stompchat`.
///
/// `NotConnected`, `InvalidAddress` and `InvalidMessage` are returned directly
/// from the offending call. The remaining kinds describe asynchronous failures
/// and normally reach the caller through an observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// The broker answered with an ERROR frame.
    #[error("protocol error: {message}")]
    Protocol {
        /// Value of the ERROR frame's `message` header.
        message: String,
        /// Frame body, often a longer description.
        body: String,
    },

    /// An inbound payload did not match the expected shape.
    #[error("failed to deserialize inbound message: {0}")]
    Deserialization(String),

    /// The connection dropped without a disconnect being requested.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The WebSocket or STOMP handshake did not complete.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The broker address could not be used.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Outbound message rejected before reaching the transport.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Bytes on the wire did not form a STOMP frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Build a `Protocol` error from an ERROR frame's parts.
    pub fn protocol(message: impl Into<String>, body: impl Into<String>) -> Self {
        ClientError::Protocol {
            message: message.into(),
            body: body.into(),
        }
    }
}

