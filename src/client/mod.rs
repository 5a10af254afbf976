//! The `client` module implements the chat test client.
//!
//! A `TestClient` connects to a chat endpoint over STOMP, follows at most one
//! channel at a time and publishes messages to channels. Results arrive
//! asynchronously as `ChatEvent`s.

pub mod destination;
pub mod message;
pub mod observer;
pub mod test_client;

pub use message::{InboundMessage, OutboundMessage};
pub use observer::{ChatEvent, LoggingObserver, Observer};
pub use test_client::{Subscription, TestClient};

/// Endpoint used when no address is configured.
pub const DEFAULT_ADDRESS: &str = "ws://localhost:8080/ws/chat";
