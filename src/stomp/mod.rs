//! The `stomp` module is the transport the chat test client sits on: STOMP
//! frames carried over a WebSocket. Frame encoding and decoding come from
//! `iridium_stomp`; this module adapts it to WebSocket messages and runs the
//! session.
//!
//! - `frame`: WebSocket message to frame conversion through `StompCodec`
//! - `heartbeat`: heart-beat negotiation
//! - `state`: connection status
//! - `client`: the background session driver and its handle, `StompClient`

pub mod client;
pub mod frame;
pub mod heartbeat;
pub mod state;

pub use client::{ConnectOptions, LifecycleHandler, StompClient, StompEvent, StompSubscription};
pub use frame::Frame;
pub use heartbeat::Negotiated;
pub use iridium_stomp::Heartbeat;
pub use state::ConnectionStatus;
