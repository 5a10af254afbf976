//! The `transport` module serves the in-process broker over WebSockets.
//!
//! Each accepted connection gets a broker session, a writer task fed by an
//! unbounded channel, and a reader loop that decodes STOMP frames and hands
//! them to the broker.

pub mod websocket;

pub use websocket::{serve, start_websocket_server};

#[cfg(test)]
mod tests;
