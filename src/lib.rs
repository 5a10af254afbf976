//! # stompchat
//!
//! `stompchat` is a test client for chat backends that speak STOMP over
//! WebSocket. It connects to a chat endpoint, follows one channel at a time,
//! publishes messages to channels and reports everything that happens through
//! an observer. A small in-memory broker with the same destination layout is
//! included so the client can be exercised without the real backend.
//!
//! ## Core Modules
//!
//! - `client`: the `TestClient`, chat payloads, destinations and observers.
//! - `stomp`: STOMP frames, heart-beats and the background session driver.
//! - `broker`: the in-memory chat broker.
//! - `transport`: the WebSocket server in front of the broker.
//! - `config`: layered settings from defaults, `config/default.*` and the environment.
//! - `utils`: the shared error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod stomp;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
