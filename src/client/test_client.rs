//! Chat test client
//!
//! `TestClient` drives one chat endpoint: it owns at most one connection and
//! at most one channel subscription at a time. Calls return as soon as the
//! request is validated and queued; connection progress, inbound messages and
//! transport failures are reported to the `Observer` given at construction.
//!
//! Notes:
//! - `connect` while a connection is live (connecting, connected, or waiting
//!   to retry) does nothing.
//! - A subscription ends with the session it was made on. After an automatic
//!   reconnect `subscription()` is `None`; call `subscribe` again once
//!   `ChatEvent::Connected` arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::destination;
use crate::client::message::{InboundMessage, OutboundMessage};
use crate::client::observer::{ChatEvent, Observer};
use crate::stomp::{
    ConnectOptions, ConnectionStatus, Frame, LifecycleHandler, StompClient, StompEvent,
    StompSubscription,
};
use crate::utils::{ClientError, Result};

/// The active channel subscription of a `TestClient`.
#[derive(Debug)]
pub struct Subscription {
    channel_id: u64,
    handle: StompSubscription,
}

impl Subscription {
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn destination(&self) -> &str {
        self.handle.destination()
    }

    /// Whether the session this subscription was made on is still up.
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    fn cancel(self) {
        if self.is_active() {
            info!("Unsubscribed from {}", self.destination());
            self.handle.unsubscribe();
        } else {
            debug!("Dropped stale subscription to {}", self.destination());
        }
    }
}

pub struct TestClient {
    options: ConnectOptions,
    observer: Arc<dyn Observer>,
    connection: Option<StompClient>,
    subscription: Option<Subscription>,
}

impl TestClient {
    pub fn new(options: ConnectOptions, observer: impl Observer) -> Self {
        Self {
            options,
            observer: Arc::new(observer),
            connection: None,
            subscription: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map_or(ConnectionStatus::Disconnected, StompClient::status)
    }

    /// The current subscription, unless the session it belonged to has ended.
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref().filter(|s| s.is_active())
    }

    /// Address of the current connection, if any.
    pub fn address(&self) -> Option<&Url> {
        self.connection.as_ref().map(StompClient::url)
    }

    /// Start connecting to `address` (a `ws://` URL). Must be called from
    /// within a Tokio runtime.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        let url = parse_address(address)?;

        if let Some(connection) = &self.connection {
            if !connection.is_finished() {
                warn!(
                    "Already {} to {}, ignoring connect to {url}",
                    connection.status(),
                    connection.url()
                );
                return Ok(());
            }
        }

        self.subscription = None;
        info!("Connecting to {url}");

        let observer = Arc::clone(&self.observer);
        let connected_to = url.to_string();
        let lifecycle: LifecycleHandler = Arc::new(move |event: StompEvent| {
            observer.notify(match event {
                StompEvent::Connected => ChatEvent::Connected {
                    address: connected_to.clone(),
                },
                StompEvent::StompError { message, body } => {
                    ChatEvent::Error(ClientError::Protocol { message, body })
                }
                StompEvent::WebSocketError(err) => ChatEvent::Error(err),
                StompEvent::Disconnected => ChatEvent::Disconnected,
            })
        });

        self.connection = Some(StompClient::activate(url, self.options, lifecycle));
        Ok(())
    }

    /// Tear down the connection, if any, and wait until it is closed.
    pub async fn disconnect(&mut self) {
        self.unsubscribe();
        if let Some(mut connection) = self.connection.take() {
            info!("Disconnecting from {}", connection.url());
            connection.deactivate().await;
        }
    }

    /// Subscribe to the broadcasts of `channel_id`, replacing any current
    /// subscription.
    pub fn subscribe(&mut self, channel_id: u64) -> Result<&Subscription> {
        let connection = self
            .connection
            .as_ref()
            .filter(|c| c.connected())
            .ok_or(ClientError::NotConnected)?;

        if let Some(previous) = self.subscription.take() {
            debug!("Replacing subscription to {}", previous.destination());
            previous.cancel();
        }

        let destination = destination::channel_topic(channel_id);
        let observer = Arc::clone(&self.observer);
        let source = destination.clone();
        let handle = connection.subscribe(&destination, move |frame: Frame| {
            let subscription_id = frame
                .get_header("subscription")
                .unwrap_or_default()
                .to_string();
            let event = match InboundMessage::from_body(&frame.body) {
                Ok(message) => ChatEvent::Message {
                    subscription_id,
                    channel_id,
                    message,
                },
                Err(err) => {
                    warn!("Unreadable message on {source}: {err}");
                    ChatEvent::Error(err)
                }
            };
            observer.notify(event);
        })?;

        info!("Subscribed to {destination}");
        Ok(&*self.subscription.insert(Subscription { channel_id, handle }))
    }

    /// Cancel the current subscription. Does nothing without one.
    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    /// Publish `content` to `channel_id`. Returns once the frame is queued.
    pub fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        let connection = self
            .connection
            .as_ref()
            .filter(|c| c.connected())
            .ok_or(ClientError::NotConnected)?;

        if content.trim().is_empty() {
            return Err(ClientError::InvalidMessage(
                "content must not be blank".to_string(),
            ));
        }

        let destination = destination::chat_command(channel_id);
        let body = OutboundMessage::new(content).to_json()?;
        connection.publish(&destination, body, &[("content-type", "application/json")])?;

        debug!("Message sent to {destination}");
        Ok(())
    }

    /// Wait until the connection reaches `status`, for at most `limit`.
    pub async fn wait_for_status(&self, status: ConnectionStatus, limit: Duration) -> Result<()> {
        let Some(connection) = &self.connection else {
            return match status {
                ConnectionStatus::Disconnected => Ok(()),
                _ => Err(ClientError::NotConnected),
            };
        };

        let mut changes = connection.watch_status();
        match timeout(limit, changes.wait_for(|current| *current == status)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout(limit)),
        }
    }
}

fn parse_address(address: &str) -> Result<Url> {
    let url =
        Url::parse(address).map_err(|e| ClientError::InvalidAddress(format!("{address}: {e}")))?;
    match url.scheme() {
        "ws" => Ok(url),
        other => Err(ClientError::InvalidAddress(format!(
            "unsupported scheme '{other}' in {address}"
        ))),
    }
}
