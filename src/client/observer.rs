//! Notifications delivered by `TestClient`.

use chrono::Local;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::client::message::InboundMessage;
use crate::utils::ClientError;

/// Everything a `TestClient` reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The STOMP session is established.
    Connected { address: String },
    /// The connection was torn down and will not come back on its own.
    Disconnected,
    /// A message arrived on the active subscription.
    Message {
        subscription_id: String,
        channel_id: u64,
        message: InboundMessage,
    },
    /// A transport failure, broker ERROR frame or unreadable payload.
    Error(ClientError),
}

/// Receives `ChatEvent`s. Called from the connection's background task, so
/// implementations should return quickly.
pub trait Observer: Send + Sync + 'static {
    fn notify(&self, event: ChatEvent);
}

impl Observer for UnboundedSender<ChatEvent> {
    fn notify(&self, event: ChatEvent) {
        // a closed receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Writes every event to the log in a human-readable form.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn notify(&self, event: ChatEvent) {
        match event {
            ChatEvent::Connected { address } => {
                info!("Connected to {address}");
                info!("Ready to send and receive messages");
            }
            ChatEvent::Disconnected => info!("Disconnected"),
            ChatEvent::Message {
                channel_id,
                message,
                ..
            } => {
                info!("Message received on channel {channel_id}");
                info!("  From: {}", message.sender_name);
                info!("  Content: {}", message.content);
                info!(
                    "  Time: {}",
                    message
                        .timestamp
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                );
            }
            ChatEvent::Error(err) => error!("{err}"),
        }
    }
}
