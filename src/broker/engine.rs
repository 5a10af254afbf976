//! Broker engine
//!
//! An in-memory STOMP broker that behaves like the chat backend the test
//! client targets:
//! - `/topic/...` is a simple broker namespace: SEND there is relayed as-is
//!   to every subscriber of that destination
//! - `/app/chat/{channelId}` (and the older `/app/chat.send/channelId/{channelId}`)
//!   is the chat handler: the `{content}` body is turned into a chat message
//!   and broadcast on `/topic/channel/{channelId}`
//! - blank chat content is dropped with a warning, like the real server does
//!
//! Protocol violations (frames before CONNECT, unknown commands, missing
//! required headers, malformed chat bodies) are answered with an ERROR frame
//! and the session is closed.
//!
//! The API is synchronous and meant to sit behind a lock held by the
//! transport. Outbound frames go through unbounded channels, so no network
//! I/O happens while the lock is held.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::broker::session::{Session, SessionId};
use crate::broker::topic::{Subscriber, Topic};
use crate::client::destination;
use crate::client::message::{InboundMessage, OutboundMessage};
use crate::stomp::Frame;

/// Destinations relayed verbatim to subscribers.
const TOPIC_PREFIX: &str = "/topic/";

/// Whether the connection should stay open after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    Close,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub sessions: HashMap<SessionId, Session>,
    next_message_id: u64,
    next_chat_id: u64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_session(&mut self, session: Session) {
        debug!("Registered session {}", session.id);
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn subscribe(&mut self, destination: &str, subscriber: Subscriber) {
        info!(
            "{} subscribed to {destination} as {}",
            subscriber.session, subscriber.subscription
        );
        self.topics
            .entry(destination.to_string())
            .or_insert_with(|| Topic::new(destination))
            .subscribe(subscriber);
    }

    pub fn unsubscribe(&mut self, subscriber: &Subscriber) {
        for (name, topic) in self.topics.iter_mut() {
            if topic.unsubscribe(subscriber) {
                info!("{} unsubscribed from {name}", subscriber.session);
            }
        }
        self.prune_topics();
    }

    /// Deliver `body` as a MESSAGE to every subscriber of `destination`.
    /// Returns the number of sessions the frame was queued for.
    pub fn publish(&mut self, destination: &str, body: &[u8], content_type: Option<&str>) -> usize {
        let Some(topic) = self.topics.get(destination) else {
            debug!("No subscribers for {destination}");
            return 0;
        };

        let mut delivered = 0;
        for subscriber in &topic.subscribers {
            self.next_message_id += 1;
            let mut frame = Frame::new("MESSAGE")
                .header("destination", destination)
                .header("message-id", format!("msg-{}", self.next_message_id))
                .header("subscription", subscriber.subscription.as_str());
            if let Some(content_type) = content_type {
                frame = frame.header("content-type", content_type);
            }
            let frame = frame.set_body(body);

            match self.sessions.get(&subscriber.session) {
                Some(session) if session.send_frame(frame) => delivered += 1,
                Some(_) => warn!("Failed to send to {}", subscriber.session),
                None => warn!("No session registered with id: {}", subscriber.session),
            }
        }
        delivered
    }

    /// Apply one client frame on behalf of `session_id`.
    pub fn handle_frame(&mut self, session_id: &str, frame: Frame) -> FrameOutcome {
        let Some(session) = self.sessions.get_mut(session_id) else {
            warn!("Frame from unknown session {session_id}");
            return FrameOutcome::Close;
        };

        match frame.command.as_str() {
            "CONNECT" | "STOMP" => {
                if session.connected {
                    return self.reject(session_id, "already connected", "");
                }
                session.connected = true;
                if let Some(login) = frame.get_header("login") {
                    session.display_name = login.to_string();
                }
                let reply = Frame::new("CONNECTED")
                    .header("version", "1.2")
                    .header("heart-beat", "0,0")
                    .header("server", concat!("stompchat/", env!("CARGO_PKG_VERSION")))
                    .header("session", session_id);
                session.send_frame(reply);
                info!("{session_id} connected as {}", session.display_name);
                return FrameOutcome::Continue;
            }
            _ if !session.connected => {
                return self.reject(
                    session_id,
                    "not connected",
                    "CONNECT must be the first frame",
                );
            }
            "SUBSCRIBE" => {
                let (Some(destination), Some(id)) =
                    (frame.get_header("destination"), frame.get_header("id"))
                else {
                    return self.reject(
                        session_id,
                        "missing header",
                        "SUBSCRIBE requires destination and id",
                    );
                };
                self.subscribe(destination, Subscriber::new(session_id, id));
            }
            "UNSUBSCRIBE" => {
                let Some(id) = frame.get_header("id") else {
                    return self.reject(session_id, "missing header", "UNSUBSCRIBE requires id");
                };
                self.unsubscribe(&Subscriber::new(session_id, id));
            }
            "SEND" => {
                let Some(destination) = frame.get_header("destination") else {
                    return self.reject(session_id, "missing header", "SEND requires destination");
                };
                if let Some(channel) = destination::chat_channel(destination) {
                    if self.handle_chat(session_id, channel, &frame.body) == FrameOutcome::Close {
                        return FrameOutcome::Close;
                    }
                } else if destination.starts_with(TOPIC_PREFIX) {
                    self.publish(destination, &frame.body, frame.get_header("content-type"));
                } else {
                    warn!("No handler for destination {destination}");
                }
            }
            "DISCONNECT" => {
                self.send_receipt(session_id, &frame);
                info!("{session_id} disconnected");
                return FrameOutcome::Close;
            }
            "ACK" | "NACK" | "BEGIN" | "COMMIT" | "ABORT" => {
                debug!("Ignoring {} from {session_id}", frame.command);
            }
            "CONNECTED" | "MESSAGE" | "RECEIPT" | "ERROR" => {
                return self.reject(
                    session_id,
                    "unexpected frame",
                    &format!("{} is a server frame", frame.command),
                );
            }
            other => {
                return self.reject(
                    session_id,
                    "unknown command",
                    &format!("'{other}' is not a STOMP command"),
                );
            }
        }

        self.send_receipt(session_id, &frame);
        FrameOutcome::Continue
    }

    /// Send an ERROR frame to the session; the caller closes the connection.
    pub fn reject(&self, session_id: &str, message: &str, detail: &str) -> FrameOutcome {
        warn!("Rejecting frame from {session_id}: {message}");
        if let Some(session) = self.sessions.get(session_id) {
            let error = Frame::new("ERROR")
                .header("message", message)
                .header("content-type", "text/plain")
                .set_body(detail);
            session.send_frame(error);
        }
        FrameOutcome::Close
    }

    pub fn cleanup_session(&mut self, session_id: &str) {
        self.remove_session(session_id);
        for topic in self.topics.values_mut() {
            topic.remove_session(session_id);
        }
        self.prune_topics();
        debug!("Cleaned up session {session_id}");
    }

    /// Drop topics nobody subscribes to any more.
    fn prune_topics(&mut self) {
        self.topics.retain(|name, topic| {
            let keep = !topic.subscribers.is_empty();
            if !keep {
                debug!("Removed empty topic {name}");
            }
            keep
        });
    }

    fn send_receipt(&self, session_id: &str, frame: &Frame) {
        let Some(receipt) = frame.get_header("receipt") else {
            return;
        };
        if let Some(session) = self.sessions.get(session_id) {
            session.send_frame(Frame::new("RECEIPT").header("receipt-id", receipt));
        }
    }

    fn handle_chat(&mut self, session_id: &str, channel: &str, body: &[u8]) -> FrameOutcome {
        let Ok(channel_id) = channel.parse::<u64>() else {
            return self.reject(
                session_id,
                "invalid destination",
                &format!("'{channel}' is not a channel id"),
            );
        };
        let request: OutboundMessage = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => return self.reject(session_id, "malformed message", &e.to_string()),
        };

        info!("Message received in channel: {channel_id}");
        if request.content.trim().is_empty() {
            warn!("Empty message attempt from {session_id}");
            return FrameOutcome::Continue;
        }

        self.next_chat_id += 1;
        let message = InboundMessage {
            sender_name: self
                .sessions
                .get(session_id)
                .map(|s| s.display_name.clone())
                .unwrap_or_default(),
            content: request.content,
            timestamp: Utc::now(),
            id: Some(self.next_chat_id),
            sender_id: None,
            channel_id: Some(channel_id),
            kind: Some("CHAT".to_string()),
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize chat message: {e}");
                return FrameOutcome::Continue;
            }
        };

        self.publish(
            &destination::channel_topic(channel_id),
            &payload,
            Some("application/json"),
        );
        FrameOutcome::Continue
    }
}
