use tokio::sync::mpsc::{self, UnboundedReceiver};
use tungstenite::protocol::Message as WsMessage;

use super::engine::{Broker, FrameOutcome};
use super::session::{Session, SessionId};
use super::topic::{Subscriber, Topic};
use crate::client::InboundMessage;
use crate::stomp::frame::{self, Frame};

fn register(broker: &mut Broker) -> (SessionId, UnboundedReceiver<WsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = Session::new(tx);
    let session_id = session.id.clone();
    broker.register_session(session);
    (session_id, rx)
}

fn connected(broker: &mut Broker) -> (SessionId, UnboundedReceiver<WsMessage>) {
    let (session_id, mut rx) = register(broker);
    let outcome = broker.handle_frame(&session_id, Frame::new("CONNECT"));
    assert_eq!(outcome, FrameOutcome::Continue);
    assert_eq!(next_frame(&mut rx).command, "CONNECTED");
    (session_id, rx)
}

fn next_frame(rx: &mut UnboundedReceiver<WsMessage>) -> Frame {
    let msg = rx.try_recv().expect("expected a queued frame");
    let mut frames = frame::decode(&msg.into_data()).unwrap();
    assert_eq!(frames.len(), 1);
    frames.remove(0)
}

fn subscribe(broker: &mut Broker, session_id: &str, destination: &str, id: &str) {
    let frame = Frame::new("SUBSCRIBE")
        .header("destination", destination)
        .header("id", id);
    assert_eq!(
        broker.handle_frame(session_id, frame),
        FrameOutcome::Continue
    );
}

fn chat(channel: &str, body: &str) -> Frame {
    Frame::new("SEND")
        .header("destination", format!("/app/chat/{channel}"))
        .set_body(body)
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("/topic/channel/1");
    assert_eq!(topic.name, "/topic/channel/1");
    assert!(topic.subscribers.is_empty());

    topic.subscribe(Subscriber::new("s1", "sub-0"));
    topic.subscribe(Subscriber::new("s1", "sub-0"));
    topic.subscribe(Subscriber::new("s1", "sub-1"));
    assert_eq!(topic.subscribers.len(), 2);

    assert!(topic.unsubscribe(&Subscriber::new("s1", "sub-0")));
    assert!(!topic.unsubscribe(&Subscriber::new("s1", "sub-0")));

    topic.subscribe(Subscriber::new("s2", "sub-0"));
    topic.remove_session("s1");
    assert_eq!(topic.subscribers.len(), 1);
    assert!(topic.subscribers.contains(&Subscriber::new("s2", "sub-0")));
}

#[test]
fn test_broker_new() {
    let broker = Broker::new();
    assert!(broker.topics.is_empty());
    assert!(broker.sessions.is_empty());
}

#[test]
fn test_frames_before_connect_are_rejected() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = register(&mut broker);

    let outcome = broker.handle_frame(&session_id, chat("1", r#"{"content":"hi"}"#));
    assert_eq!(outcome, FrameOutcome::Close);

    let error = next_frame(&mut rx);
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("not connected"));
}

#[test]
fn test_connect_replies_connected_and_uses_login_as_name() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = register(&mut broker);

    let connect = Frame::new("CONNECT")
        .header("accept-version", "1.2")
        .header("login", "Ada Lovelace");
    assert_eq!(
        broker.handle_frame(&session_id, connect),
        FrameOutcome::Continue
    );

    let reply = next_frame(&mut rx);
    assert_eq!(reply.command, "CONNECTED");
    assert_eq!(reply.get_header("version"), Some("1.2"));
    assert_eq!(reply.get_header("heart-beat"), Some("0,0"));
    assert_eq!(broker.sessions[&session_id].display_name, "Ada Lovelace");

    // a second CONNECT is a protocol error
    assert_eq!(
        broker.handle_frame(&session_id, Frame::new("CONNECT")),
        FrameOutcome::Close
    );
}

#[test]
fn test_chat_send_is_broadcast_on_channel_topic() {
    let mut broker = Broker::new();
    let (listener, mut listener_rx) = connected(&mut broker);
    let (sender, _sender_rx) = connected(&mut broker);
    subscribe(&mut broker, &listener, "/topic/channel/7", "sub-3");

    let outcome = broker.handle_frame(&sender, chat("7", r#"{"content":"hello"}"#));
    assert_eq!(outcome, FrameOutcome::Continue);

    let delivered = next_frame(&mut listener_rx);
    assert_eq!(delivered.command, "MESSAGE");
    assert_eq!(delivered.get_header("destination"), Some("/topic/channel/7"));
    assert_eq!(delivered.get_header("subscription"), Some("sub-3"));
    assert_eq!(
        delivered.get_header("content-type"),
        Some("application/json")
    );

    let message = InboundMessage::from_body(&delivered.body).unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.sender_name, broker.sessions[&sender].display_name);
    assert_eq!(message.channel_id, Some(7));
    assert_eq!(message.kind.as_deref(), Some("CHAT"));
}

#[test]
fn test_blank_chat_content_is_dropped() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/1", "sub-0");

    let outcome = broker.handle_frame(&session_id, chat("1", r#"{"content":"   "}"#));
    assert_eq!(outcome, FrameOutcome::Continue);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_malformed_chat_body_closes_session() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);

    let outcome = broker.handle_frame(&session_id, chat("1", "not json"));
    assert_eq!(outcome, FrameOutcome::Close);
    let error = next_frame(&mut rx);
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("malformed message"));
}

#[test]
fn test_non_numeric_channel_is_rejected() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);

    let outcome = broker.handle_frame(&session_id, chat("general", r#"{"content":"x"}"#));
    assert_eq!(outcome, FrameOutcome::Close);
    assert_eq!(next_frame(&mut rx).command, "ERROR");
}

#[test]
fn test_topic_send_is_relayed_verbatim() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/2", "sub-0");

    let raw = Frame::new("SEND")
        .header("destination", "/topic/channel/2")
        .set_body(r#"{"senderName":"x"}"#);
    broker.handle_frame(&session_id, raw);

    let delivered = next_frame(&mut rx);
    assert_eq!(delivered.body, br#"{"senderName":"x"}"#);
    assert_eq!(delivered.get_header("content-type"), None);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/1", "sub-0");

    let unsubscribe = Frame::new("UNSUBSCRIBE").header("id", "sub-0");
    assert_eq!(
        broker.handle_frame(&session_id, unsubscribe),
        FrameOutcome::Continue
    );

    broker.handle_frame(&session_id, chat("1", r#"{"content":"hello"}"#));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_last_unsubscribe_removes_topic() {
    let mut broker = Broker::new();
    let (first, _first_rx) = connected(&mut broker);
    let (second, _second_rx) = connected(&mut broker);
    subscribe(&mut broker, &first, "/topic/channel/4", "sub-0");
    subscribe(&mut broker, &second, "/topic/channel/4", "sub-0");

    let unsubscribe = Frame::new("UNSUBSCRIBE").header("id", "sub-0");
    broker.handle_frame(&first, unsubscribe.clone());
    assert_eq!(broker.topics["/topic/channel/4"].subscribers.len(), 1);

    broker.handle_frame(&second, unsubscribe);
    assert!(broker.topics.is_empty());
}

#[test]
fn test_chat_send_alias_is_broadcast() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/9", "sub-0");

    let send = Frame::new("SEND")
        .header("destination", "/app/chat.send/channelId/9")
        .set_body(r#"{"content":"via alias"}"#);
    assert_eq!(broker.handle_frame(&session_id, send), FrameOutcome::Continue);

    let delivered = next_frame(&mut rx);
    assert_eq!(delivered.get_header("destination"), Some("/topic/channel/9"));
    let message = InboundMessage::from_body(&delivered.body).unwrap();
    assert_eq!(message.content, "via alias");
    assert_eq!(message.channel_id, Some(9));
}

#[test]
fn test_unknown_command_is_rejected() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);

    assert_eq!(
        broker.handle_frame(&session_id, Frame::new("HELLO")),
        FrameOutcome::Close
    );
    let error = next_frame(&mut rx);
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("unknown command"));
}

#[test]
fn test_subscribe_without_id_is_rejected() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);

    let frame = Frame::new("SUBSCRIBE").header("destination", "/topic/channel/1");
    assert_eq!(broker.handle_frame(&session_id, frame), FrameOutcome::Close);
    assert_eq!(next_frame(&mut rx).get_header("message"), Some("missing header"));
}

#[test]
fn test_receipts_and_disconnect() {
    let mut broker = Broker::new();
    let (session_id, mut rx) = connected(&mut broker);

    let send = chat("1", r#"{"content":"hi"}"#).header("receipt", "r-1");
    assert_eq!(broker.handle_frame(&session_id, send), FrameOutcome::Continue);
    assert_eq!(next_frame(&mut rx).get_header("receipt-id"), Some("r-1"));

    let disconnect = Frame::new("DISCONNECT").header("receipt", "bye");
    assert_eq!(
        broker.handle_frame(&session_id, disconnect),
        FrameOutcome::Close
    );
    let receipt = next_frame(&mut rx);
    assert_eq!(receipt.command, "RECEIPT");
    assert_eq!(receipt.get_header("receipt-id"), Some("bye"));
}

#[test]
fn test_cleanup_session() {
    let mut broker = Broker::new();
    let (session_id, _rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/1", "sub-0");

    let (other, _other_rx) = connected(&mut broker);
    subscribe(&mut broker, &other, "/topic/channel/2", "sub-0");

    broker.cleanup_session(&session_id);
    assert!(!broker.sessions.contains_key(&session_id));
    assert!(!broker.topics.contains_key("/topic/channel/1"));
    assert!(broker.topics.contains_key("/topic/channel/2"));
}

#[test]
fn test_publish_to_session_with_closed_channel() {
    let mut broker = Broker::new();
    let (session_id, rx) = connected(&mut broker);
    subscribe(&mut broker, &session_id, "/topic/channel/1", "sub-0");

    // Drop the receiver to close the channel
    drop(rx);

    let delivered = broker.publish("/topic/channel/1", b"{}", None);
    assert_eq!(delivered, 0);
}

#[test]
fn test_publish_to_nonexistent_topic() {
    let mut broker = Broker::new();
    assert_eq!(broker.publish("/topic/nobody", b"{}", None), 0);
}
