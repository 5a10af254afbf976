use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::websocket::serve;
use crate::broker::Broker;
use crate::client::InboundMessage;
use crate::stomp::frame::{self, Frame};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, Arc<Mutex<Broker>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let broker = Arc::new(Mutex::new(Broker::new()));
    tokio::spawn(serve(listener, "/ws/chat".to_string(), broker.clone()));
    (addr, broker)
}

async fn open(addr: SocketAddr) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws/chat"))
        .await
        .expect("WebSocket handshake failed");
    ws
}

async fn send(ws: &mut Ws, frame: Frame) {
    ws.send(frame::to_ws_message(frame).unwrap())
        .await
        .expect("Failed to send frame");
}

async fn recv_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if !msg.is_text() && !msg.is_binary() {
            continue;
        }
        let mut frames = frame::decode(&msg.into_data()).unwrap();
        if !frames.is_empty() {
            return frames.remove(0);
        }
    }
}

async fn expect_closed(ws: &mut Ws) {
    let end = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "connection was not closed");
}

#[tokio::test]
async fn test_connect_subscribe_and_chat_round_trip() {
    let (addr, broker) = start_server().await;
    let mut ws = open(addr).await;

    send(&mut ws, Frame::new("CONNECT").header("login", "tester")).await;
    let connected = recv_frame(&mut ws).await;
    assert_eq!(connected.command, "CONNECTED");

    send(
        &mut ws,
        Frame::new("SUBSCRIBE")
            .header("destination", "/topic/channel/1")
            .header("id", "sub-0")
            .header("receipt", "subscribed"),
    )
    .await;
    assert_eq!(
        recv_frame(&mut ws).await.get_header("receipt-id"),
        Some("subscribed")
    );

    send(
        &mut ws,
        Frame::new("SEND")
            .header("destination", "/app/chat/1")
            .set_body(r#"{"content":"Hello from automated test!"}"#),
    )
    .await;

    let delivered = recv_frame(&mut ws).await;
    assert_eq!(delivered.command, "MESSAGE");
    let message = InboundMessage::from_body(&delivered.body).unwrap();
    assert_eq!(message.content, "Hello from automated test!");
    assert_eq!(message.sender_name, "tester");

    assert_eq!(broker.lock().unwrap().sessions.len(), 1);
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected() {
    let (addr, _) = start_server().await;
    let result = connect_async(format!("ws://{addr}/somewhere/else")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_stomp_subprotocol_is_negotiated() {
    let (addr, _) = start_server().await;
    let mut request = format!("ws://{addr}/ws/chat").into_client_request().unwrap();
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static("v11.stomp, v12.stomp"),
    );

    let (_ws, response) = connect_async(request).await.expect("handshake failed");
    assert_eq!(
        response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "v11.stomp"
    );
}

#[tokio::test]
async fn test_frame_before_connect_gets_error_and_close() {
    let (addr, broker) = start_server().await;
    let mut ws = open(addr).await;

    send(
        &mut ws,
        Frame::new("SEND")
            .header("destination", "/app/chat/1")
            .set_body(r#"{"content":"too early"}"#),
    )
    .await;

    let error = recv_frame(&mut ws).await;
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("not connected"));
    expect_closed(&mut ws).await;

    // session cleanup runs right after the close
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.lock().unwrap().sessions.is_empty());
}

#[tokio::test]
async fn test_malformed_frame_gets_error() {
    let (addr, _) = start_server().await;
    let mut ws = open(addr).await;

    ws.send(WsMessage::text("SEND\ndestination:/topic/a\\q\n\n\0"))
        .await
        .unwrap();

    let error = recv_frame(&mut ws).await;
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("malformed frame"));
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_unknown_command_gets_error() {
    let (addr, _) = start_server().await;
    let mut ws = open(addr).await;

    send(&mut ws, Frame::new("CONNECT")).await;
    assert_eq!(recv_frame(&mut ws).await.command, "CONNECTED");

    ws.send(WsMessage::text("HELLO\n\n\0")).await.unwrap();

    let error = recv_frame(&mut ws).await;
    assert_eq!(error.command, "ERROR");
    assert_eq!(error.get_header("message"), Some("unknown command"));
    expect_closed(&mut ws).await;
}
