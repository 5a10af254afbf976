//! WebSocket transport
//!
//! Responsibilities:
//! - accept TCP connections and upgrade them on the configured endpoint path
//!   (other paths get a 404)
//! - pick a STOMP subprotocol when the client offers some
//! - register a `Session` with the `Broker` per connection
//! - decode incoming frames, apply them to the broker and close the
//!   connection when the broker says so
//! - remove the session from the broker when the connection ends

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::http::{HeaderValue, StatusCode};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, FrameOutcome, Session};
use crate::stomp::frame;

const SUPPORTED_SUBPROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// Bind `addr` and serve the broker on `endpoint` until the listener fails.
pub async fn start_websocket_server(
    addr: &str,
    endpoint: &str,
    broker: Arc<Mutex<Broker>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        "STOMP broker listening on ws://{}{endpoint}",
        listener.local_addr()?
    );
    serve(listener, endpoint.to_string(), broker).await;
    Ok(())
}

/// Accept connections from an already bound listener.
pub async fn serve(listener: TcpListener, endpoint: String, broker: Arc<Mutex<Broker>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        debug!("Connection from {peer}");

        let broker = broker.clone();
        let endpoint = endpoint.clone();
        spawn(async move { handle_connection(stream, &endpoint, broker).await });
    }
}

fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// First supported subprotocol from a `Sec-WebSocket-Protocol` offer.
fn negotiate_subprotocol(offer: Option<&HeaderValue>) -> Option<&'static str> {
    let offer = offer?.to_str().ok()?;
    offer.split(',').map(str::trim).find_map(|requested| {
        SUPPORTED_SUBPROTOCOLS
            .iter()
            .copied()
            .find(|supported| *supported == requested)
    })
}

async fn handle_connection(stream: TcpStream, endpoint: &str, broker: Arc<Mutex<Broker>>) {
    let callback = |request: &Request, mut response: Response| {
        let path = request.uri().path();
        if path != endpoint {
            let mut rejection = ErrorResponse::new(Some(format!("no STOMP endpoint at {path}")));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        if let Some(protocol) = negotiate_subprotocol(request.headers().get(SEC_WEBSOCKET_PROTOCOL))
        {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
        }
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let session = Session::new(tx);
    let session_id = session.id.clone();
    lock(&broker).register_session(session);

    // The broker owns the only sender, so the writer drains and exits once the
    // session is cleaned up.
    let writer = {
        let session_id = session_id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send frame to {session_id}: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("Send loop closed for {session_id}");
        })
    };

    while let Some(message) = ws_receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Read error on {session_id}: {e}");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        if !message.is_text() && !message.is_binary() {
            continue;
        }

        let outcome = match frame::decode(&message.into_data()) {
            Ok(frames) => {
                let mut broker = lock(&broker);
                let mut outcome = FrameOutcome::Continue;
                for frame in frames {
                    outcome = broker.handle_frame(&session_id, frame);
                    if outcome == FrameOutcome::Close {
                        break;
                    }
                }
                outcome
            }
            Err(e) => lock(&broker).reject(&session_id, "malformed frame", &e.to_string()),
        };
        if outcome == FrameOutcome::Close {
            break;
        }
    }

    lock(&broker).cleanup_session(&session_id);
    let _ = writer.await;
    info!("{session_id} closed");
}
