//! STOMP over WebSocket session driver
//!
//! `StompClient` is the transport the chat test client is built on. It owns a
//! background task that:
//! - opens the WebSocket and performs the CONNECT/CONNECTED handshake
//! - sends and checks heart-beats at the negotiated intervals
//! - routes MESSAGE frames to the handler registered for their subscription
//! - reports ERROR frames and dropped sessions through a lifecycle callback
//! - reconnects after `reconnect_delay` until `deactivate` is called
//!
//! Callers talk to the task through an unbounded request channel, so every
//! method here returns immediately. Subscriptions are scoped to one session:
//! each session that ends bumps a shared generation counter, which marks the
//! subscriptions made during it as inactive. After a reconnect they must be
//! registered again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use iridium_stomp::Heartbeat;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;
use url::Url;
use uuid::Uuid;

use crate::stomp::frame::{self, Frame};
use crate::stomp::heartbeat::{self, Negotiated};
use crate::stomp::state::ConnectionStatus;
use crate::utils::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket subprotocols offered during the upgrade, most preferred first.
pub const SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// Value of the CONNECT frame's `accept-version` header.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

const DISCONNECT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection tuning applied to every session of a `StompClient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Delay before each reconnect attempt. Zero disables reconnection.
    pub reconnect_delay: Duration,
    /// Heart-beat intervals proposed in the CONNECT frame.
    pub heartbeat: Heartbeat,
    /// Upper bound for the WebSocket upgrade plus STOMP handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5000),
            heartbeat: Heartbeat::new(4000, 4000),
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

/// Lifecycle notifications emitted by the session driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompEvent {
    /// CONNECTED was received; the session is usable.
    Connected,
    /// The broker sent an ERROR frame.
    StompError { message: String, body: String },
    /// The socket could not be opened or was lost.
    WebSocketError(ClientError),
    /// The driver stopped, either on request or because reconnection is off.
    Disconnected,
}

pub type LifecycleHandler = Arc<dyn Fn(StompEvent) + Send + Sync>;
pub type MessageHandler = Box<dyn FnMut(Frame) + Send>;

enum Request {
    Publish(Frame),
    Subscribe {
        id: String,
        destination: String,
        generation: u64,
        handler: MessageHandler,
    },
    Unsubscribe {
        id: String,
    },
    Deactivate,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Publish(_) => "publish",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::Deactivate => "deactivate",
        }
    }
}

/// Handle to a running STOMP connection.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// driver the same way `deactivate` does, without waiting for it.
pub struct StompClient {
    url: Url,
    options: ConnectOptions,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ConnectionStatus>,
    driver: Option<JoinHandle<()>>,
    next_subscription: AtomicU64,
    generation: Arc<AtomicU64>,
}

impl StompClient {
    /// Start connecting to `url` in the background.
    pub fn activate(url: Url, options: ConnectOptions, lifecycle: LifecycleHandler) -> Self {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let generation = Arc::new(AtomicU64::new(0));

        let driver = Driver {
            url: url.clone(),
            options,
            lifecycle,
            requests: requests_rx,
            status: status_tx,
            handlers: HashMap::new(),
            generation: Arc::clone(&generation),
        };

        Self {
            url,
            options,
            requests,
            status,
            driver: Some(tokio::spawn(driver.run())),
            next_subscription: AtomicU64::new(0),
            generation,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn connected(&self) -> bool {
        self.status().is_connected()
    }

    /// A receiver that observes every status change of this connection.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// True once the driver task has exited and will not reconnect.
    pub fn is_finished(&self) -> bool {
        self.driver.as_ref().is_none_or(|driver| driver.is_finished())
    }

    /// Queue a SEND frame. Delivery is not confirmed.
    pub fn publish(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> Result<()> {
        self.ensure_connected()?;

        let mut frame = Frame::new("SEND").header("destination", destination);
        for (name, value) in headers {
            frame = frame.header(*name, *value);
        }
        self.request(Request::Publish(frame.set_body(body)))
    }

    /// Subscribe to `destination`; `handler` runs on the driver task for each
    /// MESSAGE, in arrival order.
    pub fn subscribe<F>(&self, destination: &str, handler: F) -> Result<StompSubscription>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        // read before the status check so a session ending in between leaves
        // this subscription inactive rather than attached to the next one
        let generation = self.generation.load(Ordering::Acquire);
        self.ensure_connected()?;

        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        self.request(Request::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
            generation,
            handler: Box::new(handler),
        })?;

        Ok(StompSubscription {
            id,
            destination: destination.to_string(),
            requests: self.requests.clone(),
            generation,
            current: Arc::clone(&self.generation),
        })
    }

    /// Disconnect gracefully and wait for the driver to stop.
    pub async fn deactivate(&mut self) {
        let _ = self.requests.send(Request::Deactivate);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("STOMP driver for {} ended abnormally: {e}", self.url);
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn request(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| ClientError::NotConnected)
    }
}

/// A subscription made on one session. Unsubscribing stops handler
/// invocations for frames the driver has not yet dispatched.
#[derive(Debug)]
pub struct StompSubscription {
    id: String,
    destination: String,
    requests: mpsc::UnboundedSender<Request>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl StompSubscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// False once the session it was made on has ended.
    pub fn is_active(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    pub fn unsubscribe(self) {
        let _ = self.requests.send(Request::Unsubscribe { id: self.id });
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

enum SessionEnd {
    Deactivated,
    Lost(String),
}

struct Driver {
    url: Url,
    options: ConnectOptions,
    lifecycle: LifecycleHandler,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<ConnectionStatus>,
    handlers: HashMap<String, MessageHandler>,
    generation: Arc<AtomicU64>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            self.status.send_replace(ConnectionStatus::Connecting);

            match self.connect_or_deactivate().await {
                None => break,
                Some(Ok((ws, heartbeat))) => {
                    self.status.send_replace(ConnectionStatus::Connected);
                    info!("Connected to {}", self.url);
                    self.emit(StompEvent::Connected);

                    let end = self.session(ws, heartbeat).await;
                    self.handlers.clear();
                    match end {
                        SessionEnd::Deactivated => {
                            self.generation.fetch_add(1, Ordering::AcqRel);
                            break;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!("Connection to {} lost: {reason}", self.url);
                            self.status.send_replace(ConnectionStatus::Failed);
                            self.generation.fetch_add(1, Ordering::AcqRel);
                            self.emit(StompEvent::WebSocketError(ClientError::ConnectionLost(
                                reason,
                            )));
                        }
                    }
                }
                Some(Err(ClientError::Protocol { message, body })) => {
                    warn!("Broker rejected CONNECT to {}: {message}", self.url);
                    self.status.send_replace(ConnectionStatus::Failed);
                    self.emit(StompEvent::StompError { message, body });
                }
                Some(Err(err)) => {
                    warn!("Failed to connect to {}: {err}", self.url);
                    self.status.send_replace(ConnectionStatus::Failed);
                    self.emit(StompEvent::WebSocketError(err));
                }
            }

            if self.options.reconnect_delay.is_zero() {
                debug!("Reconnection disabled for {}", self.url);
                break;
            }
            if !self.wait_reconnect_delay().await {
                break;
            }
            debug!("Reconnecting to {}", self.url);
        }

        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("Disconnected from {}", self.url);
        self.emit(StompEvent::Disconnected);
    }

    fn emit(&self, event: StompEvent) {
        (self.lifecycle)(event);
    }

    /// Run one handshake while still honouring `Deactivate`. `None` means the
    /// driver was asked to stop.
    async fn connect_or_deactivate(&mut self) -> Option<Result<(WsStream, Negotiated)>> {
        let url = self.url.clone();
        let options = self.options;
        let limit = if options.connect_timeout.is_zero() {
            Duration::MAX
        } else {
            options.connect_timeout
        };

        let attempt = timeout(limit, handshake(url, options.heartbeat));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                outcome = &mut attempt => {
                    return Some(outcome.unwrap_or_else(|_| {
                        Err(ClientError::ConnectFailed(format!(
                            "handshake timed out after {limit:?}"
                        )))
                    }));
                }
                request = self.requests.recv() => {
                    if !keep_running_offline(request) {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the reconnect delay. Returns `false` if asked to stop.
    async fn wait_reconnect_delay(&mut self) -> bool {
        let delay = sleep(self.options.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                request = self.requests.recv() => {
                    if !keep_running_offline(request) {
                        return false;
                    }
                }
            }
        }
    }

    async fn session(&mut self, ws: WsStream, heartbeat: Negotiated) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let mut outgoing = ticker(heartbeat.outgoing);
        let mut watchdog = ticker(heartbeat.incoming);
        let mut last_seen = Instant::now();
        let generation = self.generation.load(Ordering::Acquire);

        loop {
            tokio::select! {
                message = stream.next() => {
                    last_seen = Instant::now();
                    match message {
                        Some(Ok(WsMessage::Close(close))) => {
                            return SessionEnd::Lost(match close {
                                Some(close) => format!("closed by broker ({}): {}", close.code, close.reason),
                                None => "closed by broker".to_string(),
                            });
                        }
                        Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                            match frame::decode(&msg.into_data()) {
                                Ok(frames) => frames.into_iter().for_each(|f| self.dispatch(f)),
                                Err(err) => return SessionEnd::Lost(err.to_string()),
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
                        None => return SessionEnd::Lost("stream ended".to_string()),
                    }
                }
                request = self.requests.recv() => {
                    let outbound = match request {
                        Some(Request::Publish(frame)) => frame,
                        Some(Request::Subscribe { id, destination, generation: made_on, handler }) => {
                            if made_on != generation {
                                debug!("Dropping {id} made on an earlier session");
                                continue;
                            }
                            debug!("Subscribing {id} to {destination}");
                            self.handlers.insert(id.clone(), handler);
                            Frame::new("SUBSCRIBE")
                                .header("id", id)
                                .header("destination", destination)
                                .header("ack", "auto")
                        }
                        Some(Request::Unsubscribe { id }) => {
                            if self.handlers.remove(&id).is_none() {
                                continue;
                            }
                            debug!("Unsubscribing {id}");
                            Frame::new("UNSUBSCRIBE").header("id", id)
                        }
                        Some(Request::Deactivate) | None => {
                            close_gracefully(&mut sink, &mut stream).await;
                            return SessionEnd::Deactivated;
                        }
                    };
                    if let Err(err) = send(&mut sink, frame::to_ws_message(outbound)).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                _ = outgoing.tick(), if heartbeat.outgoing.is_some() => {
                    if let Err(err) = send(&mut sink, frame::heartbeat_message()).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                _ = watchdog.tick(), if heartbeat.incoming.is_some() => {
                    let silent = last_seen.elapsed();
                    let limit = heartbeat.incoming.unwrap_or(Duration::MAX).saturating_mul(2);
                    if silent > limit {
                        return SessionEnd::Lost(format!("no data from broker for {silent:?}"));
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame.command.as_str() {
            "MESSAGE" => {
                let Some(id) = frame.get_header("subscription").map(str::to_owned) else {
                    warn!("MESSAGE frame without subscription header dropped");
                    return;
                };
                match self.handlers.get_mut(&id) {
                    Some(handler) => handler(frame),
                    None => debug!("MESSAGE for inactive subscription {id} dropped"),
                }
            }
            "ERROR" => {
                let message = frame.get_header("message").unwrap_or_default().to_string();
                warn!("STOMP error from {}: {message}", self.url);
                self.emit(StompEvent::StompError {
                    message,
                    body: frame::body_text(&frame).into_owned(),
                });
            }
            "RECEIPT" => debug!("RECEIPT {:?}", frame.get_header("receipt-id")),
            other => debug!("Ignoring unexpected {other} frame"),
        }
    }
}

/// Decide what to do with a request received while no session is open.
fn keep_running_offline(request: Option<Request>) -> bool {
    match request {
        None | Some(Request::Deactivate) => false,
        Some(other) => {
            debug!("Dropping {} request issued while offline", other.name());
            true
        }
    }
}

fn ticker(period: Option<Duration>) -> Interval {
    // disabled tickers are never polled, any period works
    let period = period.unwrap_or(Duration::from_secs(3600));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn connect_failed(err: impl std::fmt::Display) -> ClientError {
    ClientError::ConnectFailed(err.to_string())
}

/// Send an encoded message, flattening encode and socket errors.
async fn send(
    sink: &mut SplitSink<WsStream, WsMessage>,
    message: Result<WsMessage>,
) -> std::result::Result<(), String> {
    let message = message.map_err(|e| e.to_string())?;
    sink.send(message).await.map_err(|e| e.to_string())
}

async fn handshake(url: Url, heartbeat: Heartbeat) -> Result<(WsStream, Negotiated)> {
    let mut request = url.as_str().into_client_request().map_err(connect_failed)?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOLS));

    let (mut ws, _response) = connect_async(request).await.map_err(connect_failed)?;

    let connect = Frame::new("CONNECT")
        .header("accept-version", ACCEPT_VERSION)
        .header("host", url.host_str().unwrap_or("localhost"))
        .header("heart-beat", heartbeat.to_string());
    ws.send(frame::to_ws_message(connect)?)
        .await
        .map_err(connect_failed)?;

    while let Some(message) = ws.next().await {
        let message = message.map_err(connect_failed)?;
        if let WsMessage::Close(close) = &message {
            return Err(ClientError::ConnectFailed(format!(
                "closed during handshake: {close:?}"
            )));
        }
        if !message.is_text() && !message.is_binary() {
            continue;
        }

        let Some(reply) = frame::decode(&message.into_data())?.into_iter().next() else {
            continue;
        };
        return match reply.command.as_str() {
            "CONNECTED" => {
                let negotiated = heartbeat::negotiate(&heartbeat, reply.get_header("heart-beat"));
                debug!(
                    "STOMP {} session established, heart-beats {negotiated:?}",
                    reply.get_header("version").unwrap_or("1.0")
                );
                Ok((ws, negotiated))
            }
            "ERROR" => Err(ClientError::protocol(
                reply.get_header("message").unwrap_or_default(),
                frame::body_text(&reply),
            )),
            other => Err(ClientError::protocol(
                format!("unexpected {other} frame during handshake"),
                "",
            )),
        };
    }

    Err(ClientError::ConnectFailed(
        "connection closed during handshake".to_string(),
    ))
}

async fn close_gracefully(
    sink: &mut SplitSink<WsStream, WsMessage>,
    stream: &mut SplitStream<WsStream>,
) {
    let receipt = format!("disconnect-{}", Uuid::new_v4());
    let disconnect = Frame::new("DISCONNECT").receipt(receipt.as_str());

    if send(sink, frame::to_ws_message(disconnect)).await.is_ok() {
        let acknowledged = async {
            while let Some(Ok(message)) = stream.next().await {
                if !message.is_text() && !message.is_binary() {
                    continue;
                }
                let Ok(frames) = frame::decode(&message.into_data()) else {
                    return;
                };
                if frames.iter().any(|f| {
                    f.command == "RECEIPT" && f.get_header("receipt-id") == Some(receipt.as_str())
                }) {
                    return;
                }
            }
        };
        if timeout(DISCONNECT_RECEIPT_TIMEOUT, acknowledged).await.is_err() {
            debug!("No RECEIPT for DISCONNECT within {DISCONNECT_RECEIPT_TIMEOUT:?}");
        }
    }

    let _ = sink.close().await;
}
