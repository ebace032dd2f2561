//! Connection lifecycle for the single multiplexed WebSocket.
//!
//! One `TransportConnection` per authenticated session owns the physical
//! socket. It speaks the broker's STOMP dialect, exchanges heartbeats, and
//! reconnects with a fixed backoff after transport errors, giving up after a
//! configured attempt budget. State transitions push through a watch channel
//! so UI layers observe them instead of polling.
//!
//! The connection knows nothing about message semantics; decoded frames are
//! handed to whatever frame handler the multiplexer installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::Config;
use crate::error::{RealtimeError, RealtimeResult};

pub mod frame;

use frame::Frame;

/// Destination outgoing chat messages are published to.
pub const SEND_DESTINATION: &str = "chat.send";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// An inbound MESSAGE frame, destination plus raw JSON body.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub destination: String,
    pub body: String,
}

/// Fire-and-forget publish seam; the conversation synchronizer depends on this
/// rather than on the concrete connection so tests can capture outgoing traffic.
pub trait OutboundPublisher: Send + Sync {
    fn publish(&self, destination: &str, payload: &serde_json::Value);
}

type FrameHandler = Arc<dyn Fn(InboundFrame) + Send + Sync>;
type ConnectHook = Arc<dyn Fn() + Send + Sync>;

enum Command {
    Subscribe { destination: String },
    Send { destination: String, body: String },
    Shutdown,
}

enum SessionEnd {
    Shutdown,
    Error(RealtimeError),
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TransportConnection {
    config: Arc<Config>,
    state_tx: watch::Sender<ConnectionState>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    frame_handler: RwLock<Option<FrameHandler>>,
    connect_hooks: RwLock<Vec<ConnectHook>>,
    shutdown: AtomicBool,
    /// Incremented on every `connect`; lets a finished session detect that a
    /// newer one already took over before it writes terminal state
    epoch: AtomicU64,
}

impl TransportConnection {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            state_tx,
            commands: Mutex::new(None),
            frame_handler: RwLock::new(None),
            connect_hooks: RwLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        })
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Push-based state observation; receivers see every transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Install the handler invoked for every inbound MESSAGE frame, in frame
    /// arrival order, on the connection's reader task.
    pub fn set_frame_handler(&self, handler: impl Fn(InboundFrame) + Send + Sync + 'static) {
        *self
            .frame_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Register a hook fired on every successful (re)connect. Channel
    /// subscriptions are declared from these hooks, never remembered across
    /// sessions.
    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.connect_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Open the connection. No-op when a session is already being established
    /// or running; no-op with no state change when the token is missing.
    pub fn connect(self: &Arc<Self>, token: Option<&str>) {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::warn!("connect called without a session token, ignoring");
            return;
        };

        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        ) {
            tracing::debug!("connect called while already active, ignoring");
            return;
        }

        self.shutdown.store(false, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.commands.lock().unwrap_or_else(PoisonError::into_inner) = Some(cmd_tx);
        self.state_tx.send_replace(ConnectionState::Connecting);

        let this = Arc::clone(self);
        let token = token.to_string();
        tokio::spawn(async move {
            this.run_session_loop(epoch, token, cmd_rx).await;
        });
    }

    /// Tear the connection down. Idempotent; safe when already disconnected.
    pub fn disconnect(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(tx) = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(Command::Shutdown);
        }
        if self.state() != ConnectionState::Disconnected {
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    /// Declare a subscription for `destination` on the live session.
    /// Re-declaring a destination replaces its subscription handle.
    pub fn subscribe(&self, destination: &str) {
        self.send_command(Command::Subscribe {
            destination: destination.to_string(),
        });
    }

    fn send_command(&self, command: Command) {
        let guard = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                let _ = tx.send(command);
            }
            None => tracing::warn!("transport command dropped, no active session"),
        }
    }

    async fn run_session_loop(
        self: Arc<Self>,
        epoch: u64,
        token: String,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut failed_attempts: u32 = 0;
        loop {
            // A newer connect() owns the transport now; bow out quietly.
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                self.finish(epoch, ConnectionState::Disconnected);
                return;
            }

            match self.open_session(&token).await {
                Ok(ws) => {
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    failed_attempts = 0;
                    self.state_tx.send_replace(ConnectionState::Connected);
                    tracing::info!("transport connected");
                    self.fire_connect_hooks();

                    match self.drive_session(ws, &mut cmd_rx).await {
                        SessionEnd::Shutdown => {
                            self.finish(epoch, ConnectionState::Disconnected);
                            return;
                        }
                        SessionEnd::Error(e) => {
                            tracing::warn!(error = %e, "transport error, scheduling reconnect");
                        }
                    }
                }
                Err(e) => {
                    failed_attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = failed_attempts,
                        "connection attempt failed"
                    );
                    let budget = self.config.reconnect_max_attempts;
                    if budget > 0 && failed_attempts >= budget {
                        tracing::error!("reconnect budget exhausted, giving up");
                        self.finish(epoch, ConnectionState::Failed);
                        return;
                    }
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                self.finish(epoch, ConnectionState::Disconnected);
                return;
            }
            self.state_tx.send_replace(ConnectionState::Reconnecting);

            // Fixed backoff; a Shutdown arriving mid-sleep ends the session.
            let sleep = tokio::time::sleep(self.config.reconnect_delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        None | Some(Command::Shutdown) => {
                            self.finish(epoch, ConnectionState::Disconnected);
                            return;
                        }
                        // Publishes and subscriptions cannot outlive the
                        // session that issued them
                        Some(_) => {}
                    },
                }
            }
        }
    }

    fn finish(&self, epoch: u64, state: ConnectionState) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        *self.commands.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.state_tx.send_replace(state);
    }

    fn fire_connect_hooks(&self) {
        let hooks: Vec<ConnectHook> = self
            .connect_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }

    async fn open_session(&self, token: &str) -> RealtimeResult<WsStream> {
        // A URL without a path ("ws://host:port") would yield an invalid
        // HTTP request line ("GET ?token=..."); ensure the path separator.
        let base = &self.config.ws_url;
        let has_path = base
            .split_once("://")
            .map(|(_, rest)| rest.contains('/'))
            .unwrap_or(true);
        let url = format!(
            "{}{}?token={}",
            base,
            if has_path { "" } else { "/" },
            urlencoding::encode(token)
        );
        let (mut ws, _response) = timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| RealtimeError::Transport("websocket connect timed out".into()))??;

        let heartbeat_ms = self.config.heartbeat_interval.as_millis() as u64;
        let connect = Frame::connect(&host_of(&self.config.ws_url), heartbeat_ms);
        ws.send(Message::text(connect.encode())).await?;

        // The broker must answer CONNECTED before anything else but heartbeats.
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let msg = timeout(deadline.saturating_duration_since(Instant::now()), ws.next())
                .await
                .map_err(|_| RealtimeError::Transport("broker handshake timed out".into()))?
                .ok_or_else(|| RealtimeError::Transport("socket closed during handshake".into()))??;
            let Message::Text(text) = msg else { continue };
            match Frame::parse(text.as_str())? {
                Frame::Heartbeat => continue,
                Frame::Connected { .. } => return Ok(ws),
                Frame::Error { message, .. } => {
                    return Err(RealtimeError::Transport(format!(
                        "broker rejected connect: {message}"
                    )))
                }
                other => {
                    return Err(RealtimeError::Transport(format!(
                        "unexpected frame during handshake: {other:?}"
                    )))
                }
            }
        }
    }

    async fn drive_session(
        &self,
        ws: WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        // destination -> subscription handle; re-subscribing replaces it
        let mut subscriptions: HashMap<String, u64> = HashMap::new();
        let mut next_sub_id: u64 = 1;

        let heartbeat = self.config.heartbeat_interval;
        let mut beat = interval(heartbeat);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = interval(heartbeat);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        for (destination, id) in subscriptions.drain() {
                            tracing::debug!(%destination, "unsubscribing");
                            let frame = Frame::Unsubscribe { id: format!("sub-{id}") };
                            let _ = sink.send(Message::text(frame.encode())).await;
                        }
                        let _ = sink.send(Message::text(Frame::Disconnect.encode())).await;
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Subscribe { destination }) => {
                        if let Some(old) = subscriptions.remove(&destination) {
                            let frame = Frame::Unsubscribe { id: format!("sub-{old}") };
                            if let Err(e) = sink.send(Message::text(frame.encode())).await {
                                return SessionEnd::Error(e.into());
                            }
                        }
                        let id = next_sub_id;
                        next_sub_id += 1;
                        subscriptions.insert(destination.clone(), id);
                        let frame = Frame::Subscribe {
                            id: format!("sub-{id}"),
                            destination,
                        };
                        if let Err(e) = sink.send(Message::text(frame.encode())).await {
                            return SessionEnd::Error(e.into());
                        }
                    }
                    Some(Command::Send { destination, body }) => {
                        let frame = Frame::Send { destination, body };
                        if let Err(e) = sink.send(Message::text(frame.encode())).await {
                            return SessionEnd::Error(e.into());
                        }
                    }
                },
                msg = stream.next() => {
                    let msg = match msg {
                        None => return SessionEnd::Error(
                            RealtimeError::Transport("socket closed by peer".into())),
                        Some(Err(e)) => return SessionEnd::Error(e.into()),
                        Some(Ok(msg)) => msg,
                    };
                    last_inbound = Instant::now();
                    match msg {
                        Message::Text(text) => {
                            if let Some(end) = self.handle_text_frame(text.as_str()) {
                                return end;
                            }
                        }
                        Message::Ping(payload) => {
                            if let Err(e) = sink.send(Message::Pong(payload)).await {
                                return SessionEnd::Error(e.into());
                            }
                        }
                        Message::Close(_) => {
                            return SessionEnd::Error(
                                RealtimeError::Transport("server closed connection".into()));
                        }
                        _ => {}
                    }
                },
                _ = beat.tick() => {
                    if let Err(e) = sink.send(Message::text(Frame::Heartbeat.encode())).await {
                        return SessionEnd::Error(e.into());
                    }
                },
                _ = watchdog.tick() => {
                    if last_inbound.elapsed() > heartbeat * 2 {
                        return SessionEnd::Error(
                            RealtimeError::Transport("heartbeat timed out".into()));
                    }
                },
            }
        }
    }

    /// Returns `Some` only for frames that end the session; a single
    /// malformed frame is logged and dropped without affecting the rest.
    fn handle_text_frame(&self, text: &str) -> Option<SessionEnd> {
        match Frame::parse(text) {
            Ok(Frame::Message {
                destination, body, ..
            }) => {
                let handler = self
                    .frame_handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(handler) = handler {
                    handler(InboundFrame { destination, body });
                }
                None
            }
            Ok(Frame::Error { message, body }) => {
                tracing::error!(%message, %body, "broker reported error");
                Some(SessionEnd::Error(RealtimeError::Transport(message)))
            }
            Ok(Frame::Heartbeat) | Ok(Frame::Connected { .. }) => None,
            Ok(other) => {
                tracing::warn!(frame = ?other, "unexpected frame from broker, dropping");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable frame");
                None
            }
        }
    }
}

impl OutboundPublisher for TransportConnection {
    /// Fire-and-forget: logs and drops when not connected, never errors.
    fn publish(&self, destination: &str, payload: &serde_json::Value) {
        if self.state() != ConnectionState::Connected {
            tracing::warn!(%destination, "publish while disconnected, dropping frame");
            return;
        }
        let body = payload.to_string();
        self.send_command(Command::Send {
            destination: destination.to_string(),
            body,
        });
    }
}

fn host_of(ws_url: &str) -> String {
    let without_scheme = ws_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(ws_url);
    let authority = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme);
    let host = authority.split(':').next().unwrap_or(authority);
    if host.is_empty() {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}
