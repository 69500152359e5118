use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::CdpError;
use super::types::{CdpCommand, CdpEvent, MessageKind, RawCdpMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command sent from a client handle to the transport task.
pub enum TransportCommand {
    /// Send a CDP command and deliver the response via the oneshot channel.
    SendCommand {
        command: CdpCommand,
        response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
        deadline: Instant,
    },
    /// Subscribe to events matching a method name.
    Subscribe {
        method: String,
        event_tx: mpsc::Sender<CdpEvent>,
    },
    /// Subscribe to reconnect lifecycle notifications.
    WatchReconnects {
        event_tx: mpsc::Sender<ReconnectEvent>,
    },
    /// Shut down the transport gracefully.
    Shutdown,
}

/// Reconnect lifecycle notification delivered to watchers.
#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    /// The transport re-established the WebSocket connection. Subscribers
    /// must re-enable any CDP domains they rely on.
    Reconnected {
        /// Which attempt succeeded (1-based).
        attempt: u32,
    },
    /// Reconnection was exhausted (or disabled); the connection is gone
    /// for good.
    Gone {
        attempts: u32,
        last_error: String,
    },
}

/// Tracks an in-flight command awaiting its response.
struct PendingRequest {
    response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
    method: String,
    deadline: Instant,
}

/// Settings for the initial connection attempt sequence.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Per-attempt handshake timeout (default: 10s).
    pub timeout: Duration,
    /// Total attempts before giving up (default: 3).
    pub max_attempts: u32,
    /// Backoff cap between attempts (default: 5s). Delay doubles from
    /// 1s up to this cap.
    pub max_backoff: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// WebSocket keepalive settings.
///
/// The transport pings Chrome on the interval; after `max_missed`
/// consecutive pings without a pong the socket is closed with code 1001.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Ping interval (default: 30s).
    pub interval: Duration,
    /// Unanswered pings tolerated before closing (default: 3).
    pub max_missed: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed: 3,
        }
    }
}

/// Reconnection settings applied after an unintentional disconnect.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all (default: false).
    pub enabled: bool,
    /// Maximum reconnection attempts (default: 5).
    pub max_retries: u32,
    /// First backoff delay (default: 1s). Doubles per attempt.
    pub initial_backoff: Duration,
    /// Backoff cap (default: 10s).
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Clonable handle for communicating with the transport task.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    command_tx: mpsc::Sender<TransportCommand>,
    connected: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl TransportHandle {
    /// Send a transport command to the background task.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task has exited.
    pub async fn send(&self, cmd: TransportCommand) -> Result<(), CdpError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| CdpError::Internal("transport task is not running".into()))
    }

    /// Check whether the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Generate the next message ID for this connection.
    pub fn next_message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Spawn the transport background task, retrying the initial connection
/// with exponential backoff.
///
/// # Errors
///
/// Returns `CdpError::ConnectExhausted` after all attempts fail, carrying
/// the last attempt's error.
pub async fn spawn_transport(
    url: &str,
    channel_capacity: usize,
    connect: ConnectConfig,
    keepalive: KeepaliveConfig,
    reconnect: ReconnectConfig,
) -> Result<TransportHandle, CdpError> {
    let mut backoff = Duration::from_secs(1);
    let mut last_error = String::from("no attempts configured");
    let mut stream = None;

    for attempt in 1..=connect.max_attempts.max(1) {
        match connect_ws(url, connect.timeout).await {
            Ok(ws) => {
                stream = Some(ws);
                break;
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < connect.max_attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(connect.max_backoff);
                }
            }
        }
    }

    let Some(ws_stream) = stream else {
        return Err(CdpError::ConnectExhausted {
            attempts: connect.max_attempts.max(1),
            last_error,
        });
    };

    let connected = Arc::new(AtomicBool::new(true));
    let next_id = Arc::new(AtomicU64::new(1));
    let (command_tx, command_rx) = mpsc::channel(channel_capacity);

    let handle = TransportHandle {
        command_tx,
        connected: Arc::clone(&connected),
        next_id,
    };

    let url_owned = url.to_owned();
    tokio::spawn(async move {
        let mut task = TransportTask {
            ws_stream,
            command_rx,
            pending: HashMap::new(),
            subscribers: HashMap::new(),
            reconnect_watchers: Vec::new(),
            connected,
            url: url_owned,
            connect_timeout: connect.timeout,
            keepalive,
            reconnect,
            missed_pongs: 0,
            connection_lost: None,
        };
        task.run().await;
    });

    Ok(handle)
}

/// Establish a WebSocket connection with a timeout.
async fn connect_ws(url: &str, timeout: Duration) -> Result<WsStream, CdpError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(CdpError::Connection(e.to_string())),
        Err(_) => Err(CdpError::ConnectionTimeout),
    }
}

/// The background transport task that owns the WebSocket connection.
struct TransportTask {
    ws_stream: WsStream,
    command_rx: mpsc::Receiver<TransportCommand>,
    pending: HashMap<u64, PendingRequest>,
    subscribers: HashMap<String, Vec<mpsc::Sender<CdpEvent>>>,
    reconnect_watchers: Vec<mpsc::Sender<ReconnectEvent>>,
    connected: Arc<AtomicBool>,
    url: String,
    connect_timeout: Duration,
    keepalive: KeepaliveConfig,
    reconnect: ReconnectConfig,
    missed_pongs: u32,
    /// Set once the connection is permanently gone; carries (attempts,
    /// last error) for failing subsequent sends.
    connection_lost: Option<(u32, String)>,
}

impl TransportTask {
    async fn run(&mut self) {
        // The first ping goes out immediately; with interval T and three
        // tolerated misses, an unresponsive peer is cut off at 3T.
        let mut ping_timer = tokio::time::interval(self.keepalive.interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Once the connection is permanently gone, drain remaining
            // commands with ReconnectFailed until shutdown.
            if let Some((attempts, ref last_error)) = self.connection_lost {
                match self.command_rx.recv().await {
                    Some(TransportCommand::SendCommand { response_tx, .. }) => {
                        let _ = response_tx.send(Err(CdpError::ReconnectFailed {
                            attempts,
                            last_error: last_error.clone(),
                        }));
                        continue;
                    }
                    Some(
                        TransportCommand::Subscribe { .. } | TransportCommand::WatchReconnects { .. },
                    ) => continue,
                    Some(TransportCommand::Shutdown) | None => return,
                }
            }

            let next_deadline = self.earliest_deadline();
            let timeout_sleep = async {
                if let Some(deadline) = next_deadline {
                    tokio::time::sleep_until(deadline).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                // Branch 1: WebSocket read
                ws_msg = self.ws_stream.next() => {
                    match ws_msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.missed_pongs = 0;
                        }
                        Some(Ok(Message::Close(_)) | Err(_)) | None => {
                            self.handle_disconnect().await;
                            self.missed_pongs = 0;
                            ping_timer.reset();
                        }
                        Some(Ok(_)) => {
                            // Binary, Ping, Frame — ignore
                        }
                    }
                }

                // Branch 2: Command channel
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::SendCommand { command, response_tx, deadline }) => {
                            self.handle_send_command(command, response_tx, deadline).await;
                        }
                        Some(TransportCommand::Subscribe { method, event_tx }) => {
                            self.subscribers.entry(method).or_default().push(event_tx);
                        }
                        Some(TransportCommand::WatchReconnects { event_tx }) => {
                            self.reconnect_watchers.push(event_tx);
                        }
                        Some(TransportCommand::Shutdown) | None => {
                            self.drain_pending();
                            let _ = self.ws_stream.close(None).await;
                            self.connected.store(false, Ordering::Relaxed);
                            return;
                        }
                    }
                }

                // Branch 3: keepalive ping
                _ = ping_timer.tick() => {
                    if self.handle_keepalive_tick().await {
                        self.handle_disconnect().await;
                        self.missed_pongs = 0;
                        ping_timer.reset();
                    }
                }

                // Branch 4: command-timeout sweep
                () = timeout_sleep => {
                    self.sweep_timeouts();
                }
            }
        }
    }

    /// Send a keepalive ping, or give up on the connection when too many
    /// pings have gone unanswered. Returns `true` when the socket was
    /// closed and disconnect handling should run.
    async fn handle_keepalive_tick(&mut self) -> bool {
        if self.missed_pongs >= self.keepalive.max_missed {
            tracing::warn!(
                missed = self.missed_pongs,
                "keepalive failed, closing connection"
            );
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "No pong received".into(),
            };
            let _ = self.ws_stream.close(Some(frame)).await;
            return true;
        }

        self.missed_pongs += 1;
        if let Err(e) = self.ws_stream.send(Message::Ping(Vec::new().into())).await {
            tracing::debug!(error = %e, "keepalive ping failed");
            return true;
        }
        false
    }

    fn handle_text_message(&mut self, text: &str) {
        let raw: RawCdpMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed frames never fail a pending request.
                tracing::debug!(error = %e, "discarding unparseable CDP frame");
                return;
            }
        };

        let Some(kind) = raw.classify() else {
            return;
        };

        match kind {
            MessageKind::Response(response) => {
                // Only the first frame with a given id resolves the pending
                // entry; duplicates find nothing to remove.
                if let Some(pending) = self.pending.remove(&response.id) {
                    let result = match response.result {
                        Ok(value) => Ok(value),
                        Err(proto_err) => Err(CdpError::Protocol {
                            code: proto_err.code,
                            message: proto_err.message,
                        }),
                    };
                    let _ = pending.response_tx.send(result);
                }
            }
            MessageKind::Event(event) => {
                self.dispatch_event(&event);
            }
        }
    }

    fn dispatch_event(&mut self, event: &CdpEvent) {
        if let Some(senders) = self.subscribers.get_mut(&event.method) {
            // Deliver in insertion order; drop senders whose receiver is gone
            senders.retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
            if senders.is_empty() {
                self.subscribers.remove(&event.method);
            }
        }
    }

    async fn handle_send_command(
        &mut self,
        command: CdpCommand,
        response_tx: oneshot::Sender<Result<serde_json::Value, CdpError>>,
        deadline: Instant,
    ) {
        let id = command.id;
        let method = command.method.clone();

        let json = match serde_json::to_string(&command) {
            Ok(j) => j,
            Err(e) => {
                let _ =
                    response_tx.send(Err(CdpError::Internal(format!("serialization error: {e}"))));
                return;
            }
        };

        if let Err(e) = self.ws_stream.send(Message::Text(json.into())).await {
            // A write failure is scoped to this one request; remaining
            // pending requests stay alive until the socket actually closes.
            let _ = response_tx.send(Err(CdpError::Connection(format!(
                "WebSocket write error: {e}"
            ))));
            return;
        }

        self.pending.insert(
            id,
            PendingRequest {
                response_tx,
                method,
                deadline,
            },
        );
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let timed_out: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, _)| id)
            .collect();

        for id in timed_out {
            if let Some(pending) = self.pending.remove(&id) {
                let _ = pending.response_tx.send(Err(CdpError::CommandTimeout {
                    method: pending.method,
                }));
            }
        }
    }

    fn drain_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (_, req) in pending {
            let _ = req.response_tx.send(Err(CdpError::ConnectionClosed));
        }
    }

    fn notify_reconnect_watchers(&mut self, event: &ReconnectEvent) {
        self.reconnect_watchers
            .retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
    }

    async fn handle_disconnect(&mut self) {
        self.connected.store(false, Ordering::Relaxed);
        self.drain_pending();

        if !self.reconnect.enabled {
            let event = ReconnectEvent::Gone {
                attempts: 0,
                last_error: "reconnection disabled".into(),
            };
            self.notify_reconnect_watchers(&event);
            self.connection_lost = Some((0, "reconnection disabled".into()));
            return;
        }

        let mut backoff = self.reconnect.initial_backoff;
        let mut last_error_msg = String::from("no retries configured");

        for attempt in 1..=self.reconnect.max_retries {
            tokio::time::sleep(backoff).await;

            match connect_ws(&self.url, self.connect_timeout).await {
                Ok(new_stream) => {
                    tracing::info!(attempt, "CDP connection re-established");
                    self.ws_stream = new_stream;
                    self.connected.store(true, Ordering::Relaxed);
                    let event = ReconnectEvent::Reconnected { attempt };
                    self.notify_reconnect_watchers(&event);
                    return;
                }
                Err(e) => {
                    last_error_msg = e.to_string();
                    if attempt < self.reconnect.max_retries {
                        backoff = (backoff * 2).min(self.reconnect.max_backoff);
                    }
                }
            }
        }

        tracing::warn!(
            attempts = self.reconnect.max_retries,
            last_error = %last_error_msg,
            "CDP reconnection exhausted"
        );
        let event = ReconnectEvent::Gone {
            attempts: self.reconnect.max_retries,
            last_error: last_error_msg.clone(),
        };
        self.notify_reconnect_watchers(&event);
        self.connection_lost = Some((self.reconnect.max_retries, last_error_msg));
    }
}
