use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    ConnectionEvent, ConnectionEventKind, ConnectionListener, ConnectionState, ListenerRegistry,
    ListenerToken, TransportConfig, TransportError, TransportResult,
};

/// Raw text frames received from the socket, in arrival order.
pub type FrameReceiver = mpsc::UnboundedReceiver<String>;

const NORMAL_CLOSURE: u16 = 1000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    frames: mpsc::UnboundedSender<String>,
    listeners: ListenerRegistry<ConnectionEventKind, ConnectionListener>,
    last_event: Mutex<Option<ConnectionEvent>>,
    terminal: Mutex<Option<TransportError>>,
    driver: Mutex<Option<Driver>>,
}

struct Driver {
    shutdown: watch::Sender<Option<u16>>,
    handle: JoinHandle<()>,
}

struct CloseInfo {
    code: Option<u16>,
    reason: String,
    requested: bool,
}

impl Transport {
    /// Builds an idle transport. Nothing is dialled until [`Transport::connect`].
    pub fn new(config: TransportConfig) -> (Self, FrameReceiver) {
        let (frames, frame_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let transport = Self {
            inner: Arc::new(Inner {
                config,
                state,
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                frames,
                listeners: ListenerRegistry::new(),
                last_event: Mutex::new(None),
                terminal: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        };
        (transport, frame_rx)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of times the socket has reached Open.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Starts the reconnect driver if it is not running and waits for Open.
    pub async fn connect(&self) -> TransportResult<()> {
        {
            let mut driver = self.inner.driver.lock();
            let running = driver
                .as_ref()
                .map(|d| !d.handle.is_finished())
                .unwrap_or(false);
            if !running {
                self.inner.terminal.lock().take();
                let (shutdown, shutdown_rx) = watch::channel(None);
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(async move {
                    drive(inner, shutdown_rx).await;
                });
                *driver = Some(Driver { shutdown, handle });
            }
        }
        self.wait_open().await
    }

    /// Resolves once the socket is Open, or with the reason the transport
    /// gave up.
    pub async fn wait_open(&self) -> TransportResult<()> {
        let mut state = self.inner.state.subscribe();
        loop {
            if *state.borrow_and_update() == ConnectionState::Open {
                return Ok(());
            }
            if let Some(err) = self.inner.terminal.lock().clone() {
                return Err(err);
            }
            if state.changed().await.is_err() {
                return Err(TransportError::Closed);
            }
        }
    }

    /// Closes the socket with `code` (1000 when absent) and stops reconnecting.
    pub async fn disconnect(&self, code: Option<u16>) {
        let driver = self.inner.driver.lock().take();
        *self.inner.terminal.lock() = Some(TransportError::Closed);
        let Some(driver) = driver else {
            self.inner.set_state(ConnectionState::Disconnected);
            return;
        };
        driver.shutdown.send_replace(Some(code.unwrap_or(NORMAL_CLOSURE)));
        if let Err(err) = driver.handle.await {
            warn!(target = "watch.transport", error = %err, "transport driver ended abnormally");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Queues one text frame. Fails unless the connection is Open.
    pub fn send(&self, text: impl Into<String>) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let guard = self.inner.outbound.lock();
        let sender = guard.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(text.into())
            .map_err(|_| TransportError::NotConnected)
    }

    /// Registers a lifecycle listener. With `replay_last`, the listener is
    /// immediately called with the most recent event when its kind matches.
    pub fn add_connection_listener(
        &self,
        kind: ConnectionEventKind,
        listener: Arc<ConnectionListener>,
        replay_last: bool,
    ) -> ListenerToken {
        let token = self.inner.listeners.register(kind, Arc::clone(&listener));
        if replay_last {
            let last = self.inner.last_event.lock().clone();
            if let Some(event) = last.filter(|event| event.kind() == kind) {
                listener(&event);
            }
        }
        token
    }

    pub fn remove_connection_listener(&self, token: ListenerToken) -> bool {
        self.inner.listeners.unregister(token)
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        debug!(target = "watch.transport", event = ?event, "connection event");
        *self.last_event.lock() = Some(event.clone());
        for listener in self.listeners.handlers(&event.kind()) {
            listener(&event);
        }
    }
}

async fn drive(inner: Arc<Inner>, mut shutdown: watch::Receiver<Option<u16>>) {
    let url = inner.config.url.to_string();
    let mut attempts: u32 = 0;

    loop {
        if shutdown.borrow().is_some() {
            break;
        }
        inner.set_state(ConnectionState::Connecting);
        attempts += 1;
        counter!("watch_transport_connect_attempts_total", 1);

        let attempt = tokio::select! {
            result = timeout(inner.config.connect_timeout, connect_async(url.as_str())) => result,
            _ = shutdown.changed() => break,
        };

        match attempt {
            Ok(Ok((socket, _response))) => {
                attempts = 0;
                let close = run_connection(&inner, socket, &mut shutdown).await;
                if close.requested {
                    break;
                }
                info!(
                    target = "watch.transport",
                    url = %url,
                    code = ?close.code,
                    reason = %close.reason,
                    "websocket closed unexpectedly; scheduling reconnect"
                );
            }
            Ok(Err(err)) => {
                warn!(target = "watch.transport", url = %url, attempt = attempts, error = %err, "websocket connect failed");
                inner.emit(ConnectionEvent::Error {
                    message: err.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    target = "watch.transport",
                    url = %url,
                    attempt = attempts,
                    timeout_ms = inner.config.connect_timeout.as_millis() as u64,
                    "websocket connect timed out"
                );
                inner.emit(ConnectionEvent::Error {
                    message: format!(
                        "connection attempt timed out after {:?}",
                        inner.config.connect_timeout
                    ),
                });
            }
        }

        inner.set_state(ConnectionState::Disconnected);
        if let Some(max) = inner.config.max_connect_attempts {
            if attempts >= max {
                warn!(target = "watch.transport", url = %url, attempts, "giving up on websocket");
                *inner.terminal.lock() = Some(TransportError::ConnectFailed { attempts });
                // wake wait_open callers so they observe the terminal error
                inner.set_state(ConnectionState::Disconnected);
                break;
            }
        }

        tokio::select! {
            _ = sleep(inner.config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    inner.outbound.lock().take();
    inner.set_state(ConnectionState::Disconnected);
}

async fn run_connection(
    inner: &Arc<Inner>,
    socket: Socket,
    shutdown: &mut watch::Receiver<Option<u16>>,
) -> CloseInfo {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    *inner.outbound.lock() = Some(out_tx);

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    inner.set_state(ConnectionState::Open);
    info!(target = "watch.transport", generation, "websocket open");
    inner.emit(ConnectionEvent::Open { generation });

    let close = loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(text) = outgoing else { continue };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    inner.emit(ConnectionEvent::Error { message: err.to_string() });
                    break CloseInfo { code: None, reason: err.to_string(), requested: false };
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => forward(inner, text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => forward(inner, text),
                    Err(err) => {
                        warn!(target = "watch.transport", error = %err, "dropping non-utf8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    break CloseInfo { code, reason, requested: false };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    inner.emit(ConnectionEvent::Error { message: err.to_string() });
                    break CloseInfo { code: None, reason: err.to_string(), requested: false };
                }
                None => {
                    break CloseInfo { code: None, reason: "stream ended".into(), requested: false };
                }
            },
            _ = shutdown.changed() => {
                let code = shutdown.borrow().unwrap_or(NORMAL_CLOSURE);
                inner.set_state(ConnectionState::Closing);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: "client disconnect".into(),
                };
                if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                    debug!(target = "watch.transport", error = %err, "close frame not delivered");
                }
                break CloseInfo { code: Some(code), reason: "client disconnect".into(), requested: true };
            }
        }
    };

    inner.outbound.lock().take();
    inner.set_state(ConnectionState::Disconnected);
    inner.emit(ConnectionEvent::Close {
        code: close.code,
        reason: close.reason.clone(),
    });
    close
}

fn forward(inner: &Inner, text: String) {
    counter!("watch_transport_frames_received_total", 1);
    if inner.frames.send(text).is_err() {
        debug!(target = "watch.transport", "frame receiver dropped; discarding frame");
    }
}
