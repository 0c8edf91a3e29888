#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use watch_proto::{ClientFrame, Notification, Resource, ResourceList, ServerEnvelope};
use watch_sync::{
    FixedNamespace, ListError, ListOperation, SessionConfig, SyncUpdate, WatchSession,
};
use watch_transport::TransportConfig;

pub const TOKEN: &str = "t0k3n";
pub const NAMESPACE: &str = "user-ns";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct BackendState {
    received: mpsc::UnboundedSender<ClientFrame>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>,
    connections: Arc<AtomicUsize>,
}

/// Websocket backend that records client frames and lets tests push
/// envelopes or drop the connection.
pub struct Backend {
    pub addr: SocketAddr,
    state: BackendState,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: BackendState) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.current.lock().unwrap() = Some(tx);
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(frame) = ClientFrame::from_text(&text) {
                        let _ = state.received.send(frame);
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, WsMessage::Close(_));
                    if socket.send(message).await.is_err() || closing {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

impl Backend {
    pub async fn spawn() -> Self {
        let (received, frames) = mpsc::unbounded_channel();
        let state = BackendState {
            received,
            current: Arc::new(Mutex::new(None)),
            connections: Arc::new(AtomicUsize::new(0)),
        };
        let router = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Self {
            addr,
            state,
            frames,
        }
    }

    pub fn session(&self) -> WatchSession {
        let transport = TransportConfig::parse(&format!("ws://{}/ws", self.addr))
            .expect("url")
            .with_reconnect_delay(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(2));
        WatchSession::new(SessionConfig {
            transport,
            token: Some(TOKEN.into()),
            namespace: Arc::new(FixedNamespace(NAMESPACE.into())),
        })
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn push_raw(&self, text: String) {
        let current = self.state.current.lock().unwrap();
        current
            .as_ref()
            .expect("no client connected")
            .send(WsMessage::Text(text))
            .expect("connection task gone");
    }

    pub fn push<R: Resource>(&self, notification: Notification<R>) {
        let message = notification.to_value().expect("encode notification");
        let envelope = ServerEnvelope::new(R::CHANNEL, message);
        self.push_raw(envelope.to_text().expect("encode envelope"));
    }

    /// Closes the current connection from the server side.
    pub fn kick(&self) {
        if let Some(tx) = self.state.current.lock().unwrap().take() {
            let _ = tx.send(WsMessage::Close(None));
        }
    }

    pub async fn next_frame(&mut self) -> ClientFrame {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("backend stopped")
    }

    /// Asserts no client frame arrives within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        tokio::time::sleep(window).await;
        if let Ok(frame) = self.frames.try_recv() {
            panic!("unexpected client frame: {frame:?}");
        }
    }
}

struct Scripted<R> {
    gate: Option<Arc<Notify>>,
    response: Result<ResourceList<R>, ListError>,
}

/// List operation that replays queued responses, optionally held until a
/// gate is opened.
pub struct ScriptedLister<R> {
    responses: Mutex<VecDeque<Scripted<R>>>,
    calls: AtomicUsize,
}

impl<R> ScriptedLister<R> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond(&self, items: Vec<R>, resource_version: &str) {
        self.queue(None, Ok(ResourceList::new(items, resource_version)));
    }

    pub fn fail(&self, error: ListError) {
        self.queue(None, Err(error));
    }

    /// Queues a response that is only released once the returned gate is
    /// notified.
    pub fn respond_gated(&self, items: Vec<R>, resource_version: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.queue(
            Some(gate.clone()),
            Ok(ResourceList::new(items, resource_version)),
        );
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, expected: usize) {
        timeout(WAIT, async {
            while self.calls() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("list was not called");
    }

    fn queue(&self, gate: Option<Arc<Notify>>, response: Result<ResourceList<R>, ListError>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted { gate, response });
    }
}

#[async_trait]
impl<R: Resource> ListOperation<R> for ScriptedLister<R> {
    async fn list(&self, namespace: &str) -> Result<ResourceList<R>, ListError> {
        assert_eq!(namespace, NAMESPACE);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.responses.lock().unwrap().pop_front();
        let Some(scripted) = scripted else {
            return Err(ListError::Request("no scripted response".into()));
        };
        if let Some(gate) = scripted.gate {
            gate.notified().await;
        }
        scripted.response
    }
}

pub async fn next_update<R>(updates: &mut mpsc::UnboundedReceiver<SyncUpdate<R>>) -> SyncUpdate<R> {
    timeout(WAIT, updates.recv())
        .await
        .expect("timed out waiting for a sync update")
        .expect("sink dropped")
}

pub async fn next_snapshot<R>(updates: &mut mpsc::UnboundedReceiver<SyncUpdate<R>>) -> Arc<Vec<R>> {
    match next_update(updates).await {
        SyncUpdate::Snapshot(snapshot) => snapshot,
        SyncUpdate::Failed(message) => panic!("expected snapshot, got failure: {message}"),
    }
}

pub async fn connect(session: &WatchSession) {
    timeout(WAIT, session.connect())
        .await
        .expect("connect timed out")
        .expect("connect");
}
