#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket reached Open. `generation` counts successful opens and
    /// lets subscribers tell one connection from the next.
    Open { generation: u64 },
    Error { message: String },
    Close { code: Option<u16>, reason: String },
}

impl ConnectionEvent {
    pub fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Open { .. } => ConnectionEventKind::Open,
            ConnectionEvent::Error { .. } => ConnectionEventKind::Error,
            ConnectionEvent::Close { .. } => ConnectionEventKind::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Open,
    Error,
    Close,
}

pub type ConnectionListener = dyn Fn(&ConnectionEvent) + Send + Sync;
