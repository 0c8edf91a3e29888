use std::fmt;
use std::sync::Arc;

use tracing::info;
use watch_proto::{Channel, Resource};
use watch_transport::{Transport, TransportConfig, TransportError};

use crate::{
    ListOperation, Multiplexer, NotificationSink, ResourceSynchronizer, ResourceVersionTracker,
    SyncError,
};

/// Supplies the namespace synchronizers follow, looked up when they start.
pub trait NamespaceProvider: Send + Sync {
    fn namespace(&self) -> String;
}

impl<F> NamespaceProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn namespace(&self) -> String {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct FixedNamespace(pub String);

impl NamespaceProvider for FixedNamespace {
    fn namespace(&self) -> String {
        self.0.clone()
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    /// Bearer token injected into every subscribe frame.
    pub token: Option<String>,
    pub namespace: Arc<dyn NamespaceProvider>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("transport", &self.transport)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace.namespace())
            .finish()
    }
}

/// Shared watch services for one dashboard session: one transport, one
/// multiplexer and one resourceVersion tracker, used by every synchronizer
/// created through [`WatchSession::synchronizer`].
pub struct WatchSession {
    transport: Transport,
    multiplexer: Multiplexer,
    tracker: Arc<ResourceVersionTracker>,
    namespace: Arc<dyn NamespaceProvider>,
}

impl WatchSession {
    /// Must be called from within a tokio runtime. Nothing is dialled until
    /// [`WatchSession::connect`].
    pub fn new(config: SessionConfig) -> Self {
        let (transport, frames) = Transport::new(config.transport);
        let multiplexer = Multiplexer::new(transport.clone(), frames, config.token);
        Self {
            transport,
            multiplexer,
            tracker: Arc::new(ResourceVersionTracker::new()),
            namespace: config.namespace,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub fn tracker(&self) -> &Arc<ResourceVersionTracker> {
        &self.tracker
    }

    pub fn namespace(&self) -> String {
        self.namespace.namespace()
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    pub fn synchronizer<R: Resource>(
        &self,
        operation: Arc<dyn ListOperation<R>>,
        sink: Arc<dyn NotificationSink<R>>,
    ) -> ResourceSynchronizer<R> {
        ResourceSynchronizer::new(
            self.multiplexer.clone(),
            Arc::clone(&self.tracker),
            operation,
            sink,
        )
    }

    /// Starts `synchronizer` on the session's current namespace.
    pub async fn start<R: Resource>(
        &self,
        synchronizer: &ResourceSynchronizer<R>,
    ) -> Result<(), SyncError> {
        synchronizer.start(self.namespace()).await
    }

    /// Unsubscribes every channel, closes the socket and stops reconnecting.
    pub async fn shutdown(&self) {
        for channel in Channel::ALL {
            self.multiplexer.unsubscribe_from_channel(channel);
        }
        self.multiplexer.close();
        self.transport.disconnect(None).await;
        info!(target = "watch.session", "watch session closed");
    }
}
