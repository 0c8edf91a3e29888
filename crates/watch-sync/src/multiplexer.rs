use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watch_proto::{Channel, ClientFrame, ServerEnvelope, SubscribeParams};
use watch_transport::{
    ConnectionEvent, ConnectionEventKind, FrameReceiver, ListenerRegistry, ListenerToken,
    Transport, TransportError,
};

/// Receives the raw `message` of every envelope delivered on a channel.
pub type ChannelHandler = dyn Fn(&Value) + Send + Sync;

/// Computes a resourceVersion at the moment a subscribe frame is written.
pub type VersionProvider = dyn Fn() -> Option<String> + Send + Sync;

#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where a subscription's resourceVersion comes from.
///
/// Providers are evaluated each time the subscribe frame is (re)sent, so a
/// replay after reconnect resumes from the newest version rather than the one
/// known when the subscription was first requested.
#[derive(Clone, Default)]
pub enum ResourceVersionSource {
    #[default]
    Unset,
    Fixed(String),
    Provider(Arc<VersionProvider>),
}

impl ResourceVersionSource {
    pub fn provider(provider: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        ResourceVersionSource::Provider(Arc::new(provider))
    }

    pub fn resolve(&self) -> Option<String> {
        match self {
            ResourceVersionSource::Unset => None,
            ResourceVersionSource::Fixed(version) => Some(version.clone()),
            ResourceVersionSource::Provider(provider) => provider(),
        }
    }
}

impl fmt::Debug for ResourceVersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceVersionSource::Unset => f.write_str("Unset"),
            ResourceVersionSource::Fixed(version) => f.debug_tuple("Fixed").field(version).finish(),
            ResourceVersionSource::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionParams {
    /// Overrides the session token for this subscription.
    pub token: Option<String>,
    pub resource_version: ResourceVersionSource,
}

struct Subscription {
    namespace: String,
    params: SubscriptionParams,
    /// Connection generation the subscribe frame was last written in.
    sent_in: Option<u64>,
}

/// Fans channel-tagged frames out to listeners and keeps the set of active
/// subscriptions, replaying it each time the transport reopens.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    transport: Transport,
    token: Option<String>,
    listeners: ListenerRegistry<Channel, ChannelHandler>,
    subscriptions: Mutex<BTreeMap<Channel, Subscription>>,
    open_listener: Mutex<Option<ListenerToken>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Takes over `frames` and starts dispatching them. Must be called from
    /// within a tokio runtime.
    pub fn new(transport: Transport, frames: FrameReceiver, token: Option<String>) -> Self {
        let inner = Arc::new(MuxInner {
            transport,
            token,
            listeners: ListenerRegistry::new(),
            subscriptions: Mutex::new(BTreeMap::new()),
            open_listener: Mutex::new(None),
            pump: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let on_open = inner.transport.add_connection_listener(
            ConnectionEventKind::Open,
            Arc::new(move |event: &ConnectionEvent| {
                if let (ConnectionEvent::Open { generation }, Some(inner)) = (event, weak.upgrade())
                {
                    inner.replay(*generation);
                }
            }),
            false,
        );
        *inner.open_listener.lock() = Some(on_open);

        let pump = tokio::spawn(pump_frames(Arc::downgrade(&inner), frames));
        *inner.pump.lock() = Some(pump);

        Self { inner }
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Records the subscription and resolves once its subscribe frame has
    /// been written to an open connection.
    ///
    /// A second call for the same channel replaces the first; if the earlier
    /// subscription is live on the current connection an unsubscribe frame
    /// is sent ahead of the new subscribe.
    pub async fn subscribe_to_channel(
        &self,
        channel: Channel,
        namespace: impl Into<String>,
        params: SubscriptionParams,
    ) -> Result<(), MultiplexError> {
        let namespace = namespace.into();
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            let previous = subscriptions.insert(
                channel,
                Subscription {
                    namespace: namespace.clone(),
                    params,
                    sent_in: None,
                },
            );
            if let Some(previous) = previous {
                if previous.sent_in.is_some() && previous.sent_in == self.inner.open_generation() {
                    self.inner.send_frame(&ClientFrame::unsubscribe(channel))?;
                }
            }
            self.inner.flush(&mut subscriptions)?;
        }

        debug!(target = "watch.mux", channel = %channel, namespace = %namespace, "subscription recorded");
        self.inner.transport.wait_open().await?;
        let mut subscriptions = self.inner.subscriptions.lock();
        self.inner.flush(&mut subscriptions)?;
        Ok(())
    }

    /// Forgets the channel's subscription and, when connected, tells the
    /// backend. Returns whether a subscription was recorded. Listeners stay
    /// registered.
    pub fn unsubscribe_from_channel(&self, channel: Channel) -> bool {
        let removed = self.inner.subscriptions.lock().remove(&channel).is_some();
        if self.inner.transport.is_open() {
            if let Err(err) = self.inner.send_frame(&ClientFrame::unsubscribe(channel)) {
                debug!(target = "watch.mux", channel = %channel, error = %err, "unsubscribe not delivered");
            }
        }
        removed
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.inner.subscriptions.lock().contains_key(&channel)
    }

    pub fn add_listener(&self, channel: Channel, handler: Arc<ChannelHandler>) -> ListenerToken {
        self.inner.listeners.register(channel, handler)
    }

    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        self.inner.listeners.unregister(token)
    }

    pub fn has_listener(&self, channel: Channel) -> bool {
        self.inner.listeners.contains_key(&channel)
    }

    /// Routes one inbound frame. Malformed frames and frames for channels
    /// without listeners are logged and dropped.
    pub fn dispatch(&self, frame: &str) {
        self.inner.dispatch(frame);
    }

    /// Stops the frame pump and detaches from the transport.
    pub fn close(&self) {
        if let Some(token) = self.inner.open_listener.lock().take() {
            self.inner.transport.remove_connection_listener(token);
        }
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
    }
}

impl MuxInner {
    fn open_generation(&self) -> Option<u64> {
        self.transport
            .is_open()
            .then(|| self.transport.generation())
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<(), MultiplexError> {
        let text = frame.to_text()?;
        self.transport.send(text)?;
        Ok(())
    }

    /// Writes every subscription not yet sent on the current connection.
    /// Losing the connection midway leaves the rest for the next replay.
    fn flush(&self, subscriptions: &mut BTreeMap<Channel, Subscription>) -> Result<(), MultiplexError> {
        let Some(generation) = self.open_generation() else {
            return Ok(());
        };
        for (channel, subscription) in subscriptions.iter_mut() {
            if subscription.sent_in == Some(generation) {
                continue;
            }
            let frame = ClientFrame::subscribe(
                *channel,
                SubscribeParams {
                    token: subscription
                        .params
                        .token
                        .clone()
                        .or_else(|| self.token.clone()),
                    namespace: subscription.namespace.clone(),
                    resource_version: subscription.params.resource_version.resolve(),
                },
            );
            match self.send_frame(&frame) {
                Ok(()) => {
                    subscription.sent_in = Some(generation);
                    counter!("watch_mux_subscribes_sent_total", 1, "channel" => channel.as_str());
                }
                Err(MultiplexError::Transport(TransportError::NotConnected)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn replay(&self, generation: u64) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.is_empty() {
            return;
        }
        info!(
            target = "watch.mux",
            generation,
            subscriptions = subscriptions.len(),
            "replaying subscriptions"
        );
        if let Err(err) = self.flush(&mut subscriptions) {
            warn!(target = "watch.mux", generation, error = %err, "subscription replay failed");
        }
    }

    fn dispatch(&self, frame: &str) {
        let envelope = match ServerEnvelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target = "watch.mux", error = %err, "dropping malformed frame");
                counter!("watch_mux_frames_dropped_total", 1, "reason" => "malformed");
                return;
            }
        };
        let channel = match envelope.channel() {
            Ok(channel) => channel,
            Err(err) => {
                warn!(target = "watch.mux", error = %err, "dropping frame for unknown channel");
                counter!("watch_mux_frames_dropped_total", 1, "reason" => "unknown_channel");
                return;
            }
        };
        let handlers = self.listeners.handlers(&channel);
        if handlers.is_empty() {
            warn!(target = "watch.mux", channel = %channel, "no listener for channel; dropping frame");
            counter!("watch_mux_frames_dropped_total", 1, "reason" => "no_listener");
            return;
        }
        for handler in handlers {
            handler(&envelope.message);
        }
    }
}

async fn pump_frames(inner: Weak<MuxInner>, mut frames: FrameReceiver) {
    while let Some(frame) = frames.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(&frame);
    }
    debug!(target = "watch.mux", "frame pump stopped");
}
