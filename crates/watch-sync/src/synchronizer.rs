use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use watch_proto::{Channel, EventPhase, Notification, Resource};
use watch_transport::ListenerToken;

use crate::{
    CatchUpFetcher, ListError, ListOperation, MultiplexError, Multiplexer, NotificationSink,
    ResourceVersionSource, ResourceVersionTracker, Snapshot, SubscriptionParams,
};

/// Version sent with a subscribe when nothing has been tracked yet.
const INITIAL_RESOURCE_VERSION: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    CatchingUp,
    Live,
    Resyncing,
    Failed,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list {channel} resources: {source}")]
    List {
        channel: Channel,
        #[source]
        source: ListError,
    },
    #[error("failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: Channel,
        #[source]
        source: MultiplexError,
    },
    #[error("{channel} synchronizer is {phase:?}")]
    InvalidPhase { channel: Channel, phase: SyncPhase },
    #[error("{channel} synchronizer already follows namespace {current:?}")]
    NamespaceMismatch { channel: Channel, current: String },
}

/// Keeps the snapshot of one resource kind in step with the backend.
///
/// Lifecycle: `start` lists the kind and subscribes from the listing's
/// resourceVersion; live notices are then applied in delivery order. A
/// non-success status notice triggers exactly one relist, during which
/// incoming notices are discarded. A failed listing parks the synchronizer
/// in [`SyncPhase::Failed`] until [`ResourceSynchronizer::retry`].
pub struct ResourceSynchronizer<R: Resource> {
    inner: Arc<SyncInner<R>>,
}

impl<R: Resource> Clone for ResourceSynchronizer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SyncInner<R: Resource> {
    multiplexer: Multiplexer,
    tracker: Arc<ResourceVersionTracker>,
    fetcher: CatchUpFetcher<R>,
    sink: Arc<dyn NotificationSink<R>>,
    state: Mutex<SyncState<R>>,
    /// Serializes start, retry and resync so only one listing runs at a time.
    catch_up: tokio::sync::Mutex<()>,
    listener: Mutex<Option<ListenerToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct SyncState<R> {
    phase: SyncPhase,
    namespace: String,
    snapshot: Snapshot<R>,
    /// Bumped whenever a fresh listing is installed; queued notices from an
    /// older epoch are discarded.
    epoch: u64,
}

type Queued<R> = (u64, Notification<R>);

impl<R: Resource> ResourceSynchronizer<R> {
    /// Registers the channel listener and spawns the apply worker. Must be
    /// called from within a tokio runtime.
    pub fn new(
        multiplexer: Multiplexer,
        tracker: Arc<ResourceVersionTracker>,
        operation: Arc<dyn ListOperation<R>>,
        sink: Arc<dyn NotificationSink<R>>,
    ) -> Self {
        let inner = Arc::new(SyncInner {
            multiplexer,
            tracker,
            fetcher: CatchUpFetcher::new(operation),
            sink,
            state: Mutex::new(SyncState {
                phase: SyncPhase::Idle,
                namespace: String::new(),
                snapshot: Snapshot::default(),
                epoch: 0,
            }),
            catch_up: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            worker: Mutex::new(None),
        });

        let (queue, pending) = mpsc::unbounded_channel::<Queued<R>>();
        let weak = Arc::downgrade(&inner);
        let token = inner.multiplexer.add_listener(
            R::CHANNEL,
            Arc::new(move |message: &Value| {
                if let Some(inner) = weak.upgrade() {
                    inner.enqueue(&queue, message);
                }
            }),
        );
        *inner.listener.lock() = Some(token);

        let worker = tokio::spawn(apply_queued(Arc::downgrade(&inner), pending));
        *inner.worker.lock() = Some(worker);

        Self { inner }
    }

    pub fn channel(&self) -> Channel {
        R::CHANNEL
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.state.lock().phase
    }

    pub fn namespace(&self) -> Option<String> {
        let state = self.inner.state.lock();
        (state.phase != SyncPhase::Idle).then(|| state.namespace.clone())
    }

    pub fn current_snapshot(&self) -> Arc<Vec<R>> {
        self.inner.state.lock().snapshot.shared()
    }

    /// Newest resourceVersion tracked for this kind.
    pub fn resource_version(&self) -> String {
        self.inner
            .tracker
            .latest(R::CHANNEL, INITIAL_RESOURCE_VERSION)
    }

    /// Lists the kind in `namespace` and starts following its watch.
    ///
    /// Calling this while already live on the same namespace is a no-op.
    pub async fn start(&self, namespace: impl Into<String>) -> Result<(), SyncError> {
        let namespace = namespace.into();
        let _guard = self.inner.catch_up.lock().await;
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                SyncPhase::Idle | SyncPhase::Failed => {}
                SyncPhase::Live if state.namespace == namespace => return Ok(()),
                SyncPhase::Live => {
                    return Err(SyncError::NamespaceMismatch {
                        channel: R::CHANNEL,
                        current: state.namespace.clone(),
                    })
                }
                phase => {
                    return Err(SyncError::InvalidPhase {
                        channel: R::CHANNEL,
                        phase,
                    })
                }
            }
            state.phase = SyncPhase::CatchingUp;
            state.namespace = namespace.clone();
        }
        info!(target = "watch.sync", channel = %R::CHANNEL, namespace = %namespace, "starting synchronizer");
        self.inner.catch_up(&namespace).await
    }

    /// Relists after a failure.
    pub async fn retry(&self) -> Result<(), SyncError> {
        let _guard = self.inner.catch_up.lock().await;
        let namespace = {
            let mut state = self.inner.state.lock();
            if state.phase != SyncPhase::Failed {
                return Err(SyncError::InvalidPhase {
                    channel: R::CHANNEL,
                    phase: state.phase,
                });
            }
            state.phase = SyncPhase::CatchingUp;
            state.namespace.clone()
        };
        info!(target = "watch.sync", channel = %R::CHANNEL, namespace = %namespace, "retrying synchronizer");
        self.inner.catch_up(&namespace).await
    }

    /// Applies one notice as if it had arrived on the channel.
    pub async fn handle_message(&self, notification: Notification<R>) -> Result<(), SyncError> {
        let epoch = self.inner.state.lock().epoch;
        self.inner.process(epoch, notification).await
    }

    /// Unsubscribes and goes idle. The last snapshot stays readable.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.phase == SyncPhase::Idle {
                return;
            }
            state.phase = SyncPhase::Idle;
            state.epoch += 1;
        }
        self.inner.multiplexer.unsubscribe_from_channel(R::CHANNEL);
        info!(target = "watch.sync", channel = %R::CHANNEL, "synchronizer stopped");
    }
}

impl<R: Resource> SyncInner<R> {
    fn enqueue(&self, queue: &mpsc::UnboundedSender<Queued<R>>, message: &Value) {
        let epoch = {
            let state = self.state.lock();
            if state.phase != SyncPhase::Live {
                debug!(target = "watch.sync", channel = %R::CHANNEL, phase = ?state.phase, "discarding notice outside live phase");
                counter!("watch_sync_notifications_discarded_total", 1, "channel" => R::CHANNEL.as_str());
                return;
            }
            state.epoch
        };
        match Notification::<R>::from_value(message.clone()) {
            Ok(notification) => {
                if queue.send((epoch, notification)).is_err() {
                    debug!(target = "watch.sync", channel = %R::CHANNEL, "apply worker gone; dropping notice");
                }
            }
            Err(err) => {
                warn!(target = "watch.sync", channel = %R::CHANNEL, error = %err, "dropping undecodable notice");
                counter!("watch_sync_notifications_discarded_total", 1, "channel" => R::CHANNEL.as_str());
            }
        }
    }

    async fn process(&self, epoch: u64, notification: Notification<R>) -> Result<(), SyncError> {
        match notification {
            Notification::Event { phase, object } => {
                self.apply(epoch, phase, object);
                Ok(())
            }
            Notification::Status { status, .. } => {
                if status.is_success() {
                    debug!(target = "watch.sync", channel = %R::CHANNEL, code = status.code, "ignoring success status");
                    return Ok(());
                }
                {
                    let state = self.state.lock();
                    if state.phase != SyncPhase::Live || state.epoch != epoch {
                        debug!(target = "watch.sync", channel = %R::CHANNEL, code = status.code, "ignoring status outside live phase");
                        return Ok(());
                    }
                }
                warn!(
                    target = "watch.sync",
                    channel = %R::CHANNEL,
                    code = status.code,
                    message = %status.message,
                    expired = status.is_expired(),
                    "watch reported error; relisting"
                );
                self.resync().await
            }
        }
    }

    fn apply(&self, epoch: u64, phase: EventPhase, object: R) {
        let version = object.resource_version().map(str::to_owned);
        let snapshot = {
            let mut state = self.state.lock();
            if state.phase != SyncPhase::Live || state.epoch != epoch {
                debug!(target = "watch.sync", channel = %R::CHANNEL, "discarding notice from superseded listing");
                return;
            }
            let changed = state.snapshot.apply(phase, object);
            if let Some(version) = version {
                self.tracker.advance(R::CHANNEL, &version);
            }
            if !changed {
                return;
            }
            state.snapshot.shared()
        };
        counter!("watch_sync_notifications_applied_total", 1, "channel" => R::CHANNEL.as_str(), "phase" => phase.as_str());
        self.sink.snapshot_changed(snapshot);
    }

    async fn resync(&self) -> Result<(), SyncError> {
        let _guard = self.catch_up.lock().await;
        let namespace = {
            let mut state = self.state.lock();
            if state.phase != SyncPhase::Live {
                return Ok(());
            }
            state.phase = SyncPhase::Resyncing;
            state.namespace.clone()
        };
        counter!("watch_sync_resyncs_total", 1, "channel" => R::CHANNEL.as_str());
        self.multiplexer.unsubscribe_from_channel(R::CHANNEL);
        self.catch_up(&namespace).await
    }

    /// Lists, installs the listing and (re)subscribes. Callers hold the
    /// catch-up guard and have already moved the phase off Live.
    async fn catch_up(&self, namespace: &str) -> Result<(), SyncError> {
        let listing = match self.fetcher.fetch(namespace).await {
            Ok(listing) => listing,
            Err(source) => {
                let message = format!("failed to fetch {} list: {source}", R::CHANNEL);
                self.fail(&message);
                return Err(SyncError::List {
                    channel: R::CHANNEL,
                    source,
                });
            }
        };

        let snapshot = {
            let mut state = self.state.lock();
            if state.phase == SyncPhase::Idle {
                debug!(target = "watch.sync", channel = %R::CHANNEL, "stopped during listing; discarding it");
                return Ok(());
            }
            state.snapshot = Snapshot::new(listing.items);
            state.phase = SyncPhase::Live;
            state.epoch += 1;
            self.tracker.advance(R::CHANNEL, &listing.resource_version);
            state.snapshot.shared()
        };
        info!(
            target = "watch.sync",
            channel = %R::CHANNEL,
            namespace,
            items = snapshot.len(),
            resource_version = %listing.resource_version,
            "snapshot installed"
        );
        self.sink.snapshot_changed(snapshot);

        let tracker = Arc::clone(&self.tracker);
        let params = SubscriptionParams {
            token: None,
            resource_version: ResourceVersionSource::provider(move || {
                Some(tracker.latest(R::CHANNEL, INITIAL_RESOURCE_VERSION))
            }),
        };
        if let Err(source) = self
            .multiplexer
            .subscribe_to_channel(R::CHANNEL, namespace, params)
            .await
        {
            let message = format!("failed to subscribe to {}: {source}", R::CHANNEL);
            self.fail(&message);
            return Err(SyncError::Subscribe {
                channel: R::CHANNEL,
                source,
            });
        }
        Ok(())
    }

    fn fail(&self, message: &str) {
        {
            let mut state = self.state.lock();
            state.phase = SyncPhase::Failed;
            state.epoch += 1;
        }
        warn!(target = "watch.sync", channel = %R::CHANNEL, error = %message, "synchronizer failed");
        counter!("watch_sync_failures_total", 1, "channel" => R::CHANNEL.as_str());
        self.sink.failed(message);
    }
}

impl<R: Resource> Drop for SyncInner<R> {
    fn drop(&mut self) {
        if let Some(token) = self.listener.get_mut().take() {
            self.multiplexer.remove_listener(token);
        }
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

async fn apply_queued<R: Resource>(inner: Weak<SyncInner<R>>, mut pending: mpsc::UnboundedReceiver<Queued<R>>) {
    while let Some((epoch, notification)) = pending.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(err) = inner.process(epoch, notification).await {
            debug!(target = "watch.sync", channel = %R::CHANNEL, error = %err, "queued notice failed");
        }
    }
}
