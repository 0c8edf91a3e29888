use std::marker::PhantomData;
use std::sync::Arc;

use metrics::gauge;
use tracing::{debug, error, info};
use watch_proto::Resource;
use watch_sync::NotificationSink;

/// Reports snapshot sizes as logs and a per-channel gauge.
pub struct LoggingSink<R> {
    namespace: String,
    _kind: PhantomData<fn() -> R>,
}

impl<R> LoggingSink<R> {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            _kind: PhantomData,
        }
    }
}

impl<R: Resource> NotificationSink<R> for LoggingSink<R> {
    fn snapshot_changed(&self, snapshot: Arc<Vec<R>>) {
        gauge!(
            "dashboard_watch_snapshot_items",
            snapshot.len() as f64,
            "channel" => R::CHANNEL.as_str()
        );
        info!(
            channel = %R::CHANNEL,
            namespace = %self.namespace,
            items = snapshot.len(),
            "snapshot updated"
        );
        for item in snapshot.iter() {
            debug!(
                channel = %R::CHANNEL,
                key = %item.key(),
                resource_version = item.resource_version().unwrap_or("-"),
                "snapshot entry"
            );
        }
    }

    fn failed(&self, message: &str) {
        error!(channel = %R::CHANNEL, namespace = %self.namespace, error = %message, "synchronizer failed");
    }
}
