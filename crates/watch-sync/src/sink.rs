use std::sync::Arc;

use tokio::sync::mpsc;

/// Consumer of synchronizer output.
pub trait NotificationSink<R>: Send + Sync {
    /// Called after every change to the snapshot with the new full snapshot.
    fn snapshot_changed(&self, snapshot: Arc<Vec<R>>);
    /// Called when the synchronizer enters the failed phase.
    fn failed(&self, message: &str);
}

#[derive(Debug, Clone)]
pub enum SyncUpdate<R> {
    Snapshot(Arc<Vec<R>>),
    Failed(String),
}

impl<R: Send + Sync> NotificationSink<R> for mpsc::UnboundedSender<SyncUpdate<R>> {
    fn snapshot_changed(&self, snapshot: Arc<Vec<R>>) {
        // the receiving side going away just means nobody is watching anymore
        let _ = self.send(SyncUpdate::Snapshot(snapshot));
    }

    fn failed(&self, message: &str) {
        let _ = self.send(SyncUpdate::Failed(message.to_string()));
    }
}
