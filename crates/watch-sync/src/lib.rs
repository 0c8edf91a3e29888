//! List + watch synchronization for dashboard resources.
//!
//! A [`WatchSession`] owns the shared services (transport, [`Multiplexer`],
//! [`ResourceVersionTracker`]) and hands them to one [`ResourceSynchronizer`]
//! per resource kind. Each synchronizer lists its kind over REST, subscribes
//! to the kind's channel from the listing's resourceVersion, applies
//! ADDED/MODIFIED/DELETED notices in delivery order, and relists when the
//! backend reports the watch as stale.

mod fetcher;
mod multiplexer;
mod session;
mod sink;
mod snapshot;
mod synchronizer;
mod tracker;

pub use fetcher::{CatchUpFetcher, ListError, ListOperation, Listing};
pub use multiplexer::{
    ChannelHandler, MultiplexError, Multiplexer, ResourceVersionSource, SubscriptionParams,
    VersionProvider,
};
pub use session::{FixedNamespace, NamespaceProvider, SessionConfig, WatchSession};
pub use sink::{NotificationSink, SyncUpdate};
pub use snapshot::Snapshot;
pub use synchronizer::{ResourceSynchronizer, SyncError, SyncPhase};
pub use tracker::ResourceVersionTracker;
