use std::sync::Arc;

use parking_lot::RwLock;

/// Handle returned by [`ListenerRegistry::register`]; pass it back to
/// unregister exactly that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct Entry<K, H: ?Sized> {
    id: u64,
    key: K,
    handler: Arc<H>,
}

struct Inner<K, H: ?Sized> {
    next_id: u64,
    entries: Vec<Entry<K, H>>,
}

/// Keyed observer registry. Several handlers may share a key; they are
/// returned in registration order and can be removed independently.
pub struct ListenerRegistry<K, H: ?Sized> {
    inner: RwLock<Inner<K, H>>,
}

impl<K, H: ?Sized> Default for ListenerRegistry<K, H> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl<K: PartialEq, H: ?Sized> ListenerRegistry<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: K, handler: Arc<H>) -> ListenerToken {
        let mut guard = self.inner.write();
        guard.next_id += 1;
        let id = guard.next_id;
        guard.entries.push(Entry { id, key, handler });
        ListenerToken(id)
    }

    /// Returns `false` when the token was already removed.
    pub fn unregister(&self, token: ListenerToken) -> bool {
        let mut guard = self.inner.write();
        let before = guard.entries.len();
        guard.entries.retain(|entry| entry.id != token.0);
        guard.entries.len() != before
    }

    /// Handlers for `key`, cloned out so callers can invoke them without
    /// holding the registry lock.
    pub fn handlers(&self, key: &K) -> Vec<Arc<H>> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|entry| &entry.key == key)
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().entries.iter().any(|entry| &entry.key == key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
