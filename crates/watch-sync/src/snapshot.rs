use std::sync::Arc;

use watch_proto::{EventPhase, Resource};

/// Current set of known objects of one kind, at most one per identity.
///
/// The backing vector is shared copy-on-write so handing the snapshot to a
/// sink does not copy it.
#[derive(Debug, Clone)]
pub struct Snapshot<R> {
    items: Arc<Vec<R>>,
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
        }
    }
}

impl<R: Resource> Snapshot<R> {
    pub fn new(items: Vec<R>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    pub fn shared(&self) -> Arc<Vec<R>> {
        Arc::clone(&self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Applies one event notice. Returns `false` when nothing changed, which
    /// only happens when deleting an object that is not present.
    pub fn apply(&mut self, phase: EventPhase, object: R) -> bool {
        let key = object.key();
        let position = self.items.iter().position(|item| item.key() == key);
        match (phase, position) {
            (EventPhase::Added | EventPhase::Modified, Some(index)) => {
                Arc::make_mut(&mut self.items)[index] = object;
                true
            }
            (EventPhase::Added | EventPhase::Modified, None) => {
                Arc::make_mut(&mut self.items).push(object);
                true
            }
            (EventPhase::Deleted, Some(index)) => {
                Arc::make_mut(&mut self.items).remove(index);
                true
            }
            (EventPhase::Deleted, None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use watch_proto::{ObjectMeta, Pod, ResourceKey};

    fn pod(uid: &str, version: &str) -> Pod {
        let mut pod = Pod::new(
            ObjectMeta::named("ns", format!("pod-{uid}"))
                .with_uid(uid)
                .with_resource_version(version),
        );
        pod.status = json!({ "phase": format!("v{version}") });
        pod
    }

    fn keys(snapshot: &Snapshot<Pod>) -> Vec<ResourceKey> {
        snapshot.shared().iter().map(|pod| pod.key()).collect()
    }

    #[test]
    fn added_twice_keeps_one_entry_with_latest_payload() {
        let mut snapshot = Snapshot::default();
        assert!(snapshot.apply(EventPhase::Added, pod("a", "1")));
        assert!(snapshot.apply(EventPhase::Added, pod("a", "2")));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.shared()[0].phase(), Some("v2"));
    }

    #[test]
    fn modified_for_unknown_object_inserts_it() {
        let mut snapshot = Snapshot::new(vec![pod("a", "1")]);
        assert!(snapshot.apply(EventPhase::Modified, pod("b", "2")));
        assert_eq!(
            keys(&snapshot),
            vec![ResourceKey::Uid("a".into()), ResourceKey::Uid("b".into())]
        );
    }

    #[test]
    fn deleting_absent_object_changes_nothing() {
        let mut snapshot = Snapshot::new(vec![pod("a", "1")]);
        let before = snapshot.shared();
        assert!(!snapshot.apply(EventPhase::Deleted, pod("zzz", "2")));
        assert!(Arc::ptr_eq(&before, &snapshot.shared()));
    }

    #[test]
    fn falls_back_to_namespaced_name_without_uid() {
        let mut snapshot = Snapshot::default();
        snapshot.apply(EventPhase::Added, Pod::new(ObjectMeta::named("ns", "web")));
        snapshot.apply(EventPhase::Added, Pod::new(ObjectMeta::named("other", "web")));
        assert_eq!(snapshot.len(), 2);
        snapshot.apply(EventPhase::Deleted, Pod::new(ObjectMeta::named("ns", "web")));
        assert_eq!(
            keys(&snapshot),
            vec![ResourceKey::Name {
                namespace: "other".into(),
                name: "web".into()
            }]
        );
    }

    #[test]
    fn earlier_shared_copies_are_not_mutated() {
        let mut snapshot = Snapshot::new(vec![pod("a", "1")]);
        let handed_out = snapshot.shared();
        snapshot.apply(EventPhase::Deleted, pod("a", "2"));
        assert_eq!(handed_out.len(), 1);
        assert!(snapshot.is_empty());
    }

    /// Every event sequence leaves at most one entry per identity, and the
    /// entry present for a key is the last ADDED/MODIFIED payload seen unless
    /// a later DELETED removed it.
    #[test]
    fn replaying_event_sequences_matches_last_write() {
        let phases = [EventPhase::Added, EventPhase::Modified, EventPhase::Deleted];
        let uids = ["a", "b", "c"];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..200 {
            let mut snapshot = Snapshot::default();
            let mut expected: Vec<(String, Option<String>)> = Vec::new();
            for step in 0..24 {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let phase = phases[(seed % 3) as usize];
                let uid = uids[((seed >> 8) % 3) as usize];
                let version = step.to_string();
                snapshot.apply(phase, pod(uid, &version));

                let slot = expected.iter().position(|(key, _)| key == uid);
                let value = match phase {
                    EventPhase::Deleted => None,
                    _ => Some(version),
                };
                match slot {
                    Some(index) => expected[index].1 = value,
                    None => expected.push((uid.to_string(), value)),
                }
            }

            let items = snapshot.shared();
            for (uid, version) in &expected {
                let matching: Vec<_> = items
                    .iter()
                    .filter(|pod| pod.metadata.uid.as_deref() == Some(uid))
                    .collect();
                match version {
                    Some(version) => {
                        assert_eq!(matching.len(), 1);
                        assert_eq!(matching[0].metadata.resource_version.as_deref(), Some(version.as_str()));
                    }
                    None => assert!(matching.is_empty()),
                }
            }
        }
    }
}
