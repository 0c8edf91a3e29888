use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use watch_proto::{parse_resource_version, Channel};

/// Highest resourceVersion observed per resource kind.
///
/// Values only move forward: a candidate that is lower than, equal to, or not
/// parseable as the tracked value leaves it untouched.
#[derive(Debug, Default)]
pub struct ResourceVersionTracker {
    versions: DashMap<Channel, u64>,
}

impl ResourceVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the tracked value moved.
    pub fn advance(&self, kind: Channel, candidate: &str) -> bool {
        let Some(candidate) = parse_resource_version(candidate) else {
            return false;
        };
        match self.versions.entry(kind) {
            Entry::Occupied(mut entry) => {
                if candidate > *entry.get() {
                    entry.insert(candidate);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(candidate);
                true
            }
        }
    }

    pub fn get(&self, kind: Channel) -> Option<u64> {
        self.versions.get(&kind).map(|entry| *entry.value())
    }

    pub fn latest(&self, kind: Channel, fallback: &str) -> String {
        self.get(kind)
            .map(|version| version.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn falls_back_until_something_is_tracked() {
        let tracker = ResourceVersionTracker::new();
        assert_eq!(tracker.latest(Channel::Pod, "0"), "0");
        assert!(tracker.advance(Channel::Pod, "5"));
        assert_eq!(tracker.latest(Channel::Pod, "0"), "5");
        assert_eq!(tracker.latest(Channel::Event, "0"), "0");
    }

    #[test]
    fn never_regresses_on_out_of_order_candidates() {
        let tracker = ResourceVersionTracker::new();
        let mut observed = Vec::new();
        for candidate in ["7", "3", "12", "12", "9", "not-a-number", "", "15", "1"] {
            tracker.advance(Channel::DevWorkspace, candidate);
            observed.push(tracker.get(Channel::DevWorkspace).unwrap());
        }
        assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(tracker.latest(Channel::DevWorkspace, "0"), "15");
    }

    #[test]
    fn unparseable_candidate_is_a_noop() {
        let tracker = ResourceVersionTracker::new();
        assert!(!tracker.advance(Channel::Event, "abc"));
        assert_eq!(tracker.get(Channel::Event), None);
    }

    #[test]
    fn concurrent_advances_keep_the_maximum() {
        let tracker = Arc::new(ResourceVersionTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for n in 0..500u64 {
                        tracker.advance(Channel::Pod, &(n * 8 + worker).to_string());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.get(Channel::Pod), Some(499 * 8 + 7));
    }
}
