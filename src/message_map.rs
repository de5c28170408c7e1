use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::ticket::TicketKey;

/// Default capacity for the correlation map. Old entries are dropped FIFO
/// once the map is full; edit/delete of a dropped source degrades to a no-op.
pub const DEFAULT_MAX_ENTRIES: usize = 2048;

/// Where a forwarded copy of a source message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedRef {
    pub channel_id: String,
    pub message_id: String,
    pub key: TicketKey,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, ForwardedRef>,
    order: VecDeque<String>,
}

/// Bounded map from source message id to its forwarded copy, supporting
/// edit/delete propagation in either relay direction. Entries for a ticket
/// are evicted when the ticket closes.
#[derive(Debug)]
pub struct MessageMap {
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl Default for MessageMap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl MessageMap {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn insert(&self, source_message_id: &str, forwarded: ForwardedRef) {
        let mut inner = self.inner.lock();

        if inner.entries.insert(source_message_id.to_string(), forwarded).is_none() {
            inner.order.push_back(source_message_id.to_string());
        }

        while inner.entries.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }

        debug_assert!(
            inner.entries.len() <= inner.order.len(),
            "MessageMap: entry without an order slot"
        );
    }

    pub fn get(&self, source_message_id: &str) -> Option<ForwardedRef> {
        self.inner.lock().entries.get(source_message_id).cloned()
    }

    /// Drop all correlations belonging to one ticket. Returns how many were
    /// removed.
    pub fn evict_ticket(&self, key: &TicketKey) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, forwarded)| &forwarded.key == key)
            .map(|(source, _)| source.clone())
            .collect();
        for source in &doomed {
            inner.entries.remove(source);
        }
        let Inner { entries, order } = &mut *inner;
        order.retain(|source| entries.contains_key(source));
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(channel: &str, message: &str, key: &TicketKey) -> ForwardedRef {
        ForwardedRef {
            channel_id: channel.into(),
            message_id: message.into(),
            key: key.clone(),
        }
    }

    #[test]
    fn lookup_returns_inserted_entry() {
        let map = MessageMap::default();
        let key = TicketKey::new("g", "u");
        map.insert("src-1", forwarded("chan-1", "fwd-1", &key));

        let hit = map.get("src-1").unwrap();
        assert_eq!(hit.message_id, "fwd-1");
        assert_eq!(hit.channel_id, "chan-1");
    }

    #[test]
    fn missing_entry_is_none() {
        let map = MessageMap::default();
        assert!(map.get("nope").is_none());
    }

    #[test]
    fn reinsert_replaces_without_growing_order() {
        let map = MessageMap::new(4);
        let key = TicketKey::new("g", "u");
        map.insert("src-1", forwarded("chan-1", "fwd-1", &key));
        map.insert("src-1", forwarded("chan-1", "fwd-2", &key));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("src-1").unwrap().message_id, "fwd-2");
    }

    #[test]
    fn remains_bounded_fifo() {
        let map = MessageMap::new(2);
        let key = TicketKey::new("g", "u");
        map.insert("a", forwarded("c", "1", &key));
        map.insert("b", forwarded("c", "2", &key));
        map.insert("c", forwarded("c", "3", &key));

        assert_eq!(map.len(), 2);
        assert!(map.get("a").is_none());
        assert!(map.get("b").is_some());
        assert!(map.get("c").is_some());
    }

    #[test]
    fn evict_ticket_removes_only_that_ticket() {
        let map = MessageMap::default();
        let key_a = TicketKey::new("g", "alice");
        let key_b = TicketKey::new("g", "bob");
        map.insert("a1", forwarded("chan-a", "1", &key_a));
        map.insert("a2", forwarded("chan-a", "2", &key_a));
        map.insert("b1", forwarded("chan-b", "1", &key_b));

        assert_eq!(map.evict_ticket(&key_a), 2);
        assert!(map.get("a1").is_none());
        assert!(map.get("a2").is_none());
        assert_eq!(map.get("b1").unwrap().message_id, "1");
    }

    #[test]
    fn eviction_keeps_bound_accounting_consistent() {
        let map = MessageMap::new(2);
        let key_a = TicketKey::new("g", "alice");
        let key_b = TicketKey::new("g", "bob");
        map.insert("a1", forwarded("chan-a", "1", &key_a));
        map.insert("b1", forwarded("chan-b", "1", &key_b));
        map.evict_ticket(&key_a);

        map.insert("b2", forwarded("chan-b", "2", &key_b));
        map.insert("b3", forwarded("chan-b", "3", &key_b));
        assert_eq!(map.len(), 2);
        assert!(map.get("b1").is_none());
    }
}
