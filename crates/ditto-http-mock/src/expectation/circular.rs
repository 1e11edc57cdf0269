//! Insertion-ordered map with a fixed capacity that evicts its oldest entry.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct CircularMap<K, V> {
    capacity: usize,
    next_seq: u64,
    entries: HashMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
}

impl<K: Eq + Hash + Clone, V> CircularMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    /// Insert or replace.
    ///
    /// Replacing keeps the key's original position. Inserting a new key into
    /// a full map evicts and returns the oldest entry.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.1 = value;
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, (seq, value));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (seq, value) = self.entries.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    /// Keep only entries for which `keep` returns true; returns the removed values.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> Vec<V> {
        let doomed: Vec<K> = self
            .order
            .values()
            .filter(|k| self.entries.get(*k).is_some_and(|(_, v)| !keep(*k, v)))
            .cloned()
            .collect();
        doomed.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Values from oldest to newest.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order
            .values()
            .filter_map(|k| self.entries.get(k).map(|(_, v)| v))
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let (_, value) = self.entries.remove(&key)?;
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut map = CircularMap::new(2);
        assert!(map.insert("a", 1).is_none());
        assert!(map.insert("b", 2).is_none());
        assert_eq!(map.insert("c", 3), Some(("a", 1)));
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = CircularMap::new(3);
        map.insert("a", 1);
        map.insert("b", 2);
        assert!(map.insert("a", 10).is_none());
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![10, 2]);
        // "a" is still the oldest
        map.insert("c", 3);
        assert_eq!(map.insert("d", 4), Some(("a", 10)));
    }

    #[test]
    fn test_remove_and_retain() {
        let mut map = CircularMap::new(5);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            map.insert(k, v);
        }
        assert_eq!(map.remove(&"b"), Some(2));
        let removed = map.retain(|_, v| v % 2 == 1);
        assert_eq!(removed, vec![4]);
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(map.len(), 2);
        map.clear();
        assert!(map.is_empty());
    }
}
