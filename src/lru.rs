//! Fixed-capacity least-recently-used cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Map that evicts its least recently used entry once `capacity` is reached.
///
/// Entries live in a slab and are chained most-recent first; the index maps
/// keys to slab slots. Not synchronized: wrap it in a `Mutex` to share it.
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            index: HashMap::with_capacity(capacity.get()),
            slots: Vec::with_capacity(capacity.get()),
            free: vec![],
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or updates `key` and marks it most recently used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.node_mut(slot).value = value;
            self.promote(slot);
            return None;
        }

        let evicted = if self.len() >= self.capacity.get() {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.push_front(slot);
        self.index.insert(key, slot);
        evicted
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        Some(&self.node(slot).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        Some(&mut self.node_mut(slot).value)
    }

    /// Looks up `key` without changing its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        Some(&self.node(slot).value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.slots[slot].take().map(|node| node.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        self.unlink(slot);
        self.free.push(slot);
        let node = self.slots[slot].take()?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn node(&self, slot: usize) -> &Node<K, V> {
        self.slots[slot].as_ref().expect("indexed slot is occupied")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        self.slots[slot].as_mut().expect("indexed slot is occupied")
    }

    fn promote(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(head) => self.node_mut(head).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> LruCache<String, i32> {
        LruCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut lru = cache(2);
        assert_eq!(lru.put("a".into(), 1), None);
        assert_eq!(lru.put("b".into(), 2), None);
        assert_eq!(lru.get(&"a".into()), Some(&1));

        assert_eq!(lru.put("c".into(), 3), Some(("b".into(), 2)));
        assert!(!lru.contains(&"b".into()));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn update_refreshes_recency_without_growing() {
        let mut lru = cache(2);
        lru.put("a".into(), 1);
        lru.put("b".into(), 2);
        assert_eq!(lru.put("a".into(), 10), None);
        assert_eq!(lru.len(), 2);

        assert_eq!(lru.put("c".into(), 3), Some(("b".into(), 2)));
        assert_eq!(lru.peek(&"a".into()), Some(&10));
    }

    #[test]
    fn peek_does_not_promote() {
        let mut lru = cache(2);
        lru.put("a".into(), 1);
        lru.put("b".into(), 2);
        assert_eq!(lru.peek(&"a".into()), Some(&1));
        assert_eq!(lru.put("c".into(), 3), Some(("a".into(), 1)));
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let mut lru = cache(3);
        lru.put("a".into(), 1);
        lru.put("b".into(), 2);
        assert_eq!(lru.remove(&"a".into()), Some(1));
        assert_eq!(lru.remove(&"a".into()), None);
        lru.put("c".into(), 3);
        lru.put("d".into(), 4);
        assert_eq!(lru.len(), 3);

        if let Some(v) = lru.get_mut(&"b".into()) {
            *v = 20;
        }
        assert_eq!(lru.pop_lru(), Some(("c".into(), 3)));
        assert_eq!(lru.pop_lru(), Some(("d".into(), 4)));
        assert_eq!(lru.pop_lru(), Some(("b".into(), 20)));
        assert!(lru.is_empty());
        assert_eq!(lru.pop_lru(), None);
    }

    #[test]
    fn capacity_one_and_clear() {
        let mut lru = cache(1);
        lru.put("a".into(), 1);
        assert_eq!(lru.put("b".into(), 2), Some(("a".into(), 1)));
        assert_eq!(lru.capacity(), 1);
        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.get(&"b".into()), None);
        lru.put("c".into(), 3);
        assert_eq!(lru.peek(&"c".into()), Some(&3));
    }
}
