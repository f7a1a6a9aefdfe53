//! Concurrent insertion-ordered map.
//!
//! [`OrderedMap`] pairs a hash index (key -> slot) with a doubly linked
//! sequence of nodes that records the order in which keys were *first*
//! inserted. Overwriting a value never moves its node; removing a key splices
//! its node out in O(1).
//!
//! # Storage model
//!
//! Nodes live in an arena (`Vec<Option<Node>>`) and link to each other by slot
//! index rather than by pointer, so the structure needs no `unsafe`. Freed
//! slots go on a free list and are reused by later inserts.
//!
//! # Locking
//!
//! The whole structure sits behind a single `parking_lot::RwLock`:
//! [`put`](OrderedMap::put), [`remove`](OrderedMap::remove) and
//! [`clear`](OrderedMap::clear) take the write lock, every read takes the
//! shared lock. Individual operations are linearizable; sequences of them are
//! not atomic with respect to other threads.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Single-threaded core of the map. Every method assumes the caller holds
/// the appropriate side of the outer lock.
struct Chain<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> Chain<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn node(&self, slot: usize) -> Option<&Node<K, V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.node_mut(slot) {
                return Some(std::mem::replace(&mut node.value, value));
            }
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(node);
            slot
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        };

        match self.tail {
            Some(tail) => {
                if let Some(tail) = self.node_mut(tail) {
                    tail.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(key, slot);
        None
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.index.remove(key)?;
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);

        match node.prev {
            Some(prev) => {
                if let Some(prev) = self.node_mut(prev) {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next) = self.node_mut(next) {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        Some(node.value)
    }

    fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|node| &node.value)
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            chain: self,
            cursor: self.head,
        }
    }
}

/// Walks the linked sequence from head to tail.
struct Iter<'a, K, V> {
    chain: &'a Chain<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.chain.node(self.cursor?)?;
        self.cursor = node.next;
        Some((&node.key, &node.value))
    }
}

/// Thread-safe map that iterates in first-insertion order.
///
/// Share it across threads or tasks with `Arc<OrderedMap<K, V>>`; all
/// methods take `&self`.
///
/// # Examples
///
/// ```
/// use queuekv_core::OrderedMap;
///
/// let map = OrderedMap::new();
/// map.put("a".to_string(), 1);
/// map.put("b".to_string(), 2);
/// map.put("a".to_string(), 3);
///
/// assert_eq!(
///     map.snapshot(),
///     vec![("a".to_string(), 3), ("b".to_string(), 2)]
/// );
/// ```
pub struct OrderedMap<K, V> {
    inner: RwLock<Chain<K, V>>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Chain::new()),
        }
    }

    /// Inserts `key` at the tail, or overwrites its value in place if the key
    /// is already present. Returns the previous value, if any.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Removes `key` and returns its value. Absent keys are a no-op.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.write().remove(key)
    }

    /// Returns a clone of the current value for `key`.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.inner.read().get(key).cloned()
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.read().index.contains_key(key)
    }

    /// Copies every entry out in insertion order.
    ///
    /// The returned vector is detached from the map: later mutations do not
    /// show up in it.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        let chain = self.inner.read();
        let mut entries = Vec::with_capacity(chain.index.len());
        entries.extend(chain.iter().map(|(k, v)| (k.clone(), v.clone())));
        entries
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Whether the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Drops every entry and releases the arena.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for OrderedMap<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self.inner.read();
        f.debug_map().entries(chain.iter()).finish()
    }
}
