//! FIFO queue keyed by unique ids.
//!
//! Design:
//! - Doubly linked list stored in an index arena (`nodes`), so no `unsafe` and no `Rc`.
//! - `index` maps id -> slot in the arena, which makes `remove(id)` O(1).
//! - Vacant arena slots are recycled through `free`.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::QueueError;

pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct Node<K, V> {
    id: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A FIFO queue supporting enqueue, dequeue, peek and removal by id, all in O(1).
#[derive(Debug, Clone)]
pub struct IdentifiedQueue<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    capacity: usize,
}

impl<K, V> IdentifiedQueue<K, V>
where
    K: Eq + Hash + Clone + ToString,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            len: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: &K) -> bool {
        self.index.contains_key(id)
    }

    /// Append `value` at the tail.
    pub fn enqueue(&mut self, id: K, value: V) -> Result<(), QueueError> {
        if self.index.contains_key(&id) {
            return Err(QueueError::DuplicateId(id.to_string()));
        }
        if self.len >= self.capacity {
            return Err(QueueError::CapacityExceeded(self.capacity));
        }

        let node = Node {
            id: id.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let at = match self.free.pop() {
            Some(at) => {
                self.nodes[at] = Some(node);
                at
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(at),
            None => self.head = Some(at),
        }
        self.tail = Some(at);
        self.index.insert(id, at);
        self.len += 1;
        Ok(())
    }

    /// Detach and return the head.
    pub fn dequeue(&mut self) -> Result<(K, V), QueueError> {
        let head = self.head.ok_or(QueueError::EmptyQueue)?;
        let node = self.unlink(head);
        Ok((node.id, node.value))
    }

    pub fn peek(&self) -> Result<&V, QueueError> {
        let head = self.head.ok_or(QueueError::EmptyQueue)?;
        Ok(&self.node(head).value)
    }

    /// Splice the element with `id` out of the list, wherever it sits.
    pub fn remove(&mut self, id: &K) -> Result<V, QueueError> {
        let at = *self
            .index
            .get(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        Ok(self.unlink(at).value)
    }

    /// Values from head to tail.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    fn unlink(&mut self, at: usize) -> Node<K, V> {
        let node = self.nodes[at]
            .take()
            .expect("indexed node must be occupied");

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        self.index.remove(&node.id);
        self.free.push(at);
        self.len -= 1;
        node
    }

    fn node(&self, at: usize) -> &Node<K, V> {
        self.nodes[at].as_ref().expect("linked node must be occupied")
    }

    fn node_mut(&mut self, at: usize) -> &mut Node<K, V> {
        self.nodes[at].as_mut().expect("linked node must be occupied")
    }
}

impl<K, V> Default for IdentifiedQueue<K, V>
where
    K: Eq + Hash + Clone + ToString,
{
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, K, V> {
    queue: &'a IdentifiedQueue<K, V>,
    cursor: Option<usize>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Eq + Hash + Clone + ToString,
{
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.cursor?;
        let node = self.queue.node(at);
        self.cursor = node.next;
        Some(&node.value)
    }
}
