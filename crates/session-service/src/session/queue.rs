//! Ordered membership queues.
//!
//! [`OrderedQueue`] is a doubly linked list stored in a slab. Every push
//! returns a [`QueueHandle`] that later removes that exact entry in O(1)
//! without searching. Handles carry a generation so a handle that outlived
//! its entry (already removed, slot reused) is rejected instead of removing
//! an unrelated entry.
//!
//! The room uses three of these: the waiting stack (`push_front`), the
//! draw-order queue and the hand-raise queue (`push_back`).

/// Opaque position of an entry inside an [`OrderedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    node: Option<Node<T>>,
}

/// Doubly linked queue with O(1) push at either end and O(1) removal by handle.
#[derive(Debug)]
pub struct OrderedQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for OrderedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderedQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert at the front and return a handle to the new entry.
    pub fn push_front(&mut self, value: T) -> QueueHandle {
        let handle = self.allocate(value);
        match self.head {
            Some(head) => {
                if let Some(node) = self.node_mut(head) {
                    node.prev = Some(handle.index);
                }
                if let Some(node) = self.node_mut(handle.index) {
                    node.next = Some(head);
                }
            }
            None => self.tail = Some(handle.index),
        }
        self.head = Some(handle.index);
        self.len += 1;
        handle
    }

    /// Insert at the back and return a handle to the new entry.
    pub fn push_back(&mut self, value: T) -> QueueHandle {
        let handle = self.allocate(value);
        match self.tail {
            Some(tail) => {
                if let Some(node) = self.node_mut(tail) {
                    node.next = Some(handle.index);
                }
                if let Some(node) = self.node_mut(handle.index) {
                    node.prev = Some(tail);
                }
            }
            None => self.head = Some(handle.index),
        }
        self.tail = Some(handle.index);
        self.len += 1;
        handle
    }

    /// Remove the entry `handle` points at.
    ///
    /// Returns `None` if the handle is stale (entry already removed).
    pub fn remove(&mut self, handle: QueueHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.node_mut(prev) {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.node_mut(next) {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        self.len -= 1;
        Some(node.value)
    }

    /// Peek at the front entry.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|index| self.node(index)).map(|n| &n.value)
    }

    /// Iterate entries front to back.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    fn allocate(&mut self, value: T) -> QueueHandle {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.node = Some(node);
                return QueueHandle {
                    index,
                    generation: slot.generation,
                };
            }
        }
        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        QueueHandle {
            index,
            generation: 0,
        }
    }

    fn node(&self, index: usize) -> Option<&Node<T>> {
        self.slots.get(index).and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(index).and_then(|slot| slot.node.as_mut())
    }
}

/// Front-to-back iterator over an [`OrderedQueue`].
pub struct Iter<'a, T> {
    queue: &'a OrderedQueue<T>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.node(self.cursor?)?;
        self.cursor = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a OrderedQueue<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
