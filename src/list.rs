//! Recency List
//!
//! A doubly linked list with sentinel nodes at both ends. The front of the list
//! holds the most recently used entry and the back holds the eviction candidate.
//! Nodes are heap allocated and addressed by raw pointer so that the owning
//! map can jump straight to a node and promote or unlink it in O(1).
//!
//! The list is not synchronised. Every structure that embeds it guards it with
//! a lock (see [`LruSegment`](crate::lru::LruSegment)).

use core::mem::MaybeUninit;
use core::ptr;

/// A node of the recency list.
///
/// Sentinel nodes never carry a value; every other node always does.
pub(crate) struct Node<T> {
    val: MaybeUninit<T>,
    prev: *mut Node<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn new(val: T) -> Self {
        Node {
            val: MaybeUninit::new(val),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    fn sentinel() -> Self {
        Node {
            val: MaybeUninit::uninit(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// # Safety
    ///
    /// Must not be called on a sentinel node.
    pub(crate) unsafe fn value(&self) -> &T {
        // SAFETY: the caller guarantees this is a value-carrying node.
        unsafe { self.val.assume_init_ref() }
    }

    /// # Safety
    ///
    /// Must not be called on a sentinel node.
    pub(crate) unsafe fn value_mut(&mut self) -> &mut T {
        // SAFETY: the caller guarantees this is a value-carrying node.
        unsafe { self.val.assume_init_mut() }
    }

    /// Consumes a detached, value-carrying node and returns its value.
    fn into_value(self) -> T {
        // SAFETY: only value-carrying nodes are ever boxed and detached through
        // `unlink` / `pop_back`; sentinels are freed in `Drop` without reading.
        unsafe { self.val.assume_init() }
    }
}

/// Doubly linked list ordered from most to least recently used.
pub(crate) struct RecencyList<T> {
    len: usize,
    head: *mut Node<T>,
    tail: *mut Node<T>,
}

// SAFETY: the list exclusively owns every node it points to.
unsafe impl<T: Send> Send for RecencyList<T> {}

// SAFETY: shared references only permit reads of owned nodes.
unsafe impl<T: Sync> Sync for RecencyList<T> {}

impl<T> RecencyList<T> {
    pub(crate) fn new() -> Self {
        let head = Box::into_raw(Box::new(Node::sentinel()));
        let tail = Box::into_raw(Box::new(Node::sentinel()));
        // SAFETY: both sentinels were just allocated and are valid.
        unsafe {
            (*head).next = tail;
            (*tail).prev = head;
        }
        RecencyList { len: 0, head, tail }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `val` at the front and returns a pointer to its node.
    ///
    /// The pointer stays valid until the node is unlinked, popped, or the list
    /// is cleared or dropped.
    pub(crate) fn push_front(&mut self, val: T) -> *mut Node<T> {
        let node = Box::into_raw(Box::new(Node::new(val)));
        // SAFETY: `node` is freshly allocated and not yet part of the list.
        unsafe { self.attach_front(node) };
        self.len += 1;
        node
    }

    /// Moves `node` to the front of the list.
    ///
    /// # Safety
    ///
    /// `node` must be a live, value-carrying node of this list.
    pub(crate) unsafe fn promote(&mut self, node: *mut Node<T>) {
        // SAFETY: forwarded from the caller.
        unsafe {
            if (*self.head).next == node {
                return;
            }
            self.detach(node);
            self.attach_front(node);
        }
    }

    /// Removes `node` from the list and returns its value.
    ///
    /// # Safety
    ///
    /// `node` must be a live, value-carrying node of this list. The pointer is
    /// dangling once this returns.
    pub(crate) unsafe fn unlink(&mut self, node: *mut Node<T>) -> T {
        // SAFETY: forwarded from the caller; the node was allocated by
        // `push_front` through `Box::into_raw`.
        unsafe {
            self.detach(node);
            self.len -= 1;
            Box::from_raw(node).into_value()
        }
    }

    /// Returns the least recently used value without removing it.
    pub(crate) fn back(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the list is non-empty, so `tail.prev` is a value-carrying node.
        unsafe { Some((*(*self.tail).prev).value()) }
    }

    /// Removes and returns the least recently used value.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: the list is non-empty, so `tail.prev` is a value-carrying node
        // that belongs to this list.
        unsafe {
            let last = (*self.tail).prev;
            Some(self.unlink(last))
        }
    }

    /// Drops every value, most recently used first.
    pub(crate) fn clear(&mut self) {
        // SAFETY: `head.next` walks only live nodes until the tail sentinel.
        unsafe {
            while (*self.head).next != self.tail {
                let first = (*self.head).next;
                drop(self.unlink(first));
            }
        }
    }

    /// Iterates values from most to least recently used.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        // SAFETY: `head` is a valid sentinel for the lifetime of the list.
        let next = unsafe { (*self.head).next };
        Iter {
            next,
            tail: self.tail,
            _list: self,
        }
    }

    /// # Safety
    ///
    /// `node` must currently be linked into this list.
    unsafe fn detach(&mut self, node: *mut Node<T>) {
        // SAFETY: a linked node always has valid neighbours (possibly sentinels).
        unsafe {
            (*(*node).prev).next = (*node).next;
            (*(*node).next).prev = (*node).prev;
        }
    }

    /// # Safety
    ///
    /// `node` must be valid and not currently linked into any list.
    unsafe fn attach_front(&mut self, node: *mut Node<T>) {
        // SAFETY: `head` is a valid sentinel; the caller vouches for `node`.
        unsafe {
            (*node).next = (*self.head).next;
            (*node).prev = self.head;
            (*self.head).next = node;
            (*(*node).next).prev = node;
        }
    }
}

impl<T> Drop for RecencyList<T> {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: the sentinels were allocated in `new` and are freed exactly
        // once here; their values were never initialised so nothing is read.
        unsafe {
            drop(Box::from_raw(self.head));
            drop(Box::from_raw(self.tail));
        }
    }
}

/// Front-to-back iterator over a [`RecencyList`].
pub(crate) struct Iter<'a, T> {
    next: *mut Node<T>,
    tail: *mut Node<T>,
    _list: &'a RecencyList<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.next == self.tail {
            return None;
        }
        // SAFETY: `next` is a value-carrying node borrowed for the list's
        // lifetime, which `_list` ties to `'a`.
        unsafe {
            let node = self.next;
            self.next = (*node).next;
            Some((*node).value())
        }
    }
}
