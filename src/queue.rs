// src/queue.rs

//! FIFO of opaque handles.
//!
//! The queue never owns what a handle refers to, only the link nodes that
//! hold the handles. Nodes live in a slab with an intrusive free list, so a
//! node released by `dequeue` or `delete` is reused by the next `enqueue`
//! without touching the allocator.

use alloc::vec::Vec;
use core::ptr::{self, NonNull};

use crate::error::{Error, Result};

/// A copyable reference compared by identity rather than by value.
pub trait Handle: Copy {
    /// True when both handles designate the same object.
    fn same(&self, other: &Self) -> bool;

    /// Raw pointer handles may be null; everything else never is.
    fn is_null(&self) -> bool {
        false
    }
}

impl<T: ?Sized> Handle for &T {
    fn same(&self, other: &Self) -> bool {
        ptr::eq(*self, *other)
    }
}

impl<T: ?Sized> Handle for NonNull<T> {
    fn same(&self, other: &Self) -> bool {
        ptr::eq(self.as_ptr(), other.as_ptr())
    }
}

impl<T> Handle for *const T {
    fn same(&self, other: &Self) -> bool {
        ptr::eq(*self, *other)
    }

    fn is_null(&self) -> bool {
        <*const T>::is_null(*self)
    }
}

impl<T> Handle for *mut T {
    fn same(&self, other: &Self) -> bool {
        ptr::eq(*self, *other)
    }

    fn is_null(&self) -> bool {
        <*mut T>::is_null(*self)
    }
}

// A slab slot is either linked into the queue or sitting on the free list
enum Slot<T> {
    Linked { item: T, next: Option<usize> },
    Vacant { next_free: Option<usize> },
}

pub struct Queue<T: Handle> {
    nodes: Vec<Slot<T>>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
    len: usize,
}

impl<T: Handle> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Handle> Queue<T> {
    /// Create an empty queue. Nothing is allocated until the first enqueue.
    pub const fn new() -> Self {
        Queue {
            nodes: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
        }
    }

    /// Create an empty queue with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut queue = Self::new();
        queue
            .nodes
            .try_reserve(capacity)
            .map_err(|_| Error::AllocationError("queue nodes"))?;
        Ok(queue)
    }

    /// Release the queue. Fails if any handle is still queued.
    pub fn destroy(self) -> Result<()> {
        if self.len != 0 {
            return Err(Error::InvalidState("queue is not empty"));
        }
        Ok(())
    }

    /// Append `item` at the tail.
    pub fn enqueue(&mut self, item: T) -> Result<()> {
        if item.is_null() {
            return Err(Error::InvalidArgument("null handle"));
        }

        let index = self.alloc_node(item)?;
        match self.tail {
            Some(tail) => self.set_next(tail, Some(index)),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the oldest handle, or `None` if the queue is empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let index = self.head?;
        let (item, next) = self.release_node(index);
        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(item)
    }

    /// Remove the oldest node holding the same handle as `item`.
    pub fn delete(&mut self, item: T) -> Result<()> {
        if item.is_null() {
            return Err(Error::InvalidArgument("null handle"));
        }

        let mut previous = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let (found, next) = match &self.nodes[index] {
                Slot::Linked { item: queued, next } => (queued.same(&item), *next),
                Slot::Vacant { .. } => unreachable!("vacant slot linked into queue"),
            };

            if found {
                match previous {
                    Some(previous) => self.set_next(previous, next),
                    None => self.head = next,
                }
                if self.tail == Some(index) {
                    self.tail = previous;
                }
                self.release_node(index);
                self.len -= 1;
                return Ok(());
            }

            previous = Some(index);
            cursor = next;
        }

        Err(Error::NotFound)
    }

    /// Call `func` on every handle from oldest to newest.
    ///
    /// Delete-safe: the successor is captured before `func` runs, so `func`
    /// may delete the handle it was given. Deleting any other handle during
    /// the walk is not supported.
    pub fn iterate<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut Queue<T>, T),
    {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let (item, next) = match &self.nodes[index] {
                Slot::Linked { item, next } => (*item, *next),
                Slot::Vacant { .. } => return,
            };
            func(self, item);
            cursor = next;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if a node holds the same handle as `item`.
    pub fn contains(&self, item: T) -> bool {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            match &self.nodes[index] {
                Slot::Linked { item: queued, next } => {
                    if queued.same(&item) {
                        return true;
                    }
                    cursor = *next;
                }
                Slot::Vacant { .. } => return false,
            }
        }
        false
    }

    // Take a slot from the free list, or grow the slab by one
    fn alloc_node(&mut self, item: T) -> Result<usize> {
        if let Some(index) = self.free {
            if let Slot::Vacant { next_free } = self.nodes[index] {
                self.free = next_free;
            }
            self.nodes[index] = Slot::Linked { item, next: None };
            return Ok(index);
        }

        self.nodes
            .try_reserve(1)
            .map_err(|_| Error::AllocationError("queue node"))?;
        self.nodes.push(Slot::Linked { item, next: None });
        Ok(self.nodes.len() - 1)
    }

    // Put a slot back on the free list, returning what it held
    fn release_node(&mut self, index: usize) -> (T, Option<usize>) {
        let slot = core::mem::replace(
            &mut self.nodes[index],
            Slot::Vacant { next_free: self.free },
        );
        self.free = Some(index);
        match slot {
            Slot::Linked { item, next } => (item, next),
            Slot::Vacant { .. } => unreachable!("released a vacant queue slot"),
        }
    }

    fn set_next(&mut self, index: usize, value: Option<usize>) {
        if let Slot::Linked { next, .. } = &mut self.nodes[index] {
            *next = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_nodes_are_reused() {
        let values = [1, 2, 3];
        let mut queue = Queue::new();
        queue.enqueue(&values[0]).unwrap();
        queue.enqueue(&values[1]).unwrap();
        let slab_len = queue.nodes.len();

        assert!(queue.dequeue().is_some());
        queue.enqueue(&values[2]).unwrap();
        assert_eq!(queue.nodes.len(), slab_len);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn delete_tail_moves_tail_back() {
        let values = [1, 2, 3];
        let mut queue = Queue::new();
        for value in &values {
            queue.enqueue(value).unwrap();
        }

        queue.delete(&values[2]).unwrap();
        queue.enqueue(&values[2]).unwrap();

        let mut order = Vec::new();
        while let Some(value) = queue.dequeue() {
            order.push(*value);
        }
        assert_eq!(order, [1, 2, 3]);
    }
}
