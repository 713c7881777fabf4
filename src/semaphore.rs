// src/semaphore.rs

//! Counting semaphore with FIFO hand-off.
//!
//! `up` with a waiter present passes the permit straight to the oldest
//! waiter instead of bumping the count, so a woken thread never has to race
//! a newcomer for it.

use core::cell::{Cell, RefCell};

use crate::error::{Error, Result};
use crate::preempt;
use crate::queue::Queue;
use crate::task::{scheduler, ThreadRef};

pub struct Semaphore {
    count: Cell<usize>,
    waiters: RefCell<Queue<ThreadRef>>,
}

impl Semaphore {
    pub fn new(count: usize) -> Result<Semaphore> {
        Ok(Semaphore {
            count: Cell::new(count),
            waiters: RefCell::new(Queue::with_capacity(1)?),
        })
    }

    /// Release the semaphore. Fails if threads are still waiting on it,
    /// since nothing could ever wake them afterwards.
    pub fn destroy(self) -> Result<()> {
        let _guard = preempt::disable();
        let waiters = self.waiters.into_inner();
        if !waiters.is_empty() {
            log::warn!("semaphore destroyed with {} waiters", waiters.len());
            return Err(Error::InvalidState("semaphore still has waiters"));
        }
        waiters.destroy()
    }

    /// Take a permit, blocking the calling thread until one is handed to it.
    pub fn down(&self) -> Result<()> {
        let _guard = preempt::disable();

        let count = self.count.get();
        if count > 0 {
            self.count.set(count - 1);
            return Ok(());
        }

        let me = scheduler::current()
            .ok_or(Error::InvalidState("down called outside of a run"))?;
        {
            let mut waiters = self.waiters.borrow_mut();
            debug_assert!(!waiters.contains(me), "{} is already waiting", me);
            waiters.enqueue(me)?;
        }

        // Still inside the critical section: no tick can land between
        // joining the wait list and being marked blocked
        scheduler::block();
        Ok(())
    }

    /// Return a permit, waking the oldest waiter if there is one.
    ///
    /// Waiters left over from a run that has since ended are discarded on
    /// the way; their threads no longer exist.
    pub fn up(&self) -> Result<()> {
        let _guard = preempt::disable();

        loop {
            let waiter = self.waiters.borrow_mut().dequeue();
            let Some(thread) = waiter else {
                break;
            };
            match scheduler::unblock(thread) {
                Ok(()) => return Ok(()),
                Err(Error::InvalidArgument(_)) => {
                    log::warn!("dropping stale waiter {}", thread);
                }
                // No run on this thread, so whoever parked here is gone
                Err(_) if scheduler::current().is_none() => {
                    log::warn!("dropping waiter {} of a finished run", thread);
                }
                Err(err) => return Err(err),
            }
        }

        let count = self
            .count
            .get()
            .checked_add(1)
            .ok_or(Error::InvalidState("semaphore count overflow"))?;
        self.count.set(count);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// Number of threads blocked in `down`.
    pub fn waiters(&self) -> usize {
        let _guard = preempt::disable();
        self.waiters.borrow().len()
    }
}
