//! User-space cooperative threads.
//!
//! Many logical threads share the calling OS thread, each with its own
//! stack and saved register context. Threads are scheduled round-robin when
//! they yield, block or exit, and optionally when a timer tick forces them
//! to yield. A counting semaphore built on block/unblock provides FIFO-fair
//! synchronization between them.
//!
//! ```no_run
//! use std::rc::Rc;
//! use uthread::Semaphore;
//!
//! uthread::run(false, || {
//!     let sem = Rc::new(Semaphore::new(0).unwrap());
//!     let waker = Rc::clone(&sem);
//!     uthread::create(move || waker.up().unwrap()).unwrap();
//!     sem.down().unwrap();
//! })
//! .unwrap();
//! ```

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("uthread switches System V x86_64 register state and relies on Linux signals");

// Enable the alloc crate
extern crate alloc;

pub mod config;
pub mod error;
pub mod preempt;
pub mod queue;
pub mod semaphore;
pub mod stack;
pub mod task;

pub use config::Config;
pub use error::{Error, Result};
pub use queue::{Handle, Queue};
pub use semaphore::Semaphore;
pub use task::scheduler::{
    block, create, current, exit, run, run_with_config, state, unblock, yield_now,
};
pub use task::{ThreadId, ThreadRef, ThreadState};
