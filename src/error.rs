//! Error types shared by the queue, scheduler and semaphore.

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, Error>;

/// Runtime error types
#[derive(Debug, Error)]
pub enum Error {
    /// A handle or value that must be live and valid was not
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation's precondition does not hold
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Memory for a stack, TCB slot or queue node could not be obtained
    #[error("allocation failed: {0}")]
    AllocationError(&'static str),

    /// `Queue::delete` was asked for a handle the queue does not hold
    #[error("item not found in queue")]
    NotFound,

    /// The preemption signal handler or interval timer could not be installed
    #[error("failed to install preemption timer: {0}")]
    Timer(#[source] std::io::Error),
}
