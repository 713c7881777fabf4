use alloc::boxed::Box;
use core::fmt;

// Multitasking components
pub mod context;
pub mod scheduler;
pub mod table;

use crate::stack::Stack;
use context::TaskContext;

/// Run-unique thread identifier, handed out in creation order. The
/// synthetic main thread of a run is always id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub const MAIN: ThreadId = ThreadId(0);

    pub(crate) fn new(id: u64) -> Self {
        ThreadId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a thread control block. Every handle carries a generation that
/// is unique for the whole process and checked on every lookup, so a handle
/// to a reclaimed thread never aliases its successor in the same slot, in
/// this run or a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRef {
    slot: usize,
    generation: u64,
    id: ThreadId,
}

impl ThreadRef {
    pub(crate) fn new(slot: usize, generation: u64, id: ThreadId) -> Self {
        ThreadRef { slot, generation, id }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.id)
    }
}

impl crate::queue::Handle for ThreadRef {
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

// Thread states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

pub(crate) type Entry = Box<dyn FnOnce() + 'static>;

// Thread control block
pub(crate) struct Tcb {
    pub id: ThreadId,
    pub state: ThreadState,

    // CPU context for switching; the main thread's is filled by its first
    // switch away
    pub context: TaskContext,

    // None for the main thread, which runs on the caller's own stack
    pub stack: Option<Stack>,

    // Taken by the thread on its first run
    pub entry: Option<Entry>,
}

impl Tcb {
    /// The caller of `run`, already running on the stack it was called on.
    pub fn main() -> Self {
        Tcb {
            id: ThreadId::MAIN,
            state: ThreadState::Running,
            context: TaskContext::default(),
            stack: None,
            entry: None,
        }
    }

    pub fn new(id: ThreadId, entry: Entry, stack: Stack, start: extern "C" fn() -> !) -> crate::Result<Self> {
        let mut context = TaskContext::default();
        context.init(start, &stack)?;

        Ok(Tcb {
            id,
            state: ThreadState::Ready,
            context,
            stack: Some(stack),
            entry: Some(entry),
        })
    }
}
