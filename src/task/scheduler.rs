use alloc::boxed::Box;
use core::any::Any;
use core::cell::Cell;
use core::ptr::{self, NonNull};
use std::panic::{self, AssertUnwindSafe};

use super::context::TaskContext;
use super::table::ThreadTable;
use super::{Entry, Tcb, ThreadId, ThreadRef, ThreadState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::preempt::{self, Timer};
use crate::queue::Queue;
use crate::stack::Stack;

// The scheduler of the run executing on this OS thread, if any
thread_local! {
    static ACTIVE: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
}

pub(crate) struct Scheduler {
    threads: ThreadTable,
    ready: Queue<ThreadRef>,
    current: ThreadRef,
    next_id: u64,
    // Exited thread whose stack may still be underneath the last switch
    zombie: Option<ThreadRef>,
    config: Config,
    // First panic raised by a thread entry, resumed once the run is over
    panic: Option<Box<dyn Any + Send>>,
}

impl Scheduler {
    fn new(config: Config) -> Result<Self> {
        let mut threads = ThreadTable::new();
        let ready = Queue::with_capacity(4)?;
        let current = threads.insert(Tcb::main())?;

        Ok(Scheduler {
            threads,
            ready,
            current,
            next_id: 1,
            zombie: None,
            config,
            panic: None,
        })
    }

    // Register a freshly allocated thread and make it ready
    fn spawn(&mut self, entry: Entry, stack: Stack) -> Result<ThreadRef> {
        let id = ThreadId::new(self.next_id);
        let tcb = Tcb::new(id, entry, stack, thread_start)?;
        let thread = self.threads.insert(tcb)?;

        if let Err(err) = self.ready.enqueue(thread) {
            self.threads.remove(thread);
            return Err(err);
        }

        self.next_id += 1;
        log::debug!("created {}", thread);
        Ok(thread)
    }

    fn set_current_state(&mut self, state: ThreadState) {
        let current = self.current;
        if let Some(tcb) = self.threads.get_mut(current) {
            tcb.state = state;
        }
    }

    fn wake(&mut self, thread: ThreadRef) -> Result<()> {
        let tcb = self
            .threads
            .get_mut(thread)
            .ok_or(Error::InvalidArgument("stale thread handle"))?;
        if tcb.state != ThreadState::Blocked {
            return Err(Error::InvalidState("thread is not blocked"));
        }

        self.ready.enqueue(thread)?;
        tcb.state = ThreadState::Ready;
        log::debug!("unblocked {}", thread);
        Ok(())
    }

    // Free the thread that exited on an earlier switch. Whoever calls this
    // runs on a live thread's stack, so the zombie's stack is no longer in use.
    fn reclaim_zombie(&mut self, quiet: bool) {
        if let Some(zombie) = self.zombie.take() {
            if let Some(tcb) = self.threads.remove(zombie) {
                let stack = tcb.stack.as_ref().map_or(0, Stack::size);
                if !quiet {
                    log::debug!("reclaimed {} ({} KiB stack)", zombie, stack / 1024);
                }
            }
        }
    }

    // Pick the next thread and update all bookkeeping for the switch to it.
    // Returns the contexts to save into and resume from, or None if the
    // caller should simply keep running. A quiet pass never calls the logger.
    fn schedule(&mut self, quiet: bool) -> Option<(*mut TaskContext, *const TaskContext)> {
        self.reclaim_zombie(quiet);

        let outgoing = self.current;
        let outgoing_state = {
            let tcb = self.threads.get_mut(outgoing)?;
            if tcb.state == ThreadState::Running {
                tcb.state = ThreadState::Ready;
            }
            tcb.state
        };

        let incoming = loop {
            match self.ready.dequeue() {
                Some(thread) if self.threads.get(thread).is_some() => break thread,
                Some(thread) => {
                    if !quiet {
                        log::warn!("dropping stale {} from the ready queue", thread);
                    }
                }
                None => {
                    // Nothing else can run, the caller keeps the CPU
                    if outgoing_state == ThreadState::Ready {
                        self.set_current_state(ThreadState::Running);
                    }
                    return None;
                }
            }
        };

        let tcb = self.threads.get_mut(incoming)?;
        debug_assert_eq!(tcb.state, ThreadState::Ready);
        tcb.state = ThreadState::Running;
        self.current = incoming;

        match outgoing_state {
            // Back of the line: round-robin among ready threads
            ThreadState::Ready => {
                // The dequeue above freed a node, so this cannot allocate
                if let Err(err) = self.ready.enqueue(outgoing) {
                    if !quiet {
                        log::error!("failed to requeue {}: {}", outgoing, err);
                    }
                }
            }
            ThreadState::Zombie => self.zombie = Some(outgoing),
            _ => {}
        }

        if !quiet {
            log::trace!("switch {} -> {}", outgoing, incoming);
        }
        let save = &mut self.threads.get_mut(outgoing)?.context as *mut TaskContext;
        let resume = &self.threads.get(incoming)?.context as *const TaskContext;
        Some((save, resume))
    }

    fn record_panic(&mut self, payload: Box<dyn Any + Send>) {
        log::error!("{} panicked", self.current);
        if self.panic.is_none() {
            self.panic = Some(payload);
        }
    }

    // Release what is left once the main thread is the only one able to run
    fn teardown(&mut self) {
        self.reclaim_zombie(false);

        let main = self.current;
        if self.threads.len() > 1 {
            log::debug!("tearing down {} leftover threads", self.threads.len() - 1);
        }
        for thread in self.threads.refs() {
            if thread == main {
                continue;
            }
            if let Some(tcb) = self.threads.remove(thread) {
                log::warn!("{} was still {:?} when the run ended", thread, tcb.state);
            }
        }
    }
}

fn active() -> Option<NonNull<Scheduler>> {
    NonNull::new(ACTIVE.with(|active| active.get()))
}

// Run `f` against this OS thread's scheduler inside a critical section
fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    let _guard = preempt::disable();
    let mut scheduler = active()?;
    Some(f(unsafe { scheduler.as_mut() }))
}

// First code executed on every new thread's stack
extern "C" fn thread_start() -> ! {
    preempt::enter_thread();

    let entry = with_scheduler(|scheduler| {
        let current = scheduler.current;
        scheduler.threads.get_mut(current).and_then(|tcb| tcb.entry.take())
    })
    .flatten();

    if let Some(entry) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            with_scheduler(|scheduler| scheduler.record_panic(payload));
        }
    }

    // Falling off the end of the entry is an exit
    exit()
}

// Owns the scheduler for the duration of one run and uninstalls it on the
// way out, whichever way that is
struct Session {
    scheduler: NonNull<Scheduler>,
}

impl Session {
    fn install(scheduler: Box<Scheduler>) -> Session {
        let scheduler = NonNull::from(Box::leak(scheduler));
        ACTIVE.with(|active| active.set(scheduler.as_ptr()));
        Session { scheduler }
    }

    fn finish(self) -> Option<Box<dyn Any + Send>> {
        with_scheduler(|scheduler| {
            scheduler.teardown();
            scheduler.panic.take()
        })
        .flatten()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _guard = preempt::disable();
        ACTIVE.with(|active| active.set(ptr::null_mut()));
        let mut scheduler = unsafe { Box::from_raw(self.scheduler.as_ptr()) };
        scheduler.teardown();
        let created = scheduler.next_id - 1;
        drop(scheduler);
        log::info!("run finished after {} threads", created);
        crate::stack::log_stack_status();
    }
}

/// Run a whole threading session on the calling OS thread.
///
/// The caller becomes the main thread (id 0), `entry` becomes the first
/// user thread, and the call returns once no thread is left ready to run.
/// Every created thread that exited has been reclaimed by then. If a
/// thread panicked, the first panic is resumed here after teardown.
pub fn run<F>(preempt: bool, entry: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    run_with_config(Config::default().with_preempt(preempt), entry)
}

pub fn run_with_config<F>(config: Config, entry: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    config.validate()?;
    if active().is_some() {
        return Err(Error::InvalidState("a run is already active on this thread"));
    }

    let session = Session::install(Box::new(Scheduler::new(config)?));
    log::info!("run started (preempt: {})", config.preempt);

    let timer = if config.preempt {
        Some(Timer::start(&config)?)
    } else {
        None
    };

    create(entry)?;

    loop {
        let idle = with_scheduler(|scheduler| scheduler.ready.is_empty()).unwrap_or(true);
        if idle {
            break;
        }
        yield_now();
    }

    drop(timer);
    if let Some(payload) = session.finish() {
        panic::resume_unwind(payload);
    }
    Ok(())
}

/// Create a thread that will run `entry` and make it ready. The thread
/// exits when `entry` returns.
pub fn create<F>(entry: F) -> Result<ThreadRef>
where
    F: FnOnce() + 'static,
{
    let stack_size = with_scheduler(|scheduler| scheduler.config.stack_size)
        .ok_or(Error::InvalidState("create called outside of a run"))?;

    let stack = Stack::allocate(stack_size)?;
    let entry: Entry = Box::new(entry);

    with_scheduler(move |scheduler| scheduler.spawn(entry, stack))
        .unwrap_or(Err(Error::InvalidState("create called outside of a run")))
}

/// Give up the CPU to the oldest ready thread. Returns immediately if no
/// other thread is ready.
pub fn yield_now() {
    switch_away(false);
}

// Forced yield from the timer signal. The interrupted thread may be inside
// the logger, so this path must not log.
pub(crate) fn preempted() {
    switch_away(true);
}

fn switch_away(quiet: bool) {
    let guard = preempt::disable();
    let Some(mut scheduler) = active() else {
        return;
    };
    let Some((save, resume)) = (unsafe { scheduler.as_mut() }).schedule(quiet) else {
        return;
    };

    let depth = preempt::depth();
    unsafe { TaskContext::switch(save, resume) };

    // Some later switch brought us back
    preempt::resume(depth);
    drop(guard);
}

/// Terminate the calling thread. Its resources are reclaimed after the
/// next switch.
pub fn exit() -> ! {
    let _guard = preempt::disable();
    let marked = with_scheduler(|scheduler| {
        log::debug!("{} exited", scheduler.current);
        scheduler.set_current_state(ThreadState::Zombie);
    });
    if marked.is_none() {
        panic!("exit called outside of a run");
    }

    yield_now();
    unreachable!("zombie thread was resumed");
}

/// Suspend the calling thread until [`unblock`] is called on it. The
/// caller must already be recorded on some wait list.
pub fn block() {
    let _guard = preempt::disable();
    let marked = with_scheduler(|scheduler| {
        log::debug!("{} blocked", scheduler.current);
        scheduler.set_current_state(ThreadState::Blocked);
    });
    if marked.is_some() {
        yield_now();
    }
}

/// Make a blocked thread ready again.
pub fn unblock(thread: ThreadRef) -> Result<()> {
    with_scheduler(|scheduler| scheduler.wake(thread))
        .unwrap_or(Err(Error::InvalidState("unblock called outside of a run")))
}

/// The running thread, or None outside of a run.
pub fn current() -> Option<ThreadRef> {
    with_scheduler(|scheduler| scheduler.current)
}

/// Current state of `thread`, or None once it has been reclaimed.
pub fn state(thread: ThreadRef) -> Option<ThreadState> {
    with_scheduler(|scheduler| scheduler.threads.get(thread).map(|tcb| tcb.state)).flatten()
}
