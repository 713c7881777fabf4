// src/preempt.rs

//! Timer-driven forced yields.
//!
//! A SIGVTALRM interval timer fires `HZ` times per second of consumed CPU
//! time and the handler forces a yield. Every scheduler mutation
//! is bracketed by a [`PreemptGuard`], which masks the signal on the calling
//! OS thread, so a tick can only land between two consistent states.
//!
//! The gate is per OS thread: only the thread that called `run` with
//! preemption enabled is armed. Ticks delivered to any other thread of the
//! process fall through the handler untouched.
//!
//! The forced yield itself never logs. Threads that log from a preemptive
//! run still need a logger that tolerates being suspended mid-record, or must
//! log inside [`disable`]: a peer scheduled in the meantime may log too.

use core::cell::Cell;
use core::marker::PhantomData;
use core::{mem, ptr};
use lazy_static::lazy_static;
use spin::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};

struct Gate {
    armed: Cell<bool>,
    depth: Cell<usize>,
}

thread_local! {
    static GATE: Gate = const {
        Gate {
            armed: Cell::new(false),
            depth: Cell::new(0),
        }
    };
}

// Process-wide signal registration, shared by every armed OS thread
struct TimerRegistry {
    handler_installed: bool,
    active_runs: usize,
    previous_timer: libc::itimerval,
}

lazy_static! {
    static ref REGISTRY: Mutex<TimerRegistry> = Mutex::new(TimerRegistry {
        handler_installed: false,
        active_runs: 0,
        previous_timer: unsafe { mem::zeroed() },
    });
}

/// Critical section token. Preemption stays masked until every live guard
/// on this OS thread has been dropped.
pub struct PreemptGuard {
    // Tied to the OS thread whose signal mask it changed
    _not_send: PhantomData<*const ()>,
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        GATE.with(|gate| {
            let depth = gate.depth.get().saturating_sub(1);
            gate.depth.set(depth);
            if depth == 0 && gate.armed.get() {
                set_mask(libc::SIG_UNBLOCK);
            }
        });
    }
}

/// Enter a critical section. A no-op on the signal mask unless the calling
/// OS thread is running a preemptive session.
pub fn disable() -> PreemptGuard {
    GATE.with(|gate| {
        let depth = gate.depth.get();
        if depth == 0 && gate.armed.get() {
            set_mask(libc::SIG_BLOCK);
        }
        gate.depth.set(depth + 1);
    });
    PreemptGuard {
        _not_send: PhantomData,
    }
}

/// Leave a critical section opened by [`disable`].
pub fn enable(guard: PreemptGuard) {
    drop(guard);
}

/// True if a preemptive session is running on this OS thread.
pub fn is_armed() -> bool {
    GATE.with(|gate| gate.armed.get())
}

// Nesting depth of the flow that is about to be switched away from
pub(crate) fn depth() -> usize {
    GATE.with(|gate| gate.depth.get())
}

// A flow resumed by a context switch takes back the depth it was suspended
// with. The signal is still masked by whoever switched to it.
pub(crate) fn resume(depth: usize) {
    GATE.with(|gate| gate.depth.set(depth));
}

// A brand new thread starts outside any critical section
pub(crate) fn enter_thread() {
    GATE.with(|gate| {
        gate.depth.set(0);
        if gate.armed.get() {
            set_mask(libc::SIG_UNBLOCK);
        }
    });
}

fn set_mask(how: libc::c_int) {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGVTALRM);
        libc::pthread_sigmask(how, &set, ptr::null_mut());
    }
}

extern "C" fn on_tick(_signal: libc::c_int) {
    let armed = GATE.with(|gate| gate.armed.get() && gate.depth.get() == 0);
    if !armed {
        return;
    }

    // The yield issues syscalls of its own; the interrupted code must not
    // see errno change under it
    let errno = unsafe { *libc::__errno_location() };
    crate::task::scheduler::preempted();
    unsafe { *libc::__errno_location() = errno };
}

/// Interval timer owned by one preemptive run. Dropping it disarms this OS
/// thread and stops the process timer once no other run needs it.
pub(crate) struct Timer {
    _not_send: PhantomData<*const ()>,
}

impl Timer {
    pub(crate) fn start(config: &Config) -> Result<Timer> {
        {
            let mut registry = REGISTRY.lock();

            if !registry.handler_installed {
                unsafe {
                    let mut action: libc::sigaction = mem::zeroed();
                    action.sa_sigaction =
                        on_tick as extern "C" fn(libc::c_int) as libc::sighandler_t;
                    action.sa_flags = libc::SA_RESTART;
                    libc::sigemptyset(&mut action.sa_mask);
                    if libc::sigaction(libc::SIGVTALRM, &action, ptr::null_mut()) == -1 {
                        return Err(Error::Timer(std::io::Error::last_os_error()));
                    }
                }
                registry.handler_installed = true;
            }

            if registry.active_runs == 0 {
                let interval = config.tick_interval();
                let period = libc::timeval {
                    tv_sec: (interval / 1_000_000) as libc::time_t,
                    tv_usec: (interval % 1_000_000) as libc::suseconds_t,
                };
                let timer = libc::itimerval {
                    it_interval: period,
                    it_value: period,
                };
                let mut previous: libc::itimerval = unsafe { mem::zeroed() };
                if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, &mut previous) } == -1 {
                    return Err(Error::Timer(std::io::Error::last_os_error()));
                }
                registry.previous_timer = previous;
                log::debug!("preemption timer started at {} Hz", config.tick_hz);
            }
            registry.active_runs += 1;
        }

        GATE.with(|gate| {
            gate.armed.set(true);
            if gate.depth.get() > 0 {
                set_mask(libc::SIG_BLOCK);
            }
        });

        Ok(Timer {
            _not_send: PhantomData,
        })
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        // Disarm first so a tick that is already pending finds nothing to do
        GATE.with(|gate| {
            gate.armed.set(false);
        });
        set_mask(libc::SIG_UNBLOCK);

        let mut registry = REGISTRY.lock();
        registry.active_runs = registry.active_runs.saturating_sub(1);
        if registry.active_runs == 0 {
            // The handler stays installed: with no armed thread it returns
            // immediately, whereas the default action would kill the process
            // if a tick is still pending somewhere
            unsafe {
                libc::setitimer(libc::ITIMER_VIRTUAL, &registry.previous_timer, ptr::null_mut());
            }
            log::debug!("preemption timer stopped");
        }
    }
}
