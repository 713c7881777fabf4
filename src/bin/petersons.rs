// Peterson's mutual exclusion between two user threads.
//
// Both threads share one OS thread, so they interleave but never run at the
// same time, which is exactly the setting Peterson's algorithm assumes.
// Preemption is on: a thread spinning in the entry protocol is forced off
// the CPU by the timer until the other one leaves its critical section.

use std::cell::UnsafeCell;
use std::rc::Rc;

use log::{LevelFilter, Log, Metadata, Record};
use volatile::Volatile;

const ROUNDS: u32 = 500;

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

// Shared state, read and written only through volatile accesses so the
// busy-wait really re-reads memory
struct Peterson {
    flag: [UnsafeCell<Volatile<bool>>; 2],
    turn: UnsafeCell<Volatile<usize>>,
    counter: UnsafeCell<Volatile<u32>>,
}

impl Peterson {
    fn new() -> Self {
        Peterson {
            flag: [
                UnsafeCell::new(Volatile::new(false)),
                UnsafeCell::new(Volatile::new(false)),
            ],
            turn: UnsafeCell::new(Volatile::new(0)),
            counter: UnsafeCell::new(Volatile::new(0)),
        }
    }

    fn flag(&self, pid: usize) -> bool {
        unsafe { (*self.flag[pid].get()).read() }
    }

    fn set_flag(&self, pid: usize, value: bool) {
        unsafe { (*self.flag[pid].get()).write(value) }
    }

    fn turn(&self) -> usize {
        unsafe { (*self.turn.get()).read() }
    }

    fn set_turn(&self, pid: usize) {
        unsafe { (*self.turn.get()).write(pid) }
    }

    fn counter(&self) -> u32 {
        unsafe { (*self.counter.get()).read() }
    }

    fn set_counter(&self, value: u32) {
        unsafe { (*self.counter.get()).write(value) }
    }
}

fn process(shared: Rc<Peterson>, pid: usize) {
    let other = 1 - pid;
    for _ in 0..ROUNDS {
        shared.set_flag(pid, true);
        shared.set_turn(other);
        while shared.flag(other) && shared.turn() == other {
            core::hint::spin_loop();
        }

        // Critical section
        let value = shared.counter();
        {
            // Keep the tick out of stdio
            let _guard = uthread::preempt::disable();
            println!("Thread {} : {}", pid, value);
        }
        shared.set_counter(value + 1);

        shared.set_flag(pid, false);
    }
}

fn main() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }

    let shared = Rc::new(Peterson::new());
    let result = Rc::clone(&shared);

    let outcome = uthread::run(true, move || {
        let peer = Rc::clone(&shared);
        if let Err(err) = uthread::create(move || process(peer, 1)) {
            let _guard = uthread::preempt::disable();
            log::error!("failed to create second thread: {}", err);
            return;
        }
        process(shared, 0);
    });

    match outcome {
        Ok(()) => println!("Final counter: {} (expected {})", result.counter(), 2 * ROUNDS),
        Err(err) => {
            eprintln!("run failed: {}", err);
            std::process::exit(1);
        }
    }
}
