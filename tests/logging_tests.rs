use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

// Keeps every message together with the OS thread that logged it, so tests
// running side by side only look at their own records
struct RecordingLogger {
    records: Mutex<Vec<(ThreadId, String)>>,
}

impl Log for RecordingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let message = format!("{}", record.args());
        self.records.lock().push((thread::current().id(), message));
    }

    fn flush(&self) {}
}

static LOGGER: RecordingLogger = RecordingLogger {
    records: Mutex::new(Vec::new()),
};

fn install() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}

fn messages_from_this_thread() -> Vec<String> {
    let me = thread::current().id();
    LOGGER
        .records
        .lock()
        .iter()
        .filter(|(thread, _)| *thread == me)
        .map(|(_, message)| message.clone())
        .collect()
}

#[test]
fn test_forced_yields_do_not_log() {
    const HANDOFFS: usize = 3;

    install();
    let turn = Rc::new(AtomicUsize::new(1));
    let (first, second) = (Rc::clone(&turn), Rc::clone(&turn));

    uthread::run(true, move || {
        // Two spinners passing a token back and forth: every hand-off needs
        // the timer to push the spinning thread off the CPU
        uthread::create(move || {
            for _ in 0..HANDOFFS {
                while second.load(Ordering::Relaxed) != 2 {
                    core::hint::spin_loop();
                }
                second.store(1, Ordering::Relaxed);
            }
        })
        .unwrap();

        for _ in 0..HANDOFFS {
            while first.load(Ordering::Relaxed) != 1 {
                core::hint::spin_loop();
            }
            first.store(2, Ordering::Relaxed);
        }
    })
    .unwrap();

    let messages = messages_from_this_thread();
    assert!(messages.iter().any(|message| message.starts_with("switch ")));
    // Thread 1 was preempted at least HANDOFFS times; only its exit logs
    let switches_away = messages
        .iter()
        .filter(|message| message.starts_with("switch thread 1 ->"))
        .count();
    assert_eq!(switches_away, 1);
}

#[test]
fn test_run_reports_stack_status_on_exit() {
    install();
    uthread::run(false, || {
        for _ in 0..3 {
            uthread::create(|| {}).unwrap();
        }
    })
    .unwrap();

    let messages = messages_from_this_thread();
    let status = messages
        .iter()
        .rev()
        .find(|message| message.starts_with("Stacks:"))
        .expect("no stack status after the run");
    assert!(status.ends_with(" 0 outstanding"));
    assert!(messages.iter().any(|message| message == "run finished after 4 threads"));
}
