use std::cell::{Cell, RefCell};
use std::rc::Rc;

use uthread::{Config, Error, ThreadId, ThreadState};

fn id_of_current() -> u64 {
    uthread::current().unwrap().id().as_u64()
}

#[test]
fn test_round_robin_in_creation_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&log);

    uthread::run(false, move || {
        for _ in 0..3 {
            let log = Rc::clone(&shared);
            uthread::create(move || {
                for round in 0..3 {
                    log.borrow_mut().push((id_of_current(), round));
                    uthread::yield_now();
                }
            })
            .unwrap();
        }
    })
    .unwrap();

    let expected: Vec<(u64, i32)> = (0..3)
        .flat_map(|round| (2..=4).map(move |id| (id, round)))
        .collect();
    assert_eq!(*log.borrow(), expected);
}

#[test]
fn test_threads_without_yield_run_to_completion_in_order() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&log);

    uthread::run(false, move || {
        for n in 0..4 {
            let log = Rc::clone(&shared);
            uthread::create(move || log.borrow_mut().push(n)).unwrap();
        }
    })
    .unwrap();

    assert_eq!(*log.borrow(), [0, 1, 2, 3]);
}

#[test]
fn test_ids_increase_from_one() {
    let ids = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&ids);

    uthread::run(false, move || {
        shared.borrow_mut().push(uthread::current().unwrap().id());
        for _ in 0..2 {
            let thread = uthread::create(|| {}).unwrap();
            shared.borrow_mut().push(thread.id());
        }
    })
    .unwrap();

    let ids = ids.borrow();
    assert_eq!(ids.iter().map(|id| id.as_u64()).collect::<Vec<_>>(), [1, 2, 3]);
    assert!(!ids.contains(&ThreadId::MAIN));
}

#[test]
fn test_entry_runs_on_its_own_thread() {
    let states = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&states);

    uthread::run(false, move || {
        let me = uthread::current().unwrap();
        shared.borrow_mut().push(uthread::state(me));
        let peer = uthread::create(|| {}).unwrap();
        shared.borrow_mut().push(uthread::state(peer));
    })
    .unwrap();

    assert_eq!(
        *states.borrow(),
        [Some(ThreadState::Running), Some(ThreadState::Ready)]
    );
}

#[test]
fn test_explicit_exit_skips_the_rest() {
    let reached = Rc::new(Cell::new(false));
    let after_exit = Rc::new(Cell::new(false));
    let (r, a) = (Rc::clone(&reached), Rc::clone(&after_exit));

    uthread::run(false, move || {
        r.set(true);
        if r.get() {
            uthread::exit();
        }
        a.set(true);
    })
    .unwrap();

    assert!(reached.get());
    assert!(!after_exit.get());
}

#[test]
fn test_exited_thread_is_reclaimed() {
    let gone = Rc::new(Cell::new(None));
    let shared = Rc::clone(&gone);

    uthread::run(false, move || {
        let child = uthread::create(|| {}).unwrap();
        // Let the child run and exit, then let the scheduler reclaim it
        uthread::yield_now();
        uthread::yield_now();
        shared.set(Some(uthread::state(child)));
    })
    .unwrap();

    assert_eq!(gone.get(), Some(None));
}

#[test]
fn test_block_and_unblock() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&log);

    uthread::run(false, move || {
        let sleeper_log = Rc::clone(&shared);
        let sleeper = uthread::create(move || {
            sleeper_log.borrow_mut().push("sleeping");
            uthread::block();
            sleeper_log.borrow_mut().push("woken");
        })
        .unwrap();

        uthread::yield_now();
        assert_eq!(uthread::state(sleeper), Some(ThreadState::Blocked));

        // Let the main loop take a turn with the sleeper parked
        uthread::yield_now();
        shared.borrow_mut().push("waking");
        uthread::unblock(sleeper).unwrap();
        assert_eq!(uthread::state(sleeper), Some(ThreadState::Ready));
    })
    .unwrap();

    assert_eq!(*log.borrow(), ["sleeping", "waking", "woken"]);
}

#[test]
fn test_unblock_rejects_ready_thread() {
    let outcome = Rc::new(Cell::new(false));
    let shared = Rc::clone(&outcome);

    uthread::run(false, move || {
        let peer = uthread::create(|| {}).unwrap();
        shared.set(matches!(uthread::unblock(peer), Err(Error::InvalidState(_))));
    })
    .unwrap();

    assert!(outcome.get());
}

#[test]
fn test_unblock_rejects_stale_handle() {
    let outcome = Rc::new(Cell::new(false));
    let shared = Rc::clone(&outcome);

    uthread::run(false, move || {
        let peer = uthread::create(|| {}).unwrap();
        for _ in 0..3 {
            uthread::yield_now();
        }
        shared.set(matches!(uthread::unblock(peer), Err(Error::InvalidArgument(_))));
    })
    .unwrap();

    assert!(outcome.get());
}

#[test]
fn test_lone_thread_keeps_running_across_yields() {
    let rounds = Rc::new(Cell::new(0));
    let shared = Rc::clone(&rounds);

    uthread::run(false, move || {
        for _ in 0..5 {
            uthread::yield_now();
            shared.set(shared.get() + 1);
        }
    })
    .unwrap();

    assert_eq!(rounds.get(), 5);
}

#[test]
fn test_threads_create_threads() {
    let depth = Rc::new(Cell::new(0));
    let shared = Rc::clone(&depth);

    fn spawn_chain(counter: Rc<Cell<u32>>, remaining: u32) {
        counter.set(counter.get() + 1);
        if remaining > 0 {
            uthread::create(move || spawn_chain(counter, remaining - 1)).unwrap();
        }
    }

    uthread::run(false, move || spawn_chain(shared, 20)).unwrap();
    assert_eq!(depth.get(), 21);
}

#[test]
fn test_nested_run_is_rejected() {
    let outcome = Rc::new(Cell::new(false));
    let shared = Rc::clone(&outcome);

    uthread::run(false, move || {
        let nested = uthread::run(false, || {});
        shared.set(matches!(nested, Err(Error::InvalidState(_))));
    })
    .unwrap();

    assert!(outcome.get());
}

#[test]
fn test_runs_back_to_back_restart_ids() {
    for _ in 0..3 {
        let id = Rc::new(Cell::new(0));
        let shared = Rc::clone(&id);
        uthread::run(false, move || shared.set(id_of_current())).unwrap();
        assert_eq!(id.get(), 1);
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = Config::default().with_stack_size(512);
    assert!(matches!(
        uthread::run_with_config(config, || {}),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_deep_recursion_fits_configured_stack() {
    fn depth(n: u64) -> u64 {
        let pad = [n; 16];
        if n == 0 { 0 } else { 1 + depth(n - 1) + pad[15] - n }
    }

    let result = Rc::new(Cell::new(0));
    let shared = Rc::clone(&result);
    let config = Config::default().with_stack_size(1024 * 1024);
    uthread::run_with_config(config, move || shared.set(depth(2000))).unwrap();
    assert_eq!(result.get(), 2000);
}

#[test]
fn test_panic_in_thread_reaches_run_caller() {
    let outcome = std::panic::catch_unwind(|| {
        uthread::run(false, || {
            uthread::create(|| panic!("boom")).unwrap();
        })
    });

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    assert!(uthread::current().is_none());
}
