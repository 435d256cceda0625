//! Test the loop itself: queues, timers, stop and blocking

use super::{new_loop, settle};
use crate::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn defer_then_idle() {
    let mut lp = new_loop();
    let log = Rc::new(RefCell::new(Vec::new()));

    let l = log.clone();
    lp.idle(move |_| l.borrow_mut().push("idle"));
    let l = log.clone();
    lp.defer(move |core| {
        l.borrow_mut().push("defer1");
        let l = l.clone();
        core.defer(move |_| l.borrow_mut().push("defer2"));
    });

    assert!(!lp.run_once(false));
    assert_eq!(*log.borrow(), ["defer1", "defer2", "idle"]);
}

#[test]
fn idle_spreads_over_passes() {
    fn again(core: &mut Core, count: Rc<Cell<u32>>) {
        count.set(count.get() + 1);
        if count.get() < 3 {
            core.idle(move |core| again(core, count));
        }
    }

    let mut lp = new_loop();
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    lp.idle(move |core| again(core, c));

    assert!(lp.run_once(false));
    assert_eq!(1, count.get());
    assert!(lp.run_once(false));
    assert_eq!(2, count.get());
    assert!(!lp.run_once(false));
    assert_eq!(3, count.get());
}

#[test]
fn timers_expire_in_order() {
    let mut lp = new_loop();
    let fired = Rc::new(RefCell::new(Vec::new()));

    let f = fired.clone();
    let last = lp.after(Duration::from_millis(30), move |_| f.borrow_mut().push(2));
    let f = fired.clone();
    lp.after(Duration::from_millis(10), move |_| f.borrow_mut().push(1));
    let f = fired.clone();
    let key = lp.after(Duration::from_millis(20), move |_| f.borrow_mut().push(99));
    assert!(lp.timer_del(key));
    assert!(!lp.timer_del(key));

    // Returns once there is nothing left to wait for
    lp.run();
    assert!(Instant::now() >= last.expiry());
    assert_eq!(*fired.borrow(), [1, 2]);
}

#[test]
fn timer_add_absolute() {
    let mut lp = new_loop();
    let fired = Rc::new(Cell::new(false));
    let f = fired.clone();
    let expiry = lp.now() + Duration::from_millis(5);
    let key = lp.timer_add(expiry, move |core| {
        f.set(true);
        assert!(core.now() >= expiry);
    });
    assert_eq!(expiry, key.expiry());
    lp.run();
    assert!(fired.get());
}

#[test]
fn stop_ends_run() {
    let mut lp = new_loop();
    // Keeps the loop alive until deleted
    let waker = lp.waker(|_, _| ());

    lp.after(Duration::from_millis(5), |core| {
        core.stop();
        assert!(core.is_stopped());
    });
    lp.run();
    assert!(!lp.is_stopped());
    assert_eq!(1, lp.wake_handler_count());

    // The drop wakes the loop, which then has nothing left
    drop(waker);
    lp.run();
    assert_eq!(0, lp.wake_handler_count());
}

#[test]
fn run_once_without_work() {
    let mut lp = new_loop();
    assert!(!lp.run_once(false));
    // Nothing could wake it, so it doesn't block
    assert!(!lp.run_once(true));
    settle(&mut lp);
}

#[test]
fn config_is_kept() {
    let lp = EventLoop::with_config(
        LoopConfig::new()
            .drain(DrainPolicy::WholeQueue)
            .max_wait(Duration::from_millis(250)),
    );
    assert_eq!(DrainPolicy::WholeQueue, lp.config().drain);
    assert_eq!(Duration::from_millis(250), lp.config().max_wait);
}

// A wait with nothing due is cut short by `max_wait`
#[test]
fn max_wait_limits_block() {
    let mut lp = EventLoop::with_config(LoopConfig::new().max_wait(Duration::from_millis(20)));
    let _waker = lp.waker(|_, _| ());
    let start = Instant::now();
    lp.run_once(true);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(20));
    assert!(elapsed < Duration::from_secs(10));
}

// A timer due whilst the pass that stopped the loop is running waits
// for the next `run`
#[test]
fn no_timers_after_stop() {
    let mut lp = new_loop();
    let fired = Rc::new(Cell::new(false));
    let waker = lp.waker(|core, deleted| {
        if !deleted {
            std::thread::sleep(Duration::from_millis(40));
            core.stop();
        }
    });
    let f = fired.clone();
    lp.after(Duration::from_millis(20), move |core| {
        f.set(true);
        core.stop();
    });

    waker.wake().unwrap();
    lp.run();
    assert!(!fired.get());

    lp.run();
    assert!(fired.get());
}
