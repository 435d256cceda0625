mod callback;
mod core;

use crate::{EventLoop, LoopConfig};
use std::sync::{Arc, Condvar, Mutex};

/// Loop with library defaults, unaffected by the environment
pub(crate) fn new_loop() -> EventLoop {
    EventLoop::with_config(LoopConfig::new())
}

/// Run passes without blocking until there is no idle work left
pub(crate) fn settle(lp: &mut EventLoop) {
    while lp.run_once(false) {}
}

/// Simple channel for sending and waiting for notification events.
/// Returns (send, recv) closures.
pub(crate) fn notify_channel() -> (impl Fn() + Send + Sync, impl FnMut() + Send + Sync) {
    let pair1 = Arc::new((Mutex::new(0_usize), Condvar::new()));
    let pair2 = pair1.clone();
    let mut count = 0;
    (
        move || {
            let mut lock = pair1.0.lock().unwrap();
            *lock = lock.wrapping_add(1);
            pair1.1.notify_one();
        },
        move || {
            let mut lock = pair2.0.lock().unwrap();
            while *lock == count {
                lock = pair2.1.wait(lock).unwrap();
            }
            count = *lock;
        },
    )
}
