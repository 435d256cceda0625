use crate::queue::{BoxedOp, OpQueue};
use std::collections::BTreeMap;
use std::mem;
use std::time::Instant;

/// Timer key for a one-shot timer
///
/// Returned by [`Core::after`] or [`Core::timer_add`].  It can be
/// used to delete the timer with [`Core::timer_del`].  It is plain
/// `Copy` data.  The key is only meaningful on the loop that issued
/// it.
///
/// [`Core::after`]: struct.Core.html#method.after
/// [`Core::timer_add`]: struct.Core.html#method.timer_add
/// [`Core::timer_del`]: struct.Core.html#method.timer_del
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct TimerKey {
    expiry: Instant,
    // Keeps keys unique, and timers with equal expiry in the order
    // they were added
    seq: u64,
}

impl TimerKey {
    /// The time at which this timer expires (or expired)
    pub fn expiry(&self) -> Instant {
        self.expiry
    }
}

// One-shot timers, ordered by expiry
pub(crate) struct Timers<S: 'static> {
    queue: BTreeMap<TimerKey, BoxedOp<S>>,
    seq: u64,
}

impl<S> Timers<S> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn add(&mut self, expiry: Instant, op: BoxedOp<S>) -> TimerKey {
        self.seq = self.seq.wrapping_add(1);
        let key = TimerKey {
            expiry,
            seq: self.seq,
        };
        self.queue.insert(key, op);
        key
    }

    /// Returns `false` if the timer already expired or was deleted
    pub fn del(&mut self, key: TimerKey) -> bool {
        self.queue.remove(&key).is_some()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.queue.keys().next().map(|k| k.expiry)
    }

    /// Move every timer that has expired by `now` onto `out`, in
    /// expiry order
    pub fn advance(&mut self, now: Instant, out: &mut OpQueue<S>) {
        if self.next_expiry().map_or(true, |t| t > now) {
            return;
        }
        let pending = self.queue.split_off(&TimerKey {
            expiry: now,
            seq: u64::MAX,
        });
        for (_, op) in mem::replace(&mut self.queue, pending) {
            out.push_box(op);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
