//! # Inter-thread waking
//!
//! A loop has a single poll-waker: the means by which another thread
//! interrupts the loop while it is blocked waiting for its next
//! timer.  This module converts that one poll-waker into as many
//! independent [`Waker`] instances as are needed, each with its own
//! wake handler that runs in the loop thread.
//!
//! ## Coalescing
//!
//! Each [`Waker`] has a `pending` flag.  The first `wake` after the
//! loop last collected this waker sets the flag and pushes the
//! waker's slot number onto a short mutex-protected list.  Any
//! further `wake` calls before the loop collects it cost a single
//! atomic swap and nothing else.  The poll-waker itself is only
//! called when the list goes from empty to non-empty, so a busy loop
//! accumulates many wakes per poll-wake.  The loop clears the
//! `pending` flag before it calls the handler, so a wake racing with
//! the handler gives at worst one spurious extra call, never a lost
//! one.  Wake handlers must therefore tolerate spurious calls.
//!
//! ## Deletion
//!
//! A wake handler is deleted either explicitly from the loop thread
//! with [`Core::waker_del`], or when the [`Waker`] is dropped, in
//! which case a notification is pushed onto a drop list and handled
//! on the loop thread at the next wake.  Either way the handler gets
//! one last call with `deleted` set to `true`.  After deletion, or
//! after the loop itself is dropped, `wake` returns
//! [`Error::WakeSignalFailure`].
//!
//! [`Core::waker_del`]: struct.Core.html#method.waker_del
//! [`Error::WakeSignalFailure`]: enum.Error.html#variant.WakeSignalFailure
//! [`Waker`]: struct.Waker.html

use crate::{Core, Error, Result};
use slab::Slab;
use std::convert::TryFrom;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) type BoxFnMutCB = Box<dyn FnMut(&mut Core, bool) + 'static>;

// `pending` is set by a `wake` and cleared by the loop as it collects
// the wake.  The swap on one side has to be ordered against the store
// on the other or a wake could be stranded, hence SeqCst.
const ORDERING: Ordering = Ordering::SeqCst;

// State shared between a `Waker` and its slot in the loop
#[derive(Default)]
pub(crate) struct WakeFlag {
    pending: AtomicBool,
    deleted: AtomicBool,
}

struct Entry {
    flag: Arc<WakeFlag>,
    cb: Option<BoxFnMutCB>,
}

#[derive(Default)]
struct Lists {
    wake: Vec<u32>,
    drop: Vec<u32>,
    closed: bool, // Set when the loop is dropped
}

/// Interface to the poll-waker of the loop thread
struct PollWaker {
    lists: Mutex<Lists>,
    waker: Box<dyn Fn() + Send + Sync + 'static>,
}

impl PollWaker {
    fn lock(&self) -> MutexGuard<'_, Lists> {
        // Critical sections are just Vec pushes and swaps
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Push a slot number onto one of the lists, and call the
    // poll-waker if this is the first entry since the last collection
    fn push(&self, bit: u32, select: fn(&mut Lists) -> &mut Vec<u32>) -> Result<()> {
        let mut lists = self.lock();
        if lists.closed {
            return Err(Error::WakeSignalFailure);
        }
        let first = lists.wake.is_empty() && lists.drop.is_empty();
        select(&mut *lists).push(bit);
        drop(lists);
        if first {
            (self.waker)();
        }
        Ok(())
    }
}

pub(crate) struct WakeHandlers {
    pollwaker: Arc<PollWaker>,
    slab: Slab<Entry>,
}

impl WakeHandlers {
    pub fn new(waker: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            pollwaker: Arc::new(PollWaker {
                lists: Mutex::new(Lists::default()),
                waker,
            }),
            slab: Slab::new(),
        }
    }

    /// Get a list of all the wake handlers that need to run, clearing
    /// their pending flags
    pub fn wake_list(&mut self) -> Vec<u32> {
        let list = mem::take(&mut self.pollwaker.lock().wake);
        for bit in &list {
            // A stale slot number (handler deleted since the wake)
            // gets skipped here, and again when borrowing
            if let Some(entry) = self.slab.get(*bit as usize) {
                entry.flag.pending.store(false, ORDERING);
            }
        }
        list
    }

    /// Test whether any wakes or drops are waiting to be collected
    pub fn has_pending(&self) -> bool {
        let lists = self.pollwaker.lock();
        !lists.wake.is_empty() || !lists.drop.is_empty()
    }

    /// Get the list of handlers whose `Waker` has been dropped
    pub fn drop_list(&mut self) -> Vec<u32> {
        mem::take(&mut self.pollwaker.lock().drop)
    }

    /// Borrows a wake handler from its slot, leaving `None` there.
    /// Panics if a handler has been borrowed twice.  Returns `None`
    /// if the slot is now unoccupied, i.e. the handler was deleted.
    pub fn handler_borrow(&mut self, bit: u32) -> Option<(BoxFnMutCB, Arc<WakeFlag>)> {
        let entry = self.slab.get_mut(bit as usize)?;
        match entry.cb.take() {
            Some(cb) => Some((cb, entry.flag.clone())),
            None => panic!("Wake handler has been borrowed from its slot twice"),
        }
    }

    /// Restores a borrowed wake handler.  If the handler was deleted
    /// whilst it was borrowed, e.g. a wake handler that closed its
    /// own callback, then it is handed back so that the caller can
    /// give it its final `deleted` call.
    pub fn handler_restore(
        &mut self,
        bit: u32,
        flag: &WakeFlag,
        cb: BoxFnMutCB,
    ) -> Option<BoxFnMutCB> {
        if flag.deleted.load(ORDERING) {
            return Some(cb);
        }
        let entry = self
            .slab
            .get_mut(bit as usize)
            .expect("Live wake handler slot unexpectedly missing");
        if entry.cb.replace(cb).is_some() {
            panic!("Wake handler slot occupied by another handler during wake handler call");
        }
        None
    }

    /// Add a wake handler and return a [`Waker`] to pass to another
    /// thread to trigger it
    ///
    /// [`Waker`]: struct.Waker.html
    pub fn add(&mut self, cb: impl FnMut(&mut Core, bool) + 'static) -> Waker {
        let flag = Arc::new(WakeFlag::default());
        let bit = u32::try_from(self.slab.insert(Entry {
            flag: flag.clone(),
            cb: Some(Box::new(cb)),
        }))
        .expect("Exceeded 2^32 Waker instances");
        Waker {
            bit,
            flag,
            pollwaker: self.pollwaker.clone(),
        }
    }

    /// Delete the handler for a `Waker` belonging to this loop.
    /// Returns the handler if it was found and not currently
    /// borrowed.  The returned handler should be called with a
    /// `deleted` argument of `true`.
    pub fn del(&mut self, waker: &Waker) -> Option<BoxFnMutCB> {
        if !Arc::ptr_eq(&waker.pollwaker, &self.pollwaker) {
            return None;
        }
        self.del_bit(waker.bit, Some(&waker.flag))
    }

    /// Delete by slot number, as found on the drop list
    pub fn del_bit(&mut self, bit: u32, flag: Option<&Arc<WakeFlag>>) -> Option<BoxFnMutCB> {
        let matches = match (self.slab.get(bit as usize), flag) {
            (Some(entry), Some(flag)) => Arc::ptr_eq(&entry.flag, flag),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        let entry = self.slab.remove(bit as usize);
        entry.flag.deleted.store(true, ORDERING);
        entry.cb
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.slab.len()
    }
}

impl Drop for WakeHandlers {
    fn drop(&mut self) {
        self.pollwaker.lock().closed = true;
        for (_, entry) in self.slab.iter() {
            entry.flag.deleted.store(true, ORDERING);
        }
    }
}

/// Used to schedule a wake handler to be called in the loop thread
///
/// Obtain an instance using [`Core::waker`], and pass it to the
/// thread that needs to wake the loop.  This primitive is normally
/// used in conjunction with a queue or some other shared state, to
/// alert a wake handler in the loop thread that there is something
/// new that needs attention.  It is what queued and coalesced
/// callbacks are built on.
///
/// Repeated wakes before the loop gets around to the handler
/// collapse into one handler call.
///
/// When this is dropped without having been deleted, a final call to
/// the wake handler in the loop thread is scheduled with the
/// `deleted` argument set to true, and then the wake handler is
/// removed.
///
/// [`Core::waker`]: struct.Core.html#method.waker
pub struct Waker {
    bit: u32,
    flag: Arc<WakeFlag>,
    pollwaker: Arc<PollWaker>,
}

impl Waker {
    /// Schedule a call to the corresponding wake handler in the loop
    /// thread, if it is not already scheduled.  If it is already
    /// scheduled this is a single atomic operation.  Never blocks
    /// beyond a brief uncontended lock.
    ///
    /// Fails with [`Error::WakeSignalFailure`] if the handler has
    /// been deleted or the loop has been dropped.
    ///
    /// [`Error::WakeSignalFailure`]: enum.Error.html#variant.WakeSignalFailure
    pub fn wake(&self) -> Result<()> {
        if self.flag.deleted.load(ORDERING) {
            return Err(Error::WakeSignalFailure);
        }
        if self.flag.pending.swap(true, ORDERING) {
            return Ok(());
        }
        self.pollwaker.push(self.bit, |lists| &mut lists.wake)
    }

    /// Test whether the wake handler has been deleted, or the loop
    /// dropped.  Once this returns `true`, all further wakes fail.
    pub fn is_closed(&self) -> bool {
        self.flag.deleted.load(ORDERING)
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        if !self.flag.deleted.load(ORDERING) {
            // Fails only if the loop has already gone, in which case
            // there is nothing left to clean up
            let _ = self.pollwaker.push(self.bit, |lists| &mut lists.drop);
        }
    }
}
