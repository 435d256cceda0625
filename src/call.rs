use crate::{Core, Error, Result, Waker};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A pending queued call, ready to run on the target loop.  It owns
/// the payload and everything needed to deliver it.
pub(crate) type CallOp = Box<dyn FnOnce(&mut Core) + Send + 'static>;

struct Call {
    next: Option<Box<Call>>,
    op: CallOp,
}

/// Singly-linked list of calls.  New calls are prepended, and the
/// oldest is taken from the tail, so calls come out in the order they
/// went in.
pub(crate) struct CallQueue {
    head: Option<Box<Call>>,
    len: usize,
}

impl CallQueue {
    pub fn new() -> Self {
        Self { head: None, len: 0 }
    }

    fn push(&mut self, mut call: Box<Call>) {
        call.next = self.head.take();
        self.head = Some(call);
        self.len += 1;
    }

    /// Unlink the oldest call
    pub fn pop_oldest(&mut self) -> Option<CallOp> {
        let mut link = &mut self.head;
        while link.as_ref().map_or(false, |call| call.next.is_some()) {
            link = &mut link.as_mut().expect("Call link checked above").next;
        }
        let call = link.take()?;
        self.len -= 1;
        Some(call.op)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl Drop for CallQueue {
    // Unlink one at a time, or a long queue overflows the stack
    fn drop(&mut self) {
        let mut link = self.head.take();
        while let Some(mut call) = link {
            link = call.next.take();
        }
    }
}

/// The queue and wake signal for all the queued callbacks on one loop.
/// Producers on any thread submit calls, and the loop thread takes
/// them off one at a time.
pub(crate) struct Dispatcher {
    queue: Mutex<CallQueue>,
    waker: Waker,
}

impl Dispatcher {
    pub fn new(waker: Waker) -> Self {
        Self {
            queue: Mutex::new(CallQueue::new()),
            waker,
        }
    }

    // The lock is only ever held to splice a single link
    fn lock(&self) -> MutexGuard<'_, CallQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a call and wake the loop.  If the wake fails, the call
    /// stays queued.  Once the loop side has gone for good it will
    /// never be collected, so then everything queued is dropped.
    pub fn submit(&self, op: CallOp) -> Result<()> {
        let call = Box::new(Call { next: None, op });
        self.lock().push(call);
        match self.waker.wake() {
            Err(Error::WakeSignalFailure) if self.waker.is_closed() => {
                self.discard();
                Err(Error::WakeSignalFailure)
            }
            rv => rv,
        }
    }

    pub fn pop(&self) -> Option<CallOp> {
        self.lock().pop_oldest()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Drop everything queued, returning how many calls were dropped.
    /// Payloads are dropped outside the lock, since dropping one may
    /// submit another call.
    pub fn discard(&self) -> usize {
        let queue = std::mem::replace(&mut *self.lock(), CallQueue::new());
        let count = queue.len();
        drop(queue);
        count
    }
}
