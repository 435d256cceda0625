use crate::callback::CallbackTable;
use crate::queue::{BoxedOp, OpQueue};
use crate::timers::Timers;
use crate::waker::WakeHandlers;
use crate::{LogFilter, LogLevel, LogRecord, LogVisitor, LoopConfig, Share, TimerKey, Waker};
use qcell::QCellOwner;
use std::fmt::Arguments;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

static LOOP_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// A single-threaded event loop
///
/// This is the outer interface, owned by the thread that runs the
/// loop.  It contains the queues, timers and wake handlers, and
/// blocks the thread when there is nothing to do.  It derefs to
/// [`Core`], which is the part that registered functions also get
/// access to through their [`Cx`] context.
///
/// Another thread interrupts the blocking wait through a [`Waker`],
/// and callbacks are built on those: see [`Callback`].
///
/// An [`EventLoop`] is not `Send`.  Create it on the thread that is
/// going to run it, or use [`LoopThread`].
///
/// [`Callback`]: struct.Callback.html
/// [`Core`]: struct.Core.html
/// [`Cx`]: struct.Cx.html
/// [`EventLoop`]: struct.EventLoop.html
/// [`LoopThread`]: struct.LoopThread.html
/// [`Waker`]: struct.Waker.html
pub struct EventLoop {
    pub(crate) core: Core,
    parker: Arc<Parker>,
    spare_queue: Option<OpQueue<Core>>,
}

impl EventLoop {
    /// Create a loop with configuration taken from the environment,
    /// see [`LoopConfig::from_env`]
    ///
    /// [`LoopConfig::from_env`]: struct.LoopConfig.html#method.from_env
    pub fn new() -> Self {
        Self::with_config(LoopConfig::from_env())
    }

    /// Create a loop with the given configuration
    pub fn with_config(config: LoopConfig) -> Self {
        let parker = Arc::new(Parker::default());
        let unpark = parker.clone();
        let wake_handlers = WakeHandlers::new(Box::new(move || unpark.unpark()));
        Self {
            core: Core::new(config, wake_handlers),
            parker,
            spare_queue: Some(OpQueue::new()),
        }
    }

    /// Run the loop until it is stopped with [`Core::stop`], or until
    /// nothing could ever make it do anything again: no wake
    /// handlers, no timers and no queued work.  The stop request is
    /// cleared on return, so the loop may be run again.
    ///
    /// [`Core::stop`]: struct.Core.html#method.stop
    pub fn run(&mut self) {
        while !self.core.stopped && self.core.is_alive() {
            self.run_once(true);
        }
        self.core.stopped = false;
    }

    /// Run a single pass of the loop.  Returns `true` if there is
    /// work waiting for the next pass: idle items, or wakes that
    /// arrived after this pass collected them, such as those raised by
    /// the wake handlers it ran.
    ///
    /// A pass expires timers and runs the main queue, then runs the
    /// idle items that were queued before the pass started, then
    /// handles any wakes from other threads.  If `wait` is true and
    /// there is nothing left to do, the thread blocks until a wake
    /// arrives or the next timer is due, limited by
    /// [`LoopConfig::max_wait`].
    ///
    /// A pass stops early if [`Core::stop`] is called, except that the
    /// main queue is always run to exhaustion.
    ///
    /// [`Core::stop`]: struct.Core.html#method.stop
    /// [`LoopConfig::max_wait`]: struct.LoopConfig.html#structfield.max_wait
    pub fn run_once(&mut self, wait: bool) -> bool {
        self.run_queue(Instant::now());
        if self.core.stopped {
            return self.core.has_pending();
        }

        let idle = mem::take(&mut self.core.idle_queue);
        for op in idle {
            op(&mut self.core);
        }
        self.run_queue(Instant::now());

        if wait && !self.core.stopped && self.core.idle_queue.is_empty() && self.core.is_alive() {
            let max_wait = self.core.config.max_wait;
            let timeout = self
                .core
                .timers
                .next_expiry()
                .map(|t| t.saturating_duration_since(Instant::now()).min(max_wait))
                .unwrap_or(max_wait);
            self.parker.park(timeout);
        }

        self.core.poll_wake();
        self.run_queue(Instant::now());
        self.core.has_pending()
    }

    // Move time forward, expire timers onto the main queue, then run
    // the main queue until nothing more gets added.  Once stopped, no
    // more timers expire until the next `run`.
    fn run_queue(&mut self, now: Instant) {
        let mut alt = (self.spare_queue.take()).expect("Previous run_once call must have panicked");
        if now > self.core.now && !self.core.stopped {
            self.core.now = now;
            self.core.timers.advance(now, &mut self.core.queue);
        }
        loop {
            mem::swap(&mut self.core.queue, &mut alt);
            if alt.is_empty() {
                break;
            }
            alt.run(&mut self.core);
        }
        self.spare_queue = Some(alt);
    }

    /// Set the logger and logging level
    ///
    /// The logger is called synchronously for every [`Core::log`]
    /// call whose level is enabled by `filter`.  It gets a [`Core`]
    /// reference, so it can forward records to a [`Share`] or defer
    /// work.  It may equally pass them on to an external logging
    /// framework.  Without a logger, logging is a no-op.
    ///
    /// [`Core::log`]: struct.Core.html#method.log
    /// [`Core`]: struct.Core.html
    /// [`Share`]: struct.Share.html
    pub fn set_logger(
        &mut self,
        filter: LogFilter,
        logger: impl FnMut(&mut Core, &LogRecord<'_>) + 'static,
    ) {
        self.core.log_filter = filter;
        self.core.logger = Some(Box::new(logger));
    }

    /// The configuration this loop was created with
    pub fn config(&self) -> &LoopConfig {
        &self.core.config
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for EventLoop {
    type Target = Core;

    fn deref(&self) -> &Core {
        &self.core
    }
}

impl DerefMut for EventLoop {
    fn deref_mut(&mut self) -> &mut Core {
        &mut self.core
    }
}

// Poll-waker for a loop thread blocked in `run_once`.  `woken` stays
// set until the next park, so a wake that arrives whilst the loop is
// busy is not lost.
#[derive(Default)]
struct Parker {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn unpark(&self) {
        *self.woken.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_one();
    }

    fn park(&self, timeout: Duration) {
        let guard = self.woken.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        *guard = false;
    }
}

/// Core operations available from both [`EventLoop`] and [`Cx`]
///
/// Both [`EventLoop`] and [`Cx`] references auto-dereference to a
/// [`Core`] reference, so either can be used wherever a [`Core`]
/// reference is required.
///
/// [`Core`]: struct.Core.html
/// [`Cx`]: struct.Cx.html
/// [`EventLoop`]: struct.EventLoop.html
pub struct Core {
    pub(crate) loop_id: u64,
    now: Instant,
    queue: OpQueue<Core>,
    idle_queue: Vec<BoxedOp<Core>>,
    timers: Timers<Core>,
    stopped: bool,
    wake_handlers: WakeHandlers,
    pub(crate) sharecell_owner: QCellOwner,
    pub(crate) callbacks: CallbackTable,
    pub(crate) config: LoopConfig,
    log_filter: LogFilter,
    logger: Option<Box<dyn FnMut(&mut Core, &LogRecord<'_>)>>,
}

impl Core {
    fn new(config: LoopConfig, wake_handlers: WakeHandlers) -> Self {
        Self {
            loop_id: LOOP_ID_SEQ.fetch_add(1, Ordering::Relaxed),
            now: Instant::now(),
            queue: OpQueue::new(),
            idle_queue: Vec::new(),
            timers: Timers::new(),
            stopped: false,
            wake_handlers,
            sharecell_owner: QCellOwner::new(),
            callbacks: CallbackTable::new(),
            config,
            log_filter: LogFilter::new(),
            logger: None,
        }
    }

    /// Our view of the current time, updated at each step of a loop
    /// pass.  Use this in preference to `Instant::now()` when working
    /// out timer expiries.
    #[inline]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Request that [`EventLoop::run`] return.  The current pass
    /// completes running its main queue first.
    ///
    /// [`EventLoop::run`]: struct.EventLoop.html#method.run
    #[inline]
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Test whether a stop has been requested and not yet acted on
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Defer an operation to be executed later.  It is put on the
    /// main queue, and run as soon all operations preceding it have
    /// been executed.
    #[inline]
    pub fn defer(&mut self, f: impl FnOnce(&mut Core) + 'static) {
        self.queue.push(f);
    }

    /// Queue an operation to run on the next loop pass, after the
    /// main queue has been cleared.  Whilst anything is queued here
    /// the loop doesn't block.  Used to spread a long run of work
    /// over several passes, so that timers and wakes still get a
    /// look in.
    #[inline]
    pub fn idle(&mut self, f: impl FnOnce(&mut Core) + 'static) {
        self.idle_queue.push(Box::new(f));
    }

    /// Delay an operation to be executed after a duration has passed.
    /// Returns a key that can be used to delete the timer.
    ///
    /// Panics if the expiry can't be represented as an `Instant`.  For
    /// a caller-supplied duration, check with `now().checked_add(dur)`
    /// and use [`Core::timer_add`].
    ///
    /// [`Core::timer_add`]: struct.Core.html#method.timer_add
    #[inline]
    pub fn after(&mut self, dur: Duration, f: impl FnOnce(&mut Core) + 'static) -> TimerKey {
        self.timers.add(self.now + dur, Box::new(f))
    }

    /// Add a timer that expires at the given time.  Returns a key
    /// that can be used to delete the timer.
    #[inline]
    pub fn timer_add(&mut self, expiry: Instant, f: impl FnOnce(&mut Core) + 'static) -> TimerKey {
        self.timers.add(expiry, Box::new(f))
    }

    /// Delete a timer.  Returns `true` on success, `false` if the
    /// timer no longer exists (i.e. it expired or was deleted)
    #[inline]
    pub fn timer_del(&mut self, key: TimerKey) -> bool {
        self.timers.del(key)
    }

    /// Register a wake handler callback, and obtain a [`Waker`]
    /// instance which can be passed to another thread.  The wake
    /// handler always runs on this loop's thread.  When
    /// [`Waker::wake`] is called in another thread, the blocked loop
    /// is woken up and the handler runs on its next pass.  Many
    /// wakes around the same time share one loop wake-up.
    ///
    /// The handler is called with arguments of `(core, deleted)`.
    /// There is a small chance of a spurious call, so the handler
    /// must be ready for that.  If `deleted` is true then the
    /// [`Waker`] was dropped or deleted with [`Core::waker_del`],
    /// and this handler is just about to be dropped.
    ///
    /// [`Core::waker_del`]: struct.Core.html#method.waker_del
    /// [`Waker::wake`]: struct.Waker.html#method.wake
    /// [`Waker`]: struct.Waker.html
    pub fn waker(&mut self, cb: impl FnMut(&mut Core, bool) + 'static) -> Waker {
        self.wake_handlers.add(cb)
    }

    /// Delete the wake handler belonging to a [`Waker`] immediately,
    /// without waiting for the [`Waker`] to be dropped.  All further
    /// wakes fail.  The handler gets its final `deleted` call before
    /// this returns, or if the handler is the one currently running,
    /// as soon as it returns.  Returns `false` if the [`Waker`]
    /// doesn't belong to this loop, was already deleted, or its
    /// handler is currently running.
    ///
    /// [`Waker`]: struct.Waker.html
    pub fn waker_del(&mut self, waker: &Waker) -> bool {
        match self.wake_handlers.del(waker) {
            Some(mut cb) => {
                cb(self, true);
                true
            }
            None => false,
        }
    }

    // Run wake handlers for the wakes received since the last call.
    // Handlers are lent out of their slots for the call, since they
    // need a `Core` reference.
    fn poll_wake(&mut self) {
        for bit in self.wake_handlers.drop_list() {
            if let Some(mut cb) = self.wake_handlers.del_bit(bit, None) {
                cb(self, true);
            }
        }
        for bit in self.wake_handlers.wake_list() {
            if let Some((mut cb, flag)) = self.wake_handlers.handler_borrow(bit) {
                cb(self, false);
                if let Some(mut cb) = self.wake_handlers.handler_restore(bit, &flag, cb) {
                    cb(self, true);
                }
            }
        }
    }

    fn has_pending(&self) -> bool {
        !self.idle_queue.is_empty() || self.wake_handlers.has_pending()
    }

    // Whether anything could still cause work on this loop
    fn is_alive(&self) -> bool {
        self.wake_handlers.len() > 0
            || !self.timers.is_empty()
            || !self.queue.is_empty()
            || !self.idle_queue.is_empty()
    }

    /// Borrow two [`Share`] instances mutably at the same time.  This
    /// will panic if they are the same instance.
    ///
    /// [`Share`]: struct.Share.html
    #[inline]
    pub fn share_rw2<'a, T, U>(
        &'a mut self,
        s1: &'a Share<T>,
        s2: &'a Share<U>,
    ) -> (&'a mut T, &'a mut U) {
        self.sharecell_owner.rw2(&s1.rc, &s2.rc)
    }

    /// Log a log-record to the current logger, if one is active and
    /// if the log-level is enabled.  Otherwise it is ignored.
    #[inline]
    pub fn log(
        &mut self,
        level: LogLevel,
        target: &str,
        fmt: Arguments<'_>,
        kvscan: impl Fn(&mut dyn LogVisitor),
    ) {
        if self.log_check(level) {
            if let Some(mut logger) = self.logger.take() {
                logger(
                    self,
                    &LogRecord {
                        level,
                        target,
                        fmt,
                        kvscan: &kvscan,
                    },
                );
                self.logger = Some(logger);
            }
        }
    }

    /// Check whether a log-record with the given [`LogLevel`] should
    /// be logged
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    pub fn log_check(&self, level: LogLevel) -> bool {
        self.logger.is_some() && self.log_filter.allows(level)
    }

    // For testing
    #[cfg(test)]
    pub(crate) fn wake_handler_count(&self) -> usize {
        self.wake_handlers.len()
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        // Records queued on the dispatcher hold callback handles,
        // which hold the dispatcher, so the queue must be emptied
        // explicitly to free them
        self.dispatcher_teardown();
    }
}
