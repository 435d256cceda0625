use crate::call::{CallOp, Dispatcher};
use crate::log::LOG_TARGET;
use crate::{Core, DrainPolicy, Error, LogLevel, Result, Waker};
use std::any::Any;
use std::collections::HashMap;
use std::convert::{Infallible, TryFrom};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

static CALLBACK_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Delivery mode of a [`Callback`], fixed at registration
///
/// [`Callback`]: struct.Callback.html
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    /// Every fire is delivered, in the order fired.  All the queued
    /// callbacks on a loop share one call queue and one wake signal.
    Queued,

    /// Fires overwrite a single pending payload.  A burst of fires
    /// before the loop gets around to it is delivered once, with the
    /// latest payload.  There is no response path.
    Coalesced,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Coalesced => "coalesced",
        }
    }
}

impl TryFrom<i32> for Mode {
    type Error = Error;

    /// `0` is [`Mode::Queued`], `1` is [`Mode::Coalesced`]
    ///
    /// [`Mode::Coalesced`]: enum.Mode.html#variant.Coalesced
    /// [`Mode::Queued`]: enum.Mode.html#variant.Queued
    fn try_from(mode: i32) -> Result<Self> {
        match mode {
            0 => Ok(Self::Queued),
            1 => Ok(Self::Coalesced),
            _ => Err(Error::InvalidArgument("unrecognised callback mode")),
        }
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

enum Route<P> {
    Queued {
        dispatcher: Arc<Dispatcher>,
        master: bool,
    },
    Coalesced {
        latest: Mutex<Option<P>>,
        waker: Waker,
    },
}

struct Inner<P> {
    id: u64,
    loop_id: u64,
    closed: AtomicBool,
    route: Route<P>,
}

impl<P> Inner<P> {
    fn latest(latest: &Mutex<Option<P>>) -> MutexGuard<'_, Option<P>> {
        latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> Drop for Inner<P> {
    fn drop(&mut self) {
        // Every handle to an unclosed queued callback has gone.  The
        // registration is released on the loop thread, through the
        // dispatcher.  A coalesced callback gets the same from its
        // `Waker` being dropped.
        if let Route::Queued { dispatcher, .. } = &self.route {
            if !self.closed.load(Ordering::SeqCst) {
                let id = self.id;
                let weak = Arc::downgrade(dispatcher);
                let _ = dispatcher.submit(Box::new(move |core: &mut Core| {
                    if core.is_current_dispatcher(&weak) {
                        core.callback_release(id, Mode::Queued);
                    }
                }));
            }
        }
    }
}

/// Handle for a function registered on a loop, callable from any
/// thread
///
/// The function runs on the loop it was registered on, one call at a
/// time, never concurrently with anything else on that loop.  `P` is
/// the payload, which is moved to the loop thread, and `R` is the
/// result.  In [`Mode::Queued`] the result can be passed on to
/// another callback with [`Callback::fire_notify`], or waited for
/// with [`Callback::fire_sync`].
///
/// The handle is cheap to clone and can be sent between threads.
/// Dropping every clone without calling [`Callback::close`] releases
/// the registration later, on the loop thread.
///
/// [`Callback::close`]: struct.Callback.html#method.close
/// [`Callback::fire_notify`]: struct.Callback.html#method.fire_notify
/// [`Callback::fire_sync`]: struct.Callback.html#method.fire_sync
/// [`Mode::Queued`]: enum.Mode.html#variant.Queued
pub struct Callback<P, R = ()> {
    inner: Arc<Inner<P>>,
    _result: PhantomData<fn() -> R>,
}

impl<P, R> Clone for Callback<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _result: PhantomData,
        }
    }
}

impl<P: Send + 'static, R: 'static> Callback<P, R> {
    /// Register `f` on the loop and return a handle to call it.  Must
    /// be called on the loop's own thread, which is guaranteed by
    /// needing the [`Core`].
    ///
    /// `mode` is a [`Mode`], or an `i32` as accepted by
    /// `Mode::try_from`, which fails with
    /// [`Error::InvalidArgument`] for an unknown value.
    ///
    /// The first queued callback on a loop founds the loop's
    /// dispatcher and reports [`Callback::is_master`].  Queued
    /// callbacks registered after it share the dispatcher's queue and
    /// wake signal.  The dispatcher lasts until every queued callback
    /// on the loop has been closed.
    ///
    /// [`Callback::is_master`]: struct.Callback.html#method.is_master
    /// [`Core`]: struct.Core.html
    /// [`Error::InvalidArgument`]: enum.Error.html#variant.InvalidArgument
    /// [`Mode`]: enum.Mode.html
    pub fn init<M>(
        core: &mut Core,
        mode: M,
        f: impl FnMut(&mut Cx<'_, P, R>, P) -> R + 'static,
    ) -> Result<Self>
    where
        M: TryInto<Mode>,
        Error: From<M::Error>,
    {
        let mode = mode.try_into()?;
        let id = CALLBACK_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        let loop_id = core.loop_id;
        let inner = match mode {
            Mode::Queued => {
                let (dispatcher, master) = core.dispatcher_join();
                Arc::new(Inner {
                    id,
                    loop_id,
                    closed: AtomicBool::new(false),
                    route: Route::Queued { dispatcher, master },
                })
            }
            Mode::Coalesced => Arc::new_cyclic(|weak: &Weak<Inner<P>>| {
                let weak = weak.clone();
                let waker = core.waker(move |core, deleted| {
                    if deleted {
                        core.callbacks.handlers.remove(&id);
                    } else if let Some(inner) = weak.upgrade() {
                        core.deliver_latest::<P, R>(Callback {
                            inner,
                            _result: PhantomData,
                        });
                    }
                });
                Inner {
                    id,
                    loop_id,
                    closed: AtomicBool::new(false),
                    route: Route::Coalesced {
                        latest: Mutex::new(None),
                        waker,
                    },
                }
            }),
        };
        core.callbacks
            .handlers
            .insert(id, Some(Box::new(Handler::<P, R>(Box::new(f)))));

        let cb = Self {
            inner,
            _result: PhantomData,
        };
        let master = cb.is_master();
        core.log(
            LogLevel::Debug,
            LOG_TARGET,
            format_args!("callback registered"),
            |kv| {
                kv.kv_u64("id", id);
                kv.kv_str("mode", mode.name());
                kv.kv_bool("master", master);
            },
        );
        Ok(cb)
    }

    /// Call the function on its loop with `payload`.  Never blocks.
    ///
    /// In [`Mode::Queued`] every fire is delivered, in fire order.  In
    /// [`Mode::Coalesced`] the payload replaces any payload not yet
    /// delivered, which is dropped.
    ///
    /// Fails with [`Error::Closed`] if the callback has been closed,
    /// or [`Error::WakeSignalFailure`] if the loop couldn't be woken.
    /// In the latter case a queued call is left in the queue, so it
    /// may or may not be delivered.
    ///
    /// [`Error::Closed`]: enum.Error.html#variant.Closed
    /// [`Error::WakeSignalFailure`]: enum.Error.html#variant.WakeSignalFailure
    /// [`Mode::Coalesced`]: enum.Mode.html#variant.Coalesced
    /// [`Mode::Queued`]: enum.Mode.html#variant.Queued
    pub fn fire(&self, payload: P) -> Result<()> {
        self.submit(payload, None)
    }

    /// Call the function on its loop with `payload`, then pass its
    /// result on to `notify`, which may be on any loop.  Only
    /// available in [`Mode::Queued`]; a coalesced callback fails with
    /// [`Error::InvalidArgument`] before anything is queued.
    ///
    /// If the notify fire fails, on the target loop, the result is
    /// dropped and the failure logged.
    ///
    /// [`Error::InvalidArgument`]: enum.Error.html#variant.InvalidArgument
    /// [`Mode::Queued`]: enum.Mode.html#variant.Queued
    pub fn fire_notify<N: 'static>(&self, payload: P, notify: &Callback<R, N>) -> Result<()>
    where
        R: Send,
    {
        if let Route::Coalesced { .. } = self.inner.route {
            return Err(Error::InvalidArgument(
                "notify requires a queued callback",
            ));
        }
        let notify = notify.clone();
        self.submit(payload, Some(Box::new(move |result| notify.fire(result))))
    }

    fn submit(&self, payload: P, notify: Option<Notify<R>>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        match &self.inner.route {
            Route::Queued { dispatcher, .. } => {
                let cb = self.clone();
                let op: CallOp =
                    Box::new(move |core: &mut Core| core.deliver_queued(cb, payload, notify));
                dispatcher.submit(op)
            }
            Route::Coalesced { latest, waker } => {
                let prev = Inner::latest(latest).replace(payload);
                drop(prev);
                waker.wake()
            }
        }
    }
}

impl<P, R> Callback<P, R> {
    /// Close the callback, on its own loop.  Further fires fail with
    /// [`Error::Closed`].  Calls still queued for it are dropped
    /// without being delivered, along with their payloads, and a
    /// pending coalesced payload is dropped immediately.  Closing
    /// again does nothing.
    ///
    /// Fails with [`Error::InvalidArgument`] if `core` belongs to a
    /// different loop.
    ///
    /// [`Error::Closed`]: enum.Error.html#variant.Closed
    /// [`Error::InvalidArgument`]: enum.Error.html#variant.InvalidArgument
    pub fn close(&self, core: &mut Core) -> Result<()> {
        if self.inner.loop_id != core.loop_id {
            return Err(Error::InvalidArgument(
                "callback closed from a different loop",
            ));
        }
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let id = self.inner.id;
        match &self.inner.route {
            Route::Queued { .. } => core.callback_release(id, Mode::Queued),
            Route::Coalesced { latest, waker } => {
                core.waker_del(waker);
                core.callback_release(id, Mode::Coalesced);
                let prev = Inner::latest(latest).take();
                drop(prev);
            }
        }
        core.log(
            LogLevel::Debug,
            LOG_TARGET,
            format_args!("callback closed"),
            |kv| kv.kv_u64("id", id),
        );
        Ok(())
    }

    /// Test whether [`Callback::close`] has been called
    ///
    /// [`Callback::close`]: struct.Callback.html#method.close
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Test whether this callback founded its loop's dispatcher
    pub fn is_master(&self) -> bool {
        matches!(self.inner.route, Route::Queued { master: true, .. })
    }

    pub fn mode(&self) -> Mode {
        match self.inner.route {
            Route::Queued { .. } => Mode::Queued,
            Route::Coalesced { .. } => Mode::Coalesced,
        }
    }

    /// Identifier, unique within the process, used in log records
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

/// Context passed to a registered function
///
/// Derefs to the loop's [`Core`], and gives access to the
/// [`Callback`] being called.
///
/// [`Callback`]: struct.Callback.html
/// [`Core`]: struct.Core.html
pub struct Cx<'a, P, R> {
    core: &'a mut Core,
    callback: &'a Callback<P, R>,
}

impl<'a, P, R> Cx<'a, P, R> {
    /// The callback whose function is running
    pub fn callback(&self) -> &Callback<P, R> {
        self.callback
    }

    /// Close the callback whose function is running.  See
    /// [`Callback::close`].
    ///
    /// [`Callback::close`]: struct.Callback.html#method.close
    pub fn close(&mut self) -> Result<()> {
        let callback = self.callback;
        callback.close(self.core)
    }
}

impl<'a, P, R> Deref for Cx<'a, P, R> {
    type Target = Core;

    fn deref(&self) -> &Core {
        self.core
    }
}

impl<'a, P, R> DerefMut for Cx<'a, P, R> {
    fn deref_mut(&mut self) -> &mut Core {
        self.core
    }
}

type Notify<R> = Box<dyn FnOnce(R) -> Result<()> + Send + 'static>;

struct Handler<P, R>(Box<dyn FnMut(&mut Cx<'_, P, R>, P) -> R>);

struct MasterEntry {
    dispatcher: Arc<Dispatcher>,
    members: usize,
    idle_armed: bool,
}

/// Registered functions and the dispatcher for one loop.  Functions
/// are stored type-erased, keyed by callback ID, and lent out of
/// their slot whilst being called.
pub(crate) struct CallbackTable {
    handlers: HashMap<u64, Option<Box<dyn Any>>>,
    master: Option<MasterEntry>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            master: None,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl Core {
    // Join the loop's dispatcher, founding it if necessary.  Returns
    // the dispatcher and whether it was founded by this call.
    fn dispatcher_join(&mut self) -> (Arc<Dispatcher>, bool) {
        if let Some(m) = &mut self.callbacks.master {
            m.members += 1;
            return (m.dispatcher.clone(), false);
        }
        let waker = self.waker(|core, deleted| {
            if !deleted {
                core.dispatch_queued();
            }
        });
        let dispatcher = Arc::new(Dispatcher::new(waker));
        self.callbacks.master = Some(MasterEntry {
            dispatcher: dispatcher.clone(),
            members: 1,
            idle_armed: false,
        });
        self.log(
            LogLevel::Debug,
            LOG_TARGET,
            format_args!("dispatcher founded"),
            |_| {},
        );
        (dispatcher, true)
    }

    fn is_current_dispatcher(&self, weak: &Weak<Dispatcher>) -> bool {
        match &self.callbacks.master {
            Some(m) => Weak::ptr_eq(&Arc::downgrade(&m.dispatcher), weak),
            None => false,
        }
    }

    // Forget a registration.  The last queued callback to go takes
    // the dispatcher with it.
    fn callback_release(&mut self, id: u64, mode: Mode) {
        self.callbacks.handlers.remove(&id);
        if mode == Mode::Queued {
            let last = match &mut self.callbacks.master {
                Some(m) => {
                    m.members = m.members.saturating_sub(1);
                    m.members == 0
                }
                None => false,
            };
            if last {
                self.dispatcher_teardown();
            }
        }
    }

    /// Delete the dispatcher's wake handler and drop any calls still
    /// queued.  An idle dispatch already queued finds no dispatcher
    /// and does nothing.
    pub(crate) fn dispatcher_teardown(&mut self) {
        if let Some(m) = self.callbacks.master.take() {
            self.waker_del(m.dispatcher.waker());
            let discarded = m.dispatcher.discard() as u64;
            self.log(
                LogLevel::Debug,
                LOG_TARGET,
                format_args!("dispatcher torn down"),
                |kv| kv.kv_u64("discarded", discarded),
            );
        }
    }

    // Runs on the dispatcher's wake, and on idle passes whilst calls
    // remain
    fn dispatch_queued(&mut self) {
        let dispatcher = match &self.callbacks.master {
            Some(m) => m.dispatcher.clone(),
            None => return,
        };
        match self.config.drain {
            DrainPolicy::WholeQueue => {
                while let Some(op) = dispatcher.pop() {
                    op(self);
                }
            }
            DrainPolicy::OnePerTick => {
                if let Some(op) = dispatcher.pop() {
                    op(self);
                }
                if dispatcher.has_pending() {
                    self.idle_arm(dispatcher);
                }
            }
        }
    }

    fn idle_arm(&mut self, dispatcher: Arc<Dispatcher>) {
        match &mut self.callbacks.master {
            Some(m) if Arc::ptr_eq(&m.dispatcher, &dispatcher) && !m.idle_armed => {
                m.idle_armed = true
            }
            _ => return,
        }
        self.idle(move |core| {
            match &mut core.callbacks.master {
                Some(m) if Arc::ptr_eq(&m.dispatcher, &dispatcher) => m.idle_armed = false,
                _ => return,
            }
            core.dispatch_queued();
        });
    }

    fn deliver_queued<P: 'static, R: 'static>(
        &mut self,
        cb: Callback<P, R>,
        payload: P,
        notify: Option<Notify<R>>,
    ) {
        let id = cb.id();
        if cb.is_closed() {
            self.log(
                LogLevel::Debug,
                LOG_TARGET,
                format_args!("queued call dropped, callback closed"),
                |kv| kv.kv_u64("id", id),
            );
            return;
        }
        self.log(
            LogLevel::Trace,
            LOG_TARGET,
            format_args!("delivering queued call"),
            |kv| kv.kv_u64("id", id),
        );
        let result = match self.invoke(&cb, payload) {
            Some(result) => result,
            None => return,
        };
        if let Some(notify) = notify {
            match notify(result) {
                Ok(()) => (),
                Err(Error::Closed) => self.log(
                    LogLevel::Debug,
                    LOG_TARGET,
                    format_args!("result dropped, notify callback closed"),
                    |kv| kv.kv_u64("id", id),
                ),
                Err(e) => self.log(
                    LogLevel::Warn,
                    LOG_TARGET,
                    format_args!("notify failed"),
                    |kv| {
                        kv.kv_u64("id", id);
                        kv.kv_fmt("error", &format_args!("{}", e));
                    },
                ),
            }
        }
    }

    fn deliver_latest<P: 'static, R: 'static>(&mut self, cb: Callback<P, R>) {
        if cb.is_closed() {
            return;
        }
        let payload = match &cb.inner.route {
            Route::Coalesced { latest, .. } => Inner::latest(latest).take(),
            Route::Queued { .. } => None,
        };
        if let Some(payload) = payload {
            drop(self.invoke(&cb, payload));
        }
    }

    // Call a registered function.  Returns `None` if it has been
    // unregistered, in which case the payload is dropped.
    fn invoke<P: 'static, R: 'static>(&mut self, cb: &Callback<P, R>, payload: P) -> Option<R> {
        let id = cb.id();
        let mut boxed = self.callbacks.handlers.get_mut(&id).and_then(Option::take)?;
        let result = match boxed.downcast_mut::<Handler<P, R>>() {
            Some(handler) => {
                let mut cx = Cx {
                    core: self,
                    callback: cb,
                };
                Some((handler.0)(&mut cx, payload))
            }
            None => None,
        };
        // Put it back, unless the function closed its own callback
        if let Some(slot) = self.callbacks.handlers.get_mut(&id) {
            *slot = Some(boxed);
        }
        result
    }

    // For testing
    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        self.callbacks.len()
    }
}
