//! **crosscall** lets code on one thread call a function that has to
//! run on another thread's event loop, optionally wait for the
//! result, and optionally collapse bursts of calls into one.
//!
//! Each participating thread runs an [`EventLoop`].  A function is
//! registered on a loop with [`Callback::init`], which returns a
//! [`Callback`] handle.  The handle can be cloned and sent to any
//! thread, and firing it there runs the function on the loop it was
//! registered on, one call at a time.
//!
//! - [Overview of types](#overview-of-types)
//! - [Delivery modes](#delivery-modes)
//! - [Configuration](#configuration)
//! - [Logging](#logging)
//! - [Example](#example)
//!
//! # Overview of types
//!
//! [`EventLoop`] is the loop itself, owned by the thread that runs
//! it.  It derefs to [`Core`], which is also what registered
//! functions get to see, through their [`Cx`] context.  [`Core`]
//! provides a deferred queue, an idle queue, one-shot timers and
//! [`Share`] cells for state shared between functions on one loop.
//!
//! [`Waker`] is the primitive underneath: a `Send` handle that wakes
//! the loop and gets a handler run on it.  Many wakes before the loop
//! gets around to them collapse into one.
//!
//! [`Callback`] is a registered function plus its delivery mode.
//! [`Callback::fire`] queues a call, [`Callback::fire_notify`] queues
//! a call and passes the result on to another callback, and
//! [`Callback::fire_sync`] blocks until the result comes back or a
//! timeout runs out.
//!
//! [`LoopThread`] starts a thread with its own loop and hands back
//! whatever callbacks were registered on it.
//!
//! # Delivery modes
//!
//! In [`Mode::Queued`] every fire is delivered, in the order fired.
//! All queued callbacks on a loop share one call queue and one wake
//! signal, the dispatcher, which is founded by the first queued
//! callback registered on the loop.  Calls into different callbacks
//! sharing a dispatcher are not ordered relative to each other.
//!
//! By default the dispatcher delivers one call per loop pass, and
//! queues an idle task to come back for the next one, so a flood of
//! calls can't hold up timers or other wakes.
//!
//! In [`Mode::Coalesced`] a fire overwrites a single pending payload.
//! Only the latest payload is delivered, once.  This suits progress
//! reports and other cases where only the latest value matters.
//!
//! Closing a callback drops any calls still queued for it, payloads
//! included.  There is no back-pressure: queues grow as needed.
//!
//! # Configuration
//!
//! [`LoopConfig`] sets the dispatcher's [`DrainPolicy`] and the
//! longest single blocking wait.  [`EventLoop::new`] takes its
//! configuration from the environment, see [`LoopConfig::from_env`].
//!
//! # Logging
//!
//! A logger can be installed on each loop with
//! [`EventLoop::set_logger`].  Registration, closing and dispatcher
//! changes are logged at `Debug` level, each delivery at `Trace`, and
//! notify failures at `Warn`, all under target `"crosscall"`.
//!
//! # Example
//!
//! ```
//! use crosscall::{Callback, LoopConfig, LoopThread, Mode};
//! use std::time::Duration;
//!
//! let (worker, add) = LoopThread::spawn(LoopConfig::new(), |lp| {
//!     Callback::<(u32, u32), u32>::init(lp, Mode::Queued, |_cx, (a, b)| a + b)
//! })
//! .unwrap();
//! let add = add.unwrap();
//!
//! let sum = add.fire_sync((123, 456), Duration::from_secs(5)).unwrap();
//! assert_eq!(579, sum);
//! worker.join().unwrap();
//! ```
//!
//! [`Callback::fire_notify`]: struct.Callback.html#method.fire_notify
//! [`Callback::fire_sync`]: struct.Callback.html#method.fire_sync
//! [`Callback::fire`]: struct.Callback.html#method.fire
//! [`Callback::init`]: struct.Callback.html#method.init
//! [`Callback`]: struct.Callback.html
//! [`Core`]: struct.Core.html
//! [`Cx`]: struct.Cx.html
//! [`DrainPolicy`]: enum.DrainPolicy.html
//! [`EventLoop::new`]: struct.EventLoop.html#method.new
//! [`EventLoop::set_logger`]: struct.EventLoop.html#method.set_logger
//! [`EventLoop`]: struct.EventLoop.html
//! [`LoopConfig::from_env`]: struct.LoopConfig.html#method.from_env
//! [`LoopConfig`]: struct.LoopConfig.html
//! [`LoopThread`]: struct.LoopThread.html
//! [`Mode::Coalesced`]: enum.Mode.html#variant.Coalesced
//! [`Mode::Queued`]: enum.Mode.html#variant.Queued
//! [`Share`]: struct.Share.html
//! [`Waker`]: struct.Waker.html

// Insist on 2018 style
#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use crate::core::{Core, EventLoop};
pub use callback::{Callback, Cx, Mode};
pub use config::{DrainPolicy, LoopConfig};
pub use error::{Error, Result};
pub use log::{LogFilter, LogLevel, LogLevelError, LogRecord, LogVisitor, LOG_TARGET};
pub use share::Share;
pub use thread::LoopThread;
pub use timers::TimerKey;
pub use waker::Waker;

// Static assertions
static_assertions::assert_not_impl_any!(EventLoop: Send, Sync);
static_assertions::assert_not_impl_any!(Core: Send, Sync);
static_assertions::assert_not_impl_any!(Cx<'static, u8, u8>: Send, Sync);
static_assertions::assert_not_impl_any!(Share<u8>: Send, Sync);
static_assertions::assert_not_impl_any!(Waker: Clone);
static_assertions::assert_impl_all!(Callback<u8, u8>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Share<u8>: Clone);
static_assertions::assert_impl_all!(Waker: Send, Sync);
static_assertions::assert_impl_all!(TimerKey: Copy, Clone);
static_assertions::assert_impl_all!(LoopThread: Send);

mod call;
mod callback;
pub mod config;
mod core;
mod error;
mod log;
mod queue;
mod share;
mod sync;
mod thread;
mod timers;
mod waker;

#[cfg(test)]
mod test;
