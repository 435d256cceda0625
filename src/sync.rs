use crate::{Callback, EventLoop, Error, LoopConfig, Mode, Result, Share, TimerKey};
use std::time::Duration;

struct SyncState<R> {
    timed_out: bool,
    called: bool,
    result: Option<R>,
}

// A private loop on the calling thread that waits for one result.
// Whichever way `fire_sync` exits, dropping this closes the notify
// callback, cancels the timer and lets the loop finish up before it
// goes.
struct Bridge<R: Send + 'static> {
    lp: EventLoop,
    notify: Callback<R>,
    timer: Option<TimerKey>,
    state: Share<SyncState<R>>,
}

impl<R: Send + 'static> Bridge<R> {
    fn new() -> Result<Self> {
        let mut lp = EventLoop::with_config(LoopConfig::new());
        let state = Share::new(
            &lp,
            SyncState {
                timed_out: false,
                called: false,
                result: None,
            },
        );
        let st = state.clone();
        let notify = Callback::init(&mut lp, Mode::Queued, move |cx, result: R| {
            let state = st.rw(cx);
            state.called = true;
            state.result = Some(result);
            cx.stop();
        })?;
        Ok(Self {
            lp,
            notify,
            timer: None,
            state,
        })
    }

    // A timeout too long to represent means no timer at all
    fn arm_timer(&mut self, timeout: Duration) {
        let expiry = match self.lp.now().checked_add(timeout) {
            Some(expiry) => expiry,
            None => return,
        };
        let st = self.state.clone();
        self.timer = Some(self.lp.timer_add(expiry, move |core| {
            st.rw(core).timed_out = true;
            core.stop();
        }));
    }

    fn outcome(&mut self) -> Result<R> {
        let state = self.state.rw(&mut self.lp);
        if state.called {
            state.result.take().ok_or(Error::Unknown)
        } else if state.timed_out {
            Err(Error::TimedOut)
        } else {
            Err(Error::Unknown)
        }
    }
}

impl<R: Send + 'static> Drop for Bridge<R> {
    fn drop(&mut self) {
        let _ = self.notify.close(&mut self.lp);
        if let Some(key) = self.timer.take() {
            self.lp.timer_del(key);
        }
        while self.lp.run_once(false) {}
    }
}

impl<P: Send + 'static, R: Send + 'static> Callback<P, R> {
    /// Call the function on its loop and block the calling thread
    /// until the result comes back, or until `timeout` runs out.  A
    /// zero `timeout` waits indefinitely, as does one too long to
    /// represent, e.g. `Duration::MAX`.  A result that has arrived is
    /// returned even if the timeout expired in the same loop pass.
    ///
    /// The wait runs a private [`EventLoop`] on the calling thread,
    /// with a queued notify callback registered on it, so the target
    /// loop delivers this call exactly as it would any
    /// [`Callback::fire_notify`].  The target's thread is never
    /// blocked.  If the result turns up after the timeout, it is
    /// dropped on the target's thread.
    ///
    /// Don't call this from the target loop's own thread: the call
    /// can't be delivered whilst that thread is blocked here, so it
    /// ends with [`Error::TimedOut`], or never returns if `timeout` is
    /// zero.
    ///
    /// Fails with [`Error::InvalidArgument`] on a coalesced callback,
    /// [`Error::TimedOut`] if the timeout expired first, or whatever
    /// error the fire itself returned, with nothing left running.
    ///
    /// [`Callback::fire_notify`]: struct.Callback.html#method.fire_notify
    /// [`Error::InvalidArgument`]: enum.Error.html#variant.InvalidArgument
    /// [`Error::TimedOut`]: enum.Error.html#variant.TimedOut
    /// [`EventLoop`]: struct.EventLoop.html
    pub fn fire_sync(&self, payload: P, timeout: Duration) -> Result<R> {
        if self.mode() != Mode::Queued {
            return Err(Error::InvalidArgument(
                "fire_sync requires a queued callback",
            ));
        }
        let mut bridge = Bridge::new()?;
        self.fire_notify(payload, &bridge.notify)?;
        if timeout > Duration::ZERO {
            bridge.arm_timer(timeout);
        }
        bridge.lp.run();
        bridge.outcome()
    }
}
