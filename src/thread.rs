use crate::{Callback, Error, EventLoop, LoopConfig, Mode, Result};
use std::any::Any;
use std::panic;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// A thread running its own [`EventLoop`]
///
/// This takes care of starting a thread, creating a loop on it and
/// running that loop until told to stop.  The `setup` closure passed
/// to [`LoopThread::spawn`] runs on the new thread before the loop
/// starts.  It gets the loop, so it can register callbacks, and
/// whatever it returns is handed back to the spawning thread.
/// Typically that is one or more [`Callback`] handles, which is how
/// the rest of the program then gets work onto the thread.
///
/// Cleanup is handled as follows:
///
/// - [`LoopThread::stop`] asks the loop to return from
/// [`EventLoop::run`], after which the thread drops the loop and
/// terminates.  Callbacks still registered on it are dropped along
/// with it, and fires to them then fail.
///
/// - [`LoopThread::join`] stops the thread if necessary and waits for
/// it, returning the panic message if the thread panicked.
///
/// - Dropping the [`LoopThread`] stops and joins the thread.
///
/// [`Callback`]: struct.Callback.html
/// [`EventLoop::run`]: struct.EventLoop.html#method.run
/// [`EventLoop`]: struct.EventLoop.html
/// [`LoopThread::join`]: struct.LoopThread.html#method.join
/// [`LoopThread::spawn`]: struct.LoopThread.html#method.spawn
/// [`LoopThread::stop`]: struct.LoopThread.html#method.stop
/// [`LoopThread`]: struct.LoopThread.html
pub struct LoopThread {
    stop: Callback<()>,
    handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawn a new thread running an [`EventLoop`] created with
    /// `config`.  `setup` runs on the new thread first, and its
    /// return value is returned here along with the [`LoopThread`].
    /// This call blocks until `setup` has completed.  If `setup`
    /// panics, the panic is resumed on the calling thread.
    ///
    /// [`EventLoop`]: struct.EventLoop.html
    /// [`LoopThread`]: struct.LoopThread.html
    pub fn spawn<T: Send + 'static>(
        config: LoopConfig,
        setup: impl FnOnce(&mut EventLoop) -> T + Send + 'static,
    ) -> Result<(Self, T)> {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut lp = EventLoop::with_config(config);
            let stop = Callback::<()>::init(&mut lp, Mode::Coalesced, |cx, ()| cx.stop());
            let stop = match stop {
                Ok(stop) => stop,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            };
            let value = setup(&mut lp);
            if tx.send(Ok((stop.clone(), value))).is_err() {
                return;
            }
            lp.run();
            let _ = stop.close(&mut lp);
        });

        match rx.recv() {
            Ok(Ok((stop, value))) => Ok((
                Self {
                    stop,
                    handle: Some(handle),
                },
                value,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            // `setup` panicked
            Err(_) => match handle.join() {
                Err(e) => panic::resume_unwind(e),
                Ok(()) => Err(Error::Unknown),
            },
        }
    }

    /// Ask the loop to stop.  The thread terminates once the loop
    /// returns.  Fails with [`Error::Closed`] if the loop has already
    /// stopped, since the thread closes its stop callback on the way
    /// out, or with [`Error::WakeSignalFailure`] if the thread died
    /// some other way.
    ///
    /// [`Error::Closed`]: enum.Error.html#variant.Closed
    /// [`Error::WakeSignalFailure`]: enum.Error.html#variant.WakeSignalFailure
    pub fn stop(&self) -> Result<()> {
        self.stop.fire(())
    }

    /// Stop the thread and wait for it to terminate.  Returns the
    /// panic message if the thread panicked.
    pub fn join(mut self) -> std::result::Result<(), String> {
        let _ = self.stop();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(panic_message),
            None => Ok(()),
        }
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop();
            let _ = handle.join();
        }
    }
}

// Pass through panic message if it is a `String` or `&str`, else
// generate some debugging output
fn panic_message(e: Box<dyn Any + Send + 'static>) -> String {
    match e.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            Err(e) => format!("Panic with unknown type: {:?}", (*e).type_id()),
        },
    }
}
