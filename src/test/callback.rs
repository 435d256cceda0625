//! Test `Callback` delivery, dispatcher sharing and teardown

use super::{new_loop, settle};
use crate::*;
use std::cell::{Cell, RefCell};
use std::convert::TryFrom;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl FnMut(u32) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    (seen, move |v| s.borrow_mut().push(v))
}

#[test]
fn queued_fifo() {
    let mut lp = new_loop();
    let (seen, mut push) = recorder();
    let cb = Callback::<u32>::init(&mut lp, Mode::Queued, move |_, v| push(v)).unwrap();
    assert_eq!(Mode::Queued, cb.mode());

    for i in 0..20 {
        cb.fire(i).unwrap();
    }
    settle(&mut lp);
    assert_eq!(*seen.borrow(), (0..20).collect::<Vec<_>>());
}

// Several producer threads into one callback: each producer's calls
// arrive in the order it made them
#[test]
fn queued_fifo_per_producer() {
    const PRODUCERS: usize = 4;
    const COUNT: u32 = 500;

    let mut lp = new_loop();
    let next = Rc::new(RefCell::new(vec![0_u32; PRODUCERS]));
    let n = next.clone();
    let cb = Callback::<(usize, u32)>::init(&mut lp, Mode::Queued, move |cx, (p, seq)| {
        let mut next = n.borrow_mut();
        assert_eq!(next[p], seq, "producer {} out of order", p);
        next[p] += 1;
        if next.iter().all(|n| *n == COUNT) {
            cx.stop();
        }
    })
    .unwrap();

    let threads: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let cb = cb.clone();
            std::thread::spawn(move || {
                for seq in 0..COUNT {
                    cb.fire((p, seq)).unwrap();
                }
            })
        })
        .collect();
    lp.run();
    for t in threads {
        t.join().unwrap();
    }
    assert!(next.borrow().iter().all(|n| *n == COUNT));
}

#[test]
fn coalesced_latest_wins() {
    let mut lp = new_loop();
    let (seen, mut push) = recorder();
    let cb = Callback::<u32>::init(&mut lp, Mode::Coalesced, move |_, v| push(v)).unwrap();
    assert_eq!(Mode::Coalesced, cb.mode());
    assert!(!cb.is_master());

    for v in (10..=90).step_by(10).chain(Some(99)) {
        cb.fire(v).unwrap();
    }
    settle(&mut lp);
    assert_eq!(*seen.borrow(), [99]);

    cb.fire(100).unwrap();
    settle(&mut lp);
    assert_eq!(*seen.borrow(), [99, 100]);

    // No fire, no call
    settle(&mut lp);
    assert_eq!(2, seen.borrow().len());
}

// A burst fired whilst the target loop is busy is delivered in fewer
// calls than fires, ending with the latest value
#[test]
fn coalesced_burst_across_threads() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel::<u32>();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    let (worker, (gate, progress)) = LoopThread::spawn(LoopConfig::new(), move |lp| {
        let gate = Callback::<()>::init(lp, Mode::Queued, move |_, ()| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        let progress = Callback::<u32>::init(lp, Mode::Coalesced, move |_, v| {
            s.lock().unwrap().push(v);
            if v == 99 {
                done_tx.send(v).unwrap();
            }
        })
        .unwrap();
        (gate, progress)
    })
    .unwrap();

    gate.fire(()).unwrap();
    started_rx.recv().unwrap();
    for v in (10..=90).step_by(10).chain(Some(99)) {
        progress.fire(v).unwrap();
    }
    release_tx.send(()).unwrap();

    assert_eq!(Ok(99), done_rx.recv_timeout(Duration::from_secs(10)));
    let seen = seen.lock().unwrap().clone();
    assert!(seen.len() < 10);
    assert_eq!(Some(&99), seen.last());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    worker.join().unwrap();
}

#[test]
fn round_trip_notify() {
    struct Sum {
        a: u32,
        b: u32,
        result: u32,
    }

    let mut target = new_loop();
    let mut origin = new_loop();
    let add = Callback::<Sum, Sum>::init(&mut target, Mode::Queued, |_, mut s| {
        s.result = s.a + s.b;
        s
    })
    .unwrap();
    let (seen, mut push) = recorder();
    let done = Callback::<Sum>::init(&mut origin, Mode::Queued, move |_, s| push(s.result))
        .unwrap();

    add.fire_notify(
        Sum {
            a: 123,
            b: 456,
            result: 0,
        },
        &done,
    )
    .unwrap();
    settle(&mut origin);
    assert!(seen.borrow().is_empty());
    settle(&mut target);
    settle(&mut origin);
    assert_eq!(*seen.borrow(), [579]);

    settle(&mut target);
    settle(&mut origin);
    assert_eq!(*seen.borrow(), [579]);
}

// The notify callback may be coalesced, even though the target can't
#[test]
fn notify_into_coalesced() {
    let mut lp = new_loop();
    let double = Callback::<u32, u32>::init(&mut lp, Mode::Queued, |_, v| v * 2).unwrap();
    let (seen, mut push) = recorder();
    let report = Callback::<u32>::init(&mut lp, Mode::Coalesced, move |_, v| push(v)).unwrap();

    double.fire_notify(5, &report).unwrap();
    settle(&mut lp);
    assert_eq!(*seen.borrow(), [10]);
}

#[test]
fn dispatcher_shared() {
    let mut lp = new_loop();
    assert_eq!(0, lp.wake_handler_count());

    let (seen_a, mut push_a) = recorder();
    let (seen_b, mut push_b) = recorder();
    let a = Callback::<u32>::init(&mut lp, Mode::Queued, move |_, v| push_a(v)).unwrap();
    let b = Callback::<u32>::init(&mut lp, 0_i32, move |_, v| push_b(v)).unwrap();
    assert!(a.is_master());
    assert!(!b.is_master());
    assert_ne!(a.id(), b.id());
    assert_eq!(1, lp.wake_handler_count());

    let c = Callback::<u32>::init(&mut lp, 1_i32, |_, _| ()).unwrap();
    assert_eq!(2, lp.wake_handler_count());
    assert_eq!(3, lp.callback_count());

    a.fire(1).unwrap();
    b.fire(10).unwrap();
    a.fire(2).unwrap();
    b.fire(20).unwrap();
    settle(&mut lp);
    assert_eq!(*seen_a.borrow(), [1, 2]);
    assert_eq!(*seen_b.borrow(), [10, 20]);

    // The dispatcher outlives its founder whilst others use it
    a.close(&mut lp).unwrap();
    assert_eq!(Err(Error::Closed), a.fire(3));
    b.fire(30).unwrap();
    settle(&mut lp);
    assert_eq!(*seen_b.borrow(), [10, 20, 30]);
    assert_eq!(2, lp.wake_handler_count());

    // ... and goes with the last one
    b.close(&mut lp).unwrap();
    assert_eq!(1, lp.wake_handler_count());
    assert_eq!(1, lp.callback_count());

    let d = Callback::<u32>::init(&mut lp, Mode::Queued, |_, _| ()).unwrap();
    assert!(d.is_master());
    assert_eq!(2, lp.wake_handler_count());

    c.close(&mut lp).unwrap();
    d.close(&mut lp).unwrap();
    assert_eq!(0, lp.wake_handler_count());
    assert_eq!(0, lp.callback_count());
}

#[test]
fn invalid_arguments() {
    let mut lp = new_loop();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let coalesced = Callback::<u32, u32>::init(&mut lp, Mode::Coalesced, move |_, v| {
        c.set(c.get() + 1);
        v
    })
    .unwrap();
    let notify = Callback::<u32>::init(&mut lp, Mode::Queued, |_, _| ()).unwrap();

    assert!(matches!(
        coalesced.fire_notify(1, &notify),
        Err(Error::InvalidArgument(_))
    ));
    settle(&mut lp);
    assert_eq!(0, calls.get());

    assert!(matches!(
        Callback::<u32>::init(&mut lp, 7_i32, |_, _| ()),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(Ok(Mode::Queued), Mode::try_from(0_i32));
    assert_eq!(Ok(Mode::Coalesced), Mode::try_from(1_i32));
    assert!(matches!(Mode::try_from(-1_i32), Err(Error::InvalidArgument(_))));
}

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn close_drops_queued_calls() {
    let mut lp = new_loop();
    let drops = Arc::new(AtomicUsize::new(0));
    let calls = Rc::new(Cell::new(0));

    let c = calls.clone();
    let a = Callback::<Counted>::init(&mut lp, Mode::Queued, move |_, _| c.set(c.get() + 1))
        .unwrap();
    // Keeps the dispatcher alive after `a` closes
    let keep = Callback::<u32>::init(&mut lp, Mode::Queued, |_, _| ()).unwrap();

    for _ in 0..5 {
        a.fire(Counted(drops.clone())).unwrap();
    }
    a.close(&mut lp).unwrap();
    assert_eq!(0, drops.load(Ordering::SeqCst));
    settle(&mut lp);
    assert_eq!(5, drops.load(Ordering::SeqCst));
    assert_eq!(0, calls.get());

    // Closing the last queued callback drops everything at once
    let b = Callback::<Counted>::init(&mut lp, Mode::Queued, |_, _| ()).unwrap();
    for _ in 0..3 {
        b.fire(Counted(drops.clone())).unwrap();
    }
    keep.close(&mut lp).unwrap();
    assert_eq!(5, drops.load(Ordering::SeqCst));
    b.close(&mut lp).unwrap();
    assert_eq!(8, drops.load(Ordering::SeqCst));
    assert!(matches!(b.fire(Counted(drops.clone())), Err(Error::Closed)));
    assert_eq!(9, drops.load(Ordering::SeqCst));
}

#[test]
fn close_drops_pending_coalesced() {
    let mut lp = new_loop();
    let drops = Arc::new(AtomicUsize::new(0));
    let cb = Callback::<Counted>::init(&mut lp, Mode::Coalesced, |_, _| ()).unwrap();

    cb.fire(Counted(drops.clone())).unwrap();
    cb.fire(Counted(drops.clone())).unwrap();
    assert_eq!(1, drops.load(Ordering::SeqCst));
    cb.close(&mut lp).unwrap();
    assert_eq!(2, drops.load(Ordering::SeqCst));
    assert!(cb.is_closed());
    settle(&mut lp);
    assert_eq!(0, lp.wake_handler_count());
}

#[test]
fn close_idempotent_and_loop_checked() {
    let mut lp1 = new_loop();
    let mut lp2 = new_loop();
    let cb = Callback::<u32>::init(&mut lp1, Mode::Queued, |_, _| ()).unwrap();

    assert!(matches!(
        cb.close(&mut lp2),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!cb.is_closed());
    assert_eq!(Ok(()), cb.close(&mut lp1));
    assert_eq!(Ok(()), cb.close(&mut lp1));
    assert!(cb.is_closed());
    assert_eq!(0, lp1.wake_handler_count());
}

#[test]
fn close_from_own_function() {
    let mut lp = new_loop();
    let (seen, mut push) = recorder();
    let id = Rc::new(Cell::new(0));
    let i = id.clone();
    let cb = Callback::<u32>::init(&mut lp, Mode::Queued, move |cx, v| {
        i.set(cx.callback().id());
        push(v);
        if v == 2 {
            cx.close().unwrap();
        }
    })
    .unwrap();

    for v in 1..=3 {
        cb.fire(v).unwrap();
    }
    settle(&mut lp);
    assert_eq!(*seen.borrow(), [1, 2]);
    assert_eq!(cb.id(), id.get());
    assert!(cb.is_closed());
    assert_eq!(0, lp.wake_handler_count());
    assert_eq!(0, lp.callback_count());
}

#[test]
fn dropped_handles_release() {
    let mut lp = new_loop();
    let a = Callback::<u32>::init(&mut lp, Mode::Queued, |_, _| ()).unwrap();
    let c = Callback::<u32>::init(&mut lp, Mode::Coalesced, |_, _| ()).unwrap();
    assert_eq!(2, lp.callback_count());
    assert_eq!(2, lp.wake_handler_count());

    drop(a);
    drop(c);
    settle(&mut lp);
    assert_eq!(0, lp.callback_count());
    assert_eq!(0, lp.wake_handler_count());
    // Nothing left that could wake it
    lp.run();
}

#[test]
fn drain_whole_queue() {
    let mut lp = EventLoop::with_config(LoopConfig::new().drain(DrainPolicy::WholeQueue));
    let (seen, mut push) = recorder();
    let cb = Callback::<u32>::init(&mut lp, Mode::Queued, move |_, v| push(v)).unwrap();
    for i in 0..5 {
        cb.fire(i).unwrap();
    }
    assert!(!lp.run_once(false));
    assert_eq!(*seen.borrow(), [0, 1, 2, 3, 4]);
}

#[test]
fn drain_one_per_tick() {
    let mut lp = new_loop();
    assert_eq!(DrainPolicy::OnePerTick, lp.config().drain);
    let (seen, mut push) = recorder();
    let cb = Callback::<u32>::init(&mut lp, Mode::Queued, move |_, v| push(v)).unwrap();
    for i in 0..5 {
        cb.fire(i).unwrap();
    }
    assert!(lp.run_once(false));
    assert_eq!(1, seen.borrow().len());
    assert!(lp.run_once(false));
    assert_eq!(2, seen.borrow().len());
    settle(&mut lp);
    assert_eq!(*seen.borrow(), [0, 1, 2, 3, 4]);
}

// Other idle work gets a turn between deliveries, unless the whole
// queue is drained at once
#[test]
fn idle_interleaves_with_deliveries() {
    fn run(drain: DrainPolicy) -> Vec<i32> {
        let mut lp = EventLoop::with_config(LoopConfig::new().drain(drain));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let cb = Callback::<i32>::init(&mut lp, Mode::Queued, move |cx, v| {
            s.borrow_mut().push(v);
            if v == 0 {
                let s = s.clone();
                cx.idle(move |_| s.borrow_mut().push(-1));
            }
        })
        .unwrap();
        for i in 0..4 {
            cb.fire(i).unwrap();
        }
        settle(&mut lp);
        let rv = seen.borrow().clone();
        rv
    }

    assert_eq!(run(DrainPolicy::OnePerTick), [0, -1, 1, 2, 3]);
    assert_eq!(run(DrainPolicy::WholeQueue), [0, 1, 2, 3, -1]);
}
