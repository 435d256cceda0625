//! Several producer threads fire into one queued callback as fast as
//! they can, whilst coalesced fires race against deliveries on the
//! same loop.  Every producer's calls must arrive complete and in the
//! order made, and the last coalesced value fired must be the last
//! one seen.

use crosscall::{Callback, DrainPolicy, EventLoop, LoopConfig, Mode};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

/// Number of producer threads
const PRODUCERS: usize = 8;
/// Number of calls each producer makes
const COUNT: u32 = 200_000;

fn main() {
    for drain in [DrainPolicy::OnePerTick, DrainPolicy::WholeQueue] {
        println!("Drain policy: {:?}", drain);
        let mut lp = EventLoop::with_config(LoopConfig::new().drain(drain));

        let next = Rc::new(RefCell::new(vec![0_u32; PRODUCERS]));
        let latest = Rc::new(RefCell::new(0_u32));
        let n = next.clone();
        let queued = Callback::<(usize, u32)>::init(&mut lp, Mode::Queued, move |cx, (p, seq)| {
            let mut next = n.borrow_mut();
            if next[p] != seq {
                println!("ERROR: Producer {} expected {}, got {}", p, next[p], seq);
                std::process::exit(1);
            }
            next[p] += 1;
            if next.iter().all(|n| *n == COUNT) {
                cx.stop();
            }
        })
        .expect("queued init");
        let l = latest.clone();
        let coalesced = Callback::<u32>::init(&mut lp, Mode::Coalesced, move |_, v| {
            let mut latest = l.borrow_mut();
            if v < *latest {
                println!("ERROR: Coalesced value went backwards: {} < {}", v, *latest);
                std::process::exit(1);
            }
            *latest = v;
        })
        .expect("coalesced init");

        let threads: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queued = queued.clone();
                let coalesced = coalesced.clone();
                thread::spawn(move || {
                    for seq in 0..COUNT {
                        queued.fire((p, seq)).expect("queued fire");
                        if p == 0 {
                            coalesced.fire(seq).expect("coalesced fire");
                        }
                    }
                })
            })
            .collect();

        lp.run();
        for t in threads {
            t.join().expect("producer panicked");
        }
        // Let any wake still pending come through
        while lp.run_once(false) {}

        if *latest.borrow() != COUNT - 1 {
            println!("ERROR: Last coalesced value lost: {}", *latest.borrow());
            std::process::exit(1);
        }
        queued.close(&mut lp).expect("queued close");
        coalesced.close(&mut lp).expect("coalesced close");
        println!("  {} calls delivered in order", PRODUCERS as u32 * COUNT);
    }
}
