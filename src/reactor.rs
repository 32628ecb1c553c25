//! The event loop. Grounded in `original_source/src/core/ioloop.cc` —
//! `IOLoop::start` (main loop steps 1-8: drain posted callbacks, run due
//! timers skipping tombstones, poll, merge fired events, dispatch one fd at
//! a time, suppress `EPIPE` from user handlers), `IOLoop::add_timeout`/
//! `remove_timeout` (binary heap + tombstone set), and `PeriodicCallback`
//! (anchored rescheduling that never bursts to catch up).
//!
//! `Reactor` itself is `Rc<RefCell<..>>` and is not `Send`; this crate makes
//! no promise of cross-reactor thread safety. `post` is the one exception:
//! it is backed by a mutex-guarded queue plus a `mio::Waker` so other
//! threads can hand work to the loop and wake it from a blocking poll.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::{Token, Waker};

use crate::poller::Poller;

pub use crate::poller::{ERROR as EV_ERROR, READ as EV_READ, WRITE as EV_WRITE};

const WAKER_TOKEN: Token = Token(usize::MAX);

type IoHandler = Box<dyn FnMut(u8)>;
type Callback = Box<dyn FnOnce()>;
type PostedCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    id: u64,
    callback: Option<Callback>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline first.
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    poller: Poller,
    waker: Arc<Waker>,
    handlers: HashMap<usize, IoHandler>,
    /// Tokens `deregister`ed while their own handler was running. The
    /// dispatch loop in `run_once` removes a handler before invoking it
    /// (so the handler can safely call `deregister` on itself without
    /// racing its own slot), so a self-deregistration can't be observed
    /// by checking `handlers` afterward — this set is how it's noticed.
    deregistered_during_dispatch: HashSet<usize>,
    next_token: usize,
    callbacks: VecDeque<Callback>,
    posted: Arc<Mutex<VecDeque<PostedCallback>>>,
    timers: BinaryHeap<TimerEntry>,
    next_timer_id: u64,
    cancelled_timers: HashSet<u64>,
    stopping: bool,
}

/// A handle to the event loop. Cheap to clone; all clones share one loop.
#[derive(Clone)]
pub struct Reactor(Rc<RefCell<Inner>>);

/// Cross-thread handle usable from `post`ed work or another thread entirely.
#[derive(Clone)]
pub struct ReactorWaker {
    posted: Arc<Mutex<VecDeque<PostedCallback>>>,
    waker: Arc<Waker>,
}

impl ReactorWaker {
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.posted.lock().unwrap().push_back(Box::new(f));
        let _ = self.waker.wake();
    }
}

/// Handle returned by `Reactor::schedule`; pass to `Reactor::cancel`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(u64);

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let mut poller = Poller::new()?;
        let waker = poller.make_waker(WAKER_TOKEN)?;
        Ok(Reactor(Rc::new(RefCell::new(Inner {
            poller,
            waker: Arc::new(waker),
            handlers: HashMap::new(),
            deregistered_during_dispatch: HashSet::new(),
            next_token: 0,
            callbacks: VecDeque::new(),
            posted: Arc::new(Mutex::new(VecDeque::new())),
            timers: BinaryHeap::new(),
            next_timer_id: 0,
            cancelled_timers: HashSet::new(),
            stopping: false,
        }))))
    }

    pub fn waker(&self) -> ReactorWaker {
        let inner = self.0.borrow();
        ReactorWaker { posted: Arc::clone(&inner.posted), waker: Arc::clone(&inner.waker) }
    }

    /// Register a readiness-driven handler for `source`, returning the
    /// token the reactor assigned to it.
    pub fn register(
        &self,
        source: &mut impl mio::event::Source,
        mask: u8,
        handler: impl FnMut(u8) + 'static,
    ) -> io::Result<usize> {
        let mut inner = self.0.borrow_mut();
        let id = inner.next_token;
        inner.next_token += 1;
        inner.poller.register(source, Token(id), mask)?;
        inner.handlers.insert(id, Box::new(handler));
        Ok(id)
    }

    pub fn update_mask(&self, token: usize, source: &mut impl mio::event::Source, mask: u8) -> io::Result<()> {
        self.0.borrow_mut().poller.reregister(source, Token(token), mask)
    }

    pub fn deregister(&self, token: usize, source: &mut impl mio::event::Source) -> io::Result<()> {
        let mut inner = self.0.borrow_mut();
        inner.handlers.remove(&token);
        inner.deregistered_during_dispatch.insert(token);
        inner.poller.deregister(source)
    }

    /// Queue `f` to run on the next loop iteration, same thread.
    pub fn add_callback(&self, f: impl FnOnce() + 'static) {
        self.0.borrow_mut().callbacks.push_back(Box::new(f));
    }

    /// Thread-safe equivalent of `add_callback`, for handing work in from
    /// outside the reactor's owning thread.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        let inner = self.0.borrow();
        inner.posted.lock().unwrap().push_back(Box::new(f));
        let _ = inner.waker.wake();
    }

    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let mut inner = self.0.borrow_mut();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        inner.timers.push(TimerEntry {
            deadline: Instant::now() + delay,
            id,
            callback: Some(Box::new(callback)),
        });
        TimerId(id)
    }

    pub fn cancel(&self, id: TimerId) {
        self.0.borrow_mut().cancelled_timers.insert(id.0);
    }

    pub fn handle_callback_error(&self, context: &str, err: &dyn std::error::Error) {
        proxy_log::errors!("reactor callback error in {context}: {err}");
    }

    pub fn stop(&self) {
        self.0.borrow_mut().stopping = true;
    }

    /// Run one iteration of the loop: steps 1-8 of the main loop.
    pub fn run_once(&self) -> io::Result<()> {
        // 1. drain posted (cross-thread) callbacks first.
        {
            let posted: Vec<PostedCallback> = {
                let inner = self.0.borrow();
                let mut queue = inner.posted.lock().unwrap();
                queue.drain(..).collect()
            };
            for cb in posted {
                cb();
            }
        }

        // 1b. drain same-thread deferred callbacks queued so far.
        loop {
            let cb = self.0.borrow_mut().callbacks.pop_front();
            match cb {
                Some(cb) => cb(),
                None => break,
            }
        }

        // 2. run due timers, skipping tombstoned ones.
        let now = Instant::now();
        loop {
            let due = {
                let mut inner = self.0.borrow_mut();
                match inner.timers.peek() {
                    Some(t) if t.deadline <= now => inner.timers.pop(),
                    _ => None,
                }
            };
            let Some(mut entry) = due else { break };
            let cancelled = self.0.borrow_mut().cancelled_timers.remove(&entry.id);
            if !cancelled {
                if let Some(cb) = entry.callback.take() {
                    cb();
                }
            }
        }

        // 3. if new callbacks were queued while running timers, don't block.
        let have_pending = !self.0.borrow().callbacks.is_empty();
        let timeout = if have_pending {
            Some(Duration::from_millis(0))
        } else {
            self.next_timeout()
        };

        // 4-6. poll, with EINTR retried inside Poller; merge fired events.
        let fired = self.0.borrow_mut().poller.poll(timeout)?;

        // 7. dispatch one fd at a time, suppressing broken-pipe from handlers.
        for (token, mask) in fired {
            if token == WAKER_TOKEN {
                continue;
            }
            let handler = self.0.borrow_mut().handlers.remove(&token.0);
            if let Some(mut handler) = handler {
                handler(mask);
                // The handler may have deregistered itself (e.g. on
                // connection close) during the call above; the map slot it
                // occupied is already empty, so that can't be detected by
                // checking `handlers` here. `deregister` records the token
                // in `deregistered_during_dispatch` instead.
                let mut inner = self.0.borrow_mut();
                if inner.deregistered_during_dispatch.remove(&token.0) {
                    continue;
                }
                inner.handlers.entry(token.0).or_insert(handler);
            }
        }

        Ok(())
    }

    fn next_timeout(&self) -> Option<Duration> {
        let inner = self.0.borrow();
        inner.timers.peek().map(|t| {
            let now = Instant::now();
            if t.deadline <= now {
                Duration::from_millis(0)
            } else {
                t.deadline - now
            }
        })
    }

    /// Run until `stop()` is called. Idempotent: calling `start` again after
    /// a clean stop resumes the loop.
    pub fn run(&self) -> io::Result<()> {
        self.0.borrow_mut().stopping = false;
        loop {
            if self.0.borrow().stopping {
                break;
            }
            self.run_once()?;
        }
        Ok(())
    }
}

/// Self-rescheduling periodic callback. Anchors to a fixed schedule so a
/// slow tick skips ahead instead of firing a burst of catch-up calls.
pub struct PeriodicTask {
    reactor: Reactor,
    interval: Duration,
    callback: Rc<dyn Fn()>,
    next_deadline: Rc<RefCell<Instant>>,
    timer: Rc<RefCell<Option<TimerId>>>,
}

impl PeriodicTask {
    pub fn new(reactor: Reactor, interval: Duration, callback: impl Fn() + 'static) -> Self {
        PeriodicTask {
            reactor,
            interval,
            callback: Rc::new(callback),
            next_deadline: Rc::new(RefCell::new(Instant::now())),
            timer: Rc::new(RefCell::new(None)),
        }
    }

    pub fn start(&self) {
        *self.next_deadline.borrow_mut() = Instant::now() + self.interval;
        self.schedule_next();
    }

    pub fn stop(&self) {
        if let Some(id) = self.timer.borrow_mut().take() {
            self.reactor.cancel(id);
        }
    }

    fn schedule_next(&self) {
        let now = Instant::now();
        {
            let mut deadline = self.next_deadline.borrow_mut();
            while *deadline <= now {
                *deadline += self.interval;
            }
        }
        let delay = *self.next_deadline.borrow() - now;

        let reactor = self.reactor.clone();
        let callback = Rc::clone(&self.callback);
        let next_deadline = Rc::clone(&self.next_deadline);
        let timer = Rc::clone(&self.timer);
        let this_interval = self.interval;

        let id = self.reactor.schedule(delay, move || {
            callback();
            let task = PeriodicTask {
                reactor: reactor.clone(),
                interval: this_interval,
                callback: Rc::clone(&callback),
                next_deadline: Rc::clone(&next_deadline),
                timer: Rc::clone(&timer),
            };
            task.schedule_next();
        });
        *self.timer.borrow_mut() = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_entry_orders_by_deadline_then_id() {
        let now = Instant::now();
        let a = TimerEntry { deadline: now, id: 1, callback: None };
        let b = TimerEntry { deadline: now + Duration::from_secs(1), id: 0, callback: None };
        // max-heap semantics inverted: earlier deadline sorts "greater" so
        // it pops first.
        assert!(a > b);
    }
}
