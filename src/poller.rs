//! Thin wrapper over `mio::Poll`. Translates `mio`'s readable/writable/error
//! event flags into the READ/WRITE/ERROR bitmask the reactor works with, and
//! retries `poll()` on `ErrorKind::Interrupted` the way ctornado's
//! `IOLoop::start` retries `epoll_wait` on `EINTR`.

use std::io;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};

pub const READ: u8 = 0b001;
pub const WRITE: u8 = 0b010;
pub const ERROR: u8 = 0b100;

const EVENT_BATCH: usize = 128;

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Poller { poll: Poll::new()?, events: Events::with_capacity(EVENT_BATCH) })
    }

    fn interest_for(mask: u8) -> Interest {
        match (mask & READ != 0, mask & WRITE != 0) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => Interest::READABLE,
        }
    }

    pub fn register(&mut self, source: &mut impl mio::event::Source, token: Token, mask: u8) -> io::Result<()> {
        self.poll.registry().register(source, token, Self::interest_for(mask))
    }

    pub fn reregister(&mut self, source: &mut impl mio::event::Source, token: Token, mask: u8) -> io::Result<()> {
        self.poll.registry().reregister(source, token, Self::interest_for(mask))
    }

    pub fn deregister(&mut self, source: &mut impl mio::event::Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// A `mio::Waker` bound to this poller's registry, used to break a
    /// blocking `poll()` from another thread (e.g. after `Reactor::post`).
    pub fn make_waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }

    /// Block for up to `timeout`, returning the fired tokens and their
    /// READ/WRITE/ERROR bitmask. A fd that is re-armed with a different mask
    /// more than once within the same batch keeps only the last mask seen,
    /// matching the pending-events map semantics of the reactor main loop.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(Token, u8)>> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut fired = Vec::new();
        for event in self.events.iter() {
            let mut mask = 0u8;
            if event.is_readable() {
                mask |= READ;
            }
            if event.is_writable() {
                mask |= WRITE;
            }
            if event.is_error() || event.is_read_closed() || event.is_write_closed() {
                mask |= ERROR;
            }
            fired.push((event.token(), mask));
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_for_covers_all_masks() {
        assert_eq!(Poller::interest_for(READ), Interest::READABLE);
        assert_eq!(Poller::interest_for(WRITE), Interest::WRITABLE);
        assert_eq!(Poller::interest_for(READ | WRITE), Interest::READABLE | Interest::WRITABLE);
    }
}
