//! Non-blocking buffered I/O over one connected socket. Grounded in
//! `original_source/src/core/iostream.cc` — `try_inline_read`/
//! `read_from_buffer`/`read_to_buffer`/`handle_write`/`handle_events`/
//! `maybe_add_error_listener`/`close`. Preserves four invariants: exclusive
//! read mode, deferred callbacks, a pending-callback count gating the close
//! callback, and error-listener arming only when nothing else already
//! claims READ.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

use mio::net::TcpStream as MioTcpStream;

use crate::chunk::{ByteChunk, ChunkBuffer};
use crate::poller::{ERROR, READ, WRITE};
use crate::reactor::Reactor;
use crate::regexutil::CompiledRegex;

const WRITE_COALESCE_LIMIT: usize = 1024 * 1024;

/// Outcome of one raw `recv` attempt. Replaces the exceptions-as-control-flow
/// style of the original `IOStream::read_from_socket`.
enum RecvResult {
    Ready(usize),
    WouldBlock,
    Eof,
    Io(io::Error),
}

/// Outcome of one raw `send` attempt.
enum SendResult {
    Sent(usize),
    WouldBlock,
    Io(io::Error),
}

fn recv_once(socket: &mut MioTcpStream, buf: &mut [u8]) -> RecvResult {
    match socket.read(buf) {
        Ok(0) => RecvResult::Eof,
        Ok(n) => RecvResult::Ready(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => RecvResult::WouldBlock,
        Err(e) => RecvResult::Io(e),
    }
}

fn send_once(socket: &mut MioTcpStream, buf: &[u8]) -> SendResult {
    match socket.write(buf) {
        Ok(n) => SendResult::Sent(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendResult::WouldBlock,
        Err(e) => SendResult::Io(e),
    }
}

/// Fetch and clear `SO_ERROR`. `None` means the socket is healthy.
fn so_error(socket: &MioTcpStream) -> Option<io::Error> {
    let fd = socket.as_raw_fd();
    let mut errno: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 && errno != 0 {
        Some(io::Error::from_raw_os_error(errno))
    } else {
        None
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

enum ReadMode {
    None,
    Delimiter(Vec<u8>),
    Regex(CompiledRegex),
    FixedLength(usize),
    UntilClose,
}

impl ReadMode {
    fn is_none(&self) -> bool {
        matches!(self, ReadMode::None)
    }
}

type TerminalCallback = Box<dyn FnOnce(&Stream, ByteChunk)>;
type StreamingCallback = Box<dyn FnMut(&Stream, ByteChunk)>;

struct Inner {
    socket: MioTcpStream,
    reactor: Reactor,
    token: Option<usize>,
    read_buffer: ChunkBuffer,
    write_buffer: ChunkBuffer,
    read_mode: ReadMode,
    streaming_cb: Option<StreamingCallback>,
    read_cb: Option<TerminalCallback>,
    write_cb: Option<Box<dyn FnOnce(&Stream)>>,
    connect_cb: Option<Box<dyn FnOnce(&Stream)>>,
    close_cb: Option<Box<dyn FnOnce(&Stream)>>,
    error: Option<io::Error>,
    mask: u8,
    pending_callbacks: usize,
    connecting: bool,
    write_buffer_frozen: bool,
    max_buffer_size: usize,
    read_chunk_size: usize,
    closed: bool,
}

/// A buffered, non-blocking socket. Cheap to clone — all clones refer to the
/// same connection.
#[derive(Clone)]
pub struct Stream(Rc<RefCell<Inner>>);

impl Stream {
    /// Wrap an already-connected socket (the common case: a `TcpListener`
    /// handed us a freshly accepted connection).
    pub fn from_connected(
        socket: MioTcpStream,
        reactor: Reactor,
        max_buffer_size: usize,
        read_chunk_size: usize,
    ) -> io::Result<Self> {
        socket.set_nodelay(true).ok();
        let stream = Stream(Rc::new(RefCell::new(Inner {
            socket,
            reactor: reactor.clone(),
            token: None,
            read_buffer: ChunkBuffer::new(),
            write_buffer: ChunkBuffer::new(),
            read_mode: ReadMode::None,
            streaming_cb: None,
            read_cb: None,
            write_cb: None,
            connect_cb: None,
            close_cb: None,
            error: None,
            mask: 0,
            pending_callbacks: 0,
            connecting: false,
            write_buffer_frozen: false,
            max_buffer_size,
            read_chunk_size,
            closed: false,
        })));
        stream.register_initial()?;
        Ok(stream)
    }

    /// Initiate a non-blocking connect to `host:port`.
    pub fn connect(
        host: &str,
        port: u16,
        reactor: Reactor,
        max_buffer_size: usize,
        read_chunk_size: usize,
        cb: impl FnOnce(&Stream) + 'static,
    ) -> crate::error::Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| crate::error::ServerError::AddressResolution(e.to_string()))?
            .next()
            .ok_or_else(|| crate::error::ServerError::AddressResolution(format!("no address for {host}:{port}")))?;
        let socket = MioTcpStream::connect(addr)?;
        let stream = Stream(Rc::new(RefCell::new(Inner {
            socket,
            reactor: reactor.clone(),
            token: None,
            read_buffer: ChunkBuffer::new(),
            write_buffer: ChunkBuffer::new(),
            read_mode: ReadMode::None,
            streaming_cb: None,
            read_cb: None,
            write_cb: None,
            connect_cb: Some(Box::new(cb)),
            close_cb: None,
            error: None,
            mask: 0,
            pending_callbacks: 0,
            connecting: true,
            write_buffer_frozen: false,
            max_buffer_size,
            read_chunk_size,
            closed: false,
        })));
        stream.register_initial()?;
        Ok(stream)
    }

    fn register_initial(&self) -> io::Result<()> {
        let mask = READ | ERROR;
        let this = self.clone();
        let token = {
            let mut inner = self.0.borrow_mut();
            inner.reactor.clone().register(&mut inner.socket, mask, move |m| this.handle_event(m))?
        };
        let mut inner = self.0.borrow_mut();
        inner.token = Some(token);
        inner.mask = mask;
        Ok(())
    }

    fn reactor(&self) -> Reactor {
        self.0.borrow().reactor.clone()
    }

    pub fn closed(&self) -> bool {
        self.0.borrow().closed
    }

    pub fn reading(&self) -> bool {
        !self.0.borrow().read_mode.is_none()
    }

    pub fn writing(&self) -> bool {
        self.0.borrow().write_buffer.size() > 0
    }

    pub fn error(&self) -> Option<String> {
        self.0.borrow().error.as_ref().map(|e| e.to_string())
    }

    pub fn set_close_callback(&self, cb: impl FnOnce(&Stream) + 'static) {
        self.0.borrow_mut().close_cb = Some(Box::new(cb));
    }

    fn set_read_mode(&self, mode: ReadMode, cb: impl FnOnce(&Stream, ByteChunk) + 'static) {
        let mut inner = self.0.borrow_mut();
        assert!(inner.read_mode.is_none(), "Stream: a read is already pending");
        inner.read_mode = mode;
        inner.read_cb = Some(Box::new(cb));
        drop(inner);
        self.try_satisfy_read();
        self.recompute_mask();
    }

    pub fn read_until(&self, delimiter: impl Into<Vec<u8>>, cb: impl FnOnce(&Stream, ByteChunk) + 'static) {
        self.set_read_mode(ReadMode::Delimiter(delimiter.into()), cb);
    }

    pub fn read_until_regex(&self, pattern: CompiledRegex, cb: impl FnOnce(&Stream, ByteChunk) + 'static) {
        self.set_read_mode(ReadMode::Regex(pattern), cb);
    }

    pub fn read_bytes(
        &self,
        n: usize,
        cb: impl FnOnce(&Stream, ByteChunk) + 'static,
        streaming_cb: Option<Box<dyn FnMut(&Stream, ByteChunk)>>,
    ) {
        self.0.borrow_mut().streaming_cb = streaming_cb;
        self.set_read_mode(ReadMode::FixedLength(n), cb);
    }

    pub fn read_until_close(
        &self,
        cb: impl FnOnce(&Stream, ByteChunk) + 'static,
        streaming_cb: Option<Box<dyn FnMut(&Stream, ByteChunk)>>,
    ) {
        self.0.borrow_mut().streaming_cb = streaming_cb;
        self.set_read_mode(ReadMode::UntilClose, cb);
    }

    pub fn write(&self, data: Vec<u8>, cb: Option<Box<dyn FnOnce(&Stream)>>) {
        {
            let mut inner = self.0.borrow_mut();
            inner.write_buffer.push_back(ByteChunk::from_vec(data));
            if cb.is_some() {
                inner.write_cb = cb;
            }
        }
        let connecting = self.0.borrow().connecting;
        if !connecting {
            self.handle_write();
        }
        self.recompute_mask();
    }

    // -- event dispatch -----------------------------------------------

    fn handle_event(&self, mask: u8) {
        if self.closed() {
            return;
        }
        if mask & READ != 0 {
            self.handle_read();
        }
        if !self.closed() && mask & WRITE != 0 {
            if self.0.borrow().connecting {
                self.handle_connect();
            }
            self.handle_write();
        }
        if !self.closed() && mask & ERROR != 0 {
            let err = so_error(&self.0.borrow().socket);
            if let Some(err) = err {
                self.0.borrow_mut().error = Some(err);
                let this = self.clone();
                self.reactor().add_callback(move || this.close());
            }
        }
        if !self.closed() {
            self.recompute_mask();
        }
    }

    fn handle_connect(&self) {
        self.0.borrow_mut().connecting = false;
        let err = so_error(&self.0.borrow().socket);
        if let Some(err) = err {
            self.0.borrow_mut().error = Some(err);
            self.close();
            return;
        }
        let cb = self.0.borrow_mut().connect_cb.take();
        if let Some(cb) = cb {
            let this = self.clone();
            self.post_callback(move || cb(&this));
        }
    }

    fn handle_read(&self) {
        loop {
            if self.closed() {
                return;
            }
            let chunk_size = self.0.borrow().read_chunk_size;
            let mut buf = vec![0u8; chunk_size];
            let result = {
                let mut inner = self.0.borrow_mut();
                recv_once(&mut inner.socket, &mut buf)
            };
            match result {
                RecvResult::Ready(n) => {
                    buf.truncate(n);
                    let overflow = {
                        let mut inner = self.0.borrow_mut();
                        inner.read_buffer.push_back(ByteChunk::from_vec(buf));
                        inner.read_buffer.size() >= inner.max_buffer_size
                    };
                    if overflow {
                        self.fail(io::Error::new(io::ErrorKind::Other, "read buffer exceeded max_buffer_size"));
                        return;
                    }
                    self.try_satisfy_read();
                }
                RecvResult::WouldBlock => {
                    return;
                }
                RecvResult::Eof => {
                    self.handle_eof();
                    return;
                }
                RecvResult::Io(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn handle_eof(&self) {
        let until_close = matches!(self.0.borrow().read_mode, ReadMode::UntilClose);
        if until_close {
            let chunk = {
                let mut inner = self.0.borrow_mut();
                inner.read_mode = ReadMode::None;
                let loc = inner.read_buffer.size();
                inner.read_buffer.consume(loc)
            };
            self.deliver_terminal(chunk);
        }
        self.close();
    }

    fn handle_write(&self) {
        loop {
            let frozen = self.0.borrow().write_buffer_frozen;
            if !frozen {
                self.0.borrow_mut().write_buffer.merge_prefix(WRITE_COALESCE_LIMIT);
            }
            let empty = self.0.borrow().write_buffer.is_empty();
            if empty {
                self.0.borrow_mut().write_buffer_frozen = false;
                let cb = self.0.borrow_mut().write_cb.take();
                if let Some(cb) = cb {
                    let this = self.clone();
                    self.post_callback(move || cb(&this));
                }
                return;
            }
            let front_len = self.0.borrow().write_buffer.peek_front().unwrap().len();
            let front_bytes = self.0.borrow().write_buffer.peek_front().unwrap().as_slice().to_vec();
            let result = {
                let mut inner = self.0.borrow_mut();
                send_once(&mut inner.socket, &front_bytes)
            };
            match result {
                SendResult::Sent(n) => {
                    self.0.borrow_mut().write_buffer.remove_prefix(n);
                    if n < front_len {
                        self.0.borrow_mut().write_buffer_frozen = true;
                        return;
                    }
                }
                SendResult::WouldBlock => {
                    self.0.borrow_mut().write_buffer_frozen = true;
                    return;
                }
                SendResult::Io(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    // -- read-mode satisfaction -----------------------------------------

    fn try_satisfy_read(&self) {
        loop {
            let outcome = {
                let mut inner = self.0.borrow_mut();
                match &inner.read_mode {
                    ReadMode::None => return,
                    ReadMode::Delimiter(delim) => {
                        let delim = delim.clone();
                        match scan_for_delimiter(&mut inner.read_buffer, &delim) {
                            Some(end) => {
                                inner.read_mode = ReadMode::None;
                                Some(inner.read_buffer.consume(end))
                            }
                            None => None,
                        }
                    }
                    ReadMode::Regex(re) => {
                        let re = re.clone();
                        match scan_for_regex(&mut inner.read_buffer, &re) {
                            Some(end) => {
                                inner.read_mode = ReadMode::None;
                                Some(inner.read_buffer.consume(end))
                            }
                            None => None,
                        }
                    }
                    ReadMode::FixedLength(remaining) => {
                        let remaining = *remaining;
                        if inner.streaming_cb.is_some() && inner.read_buffer.size() > 0 {
                            let take = remaining.min(inner.read_buffer.size());
                            let chunk = inner.read_buffer.consume(take);
                            let left = remaining - take;
                            inner.read_mode = if left == 0 { ReadMode::None } else { ReadMode::FixedLength(left) };
                            drop(inner);
                            self.deliver_streaming(chunk);
                            if left == 0 {
                                Some(ByteChunk::null())
                            } else {
                                continue;
                            }
                        } else if inner.read_buffer.size() >= remaining {
                            inner.read_mode = ReadMode::None;
                            Some(inner.read_buffer.consume(remaining))
                        } else {
                            None
                        }
                    }
                    ReadMode::UntilClose => None,
                }
            };
            match outcome {
                Some(chunk) => {
                    self.deliver_terminal(chunk);
                    return;
                }
                None => return,
            }
        }
    }

    fn deliver_terminal(&self, chunk: ByteChunk) {
        let cb = self.0.borrow_mut().read_cb.take();
        if let Some(cb) = cb {
            let this = self.clone();
            self.post_callback(move || cb(&this, chunk));
        }
    }

    fn deliver_streaming(&self, chunk: ByteChunk) {
        let this = self.clone();
        self.post_callback(move || {
            let cb = this.0.borrow_mut().streaming_cb.take();
            if let Some(mut cb) = cb {
                cb(&this, chunk);
                let mut inner = this.0.borrow_mut();
                if inner.streaming_cb.is_none() {
                    inner.streaming_cb = Some(cb);
                }
            }
        });
    }

    /// User-visible callbacks always cross a `post` boundary and are
    /// counted so `close` can defer itself until all of them have run.
    fn post_callback(&self, f: impl FnOnce() + 'static) {
        self.0.borrow_mut().pending_callbacks += 1;
        let this = self.clone();
        self.reactor().add_callback(move || {
            f();
            let remaining = {
                let mut inner = this.0.borrow_mut();
                inner.pending_callbacks -= 1;
                inner.pending_callbacks
            };
            if remaining == 0 && this.closed() {
                this.run_close_callback();
            }
        });
    }

    // -- close / failure --------------------------------------------------

    fn fail(&self, err: io::Error) {
        self.0.borrow_mut().error = Some(err);
        self.close();
    }

    pub fn close(&self) {
        let already_closed = self.0.borrow().closed;
        if already_closed {
            return;
        }
        let until_close_pending = matches!(self.0.borrow().read_mode, ReadMode::UntilClose);
        if until_close_pending {
            let chunk = {
                let mut inner = self.0.borrow_mut();
                inner.read_mode = ReadMode::None;
                let loc = inner.read_buffer.size();
                inner.read_buffer.consume(loc)
            };
            self.deliver_terminal(chunk);
        }
        let token = self.0.borrow().token;
        if let Some(token) = token {
            let mut inner = self.0.borrow_mut();
            let _ = inner.reactor.clone().deregister(token, &mut inner.socket);
        }
        {
            let mut inner = self.0.borrow_mut();
            inner.mask = 0;
            inner.closed = true;
            inner.read_mode = ReadMode::None;
            inner.streaming_cb = None;
            inner.read_cb = None;
        }
        let pending = self.0.borrow().pending_callbacks;
        if pending == 0 {
            self.run_close_callback();
        }
    }

    fn run_close_callback(&self) {
        let cb = self.0.borrow_mut().close_cb.take();
        if let Some(cb) = cb {
            cb(self);
        }
    }

    /// Recompute the registered event mask: ERROR always, READ if a read is
    /// pending or no other mode is active (so peer close is still noticed),
    /// WRITE if the write buffer is non-empty. Only re-registers on change.
    fn recompute_mask(&self) {
        if self.closed() {
            return;
        }
        let (want_read, want_write, pending) = {
            let inner = self.0.borrow();
            let want_read = !inner.read_mode.is_none() || inner.pending_callbacks == 0;
            let want_write = inner.write_buffer.size() > 0;
            (want_read, want_write, inner.pending_callbacks)
        };
        // Only claim READ for "detect close" purposes when nothing else
        // has a slow-path armed already.
        let want_read = want_read && (pending == 0 || self.reading());
        let mut mask = ERROR;
        if want_read {
            mask |= READ;
        }
        if want_write {
            mask |= WRITE;
        }
        let changed = {
            let inner = self.0.borrow();
            inner.mask != mask
        };
        if changed {
            let token = self.0.borrow().token;
            if let Some(token) = token {
                let mut inner = self.0.borrow_mut();
                if inner.reactor.clone().update_mask(token, &mut inner.socket, mask).is_ok() {
                    inner.mask = mask;
                }
            }
        }
    }
}

fn scan_for_delimiter(buf: &mut ChunkBuffer, delim: &[u8]) -> Option<usize> {
    loop {
        if buf.size() == 0 {
            return None;
        }
        let front = buf.peek_front().unwrap().as_slice();
        if let Some(pos) = find_subsequence(front, delim) {
            return Some(pos + delim.len());
        }
        if buf.chunk_count() == 1 {
            return None;
        }
        buf.double_prefix();
    }
}

fn scan_for_regex(buf: &mut ChunkBuffer, re: &CompiledRegex) -> Option<usize> {
    loop {
        if buf.size() == 0 {
            return None;
        }
        let front = buf.peek_front().unwrap().as_slice();
        if let Some(end) = re.exec(front) {
            return Some(end);
        }
        if buf.chunk_count() == 1 {
            return None;
        }
        buf.double_prefix();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_subsequence_locates_delimiter() {
        assert_eq!(find_subsequence(b"abc\r\n\r\ndef", b"\r\n\r\n"), Some(3));
        assert_eq!(find_subsequence(b"abc", b"\r\n\r\n"), None);
    }

    #[test]
    fn scan_for_delimiter_grows_front_chunk_as_needed() {
        let mut buf = ChunkBuffer::new();
        buf.push_back(ByteChunk::from_vec(b"GET / HTTP/1.1\r\n".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"Host: h\r\n".to_vec()));
        buf.push_back(ByteChunk::from_vec(b"\r\n".to_vec()));
        let end = scan_for_delimiter(&mut buf, b"\r\n\r\n").unwrap();
        assert_eq!(end, "GET / HTTP/1.1\r\nHost: h\r\n\r\n".len());
    }
}
