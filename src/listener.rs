//! Binds listening sockets and accepts connections. Grounded in
//! `original_source/src/core/tcpserver.cc`: `bind`/`listen`/`add_socket`/
//! `start`, and the `accept_handler` loop that drains `accept()` until
//! `WouldBlock`.

use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::FromRawFd;
use std::rc::Rc;

use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};

use crate::poller::READ;
use crate::reactor::Reactor;
use crate::stream::Stream;

pub struct StreamOptions {
    pub max_buffer_size: usize,
    pub read_chunk_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions { max_buffer_size: 100 * 1024 * 1024, read_chunk_size: 4096 }
    }
}

struct Inner {
    reactor: Reactor,
    sockets: Vec<MioTcpListener>,
    stream_opts: StreamOptions,
    handler: Option<Rc<dyn Fn(Stream, SocketAddr)>>,
}

/// Accepts connections on one or more bound sockets and hands each accepted
/// connection to a `handle_stream(stream, peer_addr)` callback.
#[derive(Clone)]
pub struct TcpListener(Rc<RefCell<Inner>>);

impl TcpListener {
    pub fn new(reactor: Reactor, stream_opts: StreamOptions) -> Self {
        TcpListener(Rc::new(RefCell::new(Inner {
            reactor,
            sockets: Vec::new(),
            stream_opts,
            handler: None,
        })))
    }

    pub fn set_handler(&self, handler: impl Fn(Stream, SocketAddr) + 'static) {
        self.0.borrow_mut().handler = Some(Rc::new(handler));
    }

    /// Bind without registering readiness yet; `start()` arms it. Sets
    /// SO_REUSEADDR, close-on-exec, and (for IPv6) V6ONLY directly on the
    /// raw socket per the listening-socket configuration surface, then
    /// hands it to mio.
    pub fn bind(&self, host: IpAddr, port: u16, backlog: u32) -> io::Result<()> {
        let addr = SocketAddr::new(host, port);
        let socket = bind_configured(addr, backlog)?;
        self.0.borrow_mut().sockets.push(socket);
        Ok(())
    }

    /// `bind` + `start` in one call, as the `listen(port, host)` shorthand.
    pub fn listen(&self, host: IpAddr, port: u16, backlog: u32) -> io::Result<()> {
        self.bind(host, port, backlog)?;
        self.start()
    }

    /// Register every bound-but-unregistered socket with the reactor.
    pub fn start(&self) -> io::Result<()> {
        let reactor = self.0.borrow().reactor.clone();
        let count = self.0.borrow().sockets.len();
        for index in 0..count {
            let this = self.clone();
            let mut inner = self.0.borrow_mut();
            reactor.register(&mut inner.sockets[index], READ, move |_mask| this.accept_handler(index))?;
        }
        Ok(())
    }

    fn accept_handler(&self, index: usize) {
        loop {
            let accepted = {
                let mut inner = self.0.borrow_mut();
                inner.sockets[index].accept()
            };
            match accepted {
                Ok((socket, peer)) => self.dispatch_accepted(socket, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn dispatch_accepted(&self, socket: MioTcpStream, peer: SocketAddr) {
        let (reactor, max_buffer_size, read_chunk_size, handler) = {
            let inner = self.0.borrow();
            (
                inner.reactor.clone(),
                inner.stream_opts.max_buffer_size,
                inner.stream_opts.read_chunk_size,
                inner.handler.clone(),
            )
        };
        let stream = match Stream::from_connected(socket, reactor, max_buffer_size, read_chunk_size) {
            Ok(s) => s,
            Err(_) => return,
        };
        if let Some(handler) = handler {
            handler(stream, peer);
        }
    }
}

/// Build, configure, bind, and listen on a raw socket matching the
/// listening-socket contract: nonblocking, close-on-exec, SO_REUSEADDR, and
/// V6ONLY for IPv6.
fn bind_configured(addr: SocketAddr, backlog: u32) -> io::Result<MioTcpListener> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let on: libc::c_int = 1;
    let opt_len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    unsafe {
        libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &on as *const _ as *const libc::c_void, opt_len);
        if addr.is_ipv6() {
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_V6ONLY,
                &on as *const _ as *const libc::c_void,
                opt_len,
            );
        }
    }

    let (storage, len) = socket_addr_to_sockaddr(&addr);
    if unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    if unsafe { libc::listen(fd, backlog as libc::c_int) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    Ok(MioTcpListener::from_std(std_listener))
}

fn socket_addr_to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sockaddr_in = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sockaddr_in as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sockaddr_in6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sockaddr_in6 as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stream_options_match_configuration_surface_defaults() {
        let opts = StreamOptions::default();
        assert_eq!(opts.max_buffer_size, 100 * 1024 * 1024);
        assert_eq!(opts.read_chunk_size, 4096);
    }
}
