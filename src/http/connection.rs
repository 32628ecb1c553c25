//! The per-connection HTTP/1.x state machine. Grounded in
//! `original_source/src/core/httpserver.cc`'s `HTTPConnection`
//! (`_on_headers`/`_on_request_body`/`_on_write_complete`/`finish`/
//! `_finish_request`), which drives the `AwaitHeaders -> ParseHeaders ->
//! AwaitBody -> Dispatch -> Writing -> FinishRequest` cycle over one
//! `IOStream`.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::chunk::ByteChunk;
use crate::http::headers::Headers;
use crate::http::parsing::{self, Method};
use crate::http::request::Request;
use crate::reactor::Reactor;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitHeaders,
    AwaitBody,
    Dispatch,
    Writing,
    FinishRequest,
    Closed,
}

/// The request-line and headers captured between `ParseHeaders` and
/// `FinishRequest`, kept around so the keep-alive decision can inspect the
/// version/headers/method of the request that was just served.
struct PendingRequest {
    method: Method,
    uri: String,
    version: String,
    headers: Headers,
}

struct Inner {
    stream: Stream,
    remote_addr: SocketAddr,
    no_keep_alive: bool,
    xheaders: bool,
    max_buffer_size: usize,
    scheme: String,
    state: ConnState,
    pending: Option<PendingRequest>,
    request_finished: bool,
    write_cb: Option<Box<dyn FnOnce(&HttpConnection)>>,
    request_callback: Rc<dyn Fn(Rc<Request>)>,
}

/// One accepted connection driving zero-or-more requests in sequence. Cheap
/// to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct HttpConnection(Rc<RefCell<Inner>>);

impl HttpConnection {
    pub fn new(
        stream: Stream,
        remote_addr: SocketAddr,
        no_keep_alive: bool,
        xheaders: bool,
        max_buffer_size: usize,
        request_callback: Rc<dyn Fn(Rc<Request>)>,
    ) -> Self {
        let conn = HttpConnection(Rc::new(RefCell::new(Inner {
            stream,
            remote_addr,
            no_keep_alive,
            xheaders,
            max_buffer_size,
            scheme: "http".to_string(),
            state: ConnState::AwaitHeaders,
            pending: None,
            request_finished: false,
            write_cb: None,
            request_callback,
        })));
        let close_target = conn.clone();
        conn.0.borrow().stream.set_close_callback(move |_s| {
            close_target.0.borrow_mut().state = ConnState::Closed;
        });
        conn.await_headers();
        conn
    }

    pub fn stream(&self) -> Stream {
        self.0.borrow().stream.clone()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.0.borrow().remote_addr
    }

    pub fn state(&self) -> ConnState {
        self.0.borrow().state
    }

    fn await_headers(&self) {
        self.0.borrow_mut().state = ConnState::AwaitHeaders;
        let this = self.clone();
        self.stream().read_until(b"\r\n\r\n".to_vec(), move |_s, chunk| this.on_headers(chunk));
    }

    fn on_headers(&self, chunk: ByteChunk) {
        if chunk.is_null() || self.stream().closed() {
            return;
        }
        let raw = String::from_utf8_lossy(chunk.as_slice()).into_owned();
        let Some(header_end) = raw.find("\r\n\r\n") else {
            self.close();
            return;
        };
        let head = &raw[..header_end];
        let Some(line_end) = head.find("\r\n") else {
            self.close();
            return;
        };
        let request_line = &head[..line_end];
        let header_block = &head[line_end + 2..];

        let Ok(parsed) = parsing::parse_request_line(request_line) else {
            self.close();
            return;
        };
        let Ok(headers) = Headers::parse(header_block) else {
            self.close();
            return;
        };

        let content_length: Option<usize> =
            headers.get("Content-Length").and_then(|v| v.trim().parse().ok());

        self.0.borrow_mut().pending =
            Some(PendingRequest { method: parsed.method, uri: parsed.uri, version: parsed.version, headers });

        match content_length {
            Some(len) => self.await_body(len),
            None => self.dispatch(Vec::new()),
        }
    }

    fn await_body(&self, content_length: usize) {
        let max_buffer_size = self.0.borrow().max_buffer_size;
        if content_length > max_buffer_size {
            // Overflow is rejected up front: never issue the read, never
            // invoke the request callback.
            self.close();
            return;
        }

        let expects_continue = self
            .0
            .borrow()
            .pending
            .as_ref()
            .and_then(|p| p.headers.get("Expect"))
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);
        if expects_continue {
            self.stream().write(b"HTTP/1.1 100 (Continue)\r\n\r\n".to_vec(), None);
        }

        self.0.borrow_mut().state = ConnState::AwaitBody;
        let this = self.clone();
        self.stream().read_bytes(content_length, move |_s, chunk| this.on_body(chunk), None);
    }

    fn on_body(&self, chunk: ByteChunk) {
        if self.stream().closed() {
            return;
        }
        self.dispatch(chunk.as_slice().to_vec());
    }

    fn dispatch(&self, body: Vec<u8>) {
        self.0.borrow_mut().state = ConnState::Dispatch;
        let pending = self.0.borrow_mut().pending.take();
        let Some(pending) = pending else { return };

        let content_type = pending.headers.get("Content-Type").map(str::to_string);
        let (arguments, files) = decode_body(pending.method, content_type.as_deref(), &body);

        let remote_ip = self.0.borrow().remote_addr.ip().to_string();
        let scheme = self.0.borrow().scheme.clone();
        let xheaders = self.0.borrow().xheaders;

        let request = Rc::new(Request::new(
            pending.method,
            pending.uri.clone(),
            pending.version.clone(),
            pending.headers.clone(),
            body,
            arguments,
            files,
            remote_ip,
            scheme,
            xheaders,
            self.clone(),
        ));

        self.0.borrow_mut().pending = Some(pending);
        self.0.borrow_mut().state = ConnState::Writing;
        let callback = self.0.borrow().request_callback.clone();
        callback(request);
    }

    /// Called from `Request::write`. Stores `cb` (replacing any prior) and
    /// forwards the chunk to the stream, with a connection-owned completion
    /// hook that always runs so `finish()` can be noticed once the buffer
    /// drains.
    pub fn write(&self, chunk: Vec<u8>, cb: Option<Box<dyn FnOnce(&HttpConnection)>>) {
        let stream = self.stream();
        if stream.closed() {
            return;
        }
        self.0.borrow_mut().write_cb = cb;
        let this = self.clone();
        stream.write(chunk, Some(Box::new(move |_s| this.on_write_complete())));
    }

    fn on_write_complete(&self) {
        let cb = self.0.borrow_mut().write_cb.take();
        if let Some(cb) = cb {
            cb(self);
        }
        self.maybe_finish_request();
    }

    /// Called from `Request::finish`.
    pub fn finish(&self) {
        self.0.borrow_mut().request_finished = true;
        self.maybe_finish_request();
    }

    fn maybe_finish_request(&self) {
        let (finished, still_writing) = {
            let inner = self.0.borrow();
            (inner.request_finished, inner.stream.writing())
        };
        if finished && !still_writing {
            self.run_finish_request();
        }
    }

    fn run_finish_request(&self) {
        self.0.borrow_mut().state = ConnState::FinishRequest;
        let (no_keep_alive, pending) = {
            let mut inner = self.0.borrow_mut();
            (inner.no_keep_alive, inner.pending.take())
        };
        self.0.borrow_mut().request_finished = false;

        let Some(pending) = pending else {
            self.close();
            return;
        };
        if should_disconnect(no_keep_alive, &pending.version, &pending.headers, pending.method) {
            self.close();
        } else {
            self.await_headers();
        }
    }

    fn close(&self) {
        self.0.borrow_mut().state = ConnState::Closed;
        self.stream().close();
    }
}

/// Per the keep-alive table: `no_keep_alive` always disconnects; HTTP/1.1
/// disconnects only on an explicit `Connection: close`; earlier versions
/// disconnect unless the response carries `Content-Length` (or the method
/// was `HEAD`/`GET`) *and* the client asked for `Connection: keep-alive`.
fn should_disconnect(no_keep_alive: bool, version: &str, headers: &Headers, method: Method) -> bool {
    if no_keep_alive {
        return true;
    }
    let connection_hdr = headers.get("Connection").map(str::to_ascii_lowercase);
    if version.eq_ignore_ascii_case("HTTP/1.1") {
        return connection_hdr.as_deref() == Some("close");
    }
    let eligible = headers.has("Content-Length") || matches!(method, Method::Head | Method::Get);
    !(eligible && connection_hdr.as_deref() == Some("keep-alive"))
}

fn decode_body(
    method: Method,
    content_type: Option<&str>,
    body: &[u8],
) -> (Vec<(String, String)>, Vec<parsing::MultipartFile>) {
    if method != Method::Post && method != Method::Put && method != Method::Patch {
        return (Vec::new(), Vec::new());
    }
    let Some(content_type) = content_type else { return (Vec::new(), Vec::new()) };
    let (main, params) = parsing::parse_header_params(content_type);
    match main.as_str() {
        "application/x-www-form-urlencoded" => (parsing::parse_urlencoded(body), Vec::new()),
        "multipart/form-data" => match params.get("boundary") {
            Some(boundary) => match parsing::parse_multipart(body, boundary) {
                Ok(parsed) => (parsed.arguments, parsed.files),
                Err(_) => (Vec::new(), Vec::new()),
            },
            None => (Vec::new(), Vec::new()),
        },
        _ => (Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_keep_alive_always_disconnects() {
        let headers = Headers::new();
        assert!(should_disconnect(true, "HTTP/1.1", &headers, Method::Get));
    }

    #[test]
    fn http11_disconnects_only_on_explicit_close() {
        let mut headers = Headers::new();
        assert!(!should_disconnect(false, "HTTP/1.1", &headers, Method::Get));
        headers.add("Connection", "close");
        assert!(should_disconnect(false, "HTTP/1.1", &headers, Method::Get));
    }

    #[test]
    fn http10_requires_explicit_keep_alive_and_eligibility() {
        let headers = Headers::new();
        assert!(should_disconnect(false, "HTTP/1.0", &headers, Method::Get));

        let mut headers = Headers::new();
        headers.add("Connection", "keep-alive");
        assert!(!should_disconnect(false, "HTTP/1.0", &headers, Method::Get));
        assert!(should_disconnect(false, "HTTP/1.0", &headers, Method::Post));

        let mut headers = Headers::new();
        headers.add("Connection", "keep-alive");
        headers.add("Content-Length", "0");
        assert!(!should_disconnect(false, "HTTP/1.0", &headers, Method::Post));
    }

    #[test]
    fn decode_body_parses_urlencoded_post() {
        let (args, files) = decode_body(Method::Post, Some("application/x-www-form-urlencoded"), b"a=1&b=2");
        assert_eq!(args, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        assert!(files.is_empty());
    }

    #[test]
    fn decode_body_ignores_get_requests() {
        let (args, files) = decode_body(Method::Get, Some("application/x-www-form-urlencoded"), b"a=1");
        assert!(args.is_empty());
        assert!(files.is_empty());
    }
}
