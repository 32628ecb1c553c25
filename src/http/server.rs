//! Ties a `TcpListener` to `HttpConnection`, exposing the
//! `{no_keep_alive, xheaders}` configuration surface. Grounded in
//! `original_source/src/core/httpserver.cc`'s `HTTPServer::handle_stream`.

use std::rc::Rc;

use crate::http::connection::HttpConnection;
use crate::http::request::Request;
use crate::listener::TcpListener;

pub struct HttpServer {
    listener: TcpListener,
    no_keep_alive: bool,
    xheaders: bool,
    max_buffer_size: usize,
}

impl HttpServer {
    pub fn new(
        listener: TcpListener,
        no_keep_alive: bool,
        xheaders: bool,
        max_buffer_size: usize,
        request_callback: impl Fn(Rc<Request>) + 'static,
    ) -> Self {
        let server = HttpServer { listener, no_keep_alive, xheaders, max_buffer_size };
        let callback: Rc<dyn Fn(Rc<Request>)> = Rc::new(request_callback);
        let no_keep_alive = server.no_keep_alive;
        let xheaders = server.xheaders;
        let max_buffer_size = server.max_buffer_size;
        server.listener.set_handler(move |stream, addr| {
            HttpConnection::new(stream, addr, no_keep_alive, xheaders, max_buffer_size, Rc::clone(&callback));
        });
        server
    }

    pub fn start(&self) -> std::io::Result<()> {
        self.listener.start()
    }
}
