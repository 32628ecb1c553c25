//! Integration tests driving a real `TcpListener` + `Reactor` on a
//! background thread and a plain `std::net::TcpStream` client, mirroring
//! the pattern the stack's own tests use for exercising a running server.

use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use reactor_httpd::http::{HttpServer, Request};
use reactor_httpd::listener::{StreamOptions, TcpListener};
use reactor_httpd::reactor::Reactor;

fn echo_handler(request: Rc<Request>) {
    let mut body = format!("{} {}\n", request.method, request.path);
    for (k, v) in &request.arguments {
        body.push_str(&format!("arg:{k}={v}\n"));
    }
    for file in &request.files {
        body.push_str(&format!("file:{}:{}:{}\n", file.name, file.filename, String::from_utf8_lossy(&file.body)));
    }
    let headers = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
        body.len()
    );
    request.write(headers.into_bytes(), None);
    request.write(body.into_bytes(), None);
    request.finish();
}

/// Start a server on `port` running `echo_handler`, with a small
/// `max_buffer_size` so the overflow scenario can be exercised cheaply.
fn start_server(port: u16, max_buffer_size: usize) {
    thread::spawn(move || {
        let reactor = Reactor::new().unwrap();
        let stream_opts = StreamOptions { max_buffer_size, read_chunk_size: 4096 };
        let listener = TcpListener::new(reactor.clone(), stream_opts);
        let server = HttpServer::new(listener.clone(), false, false, max_buffer_size, echo_handler);
        let host: IpAddr = "127.0.0.1".parse().unwrap();
        listener.bind(host, port, 128).unwrap();
        server.start().unwrap();
        reactor.run().unwrap();
    });
    thread::sleep(Duration::from_millis(150));
}

fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).expect("read response");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[test]
fn simple_get_keeps_connection_alive_across_requests() {
    start_server(18181, 1024 * 1024);
    let mut stream = TcpStream::connect("127.0.0.1:18181").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
    let first = read_response(&mut stream);
    assert!(first.starts_with("HTTP/1.1 200 OK"));
    assert!(first.contains("GET /x"));

    stream.write_all(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
    let second = read_response(&mut stream);
    assert!(second.starts_with("HTTP/1.1 200 OK"));

    // the connection is still usable for a third request.
    stream.write_all(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
    let third = read_response(&mut stream);
    assert!(third.starts_with("HTTP/1.1 200 OK"));
}

#[test]
fn post_form_urlencoded_populates_arguments() {
    start_server(18182, 1024 * 1024);
    let mut stream = TcpStream::connect("127.0.0.1:18182").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let body = "a=1&b=2&a=3";
    let request = format!(
        "POST /submit HTTP/1.1\r\nHost: h\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).unwrap();
    let response = read_response(&mut stream);
    assert!(response.contains("arg:a=1"));
    assert!(response.contains("arg:b=2"));
    assert!(response.contains("arg:a=3"));
}

#[test]
fn multipart_upload_populates_files_and_arguments() {
    start_server(18183, 1024 * 1024);
    let mut stream = TcpStream::connect("127.0.0.1:18183").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let body = "--AaB03x\r\n\
Content-Disposition: form-data; name=\"submit-name\"\r\n\
\r\n\
Larry\r\n\
--AaB03x\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"file1.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
... contents ...\r\n\
--AaB03x--";
    let request = format!(
        "POST /upload HTTP/1.1\r\nHost: h\r\nContent-Type: multipart/form-data; boundary=AaB03x\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).unwrap();
    let response = read_response(&mut stream);
    assert!(response.contains("arg:submit-name=Larry"));
    assert!(response.contains("file:files:file1.txt:... contents ..."));
}

#[test]
fn expect_continue_gets_interim_response_before_body() {
    start_server(18184, 1024 * 1024);
    let mut stream = TcpStream::connect("127.0.0.1:18184").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream
        .write_all(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n")
        .unwrap();
    let interim = read_response(&mut stream);
    assert!(interim.starts_with("HTTP/1.1 100 (Continue)"));

    stream.write_all(b"abcde").unwrap();
    let final_response = read_response(&mut stream);
    assert!(final_response.starts_with("HTTP/1.1 200 OK"));
}

#[test]
fn content_length_over_max_buffer_size_closes_without_response() {
    start_server(18185, 4096);
    let mut stream = TcpStream::connect("127.0.0.1:18185").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream
        .write_all(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 99999999999\r\n\r\n")
        .unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "server must close without writing a response on overflow");
}

#[test]
fn peer_half_close_mid_body_never_dispatches() {
    start_server(18186, 1024 * 1024);
    let mut stream = TcpStream::connect("127.0.0.1:18186").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 10\r\n\r\n123").unwrap();
    stream.shutdown(std::net::Shutdown::Write).unwrap();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "a request body cut short by EOF must never reach the callback");
}
