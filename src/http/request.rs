//! The parsed request snapshot handed to the user callback, plus its
//! `write`/`finish` forwarders onto the owning `HttpConnection`. Grounded in
//! `original_source/src/core/httpserver.cc`'s `HTTPRequest` constructor
//! (XHeaders override, path/query split, lazy cookies) and `write`/`finish`.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use crate::http::connection::HttpConnection;
use crate::http::headers::Headers;
use crate::http::parsing::{Method, MultipartFile};
use crate::stream::Stream;
use crate::url::{self, Query};

pub struct Request {
    pub method: Method,
    pub uri: String,
    pub path: String,
    pub raw_query: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub arguments: Vec<(String, String)>,
    pub files: Vec<MultipartFile>,
    pub remote_ip: String,
    pub scheme: String,
    pub host: String,
    pub start_time: Instant,
    finish_time: Cell<Option<Instant>>,
    cookies: RefCell<Option<Vec<(String, String)>>>,
    connection: HttpConnection,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        uri: String,
        version: String,
        headers: Headers,
        body: Vec<u8>,
        arguments: Vec<(String, String)>,
        files: Vec<MultipartFile>,
        remote_ip: String,
        scheme: String,
        xheaders: bool,
        connection: HttpConnection,
    ) -> Self {
        let split = url::split(&uri, false);
        let host = headers.get("Host").unwrap_or("").to_string();

        let (remote_ip, scheme) = if xheaders {
            apply_xheaders(&headers, remote_ip, scheme)
        } else {
            (remote_ip, scheme)
        };

        Request {
            method,
            uri,
            path: split.path,
            raw_query: split.query,
            version,
            headers,
            body,
            arguments,
            files,
            remote_ip,
            scheme,
            host,
            start_time: Instant::now(),
            finish_time: Cell::new(None),
            cookies: RefCell::new(None),
            connection,
        }
    }

    pub fn query(&self) -> Query {
        Query::parse(&self.raw_query)
    }

    /// Cookies are parsed lazily from the `Cookie` header on first access.
    pub fn cookies(&self) -> Vec<(String, String)> {
        if self.cookies.borrow().is_none() {
            let parsed = self.headers.get("Cookie").map(crate::cookie::parse).unwrap_or_default();
            *self.cookies.borrow_mut() = Some(parsed);
        }
        self.cookies.borrow().clone().unwrap()
    }

    pub fn write(&self, chunk: Vec<u8>, cb: Option<Box<dyn FnOnce(&HttpConnection)>>) {
        self.connection.write(chunk, cb);
    }

    pub fn finish(&self) {
        self.connection.finish();
        self.finish_time.set(Some(Instant::now()));
    }

    pub fn request_time(&self) -> Duration {
        let end = self.finish_time.get().unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.start_time)
    }

    pub fn stream(&self) -> Stream {
        self.connection.stream()
    }
}

fn apply_xheaders(headers: &Headers, default_ip: String, default_scheme: String) -> (String, String) {
    let candidate_ip = headers.get("X-Real-Ip").or_else(|| headers.get("X-Forwarded-For"));
    let ip = candidate_ip
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| v.parse::<std::net::IpAddr>().is_ok())
        .map(str::to_string)
        .unwrap_or(default_ip);

    let candidate_scheme = headers.get("X-Scheme").or_else(|| headers.get("X-Forwarded-Proto"));
    let scheme = candidate_scheme
        .map(|v| v.to_ascii_lowercase())
        .filter(|v| v == "http" || v == "https")
        .unwrap_or(default_scheme);

    (ip, scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xheaders_override_remote_ip_only_when_valid() {
        let mut headers = Headers::new();
        headers.add("X-Real-Ip", "203.0.113.5");
        let (ip, _) = apply_xheaders(&headers, "127.0.0.1".to_string(), "http".to_string());
        assert_eq!(ip, "203.0.113.5");

        let mut bad_headers = Headers::new();
        bad_headers.add("X-Real-Ip", "not-an-ip");
        let (ip, _) = apply_xheaders(&bad_headers, "127.0.0.1".to_string(), "http".to_string());
        assert_eq!(ip, "127.0.0.1");
    }

    #[test]
    fn xheaders_restrict_scheme_to_http_or_https() {
        let mut headers = Headers::new();
        headers.add("X-Scheme", "ftp");
        let (_, scheme) = apply_xheaders(&headers, "1.2.3.4".to_string(), "http".to_string());
        assert_eq!(scheme, "http");

        let mut headers = Headers::new();
        headers.add("X-Forwarded-Proto", "https");
        let (_, scheme) = apply_xheaders(&headers, "1.2.3.4".to_string(), "http".to_string());
        assert_eq!(scheme, "https");
    }
}
