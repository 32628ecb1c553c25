//! The HTTP/1.x layer: header/request-line/multipart parsing, the per-request
//! snapshot, the per-connection state machine, and the listener glue.

pub mod connection;
pub mod headers;
pub mod parsing;
pub mod request;
pub mod server;

pub use connection::{ConnState, HttpConnection};
pub use headers::Headers;
pub use parsing::{Method, MultipartBody, MultipartFile};
pub use request::Request;
pub use server::HttpServer;
