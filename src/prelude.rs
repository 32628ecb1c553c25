pub use crate::chunk::{ByteChunk, ChunkBuffer};
pub use crate::config::{Config, ListenAddress};
pub use crate::error::{Result, ServerError};
pub use crate::http::{ConnState, Headers, HttpConnection, HttpServer, Method, MultipartBody, MultipartFile, Request};
pub use crate::listener::{StreamOptions, TcpListener};
pub use crate::reactor::{Reactor, ReactorWaker, TimerId};
pub use crate::regexutil::CompiledRegex;
pub use crate::stream::Stream;
pub use crate::url::{Query, SplitUrl};

pub use mio::{Events, Interest, Poll, Token};

pub use proxy_log::{debug, errors, info, trace, warn};

pub use std::collections::HashMap;
pub use std::io;
pub use std::net::SocketAddr;
pub use std::rc::Rc;
pub use std::time::{Duration, Instant};
