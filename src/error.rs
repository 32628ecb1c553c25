use std::fmt;
use std::io;

/// The error taxonomy: transport failures, address resolution, malformed
/// HTTP, buffer overflow, the two regex failure modes, and exceptions
/// raised by user code.
#[derive(Debug)]
pub enum ServerError {
    Transport(io::Error),
    AddressResolution(String),
    Protocol(String),
    BufferOverflow,
    RegexCompile(String),
    RegexExec(String),
    UserCallback(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Transport(e) => write!(f, "transport error: {e}"),
            ServerError::AddressResolution(s) => write!(f, "address resolution error: {s}"),
            ServerError::Protocol(s) => write!(f, "protocol error: {s}"),
            ServerError::BufferOverflow => write!(f, "read buffer exceeded max_buffer_size"),
            ServerError::RegexCompile(s) => write!(f, "regex compile error: {s}"),
            ServerError::RegexExec(s) => write!(f, "regex exec error: {s}"),
            ServerError::UserCallback(s) => write!(f, "user callback error: {s}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
