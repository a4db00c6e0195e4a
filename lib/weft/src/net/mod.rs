//! The socket-facing half of the node: buffered non-blocking I/O, channel
//! objects, the shared dispatcher and the dispatcher-to-main message queue.

pub mod buffer;
pub mod channel;
pub mod endpoint;
pub mod queue;

use std::io;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    BadFrame,
    Decode,
    Duplicate,
    LimitExceeded,
    NotConnected,
    UnknownChannel,
    Closed,
    Io(io::ErrorKind),
}

/// Wait means "try again after the next readiness event"; Fatal means the
/// connection or operation is beyond saving.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

impl From<io::Error> for NetworkError {
    fn from(io_error: io::Error) -> Self {
        if io_error.kind() == io::ErrorKind::WouldBlock {
            NetworkError::Wait
        } else {
            NetworkError::Fatal(ErrorType::Io(io_error.kind()))
        }
    }
}

pub type NetworkResult<T> = std::result::Result<T, NetworkError>;
