pub mod udp;

use std::fmt::{Display, Formatter};
use std::io;
use std::time::Duration;
use crate::end_point::EndPoint;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlatformErrorKind {
    /// the operation would have blocked - not a failure for non-blocking sockets
    WouldBlock,
    Other,
}

/// An error reported by a [Platform], carrying the platform specific error code and text
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    pub code: i32,
    pub message: String,
}

impl PlatformError {
    pub fn other(message: impl Into<String>) -> PlatformError {
        PlatformError {
            kind: PlatformErrorKind::Other,
            code: 0,
            message: message.into(),
        }
    }

    pub fn is_would_block(&self) -> bool {
        self.kind == PlatformErrorKind::WouldBlock
    }
}

impl Display for PlatformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "platform error {} ({:?}): {}", self.code, self.kind, self.message)
    }
}

impl std::error::Error for PlatformError {}

impl From<io::Error> for PlatformError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PlatformErrorKind::WouldBlock,
            _ => PlatformErrorKind::Other,
        };
        PlatformError {
            kind,
            code: e.raw_os_error().unwrap_or(0),
            message: e.to_string(),
        }
    }
}

/// The narrow interface between the protocol engine and the operating system's datagram
///  sockets. The engine never creates OS sockets itself, it calls exactly these operations -
///  and only from its network thread.
#[cfg_attr(test, mockall::automock)]
pub trait Platform: Send + 'static {
    fn bind(&mut self, end_point: EndPoint) -> Result<(), PlatformError>;

    fn close(&mut self) -> Result<(), PlatformError>;

    /// sends a single datagram without blocking, returning the number of bytes sent
    fn send_to(&mut self, buf: &[u8], to: EndPoint) -> Result<usize, PlatformError>;

    /// Waits for at most `timeout` for a datagram to become available for
    ///  [Platform::recv_from]
    fn recv_poll(&mut self, timeout: Duration) -> bool;

    /// Receives a single datagram without blocking. `Ok(None)` means 'no data'.
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, EndPoint)>, PlatformError>;

    /// the end point the platform is bound to, if it is bound
    fn local_end_point(&self) -> Option<EndPoint>;

    /// monotonic clock in milliseconds, with an arbitrary epoch
    fn precision_time_ms(&self) -> u64;
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::would_block(io::ErrorKind::WouldBlock, PlatformErrorKind::WouldBlock)]
    #[case::timed_out(io::ErrorKind::TimedOut, PlatformErrorKind::WouldBlock)]
    #[case::refused(io::ErrorKind::ConnectionRefused, PlatformErrorKind::Other)]
    #[case::addr_in_use(io::ErrorKind::AddrInUse, PlatformErrorKind::Other)]
    fn test_from_io_error(#[case] io_kind: io::ErrorKind, #[case] expected: PlatformErrorKind) {
        let e: PlatformError = io::Error::new(io_kind, "xyz").into();
        assert_eq!(e.kind, expected);
        assert_eq!(e.is_would_block(), expected == PlatformErrorKind::WouldBlock);
        assert_eq!(e.message, "xyz");
    }

    #[test]
    fn test_raw_os_error_code() {
        let e: PlatformError = io::Error::from_raw_os_error(98).into();
        assert_eq!(e.code, 98);
    }

    #[test]
    fn test_display() {
        let e = PlatformError::other("boom");
        assert_eq!(e.to_string(), "platform error 0 (Other): boom");
    }
}
