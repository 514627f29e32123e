use std::io;
use std::time::{Duration, Instant};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;
use crate::end_point::EndPoint;
use crate::platform::{Platform, PlatformError};

const SOCKET_TOKEN: Token = Token(0);

struct BoundSocket {
    socket: UdpSocket,
    poll: Poll,
    events: Events,
}

/// [Platform] implementation on top of the operating system's UDP sockets.
///
/// The socket is non-blocking. Polling for readability waits on a `mio` [Poll] and reads the
///  next datagram right away; it is kept until the following [Platform::recv_from], and so is
///  a receive error.
pub struct UdpPlatform {
    bound: Option<BoundSocket>,
    epoch: Instant,
    pending: Vec<u8>,
    pending_datagram: Option<Result<(usize, EndPoint), PlatformError>>,
}

impl Default for UdpPlatform {
    fn default() -> Self {
        UdpPlatform::new()
    }
}

impl UdpPlatform {
    /// max UDP payload
    const MAX_DATAGRAM: usize = 65_536;

    pub fn new() -> UdpPlatform {
        UdpPlatform {
            bound: None,
            epoch: Instant::now(),
            pending: vec![0; Self::MAX_DATAGRAM],
            pending_datagram: None,
        }
    }

    fn socket(&self) -> Result<&UdpSocket, PlatformError> {
        self.bound.as_ref()
            .map(|b| &b.socket)
            .ok_or_else(|| PlatformError::other("socket is not bound"))
    }

    fn create_socket(end_point: EndPoint) -> io::Result<BoundSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&end_point.to_socket_addr().into())?;
        let mut socket = UdpSocket::from_std(socket.into());

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        Ok(BoundSocket {
            socket,
            poll,
            events: Events::with_capacity(4),
        })
    }

    /// `None` if no datagram is available without blocking
    fn try_recv(socket: &UdpSocket, buf: &mut [u8]) -> Option<Result<(usize, EndPoint), PlatformError>> {
        loop {
            match socket.recv_from(buf) {
                Ok((len, from)) => match EndPoint::try_from(from) {
                    Ok(from) => return Some(Ok((len, from))),
                    Err(e) => trace!("dropping datagram: {}", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl Platform for UdpPlatform {
    fn bind(&mut self, end_point: EndPoint) -> Result<(), PlatformError> {
        if self.bound.is_some() {
            return Err(PlatformError::other("socket is already bound"));
        }
        self.bound = Some(Self::create_socket(end_point)?);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        self.pending_datagram = None;
        match self.bound.take() {
            Some(_) => Ok(()),
            None => Err(PlatformError::other("socket is not bound")),
        }
    }

    fn send_to(&mut self, buf: &[u8], to: EndPoint) -> Result<usize, PlatformError> {
        let socket = self.socket()?;
        Ok(socket.send_to(buf, to.to_socket_addr())?)
    }

    fn recv_poll(&mut self, timeout: Duration) -> bool {
        if self.pending_datagram.is_some() {
            return true;
        }
        let Some(bound) = &mut self.bound else {
            return false;
        };

        // readiness is edge triggered, so waiting is only safe after the socket was drained
        if let Some(received) = Self::try_recv(&bound.socket, &mut self.pending) {
            self.pending_datagram = Some(received);
            return true;
        }

        if let Err(e) = bound.poll.poll(&mut bound.events, Some(timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                self.pending_datagram = Some(Err(e.into()));
                return true;
            }
        }

        self.pending_datagram = Self::try_recv(&bound.socket, &mut self.pending);
        self.pending_datagram.is_some()
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, EndPoint)>, PlatformError> {
        let Some(received) = self.pending_datagram.take() else {
            return Ok(None);
        };
        let (len, from) = received?;

        // the buffer is at least as big as the biggest packet we accept, the rest is truncated
        let len = len.min(buf.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        Ok(Some((len, from)))
    }

    fn local_end_point(&self) -> Option<EndPoint> {
        let addr = self.bound.as_ref()?
            .socket.local_addr().ok()?;
        EndPoint::try_from(addr).ok()
    }

    fn precision_time_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformErrorKind;

    fn bound() -> UdpPlatform {
        let mut platform = UdpPlatform::new();
        platform.bind(EndPoint::localhost(0)).unwrap();
        platform
    }

    fn receive(platform: &mut UdpPlatform, buf: &mut [u8]) -> Option<(usize, EndPoint)> {
        for _ in 0..1000 {
            if platform.recv_poll(Duration::from_millis(5)) {
                return platform.recv_from(buf).unwrap();
            }
        }
        None
    }

    #[test]
    fn test_loopback() {
        let mut a = bound();
        let mut b = bound();

        let addr_a = a.local_end_point().unwrap();
        let addr_b = b.local_end_point().unwrap();
        assert_ne!(addr_a.port(), 0);

        assert!(!b.recv_poll(Duration::from_millis(1)));
        assert_eq!(b.recv_from(&mut [0u8; 16]).unwrap(), None);

        assert_eq!(a.send_to(&[1, 2, 3], addr_b).unwrap(), 3);

        let mut buf = [0u8; 16];
        assert_eq!(receive(&mut b, &mut buf), Some((3, addr_a)));
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_queued_datagrams_are_received_in_order() {
        let mut a = bound();
        let mut b = bound();
        let addr_b = b.local_end_point().unwrap();

        for i in 0..5u8 {
            a.send_to(&[i], addr_b).unwrap();
        }

        let mut buf = [0u8; 4];
        for i in 0..5u8 {
            assert_eq!(receive(&mut b, &mut buf).map(|(len, _)| len), Some(1));
            assert_eq!(buf[0], i);
        }
    }

    #[test]
    fn test_recv_poll_waits_for_timeout() {
        let mut a = bound();
        let start = Instant::now();
        assert!(!a.recv_poll(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_receive_error_is_reported_by_recv_from() {
        let mut a = bound();
        a.pending_datagram = Some(Err(io::Error::from(io::ErrorKind::ConnectionReset).into()));

        assert!(a.recv_poll(Duration::ZERO));
        let err = a.recv_from(&mut [0u8; 16]).unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::Other);

        // the error is reported once
        assert_eq!(a.recv_from(&mut [0u8; 16]).unwrap(), None);
    }

    #[test]
    fn test_bind_twice_fails() {
        let mut a = bound();
        assert!(a.bind(EndPoint::localhost(0)).is_err());
    }

    #[test]
    fn test_unbound() {
        let mut a = UdpPlatform::new();
        assert!(a.local_end_point().is_none());
        assert!(a.send_to(&[1], EndPoint::localhost(9)).is_err());
        assert!(!a.recv_poll(Duration::from_millis(1)));
        assert!(a.close().is_err());
    }

    #[test]
    fn test_clock_is_monotonic() {
        let a = UdpPlatform::new();
        let t1 = a.precision_time_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(a.precision_time_ms() >= t1 + 5);
    }
}
