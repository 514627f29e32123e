use std::fmt::{Debug, Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use anyhow::anyhow;

/// An IPv4 address and port. Ordering and equality are based on the raw address bits first,
///  then the port.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EndPoint {
    address: u32,
    port: u16,
}

impl EndPoint {
    /// wildcard end point, used for binding to all interfaces on an OS-assigned port
    pub const ANY: EndPoint = EndPoint { address: 0, port: 0 };

    pub const fn new(address: Ipv4Addr, port: u16) -> EndPoint {
        EndPoint {
            address: address.to_bits(),
            port,
        }
    }

    pub fn localhost(port: u16) -> EndPoint {
        EndPoint::new(Ipv4Addr::LOCALHOST, port)
    }

    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.address)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address(), self.port))
    }
}

impl Display for EndPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address(), self.port)
    }
}

impl Debug for EndPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<SocketAddrV4> for EndPoint {
    fn from(addr: SocketAddrV4) -> Self {
        EndPoint::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for EndPoint {
    type Error = anyhow::Error;

    fn try_from(addr: SocketAddr) -> anyhow::Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(EndPoint::new(ip, v6.port())),
                None => Err(anyhow!("not an IPv4 address: {}", addr)),
            },
        }
    }
}

impl FromStr for EndPoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let addr = SocketAddrV4::from_str(s)
            .map_err(|e| anyhow!("invalid end point {:?}: {}", s, e))?;
        Ok(addr.into())
    }
}
