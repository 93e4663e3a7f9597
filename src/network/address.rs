use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::{AppError, AppResult};

/// An endpoint a listener binds to or a connector dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(SocketAddr);

impl Address {
    pub fn new(addr: SocketAddr) -> Self {
        Address(addr)
    }

    /// All IPv4 interfaces.
    pub fn any(port: u16) -> Self {
        Address(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// All IPv6 interfaces.
    pub fn any_v6(port: u16) -> Self {
        Address(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
    }

    pub fn localhost(port: u16) -> Self {
        Address(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    pub fn from_parts(ip: &str, port: u16) -> AppResult<Self> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| AppError::InvalidValue(format!("ip address {}: {}", ip, e)))?;
        Ok(Address(SocketAddr::new(ip, port)))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address(addr)
    }
}

/// Accepts a literal `ip:port` or a resolvable `host:port`.
impl FromStr for Address {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Address(addr));
        }
        s.to_socket_addrs()
            .map_err(|e| AppError::InvalidValue(format!("address {}: {}", s, e)))?
            .next()
            .map(Address)
            .ok_or_else(|| AppError::InvalidValue(format!("address {} resolved to nothing", s)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
