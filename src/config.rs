use std::io::{Error, ErrorKind::Other, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Immutable relay configuration, handed to a client at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    relay_addr: SocketAddr,
    connect_timeout: Option<Duration>,
}

impl RelayConfig {
    /// resolve the relay server address once.
    pub fn new<A: ToSocketAddrs>(relay_addr: A) -> Result<Self> {
        let relay_addr = relay_addr
            .to_socket_addrs()?
            .next()
            .ok_or(Error::new(Other, "relay server name resolve fail"))?;

        Ok(Self::from_addr(relay_addr))
    }

    pub fn from_addr(relay_addr: SocketAddr) -> Self {
        Self {
            relay_addr,
            connect_timeout: None,
        }
    }

    /// bound every outgoing connect (mediator and relayed endpoint).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_host_port() {
        let c = RelayConfig::new("127.0.0.1:3478").unwrap();
        assert_eq!(c.relay_addr(), "127.0.0.1:3478".parse::<SocketAddr>().unwrap());
        assert_eq!(c.connect_timeout(), None);

        let c = RelayConfig::new(("127.0.0.1", 3478))
            .unwrap()
            .with_connect_timeout(Duration::from_secs(3));
        assert_eq!(c.connect_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn empty_resolution() {
        let none: Vec<SocketAddr> = Vec::new();
        assert!(RelayConfig::new(&none[..]).is_err());
    }
}
