//! Relay allocation contract.
//!
//! An allocation is a routable endpoint at the relay server that belongs to
//! one target registration. The relay protocol itself is not part of this
//! crate: callers plug in their relay client through [`RelayAllocation`] and
//! hand the traversal client a factory that binds one to the relay address.

use std::io::Result;
use std::net::{SocketAddr, TcpStream};

/// Blocking relay allocation client.
pub trait RelayAllocation: Send + Sync {
    /// create the allocation, returns the endpoint peers should connect to.
    ///
    /// The relay server may only know its own listening port, so the
    /// returned host can be unspecified (`0.0.0.0` or `::`).
    fn create_allocation(&self) -> Result<SocketAddr>;

    /// block until the first inbound connection arrives at the allocation.
    fn accept(&self) -> Result<TcpStream>;

    /// give the allocation back; a blocked [`accept`](Self::accept) must return.
    fn release(&self) -> Result<()>;
}

/// Creates a fresh allocation client bound to a relay server.
///
/// Any `Fn(SocketAddr) -> io::Result<A>` is a factory.
pub trait AllocatorFactory {
    type Allocation: RelayAllocation;

    fn bind(&self, relay_addr: SocketAddr) -> Result<Self::Allocation>;
}

impl<F, A> AllocatorFactory for F
where
    F: Fn(SocketAddr) -> Result<A>,
    A: RelayAllocation,
{
    type Allocation = A;

    fn bind(&self, relay_addr: SocketAddr) -> Result<A> {
        self(relay_addr)
    }
}

#[cfg(feature = "async")]
pub use self::nonblocking::{AsyncAllocatorFactory, AsyncRelayAllocation};

#[cfg(feature = "async")]
mod nonblocking {
    use std::future::Future;
    use std::io::Result;
    use std::net::SocketAddr;
    use tokio::net::TcpStream;

    /// Async twin of [`RelayAllocation`](super::RelayAllocation).
    pub trait AsyncRelayAllocation: Send + Sync {
        fn create_allocation(&self) -> impl Future<Output = Result<SocketAddr>> + Send;

        fn accept(&self) -> impl Future<Output = Result<TcpStream>> + Send;

        fn release(&self) -> impl Future<Output = Result<()>> + Send;
    }

    pub trait AsyncAllocatorFactory {
        type Allocation: AsyncRelayAllocation;

        fn bind(&self, relay_addr: SocketAddr) -> Result<Self::Allocation>;
    }

    impl<F, A> AsyncAllocatorFactory for F
    where
        F: Fn(SocketAddr) -> Result<A>,
        A: AsyncRelayAllocation,
    {
        type Allocation = A;

        fn bind(&self, relay_addr: SocketAddr) -> Result<A> {
            self(relay_addr)
        }
    }
}

/// endpoint as published to the mediator: an unspecified host is replaced by
/// the relay server ip, the port is kept.
pub fn publishable_endpoint(endpoint: SocketAddr, relay_addr: SocketAddr) -> SocketAddr {
    if endpoint.ip().is_unspecified() {
        SocketAddr::new(relay_addr.ip(), endpoint.port())
    } else {
        endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::publishable_endpoint;
    use std::net::SocketAddr;

    #[test]
    fn unspecified_host_rewritten() {
        let relay: SocketAddr = "198.51.100.7:3478".parse().unwrap();

        let any: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        assert_eq!(
            publishable_endpoint(any, relay),
            "198.51.100.7:5000".parse::<SocketAddr>().unwrap()
        );

        let any6: SocketAddr = "[::]:5001".parse().unwrap();
        assert_eq!(
            publishable_endpoint(any6, relay),
            "198.51.100.7:5001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn routable_host_kept() {
        let relay: SocketAddr = "198.51.100.7:3478".parse().unwrap();
        let ep: SocketAddr = "203.0.113.9:6000".parse().unwrap();
        assert_eq!(publishable_endpoint(ep, relay), ep);
    }
}
