//!Relay traversal: reach a peer behind NAT through a relay server.
//!
//!When neither peer accepts inbound connections and hole punching does not work either,
//!the last resort is a third host that both peers can reach: a relay server.
//!
//!## How relaying works
//!A target peer asks the relay server for an allocation, a routable endpoint at the relay,
//!and registers that endpoint under its identity at a rendezvous server (the mediator).
//!
//!A source peer sends the mediator a connection request for the target identity and gets
//!the endpoint back. It connects to that endpoint, the relay hands the connection to the
//!target, which was blocked accepting on its allocation.
//!
//!Both sides keep a single control connection to the mediator per client. Requests are
//!strictly sequential on it, so stream order is enough to match a response to its request.
//!
//!The relay protocol is not implemented here, plug your relay client in through
//![`allocation::RelayAllocation`].
//!
//!## Feature flags
//!- `client`: blocking client, returns [`std::net::TcpStream`]
//!- `async`: tokio client, returns [`tokio::net::TcpStream`]
//!
//!```toml
//!relaying = { version = "0.1", default-features=false, features=["client"]}
//!```

pub mod allocation;
pub mod codec;
pub mod config;
mod error;
#[doc(hidden)]
pub mod proto;
pub mod tcp;
pub mod traversal;

#[cfg(test)]
mod testutil;

pub use error::{Error, ErrorKind, Result};
