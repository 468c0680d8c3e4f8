//! Interface a traversal framework sees of a technique.

use crate::error::Result;
use std::net::{SocketAddr, TcpStream};

pub const TECHNIQUE_NAME: &str = "Relaying";

/// Read-only description of a traversal technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TechniqueMetadata {
    pub name: &'static str,
    pub version: &'static str,
    /// whether peers end up talking directly, false for relayed links.
    pub direct: bool,
}

impl TechniqueMetadata {
    pub const fn relaying() -> Self {
        Self {
            name: TECHNIQUE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            direct: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
}

/// A pluggable NAT traversal technique.
///
/// The target side registers at the mediator and later accepts, the source
/// side looks the target up and connects.
pub trait Traversal: Send + Sync {
    fn metadata(&self) -> &TechniqueMetadata;

    fn register_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()>;

    fn deregister_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()>;

    fn connect_as_source(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<TcpStream>;

    fn accept_as_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<TcpStream>;

    /// same configuration, fresh connections, nothing registered.
    fn copy(&self) -> Box<dyn Traversal>;
}
