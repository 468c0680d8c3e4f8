use super::{connect_stream, fail, lock, target_endpoint, ControlChannel, Registration};
use crate::allocation::{publishable_endpoint, AllocatorFactory, RelayAllocation};
use crate::codec;
use crate::config::RelayConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::traversal::{RegistrationState, TechniqueMetadata, Traversal};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

/// Blocking relay traversal client.
///
/// Every operation runs to completion on the calling thread. The control
/// connection to the mediator is opened by the first operation and kept.
///
/// # example
/// ```no_run
/// use relaying::allocation::RelayAllocation;
/// use relaying::{config::RelayConfig, tcp::Client};
/// use std::io::Result;
/// use std::net::{SocketAddr, TcpStream};
///
/// struct MyRelay(SocketAddr);
///
/// impl RelayAllocation for MyRelay {
///     fn create_allocation(&self) -> Result<SocketAddr> { unimplemented!() }
///     fn accept(&self) -> Result<TcpStream> { unimplemented!() }
///     fn release(&self) -> Result<()> { unimplemented!() }
/// }
///
/// let mediator = "198.51.100.1:10300".parse().unwrap();
/// let config = RelayConfig::new("198.51.100.7:10301").unwrap();
///
/// let target = Client::new(config, |relay: SocketAddr| -> Result<MyRelay> { Ok(MyRelay(relay)) });
/// target.register_target("peer-42", mediator).unwrap();
/// let s = target.accept_as_target("peer-42", mediator).unwrap();
///
/// // on the other peer
/// let source = target.copy();
/// let s = source.connect_as_source("peer-42", mediator).unwrap();
/// ```
pub struct Client<F: AllocatorFactory> {
    config: RelayConfig,
    factory: F,
    metadata: TechniqueMetadata,
    control: Mutex<ControlChannel>,
    registration: Mutex<Registration<F::Allocation>>,
}

impl<F: AllocatorFactory> Drop for Client<F> {
    fn drop(&mut self) {
        self.release_registration();
        lock(&self.control).shutdown();
    }
}

impl<F: AllocatorFactory> Client<F> {
    /// `factory` creates the relay allocation client on every registration.
    pub fn new(config: RelayConfig, factory: F) -> Self {
        Self {
            control: Mutex::new(ControlChannel::new(config.connect_timeout())),
            config,
            factory,
            metadata: TechniqueMetadata::relaying(),
            registration: Mutex::new(Registration::Unregistered),
        }
    }

    /// fresh, unconnected client with the same configuration.
    pub fn copy(&self) -> Self
    where
        F: Clone,
    {
        Self::new(self.config, self.factory.clone())
    }

    pub fn metadata(&self) -> &TechniqueMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> RegistrationState {
        lock(&self.registration).state()
    }

    fn fail(&self, kind: ErrorKind, message: &str, source: Option<std::io::Error>) -> Error {
        fail(self.metadata.name, kind, message, source)
    }

    fn ensure_control(&self, control: &mut ControlChannel, mediator_addr: SocketAddr) -> Result<()> {
        control.connect_if_needed(mediator_addr).map_err(|e| {
            self.fail(
                ErrorKind::ConnectFailed,
                "control connection could not be established",
                Some(e),
            )
        })
    }

    /// allocate an endpoint at the relay and publish it at the mediator.
    pub fn register_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        let mut control = lock(&self.control);
        self.ensure_control(&mut control, mediator_addr)?;

        let relay_addr = self.config.relay_addr();
        let allocation = self.factory.bind(relay_addr).map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "relay allocation client could not be created",
                Some(e),
            )
        })?;
        let endpoint = allocation.create_allocation().map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "allocation at relay server failed",
                Some(e),
            )
        })?;
        let endpoint = publishable_endpoint(endpoint, relay_addr);
        log::debug!("created endpoint at relay server: {}", endpoint);

        if let Err(e) = control.send(&codec::register_request(target_id, endpoint)) {
            if let Err(re) = allocation.release() {
                log::warn!("releasing allocation {} failed: {}", endpoint, re);
            }
            return Err(self.fail(
                ErrorKind::SendFailed,
                "target could not be registered",
                Some(e),
            ));
        }
        drop(control);

        log::debug!("registered {} at {} via {}", target_id, mediator_addr, endpoint);
        let previous = std::mem::replace(
            &mut *lock(&self.registration),
            Registration::Registered(Arc::new(allocation)),
        );
        if let Registration::Registered(old) = previous {
            log::debug!("replacing previous allocation of {}", target_id);
            if let Err(e) = old.release() {
                log::warn!("releasing previous allocation failed: {}", e);
            }
        }

        Ok(())
    }

    /// withdraw the registration and release the relay allocation.
    pub fn deregister_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        log::debug!("deregistering {} at {}", target_id, mediator_addr);

        lock(&self.control)
            .send(&codec::deregister_request(target_id))
            .map_err(|e| {
                log::error!("exception while deregistering target {}: {}", target_id, e);
                Error::Deregister {
                    technique: self.metadata.name,
                    target: target_id.to_string(),
                    source: e,
                }
            })?;

        self.release_registration();
        Ok(())
    }

    fn release_registration(&self) {
        let previous = std::mem::replace(&mut *lock(&self.registration), Registration::Unregistered);
        if let Registration::Registered(allocation) = previous {
            if let Err(e) = allocation.release() {
                log::warn!("releasing relay allocation failed: {}", e);
            }
        }
    }

    /// ask the mediator for the target endpoint at the relay, then connect to it.
    pub fn connect_as_source(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<TcpStream> {
        log::debug!(
            "creating source-side connection via relaying, mediator={}",
            mediator_addr
        );

        let resp = {
            let mut control = lock(&self.control);
            self.ensure_control(&mut control, mediator_addr)?;

            log::debug!("sending connection request for {}", target_id);
            control
                .send(&codec::connection_request(target_id))
                .map_err(|e| {
                    self.fail(
                        ErrorKind::SendFailed,
                        "connection request could not be sent",
                        Some(e),
                    )
                })?;
            control.recv().map_err(|e| {
                self.fail(
                    ErrorKind::ResponseMalformed,
                    "connection response could not be read",
                    Some(e),
                )
            })?
        };

        let endpoint = target_endpoint(self.metadata.name, &resp)?;
        log::debug!("connecting to {} at {}", target_id, endpoint);

        connect_stream(endpoint, self.config.connect_timeout()).map_err(|e| {
            self.fail(
                ErrorKind::ConnectFailed,
                "source-side socket could not be created",
                Some(e),
            )
        })
    }

    /// wait for the relayed connection; fails at once when not registered.
    pub fn accept_as_target(&self, target_id: &str, _mediator_addr: SocketAddr) -> Result<TcpStream> {
        let allocation = lock(&self.registration).allocation().ok_or_else(|| {
            self.fail(
                ErrorKind::NotRegistered,
                "target must be registered before creating target-side connection",
                None,
            )
        })?;

        log::debug!("waiting for relayed connection to {}", target_id);
        allocation.accept().map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "could not create target-side connection",
                Some(e),
            )
        })
    }
}

impl<F> Traversal for Client<F>
where
    F: AllocatorFactory + Clone + Send + Sync + 'static,
{
    fn metadata(&self) -> &TechniqueMetadata {
        Client::metadata(self)
    }

    fn register_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        Client::register_target(self, target_id, mediator_addr)
    }

    fn deregister_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        Client::deregister_target(self, target_id, mediator_addr)
    }

    fn connect_as_source(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<TcpStream> {
        Client::connect_as_source(self, target_id, mediator_addr)
    }

    fn accept_as_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<TcpStream> {
        Client::accept_as_target(self, target_id, mediator_addr)
    }

    fn copy(&self) -> Box<dyn Traversal> {
        Box::new(Client::copy(self))
    }
}
