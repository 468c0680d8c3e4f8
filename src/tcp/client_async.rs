use super::{fail, lock, target_endpoint, Registration};
use crate::allocation::{publishable_endpoint, AsyncAllocatorFactory, AsyncRelayAllocation};
use crate::codec;
use crate::config::RelayConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::proto::ControlMessage;
use crate::traversal::{RegistrationState, TechniqueMetadata};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
    sync::Mutex as AsyncMutex,
    time::timeout,
};

async fn connect_stream(addr: SocketAddr, connect_timeout: Option<Duration>) -> io::Result<TcpStream> {
    let s = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;
    s.set_reuseaddr(true)?;

    match connect_timeout {
        Some(t) => timeout(t, s.connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))?,
        None => s.connect(addr).await,
    }
}

struct ControlChannel {
    stream: Option<TcpStream>,
    mediator_addr: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
}

impl ControlChannel {
    async fn connect_if_needed(&mut self, mediator_addr: SocketAddr) -> io::Result<()> {
        if let Some(connected) = self.mediator_addr {
            if connected != mediator_addr {
                log::warn!(
                    "control connection bound to {}, ignoring mediator {}",
                    connected,
                    mediator_addr
                );
            }
            return Ok(());
        }

        log::debug!("connecting control channel to {}", mediator_addr);
        let stream = connect_stream(mediator_addr, self.connect_timeout).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.mediator_addr = Some(mediator_addr);

        Ok(())
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(io::Error::new(
            io::ErrorKind::NotConnected,
            "control connection not established",
        ))
    }

    async fn send(&mut self, msg: &ControlMessage) -> io::Result<()> {
        log::trace!("send {:?}", msg);
        let buf = codec::frame(msg)?;
        let w = self.stream()?;
        w.write_all(&buf).await?;
        w.flush().await
    }

    async fn recv(&mut self) -> io::Result<ControlMessage> {
        let r = self.stream()?;
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf).await?;
        let mut buf = vec![0; codec::frame_len(buf)?];
        r.read_exact(&mut buf).await?;

        let msg = codec::parse(&buf)?;
        log::trace!("recv {:?}", msg);
        Ok(msg)
    }
}

/// Tokio relay traversal client, same protocol as [`Client`](super::Client).
///
/// Dropping a registered client does not release its allocation, call
/// [`deregister_target`](Self::deregister_target) first.
pub struct Client<F: AsyncAllocatorFactory> {
    config: RelayConfig,
    factory: F,
    metadata: TechniqueMetadata,
    control: AsyncMutex<ControlChannel>,
    registration: Mutex<Registration<F::Allocation>>,
}

impl<F: AsyncAllocatorFactory> Client<F> {
    pub fn new(config: RelayConfig, factory: F) -> Self {
        Self {
            control: AsyncMutex::new(ControlChannel {
                stream: None,
                mediator_addr: None,
                connect_timeout: config.connect_timeout(),
            }),
            config,
            factory,
            metadata: TechniqueMetadata::relaying(),
            registration: Mutex::new(Registration::Unregistered),
        }
    }

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

    fn fail(&self, kind: ErrorKind, message: &str, source: Option<io::Error>) -> Error {
        fail(self.metadata.name, kind, message, source)
    }

    async fn ensure_control(
        &self,
        control: &mut ControlChannel,
        mediator_addr: SocketAddr,
    ) -> Result<()> {
        control.connect_if_needed(mediator_addr).await.map_err(|e| {
            self.fail(
                ErrorKind::ConnectFailed,
                "control connection could not be established",
                Some(e),
            )
        })
    }

    pub async fn register_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        let mut control = self.control.lock().await;
        self.ensure_control(&mut control, mediator_addr).await?;

        let relay_addr = self.config.relay_addr();
        let allocation = self.factory.bind(relay_addr).map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "relay allocation client could not be created",
                Some(e),
            )
        })?;
        let endpoint = allocation.create_allocation().await.map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "allocation at relay server failed",
                Some(e),
            )
        })?;
        let endpoint = publishable_endpoint(endpoint, relay_addr);
        log::debug!("created endpoint at relay server: {}", endpoint);

        if let Err(e) = control
            .send(&codec::register_request(target_id, endpoint))
            .await
        {
            if let Err(re) = allocation.release().await {
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
            if let Err(e) = old.release().await {
                log::warn!("releasing previous allocation failed: {}", e);
            }
        }

        Ok(())
    }

    pub async fn deregister_target(&self, target_id: &str, mediator_addr: SocketAddr) -> Result<()> {
        log::debug!("deregistering {} at {}", target_id, mediator_addr);

        let sent = self
            .control
            .lock()
            .await
            .send(&codec::deregister_request(target_id))
            .await;
        if let Err(e) = sent {
            log::error!("exception while deregistering target {}: {}", target_id, e);
            return Err(Error::Deregister {
                technique: self.metadata.name,
                target: target_id.to_string(),
                source: e,
            });
        }

        let previous = std::mem::replace(&mut *lock(&self.registration), Registration::Unregistered);
        if let Registration::Registered(allocation) = previous {
            if let Err(e) = allocation.release().await {
                log::warn!("releasing relay allocation failed: {}", e);
            }
        }

        Ok(())
    }

    pub async fn connect_as_source(
        &self,
        target_id: &str,
        mediator_addr: SocketAddr,
    ) -> Result<TcpStream> {
        log::debug!(
            "creating source-side connection via relaying, mediator={}",
            mediator_addr
        );

        let resp = {
            let mut control = self.control.lock().await;
            self.ensure_control(&mut control, mediator_addr).await?;

            control
                .send(&codec::connection_request(target_id))
                .await
                .map_err(|e| {
                    self.fail(
                        ErrorKind::SendFailed,
                        "connection request could not be sent",
                        Some(e),
                    )
                })?;
            control.recv().await.map_err(|e| {
                self.fail(
                    ErrorKind::ResponseMalformed,
                    "connection response could not be read",
                    Some(e),
                )
            })?
        };

        let endpoint = target_endpoint(self.metadata.name, &resp)?;
        log::debug!("connecting to {} at {}", target_id, endpoint);

        connect_stream(endpoint, self.config.connect_timeout())
            .await
            .map_err(|e| {
                self.fail(
                    ErrorKind::ConnectFailed,
                    "source-side socket could not be created",
                    Some(e),
                )
            })
    }

    pub async fn accept_as_target(
        &self,
        target_id: &str,
        _mediator_addr: SocketAddr,
    ) -> Result<TcpStream> {
        let allocation = lock(&self.registration).allocation();
        let allocation = allocation.ok_or_else(|| {
            self.fail(
                ErrorKind::NotRegistered,
                "target must be registered before creating target-side connection",
                None,
            )
        })?;

        log::debug!("waiting for relayed connection to {}", target_id);
        allocation.accept().await.map_err(|e| {
            self.fail(
                ErrorKind::AllocationFailed,
                "could not create target-side connection",
                Some(e),
            )
        })
    }
}
