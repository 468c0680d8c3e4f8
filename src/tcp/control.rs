use super::connect_stream;
use crate::codec;
use crate::proto::ControlMessage;
use std::io::{Error, ErrorKind::NotConnected, Result};
use std::net::{Shutdown::Both, SocketAddr, TcpStream};
use std::time::Duration;

/// Persistent control connection to the mediator.
///
/// Connects at most once; after that every exchange reuses the stream. A
/// dropped connection is not re-established, the next send simply fails.
pub struct ControlChannel {
    stream: Option<TcpStream>,
    mediator_addr: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
}

impl ControlChannel {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self {
            stream: None,
            mediator_addr: None,
            connect_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// mediator this channel is connected to.
    pub fn mediator_addr(&self) -> Option<SocketAddr> {
        self.mediator_addr
    }

    /// connect unless already connected; a failed attempt can be retried.
    pub fn connect_if_needed(&mut self, mediator_addr: SocketAddr) -> Result<()> {
        log::debug!("checking connection with mediator {}", mediator_addr);

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
        let stream = connect_stream(mediator_addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.mediator_addr = Some(mediator_addr);
        log::debug!("control connection established");

        Ok(())
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or(Error::new(NotConnected, "control connection not established"))
    }

    pub fn send(&mut self, msg: &ControlMessage) -> Result<()> {
        log::trace!("send {:?}", msg);
        codec::write_msg(self.stream()?, msg)
    }

    /// block until one complete message arrived.
    pub fn recv(&mut self) -> Result<ControlMessage> {
        let msg = codec::read_msg(self.stream()?)?;
        log::trace!("recv {:?}", msg);
        Ok(msg)
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.take().map(|s| s.shutdown(Both));
    }
}
