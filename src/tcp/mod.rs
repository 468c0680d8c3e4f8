//! Relay traversal over tcp.
//!
//! use `Client` for the blocking client, `AsyncClient` for the tokio one.
//! Both keep one control connection to the mediator per instance.

#[cfg(feature = "client")]
mod control;
#[cfg(feature = "client")]
pub use control::ControlChannel;

#[cfg(feature = "client")]
mod client;
#[cfg(feature = "client")]
pub use client::Client;

#[cfg(feature = "async")]
mod client_async;
#[cfg(feature = "async")]
pub use client_async::Client as AsyncClient;

use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::proto::{ControlMessage, MessageClass, MessageMethod};
use crate::traversal::RegistrationState;
#[cfg(feature = "client")]
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// registration state, owning the live allocation while registered.
pub(crate) enum Registration<A> {
    Unregistered,
    Registered(Arc<A>),
}

impl<A> Registration<A> {
    pub(crate) fn state(&self) -> RegistrationState {
        match self {
            Registration::Unregistered => RegistrationState::Unregistered,
            Registration::Registered(_) => RegistrationState::Registered,
        }
    }

    /// the live allocation, if registered.
    pub(crate) fn allocation(&self) -> Option<Arc<A>> {
        match self {
            Registration::Registered(a) => Some(a.clone()),
            Registration::Unregistered => None,
        }
    }
}

/// outgoing stream with address reuse, as every socket of this crate.
#[cfg(feature = "client")]
pub(crate) fn connect_stream(
    addr: SocketAddr,
    timeout: Option<std::time::Duration>,
) -> io::Result<std::net::TcpStream> {
    let s = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    s.set_reuse_address(true)?;
    match timeout {
        Some(t) => s.connect_timeout(&addr.into(), t)?,
        None => s.connect(&addr.into())?,
    }

    Ok(s.into())
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// log, then wrap into the "connection not established" error.
pub(crate) fn fail(
    technique: &'static str,
    kind: ErrorKind,
    message: &str,
    source: Option<io::Error>,
) -> Error {
    match source {
        Some(ref e) => log::error!("{}: {}", message, e),
        None => log::error!("{}", message),
    }
    Error::not_established(technique, kind, message, source)
}

/// endpoint of the target at the relay, taken from a connection response.
pub(crate) fn target_endpoint(technique: &'static str, resp: &ControlMessage) -> Result<SocketAddr> {
    if codec::method(resp) != Some(MessageMethod::CONNECTION_REQUEST) {
        return Err(fail(
            technique,
            ErrorKind::ResponseMalformed,
            "mediator answered with an unexpected method",
            None,
        ));
    }

    match codec::mapped_address(resp) {
        Some(Ok(addr)) => Ok(addr),
        Some(Err(e)) => Err(fail(
            technique,
            ErrorKind::ResponseMalformed,
            "mediator returned an invalid target endpoint",
            Some(e),
        )),
        None => {
            let message = match (codec::class(resp), codec::error_reason(resp)) {
                (Some(MessageClass::ERROR_RESPONSE), Some(reason)) => {
                    format!("target endpoint not returned by mediator: {}", reason)
                }
                _ => "target endpoint not returned by mediator".to_string(),
            };
            log::debug!("{}", message);
            Err(Error::not_established(
                technique,
                ErrorKind::TargetUnresolved,
                message,
                None,
            ))
        }
    }
}
