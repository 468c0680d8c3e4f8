use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a traversal operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// control connection to the mediator, or the outbound relayed connection, failed
    ConnectFailed,
    /// writing a request onto the control connection failed
    SendFailed,
    /// the mediator answer could not be read or did not make sense
    ResponseMalformed,
    /// the mediator did not return an endpoint for the target
    TargetUnresolved,
    /// target side accept before a successful registration
    NotRegistered,
    /// relay allocation could not be created or accepted on
    AllocationFailed,
    DeregisterFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The single "connection not established" failure of a traversal technique.
    #[error("{technique}: connection not established: {message}")]
    NotEstablished {
        technique: &'static str,
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Deregistration failures are usually not fatal to a traversal, so they
    /// are kept apart from [`Error::NotEstablished`].
    #[error("{technique}: failed to deregister target {target}")]
    Deregister {
        technique: &'static str,
        target: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn not_established<M: Into<String>>(
        technique: &'static str,
        kind: ErrorKind,
        message: M,
        source: Option<io::Error>,
    ) -> Self {
        Error::NotEstablished {
            technique,
            kind,
            message: message.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotEstablished { kind, .. } => *kind,
            Error::Deregister { .. } => ErrorKind::DeregisterFailed,
        }
    }

    pub fn technique(&self) -> &'static str {
        match self {
            Error::NotEstablished { technique, .. } | Error::Deregister { technique, .. } => {
                technique
            }
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e.kind() {
            ErrorKind::ConnectFailed => io::ErrorKind::ConnectionRefused,
            ErrorKind::SendFailed => io::ErrorKind::BrokenPipe,
            ErrorKind::ResponseMalformed => io::ErrorKind::InvalidData,
            ErrorKind::TargetUnresolved => io::ErrorKind::NotFound,
            ErrorKind::NotRegistered => io::ErrorKind::NotConnected,
            ErrorKind::AllocationFailed | ErrorKind::DeregisterFailed => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}
