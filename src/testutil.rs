//! Test doubles: a small in-process mediator and loopback "relay" allocations.

use crate::allocation::RelayAllocation;
use crate::codec;
use crate::proto::{ControlMessage, MessageClass, MessageMethod};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::HashMap;
use std::io::{Error, ErrorKind::Other, Result};
use std::net::{Shutdown::Both, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{sleep, spawn};
use std::time::{Duration, Instant};

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct MediatorState {
    registry: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<(usize, ControlMessage)>>,
    connections: AtomicUsize,
}

/// Mediator that keeps REGISTER/DEREGISTER in a table and answers
/// CONNECTION_REQUEST from it. Each accepted connection is numbered.
pub struct Mediator {
    pub addr: SocketAddr,
    state: Arc<MediatorState>,
}

impl Mediator {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state: Arc<MediatorState> = Default::default();

        {
            let state = state.clone();
            spawn(move || {
                while let Ok((s, _)) = listener.accept() {
                    let conn = state.connections.fetch_add(1, SeqCst);
                    let state = state.clone();
                    spawn(move || Self::serve(conn, s, state));
                }
            });
        }

        Self { addr, state }
    }

    fn serve(conn: usize, mut s: TcpStream, state: Arc<MediatorState>) {
        while let Ok(msg) = codec::read_msg(&mut s) {
            state.log.lock().unwrap().push((conn, msg.clone()));

            let id = msg.username.clone();
            match codec::method(&msg) {
                Some(MessageMethod::REGISTER) => {
                    state
                        .registry
                        .lock()
                        .unwrap()
                        .insert(id, msg.mapped_address.clone());
                }
                Some(MessageMethod::DEREGISTER) => {
                    state.registry.lock().unwrap().remove(&id);
                }
                Some(MessageMethod::CONNECTION_REQUEST) => {
                    let mut resp = ControlMessage::new();
                    resp.method = MessageMethod::CONNECTION_REQUEST.into();
                    resp.username = id.clone();
                    match state.registry.lock().unwrap().get(&id) {
                        Some(addr) => {
                            resp.class = MessageClass::SUCCESS_RESPONSE.into();
                            resp.mapped_address = addr.clone();
                        }
                        None => {
                            resp.class = MessageClass::ERROR_RESPONSE.into();
                            resp.error_reason = "unknown target".to_string();
                        }
                    }
                    if codec::write_msg(&mut s, &resp).is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(SeqCst)
    }

    pub fn registered(&self, id: &str) -> Option<String> {
        self.state.registry.lock().unwrap().get(id).cloned()
    }

    /// wait until at least `n` messages arrived.
    pub fn messages(&self, n: usize) -> Vec<(usize, ControlMessage)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let log = self.state.log.lock().unwrap().clone();
            if log.len() >= n || Instant::now() > deadline {
                return log;
            }
            sleep(Duration::from_millis(10));
        }
    }
}

/// Address nobody listens on.
///
/// The port stays bound, never listening, for the whole test process, so no
/// other test can take it over and connects are refused.
pub fn dead_addr() -> SocketAddr {
    static DEAD: OnceLock<Socket> = OnceLock::new();
    let s = DEAD.get_or_init(|| {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let s = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        s.bind(&addr.into()).unwrap();
        s
    });
    s.local_addr().unwrap().as_socket().unwrap()
}

/// Mediator that reads one message per connection and then resets it.
pub fn resetting_mediator() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    spawn(move || {
        while let Ok((mut s, _)) = listener.accept() {
            let _ = codec::read_msg(&mut s);
            let _ = SockRef::from(&s).set_linger(Some(Duration::ZERO));
        }
    });
    addr
}

/// Relay stand-in: a local listener, reported with an unspecified host like
/// a relay server that only knows its port.
pub struct LoopbackAllocation {
    listener: Socket,
    released: Arc<AtomicBool>,
}

impl LoopbackAllocation {
    pub fn bind(released: Arc<AtomicBool>) -> Result<Self> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;
        listener.bind(&addr.into())?;
        listener.listen(10)?;

        Ok(Self { listener, released })
    }
}

impl RelayAllocation for LoopbackAllocation {
    fn create_allocation(&self) -> Result<SocketAddr> {
        let port = self
            .listener
            .local_addr()?
            .as_socket()
            .ok_or(Error::new(Other, "no local address"))?
            .port();
        Ok(SocketAddr::new([0, 0, 0, 0].into(), port))
    }

    fn accept(&self) -> Result<TcpStream> {
        self.listener.accept().map(|(s, _)| s.into())
    }

    fn release(&self) -> Result<()> {
        self.released.store(true, SeqCst);
        let _ = self.listener.shutdown(Both);
        Ok(())
    }
}

/// Allocation reporting a fixed endpoint; it never accepts anything.
pub struct FixedAllocation {
    pub endpoint: Option<SocketAddr>,
    pub releases: Arc<AtomicUsize>,
}

impl RelayAllocation for FixedAllocation {
    fn create_allocation(&self) -> Result<SocketAddr> {
        self.endpoint
            .ok_or(Error::new(Other, "relay refused allocation"))
    }

    fn accept(&self) -> Result<TcpStream> {
        Err(Error::new(Other, "relay closed allocation"))
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, SeqCst);
        Ok(())
    }
}

#[cfg(feature = "async")]
pub use self::nonblocking::AsyncLoopbackAllocation;

#[cfg(feature = "async")]
mod nonblocking {
    use super::FixedAllocation;
    use crate::allocation::{AsyncRelayAllocation, RelayAllocation};
    use std::io::{Error, ErrorKind::Other, Result};
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::select;
    use tokio::sync::Notify;

    impl AsyncRelayAllocation for FixedAllocation {
        async fn create_allocation(&self) -> Result<SocketAddr> {
            RelayAllocation::create_allocation(self)
        }

        async fn accept(&self) -> Result<TcpStream> {
            Err(Error::new(Other, "relay closed allocation"))
        }

        async fn release(&self) -> Result<()> {
            RelayAllocation::release(self)
        }
    }

    /// Async loopback allocation; `release` ends a pending accept.
    pub struct AsyncLoopbackAllocation {
        listener: TcpListener,
        exit: Notify,
    }

    impl AsyncLoopbackAllocation {
        /// must run inside a tokio runtime.
        pub fn bind() -> Result<Self> {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.set_nonblocking(true)?;

            Ok(Self {
                listener: TcpListener::from_std(listener)?,
                exit: Notify::new(),
            })
        }
    }

    impl AsyncRelayAllocation for AsyncLoopbackAllocation {
        async fn create_allocation(&self) -> Result<SocketAddr> {
            let port = self.listener.local_addr()?.port();
            Ok(SocketAddr::new([0, 0, 0, 0].into(), port))
        }

        async fn accept(&self) -> Result<TcpStream> {
            select! {
                _ = self.exit.notified() => Err(Error::new(Other, "allocation released")),
                r = self.listener.accept() => r.map(|(s, _)| s),
            }
        }

        async fn release(&self) -> Result<()> {
            self.exit.notify_one();
            Ok(())
        }
    }
}
