use relaying::allocation::RelayAllocation;
use relaying::codec;
use relaying::config::RelayConfig;
use relaying::proto::{ControlMessage, MessageClass, MessageMethod};
use relaying::tcp::Client;
use std::collections::HashMap;
use std::error::Error;
use std::io::{Read, Result, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// "relay" that hands out a local listener.
struct LocalRelay(TcpListener);

impl RelayAllocation for LocalRelay {
    fn create_allocation(&self) -> Result<SocketAddr> {
        let port = self.0.local_addr()?.port();
        Ok(SocketAddr::new([0, 0, 0, 0].into(), port))
    }

    fn accept(&self) -> Result<TcpStream> {
        self.0.accept().map(|(s, _)| s)
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }
}

fn serve(mut s: TcpStream, registry: Arc<Mutex<HashMap<String, String>>>) {
    while let Ok(msg) = codec::read_msg(&mut s) {
        match codec::method(&msg) {
            Some(MessageMethod::REGISTER) => {
                registry
                    .lock()
                    .unwrap()
                    .insert(msg.username, msg.mapped_address);
            }
            Some(MessageMethod::DEREGISTER) => {
                registry.lock().unwrap().remove(&msg.username);
            }
            Some(MessageMethod::CONNECTION_REQUEST) => {
                let mut resp = ControlMessage::new();
                resp.method = MessageMethod::CONNECTION_REQUEST.into();
                match registry.lock().unwrap().get(&msg.username) {
                    Some(addr) => {
                        resp.class = MessageClass::SUCCESS_RESPONSE.into();
                        resp.mapped_address = addr.clone();
                    }
                    None => resp.class = MessageClass::ERROR_RESPONSE.into(),
                }
                if codec::write_msg(&mut s, &resp).is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
    let _ = s.shutdown(Shutdown::Both);
}

fn main() -> std::result::Result<(), Box<dyn Error>> {
    let mediator = TcpListener::bind("127.0.0.1:0")?;
    let mediator_addr = mediator.local_addr()?;
    thread::spawn(move || {
        let registry = Arc::new(Mutex::new(HashMap::new()));
        while let Ok((s, _)) = mediator.accept() {
            let registry = registry.clone();
            thread::spawn(move || serve(s, registry));
        }
    });

    let config = RelayConfig::new("127.0.0.1:3478")?;
    let target = Client::new(config, |_: SocketAddr| -> Result<LocalRelay> {
        Ok(LocalRelay(TcpListener::bind("127.0.0.1:0")?))
    });
    let source = target.copy();

    target.register_target("c1", mediator_addr)?;

    let t = thread::spawn(move || {
        let mut s = target.accept_as_target("c1", mediator_addr).unwrap();
        s.write_all(b"hello").unwrap();
        target.deregister_target("c1", mediator_addr).unwrap();
    });

    let mut s = loop {
        match source.connect_as_source("c1", mediator_addr) {
            Ok(s) => break s,
            _ => thread::sleep(Duration::from_millis(100)),
        }
    };

    let mut buf = [0; 5];
    s.read_exact(&mut buf)?;
    println!("{}", String::from_utf8_lossy(&buf));

    t.join().unwrap();

    Ok(())
}
