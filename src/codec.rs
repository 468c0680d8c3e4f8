//! Control message framing.
//!
//! A frame is a 2 byte big-endian length followed by the protobuf encoded
//! [`ControlMessage`]. The blocking helpers live here; the async client
//! reuses [`frame`], [`frame_len`] and [`parse`] around tokio io.

use crate::proto::{ControlMessage, MessageClass, MessageMethod};
use protobuf::Message;
use std::io::{Error, ErrorKind::InvalidData, Read, Result, Write};
use std::net::SocketAddr;

pub const MAX_MESSAGE_SIZE: usize = 1500;

/// request with class `REQUEST`, `method` and the peer identifier attribute.
pub fn new_request(method: MessageMethod, username: &str) -> ControlMessage {
    let mut msg = ControlMessage::new();
    msg.class = MessageClass::REQUEST.into();
    msg.method = method.into();
    msg.username = username.to_string();

    msg
}

pub fn connection_request(target_id: &str) -> ControlMessage {
    new_request(MessageMethod::CONNECTION_REQUEST, target_id)
}

pub fn register_request(target_id: &str, endpoint: SocketAddr) -> ControlMessage {
    let mut msg = new_request(MessageMethod::REGISTER, target_id);
    msg.mapped_address = endpoint.to_string();

    msg
}

pub fn deregister_request(target_id: &str) -> ControlMessage {
    new_request(MessageMethod::DEREGISTER, target_id)
}

pub fn class(msg: &ControlMessage) -> Option<MessageClass> {
    msg.class.enum_value().ok()
}

pub fn method(msg: &ControlMessage) -> Option<MessageMethod> {
    msg.method.enum_value().ok()
}

pub fn username(msg: &ControlMessage) -> Option<&str> {
    Some(msg.username.as_str()).filter(|s| !s.is_empty())
}

/// `None` when the attribute is absent, an error when it does not parse.
pub fn mapped_address(msg: &ControlMessage) -> Option<Result<SocketAddr>> {
    if msg.mapped_address.is_empty() {
        return None;
    }

    Some(
        msg.mapped_address
            .parse()
            .map_err(|_| Error::new(InvalidData, "invalid mapped address")),
    )
}

pub fn error_reason(msg: &ControlMessage) -> Option<&str> {
    Some(msg.error_reason.as_str()).filter(|s| !s.is_empty())
}

pub fn frame(msg: &ControlMessage) -> Result<Vec<u8>> {
    let body = msg.write_to_bytes()?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(Error::new(InvalidData, "message too large"));
    }

    let mut buf = Vec::with_capacity(body.len() + 2);
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub fn frame_len(header: [u8; 2]) -> Result<usize> {
    let size = u16::from_be_bytes(header).into();
    if size > MAX_MESSAGE_SIZE {
        return Err(Error::new(InvalidData, "invalid message size"));
    }
    Ok(size)
}

pub fn parse(body: &[u8]) -> Result<ControlMessage> {
    ControlMessage::parse_from_bytes(body).map_err(|_| Error::new(InvalidData, "invalid message"))
}

pub fn write_msg(w: &mut dyn Write, msg: &ControlMessage) -> Result<()> {
    w.write_all(&frame(msg)?)?;
    w.flush()
}

pub fn read_msg(r: &mut dyn Read) -> Result<ControlMessage> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    let mut buf = vec![0; frame_len(buf)?];
    r.read_exact(&mut buf)?;
    parse(&buf)
}
