//! Generated control-channel messages, see `proto/relaying.proto`.

include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));

pub use self::relaying::{ControlMessage, MessageClass, MessageMethod};
