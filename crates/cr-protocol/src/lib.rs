//! cr-protocol: Wire protocol for clipboard-remote
//!
//! This crate defines the messages exchanged between a device and the relay
//! server over a WebSocket link. One wire message travels per frame.

pub mod codec;
pub mod error;
pub mod message;
pub mod rest;

pub use codec::{decode, encode, encode_text, Envelope};
pub use error::DecodeError;
pub use message::{
    validate_username, Action, Credentials, SyncMode, WireMessage, MAX_MESSAGE_SIZE,
};
pub use rest::{DataInfo, RespInfo, SetRequest};
