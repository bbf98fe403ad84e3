//! The boundary to the connection layer. This crate does not own a
//! socket or a bus name; it consumes a [`Connection`]: a synchronous
//! call-dispatch primitive and a fire-and-forget send primitive.
//!
//! The process-wide default system endpoint is installable via
//! [`set_default_system`]; until one is installed, messages can still
//! be built against a disconnected stand-in whose dispatch operations
//! fail with `ENOTCONN`.

use crate::error::codes;
use crate::message::Message;

use log::debug;

use std::sync::{Arc, RwLock};

/// Outcome of a failed synchronous call: either a named error reply
/// from the remote side, preserved verbatim, or a plain transport
/// failure code.
#[derive(Clone, Debug, PartialEq)]
pub enum CallError {
    Named { name: String, message: String },
    Code(i32),
}

/// What the message layer requires of a transport. `call` blocks until
/// a reply or error reply arrives; `timeout_usec == 0` leaves the wait
/// policy entirely to the transport.
pub trait Connection: Send + Sync {
    fn call(&self, request: &Message, timeout_usec: u64)
        -> std::result::Result<Message, CallError>;
    fn send(&self, message: &Message) -> std::result::Result<(), i32>;
}

static DEFAULT_SYSTEM: RwLock<Option<Arc<dyn Connection>>> = RwLock::new(None);

/// Installs the process-wide default system endpoint used by
/// detached plain messages.
pub fn set_default_system(conn: Arc<dyn Connection>) {
    debug!("installing default system endpoint");
    *DEFAULT_SYSTEM
        .write()
        .expect("default endpoint lock poisoned") = Some(conn);
}

pub fn default_system() -> Arc<dyn Connection> {
    DEFAULT_SYSTEM
        .read()
        .expect("default endpoint lock poisoned")
        .clone()
        .unwrap_or_else(|| Arc::new(Disconnected))
}

struct Disconnected;

impl Connection for Disconnected {
    fn call(
        &self,
        _request: &Message,
        _timeout_usec: u64,
    ) -> std::result::Result<Message, CallError> {
        Err(CallError::Code(codes::ENOTCONN))
    }

    fn send(&self, _message: &Message) -> std::result::Result<(), i32> {
        Err(codes::ENOTCONN)
    }
}
