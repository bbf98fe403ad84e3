//! A typed, streaming serialization layer for DBus messages.
//!
//! This crate implements the message side of the DBus story: building
//! up the marshaled body of a method call, method reply, signal, or
//! detached plain message value by value, and reading such a body back
//! in the same streaming fashion. Actually owning a socket or a bus
//! name is outside of the scope of this crate; dispatch goes through
//! the [`Connection`] trait in the [`transport`] module, which a full
//! DBus connection library is expected to implement.
//!
//! Messages are in the [`Message`] type. Writing is a chain of
//! `write_*` calls bracketed by `open_*`/`close_*` for containers;
//! once [`seal`]ed, a message is read back with the mirroring
//! `read_*` and `enter_*`/`exit_*` calls. Reading past the end of a
//! container is not an error but a signal, reported via [`ok`], so
//! arrays and dictionaries of unknown length can be consumed with a
//! plain loop.
//!
//! Values with no direct Rust counterpart, object paths, signatures,
//! and the self-describing variant, live in the [`types`] module.
//! Hard failures carry an errno-style code and a context string; see
//! the [`error`] module for the split between hard errors and the
//! structural-end signal.
//!
//! [`Connection`]: crate::transport::Connection
//! [`Message`]: crate::message::Message
//! [`seal`]: crate::message::Message::seal()
//! [`ok`]: crate::message::Message::ok()

mod align;
mod body;
pub mod error;
mod handle;
pub mod message;
mod primitives;
mod signature;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use message::{create_plain_message, Message, MessageKind};
pub use transport::{CallError, Connection};
pub use types::{ObjectPath, Signature, Variant};
