use thiserror;

use std;

pub type Result<T> = std::result::Result<T, Error>;

/// Errno-style codes carried by hard errors, mirroring what an sd-bus
/// style transport reports as negative return values.
pub mod codes {
    pub const EPERM: i32 = 1;
    pub const ENXIO: i32 = 6;
    pub const EBUSY: i32 = 16;
    pub const EINVAL: i32 = 22;
    pub const EBADMSG: i32 = 74;
    pub const ENOTCONN: i32 = 107;
}

/// Hard errors of the message layer.
///
/// Structural end of a container is *not* an error; it is signaled via
/// the success flag on [`Message`] and must be checked by the caller
/// after each extract/enter operation.
///
/// [`Message`]: crate::message::Message
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{context}: errno {code}")]
    Serialization { context: &'static str, code: i32 },
    #[error("{context}: errno {code}")]
    Deserialization { context: &'static str, code: i32 },
    #[error("{context}: errno {code}")]
    Transport { context: &'static str, code: i32 },
    /// A named error reply from a remote method call, with the
    /// protocol-level (name, message) pair preserved verbatim.
    #[error("{name}: {message}")]
    Call { name: String, message: String },
    #[error("operation on an invalid message")]
    InvalidMessage,
}

impl Error {
    pub(crate) fn serialization(context: &'static str, code: i32) -> Self {
        Error::Serialization { context, code }
    }

    pub(crate) fn deserialization(context: &'static str, code: i32) -> Self {
        Error::Deserialization { context, code }
    }

    pub(crate) fn transport(context: &'static str, code: i32) -> Self {
        Error::Transport { context, code }
    }
}
