//! Value types of the DBus type system that are not plain Rust
//! primitives: object paths, signatures, and the self-describing
//! variant.

use crate::error::{codes, Error, Result};
use crate::message::{create_plain_message, Message};

/// A hierarchical object name, e.g. `/org/example/Object`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPath(pub String);

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        ObjectPath(path.to_owned())
    }
}

/// A type-description string in the DBus signature mini-language.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signature(pub String);

impl From<&str> for Signature {
    fn from(sig: &str) -> Self {
        Signature(sig.to_owned())
    }
}

/// A single self-describing typed value.
///
/// A variant owns a detached plain message holding its `v`-wrapped
/// content, sealed and rewound, so it can be spliced into any other
/// message or inspected on its own. The empty state is never written
/// to the wire; it only arises when deserialization runs past the end
/// of an enclosing container, which [`Message::read_variant`] turns
/// into the structural-end flag.
///
/// [`Message::read_variant`]: crate::message::Message::read_variant
#[derive(Clone, Debug)]
pub struct Variant {
    msg: Option<Message>,
}

impl Variant {
    /// Builds a variant with the given contents signature; `f` must
    /// write exactly one value of that type.
    pub fn build(signature: &str, f: impl FnOnce(&mut Message) -> Result<()>) -> Result<Variant> {
        let mut msg = create_plain_message()?;
        msg.open_variant(signature)?;
        f(&mut msg)?;
        msg.close_variant()?;
        msg.seal()?;
        msg.rewind(true)?;
        Ok(Variant { msg: Some(msg) })
    }

    pub fn empty() -> Variant {
        Variant { msg: None }
    }

    pub fn is_empty(&self) -> bool {
        self.msg.is_none()
    }

    /// The signature of the contained value.
    pub fn contents_signature(&self) -> Result<String> {
        let msg = self.msg.as_ref().ok_or(Error::InvalidMessage)?;
        let mut probe = msg.clone();
        probe.rewind(true)?;
        match probe.peek_type()? {
            Some(('v', Some(contents))) => Ok(contents),
            _ => Err(Error::deserialization(
                "Failed to peek variant contents",
                codes::EBADMSG,
            )),
        }
    }

    /// Reads the contained value: `f` is handed a message positioned
    /// inside the variant and should extract one value of the
    /// contents signature.
    pub fn read_with(&self, f: impl FnOnce(&mut Message) -> Result<()>) -> Result<()> {
        let contents = self.contents_signature()?;
        let msg = self.msg.as_ref().ok_or(Error::InvalidMessage)?;
        let mut probe = msg.clone();
        probe.rewind(true)?;
        probe.enter_variant(&contents)?;
        f(&mut probe)
    }

    pub(crate) fn serialize_to(&self, dest: &mut Message) -> Result<()> {
        if self.is_empty() {
            return Err(Error::serialization(
                "Failed to serialize an empty variant",
                codes::EINVAL,
            ));
        }
        let contents = self.contents_signature()?;
        let msg = self.msg.as_ref().ok_or(Error::InvalidMessage)?;
        let mut src = msg.clone();
        src.rewind(true)?;
        src.enter_variant(&contents)?;
        dest.open_variant(&contents)?;
        src.copy_to(dest, true)?;
        dest.close_variant()?;
        src.exit_variant()?;
        Ok(())
    }

    pub(crate) fn deserialize_from(src: &mut Message) -> Result<Variant> {
        match src.peek_type()? {
            None => Ok(Variant::empty()),
            Some(('v', Some(contents))) => {
                let mut msg = create_plain_message()?;
                msg.open_variant(&contents)?;
                src.enter_variant(&contents)?;
                src.copy_to(&mut msg, true)?;
                src.exit_variant()?;
                msg.close_variant()?;
                msg.seal()?;
                msg.rewind(true)?;
                Ok(Variant { msg: Some(msg) })
            }
            Some(_) => Err(Error::deserialization(
                "Failed to deserialize a variant",
                codes::ENXIO,
            )),
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::empty()
    }
}
