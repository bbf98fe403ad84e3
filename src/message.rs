//! The message entity: a reference-counted handle on wire content plus
//! a role tag and the structural-end flag.
//!
//! Values are appended and extracted in a fixed left-to-right order
//! through chainable `write_*`/`read_*` methods; nested containers are
//! written with `open_*`/`close_*` and consumed with `enter_*`/
//! `exit_*`, which must balance exactly. Running off the end of a
//! container is not an error: it clears the success flag, queryable
//! with [`Message::ok`], and the caller stops iterating and calls
//! [`Message::clear_flags`] before reusing the message.
//!
//! Cloning a message clones the handle, not the content: both clones
//! observe one cursor. Sending is dispatched on the message kind; only
//! method calls produce a reply, and a named error reply surfaces as
//! [`Error::Call`] with the protocol-level name and description kept
//! verbatim.
//!
//! [`Error::Call`]: crate::error::Error::Call

use crate::body::{ContainerKind, Header, MessageBody};
use crate::error::{codes, Error, Result};
use crate::handle::MessageHandle;
use crate::primitives::DbusBasic;
use crate::signature;
use crate::transport::{self, CallError, Connection};
use crate::types::{ObjectPath, Signature, Variant};

use log::trace;

use std::sync::Arc;

/// Delivery identifier assigned when a locally built message is sealed.
const MESSAGE_COOKIE: u64 = 1;

/// The bus role of a message, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    MethodCall,
    MethodReply,
    Signal,
    /// A detached container of values with no call/reply/signal role.
    Plain,
}

#[derive(Clone, Debug)]
pub struct Message {
    handle: Option<MessageHandle>,
    kind: Option<MessageKind>,
    ok: bool,
}

/// The void result of a fire-and-forget send: no handle, no kind,
/// [`Message::is_valid`] is false.
impl Default for Message {
    fn default() -> Self {
        Message {
            handle: None,
            kind: None,
            ok: true,
        }
    }
}

impl Message {
    pub(crate) fn from_handle(handle: MessageHandle, kind: MessageKind) -> Self {
        Message {
            handle: Some(handle),
            kind: Some(kind),
            ok: true,
        }
    }

    pub fn new_method_call(
        conn: Arc<dyn Connection>,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<Message> {
        if !signature::is_valid_object_path(path) {
            return Err(Error::transport(
                "Failed to create method call",
                codes::EINVAL,
            ));
        }
        let header = Header {
            destination: Some(destination.to_owned()),
            path: Some(path.to_owned()),
            interface: Some(interface.to_owned()),
            member: Some(member.to_owned()),
            cookie: None,
            reply_cookie: None,
        };
        Ok(Message::from_handle(
            MessageHandle::new(MessageBody::new(Some(conn), header)),
            MessageKind::MethodCall,
        ))
    }

    pub fn new_signal(
        conn: Arc<dyn Connection>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<Message> {
        if !signature::is_valid_object_path(path) {
            return Err(Error::transport("Failed to create signal", codes::EINVAL));
        }
        let header = Header {
            destination: None,
            path: Some(path.to_owned()),
            interface: Some(interface.to_owned()),
            member: Some(member.to_owned()),
            cookie: None,
            reply_cookie: None,
        };
        Ok(Message::from_handle(
            MessageHandle::new(MessageBody::new(Some(conn), header)),
            MessageKind::Signal,
        ))
    }

    fn handle(&self) -> Result<&MessageHandle> {
        self.handle.as_ref().ok_or(Error::InvalidMessage)
    }

    // --- primitive codec ---

    fn append<T: DbusBasic>(&mut self, item: &T, context: &'static str) -> Result<&mut Self> {
        self.handle()?
            .body()
            .append_basic(item)
            .map_err(|code| Error::serialization(context, code))?;
        Ok(self)
    }

    /// Extracts one value. At the structural end of the current scope
    /// the output is left untouched and the success flag is cleared.
    fn extract<T: DbusBasic>(&mut self, item: &mut T, context: &'static str) -> Result<&mut Self> {
        let outcome = self.handle()?.body().read_basic::<T>();
        match outcome {
            Ok(Some(value)) => *item = value,
            Ok(None) => self.ok = false,
            Err(code) => return Err(Error::deserialization(context, code)),
        }
        Ok(self)
    }

    pub fn write_bool(&mut self, item: bool) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a bool value")
    }

    pub fn write_i16(&mut self, item: i16) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize an i16 value")
    }

    pub fn write_i32(&mut self, item: i32) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize an i32 value")
    }

    pub fn write_i64(&mut self, item: i64) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize an i64 value")
    }

    pub fn write_u8(&mut self, item: u8) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a byte value")
    }

    pub fn write_u16(&mut self, item: u16) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a u16 value")
    }

    pub fn write_u32(&mut self, item: u32) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a u32 value")
    }

    pub fn write_u64(&mut self, item: u64) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a u64 value")
    }

    pub fn write_f64(&mut self, item: f64) -> Result<&mut Self> {
        self.append(&item, "Failed to serialize a double value")
    }

    pub fn write_str(&mut self, item: &str) -> Result<&mut Self> {
        self.append(&item.to_owned(), "Failed to serialize a string value")
    }

    pub fn write_object_path(&mut self, item: &ObjectPath) -> Result<&mut Self> {
        self.append(item, "Failed to serialize an object path value")
    }

    pub fn write_signature(&mut self, item: &Signature) -> Result<&mut Self> {
        self.append(item, "Failed to serialize a signature value")
    }

    pub fn write_variant(&mut self, item: &Variant) -> Result<&mut Self> {
        item.serialize_to(self)?;
        Ok(self)
    }

    pub fn read_bool(&mut self, item: &mut bool) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a bool value")
    }

    pub fn read_i16(&mut self, item: &mut i16) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize an i16 value")
    }

    pub fn read_i32(&mut self, item: &mut i32) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize an i32 value")
    }

    pub fn read_i64(&mut self, item: &mut i64) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize an i64 value")
    }

    pub fn read_u8(&mut self, item: &mut u8) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a byte value")
    }

    pub fn read_u16(&mut self, item: &mut u16) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a u16 value")
    }

    pub fn read_u32(&mut self, item: &mut u32) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a u32 value")
    }

    pub fn read_u64(&mut self, item: &mut u64) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a u64 value")
    }

    pub fn read_f64(&mut self, item: &mut f64) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a double value")
    }

    pub fn read_str(&mut self, item: &mut String) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a string value")
    }

    pub fn read_object_path(&mut self, item: &mut ObjectPath) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize an object path value")
    }

    pub fn read_signature(&mut self, item: &mut Signature) -> Result<&mut Self> {
        self.extract(item, "Failed to deserialize a signature value")
    }

    /// An empty variant only ever means the enclosing container was
    /// exhausted: well-formed messages cannot carry one, so it maps to
    /// the structural-end flag rather than an error.
    pub fn read_variant(&mut self, item: &mut Variant) -> Result<&mut Self> {
        let variant = Variant::deserialize_from(self)?;
        if variant.is_empty() {
            self.ok = false;
        }
        *item = variant;
        Ok(self)
    }

    // --- container protocol ---

    fn open(
        &mut self,
        kind: ContainerKind,
        contents: &str,
        context: &'static str,
    ) -> Result<&mut Self> {
        self.handle()?
            .body()
            .open_container(kind, contents)
            .map_err(|code| Error::serialization(context, code))?;
        Ok(self)
    }

    fn close(&mut self, context: &'static str) -> Result<&mut Self> {
        self.handle()?
            .body()
            .close_container()
            .map_err(|code| Error::serialization(context, code))?;
        Ok(self)
    }

    fn enter(
        &mut self,
        kind: ContainerKind,
        contents: &str,
        context: &'static str,
    ) -> Result<&mut Self> {
        let outcome = self.handle()?.body().enter_container(kind, contents);
        match outcome {
            Ok(true) => {}
            Ok(false) => self.ok = false,
            Err(code) => return Err(Error::deserialization(context, code)),
        }
        Ok(self)
    }

    fn exit(&mut self, context: &'static str) -> Result<&mut Self> {
        self.handle()?
            .body()
            .exit_container()
            .map_err(|code| Error::deserialization(context, code))?;
        Ok(self)
    }

    pub fn open_array(&mut self, contents: &str) -> Result<&mut Self> {
        self.open(ContainerKind::Array, contents, "Failed to open a container")
    }

    pub fn close_array(&mut self) -> Result<&mut Self> {
        self.close("Failed to close a container")
    }

    pub fn open_struct(&mut self, contents: &str) -> Result<&mut Self> {
        self.open(ContainerKind::Struct, contents, "Failed to open a struct")
    }

    pub fn close_struct(&mut self) -> Result<&mut Self> {
        self.close("Failed to close a struct")
    }

    pub fn open_dict_entry(&mut self, contents: &str) -> Result<&mut Self> {
        self.open(
            ContainerKind::DictEntry,
            contents,
            "Failed to open a dictionary entry",
        )
    }

    pub fn close_dict_entry(&mut self) -> Result<&mut Self> {
        self.close("Failed to close a dictionary entry")
    }

    pub fn open_variant(&mut self, contents: &str) -> Result<&mut Self> {
        self.open(ContainerKind::Variant, contents, "Failed to open a variant")
    }

    pub fn close_variant(&mut self) -> Result<&mut Self> {
        self.close("Failed to close a variant")
    }

    pub fn enter_array(&mut self, contents: &str) -> Result<&mut Self> {
        self.enter(ContainerKind::Array, contents, "Failed to enter a container")
    }

    pub fn exit_array(&mut self) -> Result<&mut Self> {
        self.exit("Failed to exit a container")
    }

    pub fn enter_struct(&mut self, contents: &str) -> Result<&mut Self> {
        self.enter(ContainerKind::Struct, contents, "Failed to enter a struct")
    }

    pub fn exit_struct(&mut self) -> Result<&mut Self> {
        self.exit("Failed to exit a struct")
    }

    pub fn enter_dict_entry(&mut self, contents: &str) -> Result<&mut Self> {
        self.enter(
            ContainerKind::DictEntry,
            contents,
            "Failed to enter a dictionary entry",
        )
    }

    pub fn exit_dict_entry(&mut self) -> Result<&mut Self> {
        self.exit("Failed to exit a dictionary entry")
    }

    pub fn enter_variant(&mut self, contents: &str) -> Result<&mut Self> {
        self.enter(ContainerKind::Variant, contents, "Failed to enter a variant")
    }

    pub fn exit_variant(&mut self) -> Result<&mut Self> {
        self.exit("Failed to exit a variant")
    }

    // --- message-level operations ---

    /// True unless the last extract/enter ran into the structural end
    /// of the current scope.
    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn clear_flags(&mut self) {
        self.ok = true;
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_empty(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.body().is_empty(),
            None => true,
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    /// Freezes the message for transmission. Further appends fail.
    pub fn seal(&mut self) -> Result<&mut Self> {
        self.handle()?
            .body()
            .seal(MESSAGE_COOKIE)
            .map_err(|code| Error::serialization("Failed to seal the message", code))?;
        Ok(self)
    }

    /// Resets the read cursor: `complete` rewinds to the start of the
    /// message, otherwise to the start of the current container.
    pub fn rewind(&mut self, complete: bool) -> Result<&mut Self> {
        self.handle()?
            .body()
            .rewind(complete)
            .map_err(|code| Error::deserialization("Failed to rewind the message", code))?;
        Ok(self)
    }

    /// Copies remaining unread content into `destination`'s write
    /// cursor; `complete` copies everything, otherwise one single
    /// complete value.
    pub fn copy_to(&self, destination: &mut Message, complete: bool) -> Result<()> {
        let src = self.handle()?;
        let dest = destination.handle()?;
        if MessageHandle::ptr_eq(src, dest) {
            return Err(Error::serialization(
                "Failed to copy the message",
                codes::EINVAL,
            ));
        }
        src.body()
            .copy_to(&mut dest.body(), complete)
            .map_err(|code| Error::serialization("Failed to copy the message", code))
    }

    /// Type code and contents signature of the next element, without
    /// advancing the cursor; `None` at the structural end.
    pub fn peek_type(&self) -> Result<Option<(char, Option<String>)>> {
        self.handle()?
            .body()
            .peek()
            .map_err(|code| Error::deserialization("Failed to peek message type", code))
    }

    pub fn get_interface_name(&self) -> Result<Option<String>> {
        Ok(self.handle()?.body().header.interface.clone())
    }

    pub fn get_member_name(&self) -> Result<Option<String>> {
        Ok(self.handle()?.body().header.member.clone())
    }

    // --- transport operations ---

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.handle()?
            .body()
            .conn
            .clone()
            .ok_or(Error::transport("Failed to access the bus", codes::ENOTCONN))
    }

    fn seal_for_dispatch(&self) -> Result<()> {
        let handle = self.handle()?;
        let mut body = handle.body();
        if !body.is_sealed() {
            body.seal(MESSAGE_COOKIE)
                .map_err(|code| Error::serialization("Failed to seal the message", code))?;
        }
        Ok(())
    }

    /// Dispatches on the message kind: a method call performs a
    /// blocking round trip and returns the reply; a reply or signal is
    /// sent fire-and-forget and yields the void default message.
    ///
    /// Panics when invoked on a plain or default-constructed message;
    /// those have no bus role and sending one is a programming defect.
    pub fn send(&self) -> Result<Message> {
        match self.kind {
            Some(MessageKind::MethodCall) => self.send_call(),
            Some(MessageKind::MethodReply) => self.send_oneway("Failed to send reply"),
            Some(MessageKind::Signal) => self.send_oneway("Failed to emit signal"),
            Some(MessageKind::Plain) | None => {
                panic!("send() invoked on a message with no bus role")
            }
        }
    }

    fn send_call(&self) -> Result<Message> {
        let conn = self.connection()?;
        self.seal_for_dispatch()?;
        trace!("dispatching method call, awaiting reply");
        let call_timeout_usec = 0;
        match conn.call(self, call_timeout_usec) {
            Ok(reply) => Ok(Message {
                handle: reply.handle,
                kind: Some(MessageKind::MethodReply),
                ok: true,
            }),
            Err(CallError::Named { name, message }) => Err(Error::Call { name, message }),
            Err(CallError::Code(code)) => Err(Error::transport("Failed to call method", code)),
        }
    }

    fn send_oneway(&self, context: &'static str) -> Result<Message> {
        let conn = self.connection()?;
        self.seal_for_dispatch()?;
        conn.send(self)
            .map_err(|code| Error::transport(context, code))?;
        Ok(Message::default())
    }

    /// Builds an unsent reply skeleton addressed back at this call's
    /// sender. The reply is writable and must be sent explicitly.
    pub fn create_reply(&self) -> Result<Message> {
        if self.kind != Some(MessageKind::MethodCall) {
            return Err(Error::transport(
                "Failed to create method reply",
                codes::EINVAL,
            ));
        }
        let handle = self.handle()?;
        let body = handle.body();
        // An unsealed call has no delivery cookie to correlate with.
        let cookie = body.header.cookie.ok_or(Error::transport(
            "Failed to create method reply",
            codes::EPERM,
        ))?;
        let header = Header {
            destination: None,
            path: None,
            interface: None,
            member: None,
            cookie: None,
            reply_cookie: Some(cookie),
        };
        let conn = body.conn.clone();
        drop(body);
        Ok(Message::from_handle(
            MessageHandle::new(MessageBody::new(conn, header)),
            MessageKind::MethodReply,
        ))
    }
}

/// Builds a detached plain message bound to the default system
/// endpoint, for assembling values outside any call/reply/signal
/// context.
pub fn create_plain_message() -> Result<Message> {
    let conn = transport::default_system();
    Ok(Message::from_handle(
        MessageHandle::new(MessageBody::new(Some(conn), Header::default())),
        MessageKind::Plain,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use test_log::test;

    #[test]
    fn scenario_flat_round_trip() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.write_i32(42)?.write_str("hi")?;
        msg.seal()?;
        msg.rewind(true)?;

        let mut number = 0i32;
        let mut text = String::new();
        msg.read_i32(&mut number)?.read_str(&mut text)?;
        assert_eq!(number, 42);
        assert_eq!(text, "hi");
        assert!(msg.ok());
        Ok(())
    }

    #[test]
    fn scenario_array_end_signaling() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.open_array("i")?;
        msg.write_i32(1)?.write_i32(2)?.write_i32(3)?;
        msg.close_array()?;
        msg.seal()?;
        msg.rewind(true)?;

        msg.enter_array("i")?;
        let mut values = Vec::new();
        loop {
            let mut v = 0i32;
            msg.read_i32(&mut v)?;
            if !msg.ok() {
                break;
            }
            values.push(v);
        }
        assert_eq!(values, vec![1, 2, 3]);
        assert!(!msg.ok());

        // The message stays usable for the parent scope once the flag
        // is cleared.
        msg.clear_flags();
        msg.exit_array()?;
        assert!(msg.ok());

        msg.rewind(true)?;
        msg.enter_array("i")?;
        let mut first = 0i32;
        msg.read_i32(&mut first)?;
        assert!(msg.ok());
        assert_eq!(first, 1);
        Ok(())
    }

    #[test]
    fn all_primitives_round_trip() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.write_bool(true)?
            .write_u8(0xfe)?
            .write_i16(-2)?
            .write_u16(3)?
            .write_i32(-4)?
            .write_u32(5)?
            .write_i64(-6)?
            .write_u64(7)?
            .write_f64(2.75)?
            .write_str("text")?
            .write_object_path(&ObjectPath("/org/example".to_owned()))?
            .write_signature(&Signature("a{sv}".to_owned()))?;
        msg.seal()?;
        msg.rewind(true)?;

        let mut b = false;
        let mut y = 0u8;
        let mut n = 0i16;
        let mut q = 0u16;
        let mut i = 0i32;
        let mut u = 0u32;
        let mut x = 0i64;
        let mut t = 0u64;
        let mut d = 0f64;
        let mut s = String::new();
        let mut o = ObjectPath::default();
        let mut g = Signature::default();
        msg.read_bool(&mut b)?
            .read_u8(&mut y)?
            .read_i16(&mut n)?
            .read_u16(&mut q)?
            .read_i32(&mut i)?
            .read_u32(&mut u)?
            .read_i64(&mut x)?
            .read_u64(&mut t)?
            .read_f64(&mut d)?
            .read_str(&mut s)?
            .read_object_path(&mut o)?
            .read_signature(&mut g)?;
        assert!(msg.ok());
        assert!(b);
        assert_eq!(y, 0xfe);
        assert_eq!(n, -2);
        assert_eq!(q, 3);
        assert_eq!(i, -4);
        assert_eq!(u, 5);
        assert_eq!(x, -6);
        assert_eq!(t, 7);
        assert_eq!(d, 2.75);
        assert_eq!(s, "text");
        assert_eq!(o, ObjectPath("/org/example".to_owned()));
        assert_eq!(g, Signature("a{sv}".to_owned()));
        Ok(())
    }

    #[test]
    fn dictionary_round_trip() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.open_array("{si}")?;
        for (key, value) in &[("one", 1i32), ("two", 2)] {
            msg.open_dict_entry("si")?;
            msg.write_str(key)?.write_i32(*value)?;
            msg.close_dict_entry()?;
        }
        msg.close_array()?;
        msg.seal()?;
        msg.rewind(true)?;

        msg.enter_array("{si}")?;
        let mut entries = Vec::new();
        loop {
            msg.enter_dict_entry("si")?;
            if !msg.ok() {
                break;
            }
            let mut key = String::new();
            let mut value = 0i32;
            msg.read_str(&mut key)?.read_i32(&mut value)?;
            msg.exit_dict_entry()?;
            entries.push((key, value));
        }
        msg.clear_flags();
        msg.exit_array()?;
        assert_eq!(
            entries,
            vec![("one".to_owned(), 1), ("two".to_owned(), 2)]
        );
        Ok(())
    }

    #[test]
    fn variant_array_end_yields_empty_variant() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.open_array("v")?;
        msg.write_variant(&Variant::build("i", |m| m.write_i32(9).map(|_| ()))?)?;
        msg.close_array()?;
        msg.seal()?;
        msg.rewind(true)?;

        msg.enter_array("v")?;
        let mut variant = Variant::default();
        msg.read_variant(&mut variant)?;
        assert!(msg.ok());
        let mut value = 0i32;
        variant.read_with(|m| m.read_i32(&mut value).map(|_| ()))?;
        assert_eq!(value, 9);

        // One read past the last element: empty variant, flag down,
        // no error.
        let mut past = Variant::default();
        msg.read_variant(&mut past)?;
        assert!(!msg.ok());
        assert!(past.is_empty());

        msg.clear_flags();
        msg.exit_array()?;
        Ok(())
    }

    #[test]
    fn copy_between_messages() -> Result<()> {
        let mut src = create_plain_message()?;
        src.write_i32(11)?;
        src.open_struct("sd")?;
        src.write_str("pi")?.write_f64(3.14)?;
        src.close_struct()?;
        src.seal()?;
        src.rewind(true)?;

        let mut dest = create_plain_message()?;
        src.copy_to(&mut dest, true)?;
        dest.seal()?;
        dest.rewind(true)?;

        let mut number = 0i32;
        let mut name = String::new();
        let mut value = 0f64;
        dest.read_i32(&mut number)?;
        dest.enter_struct("sd")?;
        dest.read_str(&mut name)?.read_f64(&mut value)?;
        dest.exit_struct()?;
        assert_eq!((number, name.as_str(), value), (11, "pi", 3.14));
        Ok(())
    }

    #[test]
    fn copy_onto_itself_is_refused() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.write_i32(1)?;
        msg.seal()?;
        let mut alias = msg.clone();
        assert_eq!(
            msg.copy_to(&mut alias, true).unwrap_err(),
            Error::Serialization {
                context: "Failed to copy the message",
                code: codes::EINVAL,
            }
        );
        Ok(())
    }

    #[test]
    fn clones_share_content_and_cursor() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.write_i32(1)?.write_i32(2)?;
        msg.seal()?;
        msg.rewind(true)?;

        let mut alias = msg.clone();
        assert_eq!(msg.handle.as_ref().unwrap().ref_count(), 2);

        let mut first = 0i32;
        alias.read_i32(&mut first)?;
        assert_eq!(first, 1);

        // The original observes the cursor the clone advanced.
        let mut second = 0i32;
        msg.read_i32(&mut second)?;
        assert_eq!(second, 2);

        drop(alias);
        assert_eq!(msg.handle.as_ref().unwrap().ref_count(), 1);
        Ok(())
    }

    #[test]
    fn append_after_seal_is_hard_error() -> Result<()> {
        let mut msg = create_plain_message()?;
        msg.write_i32(1)?;
        msg.seal()?;
        assert_eq!(
            msg.write_i32(2).unwrap_err(),
            Error::Serialization {
                context: "Failed to serialize an i32 value",
                code: codes::EPERM,
            }
        );
        Ok(())
    }

    #[test]
    fn unmatched_close_is_hard_error() -> Result<()> {
        let mut msg = create_plain_message()?;
        assert_eq!(
            msg.close_struct().unwrap_err(),
            Error::Serialization {
                context: "Failed to close a struct",
                code: codes::EINVAL,
            }
        );
        Ok(())
    }

    #[test]
    fn default_message_is_invalid() {
        let msg = Message::default();
        assert!(!msg.is_valid());
        assert!(msg.is_empty());
        assert_eq!(msg.kind(), None);
        let mut copy = msg.clone();
        assert_eq!(copy.write_i32(1).unwrap_err(), Error::InvalidMessage);
        assert_eq!(copy.seal().unwrap_err(), Error::InvalidMessage);
    }

    #[test]
    #[should_panic(expected = "no bus role")]
    fn send_on_plain_message_panics() {
        let msg = create_plain_message().unwrap();
        let _ = msg.send();
    }

    struct NamedErrorConnection;

    impl Connection for NamedErrorConnection {
        fn call(
            &self,
            _request: &Message,
            _timeout_usec: u64,
        ) -> std::result::Result<Message, CallError> {
            Err(CallError::Named {
                name: "org.example.Error".to_owned(),
                message: "bad arg".to_owned(),
            })
        }

        fn send(&self, _message: &Message) -> std::result::Result<(), i32> {
            Ok(())
        }
    }

    /// Answers every call with a reply echoing the request content.
    struct EchoConnection {
        sent: Mutex<u32>,
    }

    impl EchoConnection {
        fn new() -> Self {
            EchoConnection {
                sent: Mutex::new(0),
            }
        }
    }

    impl Connection for EchoConnection {
        fn call(
            &self,
            request: &Message,
            _timeout_usec: u64,
        ) -> std::result::Result<Message, CallError> {
            let mut reply = request.create_reply().map_err(|_| CallError::Code(codes::EINVAL))?;
            let mut probe = request.clone();
            probe.rewind(true).map_err(|_| CallError::Code(codes::EBADMSG))?;
            probe
                .copy_to(&mut reply, true)
                .map_err(|_| CallError::Code(codes::EBADMSG))?;
            reply.seal().map_err(|_| CallError::Code(codes::EBADMSG))?;
            Ok(reply)
        }

        fn send(&self, _message: &Message) -> std::result::Result<(), i32> {
            *self.sent.lock().expect("lock poisoned") += 1;
            Ok(())
        }
    }

    #[test]
    fn scenario_named_error_surfaces_verbatim() -> Result<()> {
        let conn: Arc<dyn Connection> = Arc::new(NamedErrorConnection);
        let mut call = Message::new_method_call(
            conn,
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Frobnicate",
        )?;
        call.write_i32(13)?;
        assert_eq!(
            call.send().unwrap_err(),
            Error::Call {
                name: "org.example.Error".to_owned(),
                message: "bad arg".to_owned(),
            }
        );
        Ok(())
    }

    #[test]
    fn scenario_call_reply_round_trip() -> Result<()> {
        let conn = Arc::new(EchoConnection::new());
        let mut call = Message::new_method_call(
            conn.clone(),
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Echo",
        )?;
        call.write_i32(42)?.write_str("hi")?;

        let mut reply = call.send()?;
        assert_eq!(reply.kind(), Some(MessageKind::MethodReply));
        let mut number = 0i32;
        let mut text = String::new();
        reply.read_i32(&mut number)?.read_str(&mut text)?;
        assert_eq!((number, text.as_str()), (42, "hi"));
        Ok(())
    }

    #[test]
    fn scenario_reply_send_is_void() -> Result<()> {
        let conn = Arc::new(EchoConnection::new());
        let mut call = Message::new_method_call(
            conn.clone(),
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Set",
        )?;
        call.seal()?;

        let mut reply = call.create_reply()?;
        assert_eq!(reply.kind(), Some(MessageKind::MethodReply));
        reply.write_u32(7)?;
        let done = reply.send()?;
        assert!(!done.is_valid());
        assert_eq!(*conn.sent.lock().expect("lock poisoned"), 1);
        Ok(())
    }

    #[test]
    fn signal_send_is_void() -> Result<()> {
        let conn = Arc::new(EchoConnection::new());
        let mut signal = Message::new_signal(
            conn.clone(),
            "/org/example",
            "org.example.Iface",
            "Changed",
        )?;
        signal.write_str("new state")?;
        let done = signal.send()?;
        assert!(!done.is_valid());
        assert_eq!(*conn.sent.lock().expect("lock poisoned"), 1);
        Ok(())
    }

    #[test]
    fn create_reply_requires_a_call() -> Result<()> {
        let conn: Arc<dyn Connection> = Arc::new(EchoConnection::new());
        let signal =
            Message::new_signal(conn, "/org/example", "org.example.Iface", "Changed")?;
        assert_eq!(
            signal.create_reply().unwrap_err(),
            Error::Transport {
                context: "Failed to create method reply",
                code: codes::EINVAL,
            }
        );
        Ok(())
    }

    #[test]
    fn create_reply_requires_a_sealed_call() -> Result<()> {
        let conn: Arc<dyn Connection> = Arc::new(EchoConnection::new());
        let mut call = Message::new_method_call(
            conn,
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Get",
        )?;
        // Before sealing there is no delivery cookie to reply to.
        assert_eq!(
            call.create_reply().unwrap_err(),
            Error::Transport {
                context: "Failed to create method reply",
                code: codes::EPERM,
            }
        );
        call.seal()?;
        assert_eq!(call.create_reply()?.kind(), Some(MessageKind::MethodReply));
        Ok(())
    }

    #[test]
    fn header_accessors() -> Result<()> {
        let conn: Arc<dyn Connection> = Arc::new(EchoConnection::new());
        let call = Message::new_method_call(
            conn,
            "org.example",
            "/org/example",
            "org.example.Iface",
            "Get",
        )?;
        assert_eq!(
            call.get_interface_name()?,
            Some("org.example.Iface".to_owned())
        );
        assert_eq!(call.get_member_name()?, Some("Get".to_owned()));

        let plain = create_plain_message()?;
        assert_eq!(plain.get_interface_name()?, None);
        Ok(())
    }

    #[test]
    fn invalid_object_path_is_refused() -> Result<()> {
        let mut msg = create_plain_message()?;
        assert_eq!(
            msg.write_object_path(&ObjectPath("not/a/path".to_owned()))
                .unwrap_err(),
            Error::Serialization {
                context: "Failed to serialize an object path value",
                code: codes::EINVAL,
            }
        );
        let conn: Arc<dyn Connection> = Arc::new(EchoConnection::new());
        assert!(Message::new_method_call(conn, "org.example", "bad", "i", "m").is_err());
        Ok(())
    }
}
