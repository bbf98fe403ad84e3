//! The wire codec engine behind a message handle: marshaled bytes, the
//! top-level signature, header fields, and the write/read cursors with
//! their container nesting state.
//!
//! Operations here report failure as bare errno-style codes; the
//! `message` module attaches the human-readable context.

use crate::align::align;
use crate::error::codes;
use crate::primitives::DbusBasic;
use crate::signature;
use crate::transport::Connection;
use crate::types::{ObjectPath, Signature};

use byteorder::{ByteOrder, LE};
use log::trace;

use std::sync::Arc;

pub(crate) type WireResult<T> = std::result::Result<T, i32>;

const MAX_ARRAY_LEN: usize = 1 << 26;

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ContainerKind {
    Array,
    Struct,
    DictEntry,
    Variant,
}

impl ContainerKind {
    /// The full signature of a container with the given contents.
    fn wrap(self, contents: &str) -> String {
        match self {
            ContainerKind::Array => format!("a{}", contents),
            ContainerKind::Struct => format!("({})", contents),
            ContainerKind::DictEntry => format!("{{{}}}", contents),
            ContainerKind::Variant => "v".to_owned(),
        }
    }

    fn contents_ok(self, contents: &str) -> bool {
        match self {
            ContainerKind::Array => signature::is_array_element(contents),
            ContainerKind::Struct => !contents.is_empty() && signature::is_valid(contents),
            ContainerKind::DictEntry => signature::is_valid_dict_entry(contents),
            ContainerKind::Variant => signature::is_single(contents),
        }
    }
}

enum WriteFrame {
    Array {
        elem: String,
        len_pos: usize,
        start: usize,
    },
    Struct {
        contents: String,
        sig_pos: usize,
    },
    DictEntry {
        contents: String,
        sig_pos: usize,
    },
    Variant {
        contents: String,
        written: bool,
    },
}

#[derive(Clone, Copy, PartialEq)]
enum ScopeKind {
    Root,
    Array,
    Struct,
    DictEntry,
    Variant,
}

struct ReadScope {
    kind: ScopeKind,
    /// Contents signature of this scope. For arrays it describes one
    /// element and repeats; for the others it is consumed sequentially.
    sig: String,
    sig_pos: usize,
    /// Byte position of the first element, for partial rewind.
    start: usize,
    /// Byte position one past the last element; arrays only.
    end: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Header {
    pub destination: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub cookie: Option<u64>,
    pub reply_cookie: Option<u64>,
}

pub(crate) struct MessageBody {
    pub header: Header,
    pub conn: Option<Arc<dyn Connection>>,
    data: Vec<u8>,
    signature: String,
    sealed: bool,
    write: Vec<WriteFrame>,
    read: Vec<ReadScope>,
    pos: usize,
}

impl MessageBody {
    pub(crate) fn new(conn: Option<Arc<dyn Connection>>, header: Header) -> Self {
        MessageBody {
            header,
            conn,
            data: Vec::new(),
            signature: String::new(),
            sealed: false,
            write: Vec::new(),
            read: Vec::new(),
            pos: 0,
        }
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.signature.is_empty()
    }

    // --- write side ---

    fn pad_write(&mut self, alignment: usize) {
        let new_len = align(self.data.len(), alignment);
        self.data.resize(new_len, 0);
    }

    /// Checks that a value with signature `sig` is legal at the current
    /// write position and advances the enclosing frame's expectation.
    /// At the top level the message signature grows instead.
    fn accept_write(&mut self, sig: &str) -> WireResult<()> {
        match self.write.last_mut() {
            Some(WriteFrame::Array { elem, .. }) => {
                if sig != elem {
                    return Err(codes::ENXIO);
                }
            }
            Some(WriteFrame::Struct { contents, sig_pos })
            | Some(WriteFrame::DictEntry { contents, sig_pos }) => {
                match signature::split_first(&contents[*sig_pos..]) {
                    Some((next, _)) if next == sig => *sig_pos += sig.len(),
                    _ => return Err(codes::ENXIO),
                }
            }
            Some(WriteFrame::Variant { contents, written }) => {
                if *written || sig != contents {
                    return Err(codes::ENXIO);
                }
                *written = true;
            }
            None => {
                if self.signature.len() + sig.len() > signature::MAX_SIGNATURE_LEN {
                    return Err(codes::EINVAL);
                }
                self.signature.push_str(sig);
            }
        }
        Ok(())
    }

    pub(crate) fn append_basic<T: DbusBasic>(&mut self, item: &T) -> WireResult<()> {
        if self.sealed {
            return Err(codes::EPERM);
        }
        if !item.validate() {
            return Err(codes::EINVAL);
        }
        let sig = (T::code() as char).to_string();
        self.accept_write(&sig)?;
        self.pad_write(T::alignment());
        item.encode(&mut self.data);
        Ok(())
    }

    pub(crate) fn open_container(&mut self, kind: ContainerKind, contents: &str) -> WireResult<()> {
        if self.sealed {
            return Err(codes::EPERM);
        }
        if !kind.contents_ok(contents) {
            return Err(codes::EINVAL);
        }
        if kind == ContainerKind::DictEntry
            && !matches!(self.write.last(), Some(WriteFrame::Array { .. }))
        {
            return Err(codes::EINVAL);
        }
        let full = kind.wrap(contents);
        self.accept_write(&full)?;
        match kind {
            ContainerKind::Array => {
                self.pad_write(4);
                let len_pos = self.data.len();
                self.data.extend_from_slice(&[0u8; 4]);
                self.pad_write(signature::alignment_of(contents));
                let start = self.data.len();
                self.write.push(WriteFrame::Array {
                    elem: contents.to_owned(),
                    len_pos,
                    start,
                });
            }
            ContainerKind::Struct => {
                self.pad_write(8);
                self.write.push(WriteFrame::Struct {
                    contents: contents.to_owned(),
                    sig_pos: 0,
                });
            }
            ContainerKind::DictEntry => {
                self.pad_write(8);
                self.write.push(WriteFrame::DictEntry {
                    contents: contents.to_owned(),
                    sig_pos: 0,
                });
            }
            ContainerKind::Variant => {
                Signature(contents.to_owned()).encode(&mut self.data);
                self.write.push(WriteFrame::Variant {
                    contents: contents.to_owned(),
                    written: false,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn close_container(&mut self) -> WireResult<()> {
        if self.sealed {
            return Err(codes::EPERM);
        }
        match self.write.pop() {
            None => Err(codes::EINVAL),
            Some(WriteFrame::Array { len_pos, start, .. }) => {
                let len = self.data.len() - start;
                if len > MAX_ARRAY_LEN {
                    return Err(codes::EINVAL);
                }
                LE::write_u32(&mut self.data[len_pos..len_pos + 4], len as u32);
                Ok(())
            }
            Some(WriteFrame::Struct { contents, sig_pos })
            | Some(WriteFrame::DictEntry { contents, sig_pos }) => {
                if sig_pos != contents.len() {
                    return Err(codes::EINVAL);
                }
                Ok(())
            }
            Some(WriteFrame::Variant { written, .. }) => {
                if !written {
                    return Err(codes::EINVAL);
                }
                Ok(())
            }
        }
    }

    pub(crate) fn seal(&mut self, cookie: u64) -> WireResult<()> {
        if self.sealed {
            return Err(codes::EPERM);
        }
        if !self.write.is_empty() {
            return Err(codes::EBADMSG);
        }
        trace!("sealing message with signature '{}'", self.signature);
        self.sealed = true;
        self.header.cookie = Some(cookie);
        Ok(())
    }

    // --- read side ---

    fn ensure_read(&mut self) -> WireResult<()> {
        if !self.sealed {
            return Err(codes::EPERM);
        }
        if self.read.is_empty() {
            self.pos = 0;
            self.read.push(ReadScope {
                kind: ScopeKind::Root,
                sig: self.signature.clone(),
                sig_pos: 0,
                start: 0,
                end: None,
            });
        }
        Ok(())
    }

    /// Upper byte bound of the innermost array scope, or of the body.
    fn scope_limit(&self) -> usize {
        self.read
            .iter()
            .rev()
            .find_map(|scope| scope.end)
            .unwrap_or_else(|| self.data.len())
    }

    /// Signature of the next element in the current scope, or `None`
    /// at the structural end of the scope.
    fn next_expected(&self) -> Option<String> {
        let scope = self.read.last()?;
        match scope.kind {
            ScopeKind::Array => match scope.end {
                Some(end) if self.pos >= end => None,
                _ => Some(scope.sig.clone()),
            },
            _ => signature::split_first(&scope.sig[scope.sig_pos..])
                .map(|(first, _)| first.to_owned()),
        }
    }

    fn advance_sig(&mut self, n: usize) {
        if let Some(scope) = self.read.last_mut() {
            if scope.kind != ScopeKind::Array {
                scope.sig_pos += n;
            }
        }
    }

    fn pad_read(&mut self, alignment: usize) -> WireResult<()> {
        let target = align(self.pos, alignment);
        if target > self.scope_limit() {
            return Err(codes::EBADMSG);
        }
        if self.data[self.pos..target].iter().any(|b| *b != 0) {
            return Err(codes::EBADMSG);
        }
        self.pos = target;
        Ok(())
    }

    /// Ok(None) is the structural end of the current scope, never an
    /// error. Type mismatch and malformed data are hard errors.
    pub(crate) fn read_basic<T: DbusBasic>(&mut self) -> WireResult<Option<T>> {
        self.ensure_read()?;
        let expected = match self.next_expected() {
            None => return Ok(None),
            Some(expected) => expected,
        };
        if expected.as_bytes()[0] != T::code() {
            return Err(codes::ENXIO);
        }
        self.pad_read(T::alignment())?;
        let limit = self.scope_limit();
        let (value, end) = T::decode(&self.data[..limit], self.pos).ok_or(codes::EBADMSG)?;
        trace!("read basic '{}' at {}..{}", T::code() as char, self.pos, end);
        self.pos = end;
        self.advance_sig(1);
        Ok(Some(value))
    }

    /// Ok(false) means the current scope holds no further element of
    /// this shape, i.e. the structural end used to detect exhausted
    /// arrays and dictionaries.
    pub(crate) fn enter_container(
        &mut self,
        kind: ContainerKind,
        contents: &str,
    ) -> WireResult<bool> {
        self.ensure_read()?;
        if !kind.contents_ok(contents) {
            return Err(codes::EINVAL);
        }
        let expected = match self.next_expected() {
            None => return Ok(false),
            Some(expected) => expected,
        };
        match kind {
            ContainerKind::Variant => {
                if expected != "v" {
                    return Err(codes::ENXIO);
                }
                let limit = self.scope_limit();
                let (wire_sig, end) =
                    Signature::decode(&self.data[..limit], self.pos).ok_or(codes::EBADMSG)?;
                if wire_sig.0 != contents {
                    return Err(codes::ENXIO);
                }
                self.pos = end;
                self.advance_sig(1);
                self.read.push(ReadScope {
                    kind: ScopeKind::Variant,
                    sig: contents.to_owned(),
                    sig_pos: 0,
                    start: self.pos,
                    end: None,
                });
            }
            ContainerKind::Array => {
                let full = kind.wrap(contents);
                if expected != full {
                    return Err(codes::ENXIO);
                }
                self.pad_read(4)?;
                let limit = self.scope_limit();
                let (len, after_len) =
                    u32::decode(&self.data[..limit], self.pos).ok_or(codes::EBADMSG)?;
                self.pos = after_len;
                self.pad_read(signature::alignment_of(contents))?;
                let end = self.pos + len as usize;
                if len as usize > MAX_ARRAY_LEN || end > self.scope_limit() {
                    return Err(codes::EBADMSG);
                }
                self.advance_sig(full.len());
                self.read.push(ReadScope {
                    kind: ScopeKind::Array,
                    sig: contents.to_owned(),
                    sig_pos: 0,
                    start: self.pos,
                    end: Some(end),
                });
            }
            ContainerKind::Struct | ContainerKind::DictEntry => {
                let full = kind.wrap(contents);
                if expected != full {
                    return Err(codes::ENXIO);
                }
                self.pad_read(8)?;
                self.advance_sig(full.len());
                let scope_kind = if kind == ContainerKind::Struct {
                    ScopeKind::Struct
                } else {
                    ScopeKind::DictEntry
                };
                self.read.push(ReadScope {
                    kind: scope_kind,
                    sig: contents.to_owned(),
                    sig_pos: 0,
                    start: self.pos,
                    end: None,
                });
            }
        }
        Ok(true)
    }

    pub(crate) fn exit_container(&mut self) -> WireResult<()> {
        self.ensure_read()?;
        match self.read.last() {
            None | Some(ReadScope {
                kind: ScopeKind::Root,
                ..
            }) => Err(codes::EINVAL),
            Some(scope) => {
                let consumed = match scope.end {
                    Some(end) => self.pos == end,
                    None => scope.sig_pos == scope.sig.len(),
                };
                if !consumed {
                    return Err(codes::EBUSY);
                }
                self.read.pop();
                Ok(())
            }
        }
    }

    /// Type code and contents signature of the next element, without
    /// advancing the cursor. `Ok(None)` at structural end. Structs
    /// report as 'r', dictionary entries as 'e'; variant contents are
    /// taken from the wire.
    pub(crate) fn peek(&mut self) -> WireResult<Option<(char, Option<String>)>> {
        self.ensure_read()?;
        let expected = match self.next_expected() {
            None => return Ok(None),
            Some(expected) => expected,
        };
        let peeked = match expected.as_bytes()[0] {
            b'a' => ('a', Some(expected[1..].to_owned())),
            b'(' => ('r', Some(expected[1..expected.len() - 1].to_owned())),
            b'{' => ('e', Some(expected[1..expected.len() - 1].to_owned())),
            b'v' => {
                let limit = self.scope_limit();
                let (wire_sig, _) =
                    Signature::decode(&self.data[..limit], self.pos).ok_or(codes::EBADMSG)?;
                ('v', Some(wire_sig.0))
            }
            code => (code as char, None),
        };
        Ok(Some(peeked))
    }

    pub(crate) fn rewind(&mut self, complete: bool) -> WireResult<()> {
        if !self.sealed {
            return Err(codes::EPERM);
        }
        if complete {
            self.read.clear();
            self.pos = 0;
        } else if let Some(scope) = self.read.last_mut() {
            self.pos = scope.start;
            scope.sig_pos = 0;
        } else {
            self.pos = 0;
        }
        Ok(())
    }

    /// Copies remaining unread content into `dest`'s write cursor.
    /// With `complete` false only one single complete value is copied.
    pub(crate) fn copy_to(&mut self, dest: &mut MessageBody, complete: bool) -> WireResult<()> {
        self.ensure_read()?;
        loop {
            match self.peek()? {
                None => break,
                Some((code, contents)) => self.copy_value(dest, code, contents)?,
            }
            if !complete {
                break;
            }
        }
        Ok(())
    }

    fn copy_value(
        &mut self,
        dest: &mut MessageBody,
        code: char,
        contents: Option<String>,
    ) -> WireResult<()> {
        match code {
            'y' => self.copy_basic::<u8>(dest),
            'b' => self.copy_basic::<bool>(dest),
            'n' => self.copy_basic::<i16>(dest),
            'q' => self.copy_basic::<u16>(dest),
            'i' => self.copy_basic::<i32>(dest),
            'u' => self.copy_basic::<u32>(dest),
            'x' => self.copy_basic::<i64>(dest),
            't' => self.copy_basic::<u64>(dest),
            'd' => self.copy_basic::<f64>(dest),
            's' => self.copy_basic::<String>(dest),
            'o' => self.copy_basic::<ObjectPath>(dest),
            'g' => self.copy_basic::<Signature>(dest),
            'a' | 'r' | 'e' | 'v' => {
                let contents = contents.ok_or(codes::EBADMSG)?;
                let kind = match code {
                    'a' => ContainerKind::Array,
                    'r' => ContainerKind::Struct,
                    'e' => ContainerKind::DictEntry,
                    _ => ContainerKind::Variant,
                };
                if !self.enter_container(kind, &contents)? {
                    return Err(codes::EBADMSG);
                }
                dest.open_container(kind, &contents)?;
                loop {
                    match self.peek()? {
                        None => break,
                        Some((inner_code, inner_contents)) => {
                            self.copy_value(dest, inner_code, inner_contents)?
                        }
                    }
                }
                self.exit_container()?;
                dest.close_container()
            }
            _ => Err(codes::EBADMSG),
        }
    }

    fn copy_basic<T: DbusBasic>(&mut self, dest: &mut MessageBody) -> WireResult<()> {
        match self.read_basic::<T>()? {
            Some(value) => dest.append_basic(&value),
            None => Err(codes::EBADMSG),
        }
    }
}
