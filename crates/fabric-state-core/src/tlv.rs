//! Tag-ordered structured encoding.
//!
//! Structures are encoded as deterministic CBOR (RFC 8949 core deterministic
//! encoding): smallest-length integer heads, definite lengths only, no floats.
//!
//! - A top-level structure is a semantic tag (major type 6) naming the
//!   structure type, wrapping a map.
//! - Map keys are context tags and must appear in strictly ascending order.
//! - Arrays hold anonymous elements.
//!
//! The writer fills a caller-provided buffer and never allocates. The reader
//! borrows byte strings from its input and insists on the exact field order
//! the caller asks for, so a decoder written against it rejects reordered,
//! missing or surplus fields.

use crate::error::{FabricError, Result};

/// How an item is labelled within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Top-level structure type.
    Profile(u64),
    /// Field number within a structure.
    Context(u64),
    /// Array element.
    Anonymous,
}

mod major {
    pub const UINT: u8 = 0;
    pub const BYTES: u8 = 2;
    pub const ARRAY: u8 = 4;
    pub const MAP: u8 = 5;
    pub const TAG: u8 = 6;
    pub const SIMPLE: u8 = 7;
}

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;

/// Deepest container nesting either side accepts.
pub const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Structure,
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: ContainerKind,
    remaining: u64,
    last_field: Option<u64>,
}

impl Frame {
    const EMPTY: Frame = Frame { kind: ContainerKind::Array, remaining: 0, last_field: None };
}

/// Writes tag-ordered structures into a fixed buffer.
pub struct TagWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    stack: [Frame; MAX_DEPTH],
    depth: usize,
}

impl<'a> TagWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0, stack: [Frame::EMPTY; MAX_DEPTH], depth: 0 }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn put_uint(&mut self, tag: Tag, value: u64) -> Result<()> {
        self.begin_item(tag)?;
        self.write_head(major::UINT, value)
    }

    pub fn put_bool(&mut self, tag: Tag, value: bool) -> Result<()> {
        self.begin_item(tag)?;
        self.write_raw(&[if value { TRUE } else { FALSE }])
    }

    pub fn put_bytes(&mut self, tag: Tag, bytes: &[u8]) -> Result<()> {
        self.begin_item(tag)?;
        self.write_head(major::BYTES, bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Open a structure holding exactly `fields` fields.
    pub fn start_structure(&mut self, tag: Tag, fields: usize) -> Result<()> {
        self.begin_item(tag)?;
        self.write_head(major::MAP, fields as u64)?;
        self.push(ContainerKind::Structure, fields as u64)
    }

    /// Open an array holding exactly `elements` elements.
    pub fn start_array(&mut self, tag: Tag, elements: usize) -> Result<()> {
        self.begin_item(tag)?;
        self.write_head(major::ARRAY, elements as u64)?;
        self.push(ContainerKind::Array, elements as u64)
    }

    /// Close the innermost container; all declared items must have been written.
    pub fn end_container(&mut self) -> Result<()> {
        let frame = self.current().ok_or(FabricError::InvalidArgument)?;
        if frame.remaining != 0 {
            return Err(FabricError::InvalidArgument);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Finish writing and return the encoded length.
    pub fn finish(self) -> Result<usize> {
        if self.depth != 0 {
            return Err(FabricError::InvalidArgument);
        }
        Ok(self.len)
    }

    fn current(&self) -> Option<Frame> {
        self.depth.checked_sub(1).map(|i| self.stack[i])
    }

    fn push(&mut self, kind: ContainerKind, remaining: u64) -> Result<()> {
        if self.depth == MAX_DEPTH {
            return Err(FabricError::InvalidArgument);
        }
        self.stack[self.depth] = Frame { kind, remaining, last_field: None };
        self.depth += 1;
        Ok(())
    }

    /// Emit the label for the next item and account for it in its container.
    fn begin_item(&mut self, tag: Tag) -> Result<()> {
        if self.depth == 0 {
            return match tag {
                Tag::Profile(id) => self.write_head(major::TAG, id),
                Tag::Anonymous => Ok(()),
                Tag::Context(_) => Err(FabricError::InvalidArgument),
            };
        }

        let frame = &mut self.stack[self.depth - 1];
        if frame.remaining == 0 {
            return Err(FabricError::InvalidArgument);
        }
        match (frame.kind, tag) {
            (ContainerKind::Structure, Tag::Context(field)) => {
                if frame.last_field.map_or(false, |last| field <= last) {
                    return Err(FabricError::InvalidArgument);
                }
                frame.last_field = Some(field);
                frame.remaining -= 1;
                self.write_head(major::UINT, field)
            }
            (ContainerKind::Array, Tag::Anonymous) => {
                frame.remaining -= 1;
                Ok(())
            }
            _ => Err(FabricError::InvalidArgument),
        }
    }

    /// Write a head with the smallest argument encoding.
    fn write_head(&mut self, major: u8, n: u64) -> Result<()> {
        let mt = major << 5;
        if n < 24 {
            self.write_raw(&[mt | n as u8])
        } else if n <= 0xff {
            self.write_raw(&[mt | 24, n as u8])
        } else if n <= 0xffff {
            self.write_raw(&[mt | 25])?;
            self.write_raw(&(n as u16).to_be_bytes())
        } else if n <= 0xffff_ffff {
            self.write_raw(&[mt | 26])?;
            self.write_raw(&(n as u32).to_be_bytes())
        } else {
            self.write_raw(&[mt | 27])?;
            self.write_raw(&n.to_be_bytes())
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.len.checked_add(bytes.len()).ok_or(FabricError::BufferTooSmall)?;
        if end > self.buf.len() {
            return Err(FabricError::BufferTooSmall);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

/// Reads tag-ordered structures, enforcing the caller's field order.
pub struct TagReader<'a> {
    buf: &'a [u8],
    pos: usize,
    stack: [Frame; MAX_DEPTH],
    depth: usize,
}

fn decoding(msg: impl Into<String>) -> FabricError {
    FabricError::Decoding(msg.into())
}

impl<'a> TagReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, stack: [Frame::EMPTY; MAX_DEPTH], depth: 0 }
    }

    /// Read an unsigned integer that must fit in `T`.
    pub fn read_uint<T: TryFrom<u64>>(&mut self, tag: Tag) -> Result<T> {
        self.expect_item(tag)?;
        let value = self.read_typed_head(major::UINT, "unsigned integer")?;
        T::try_from(value).map_err(|_| decoding(format!("integer {} out of range", value)))
    }

    pub fn read_bool(&mut self, tag: Tag) -> Result<bool> {
        self.expect_item(tag)?;
        match self.take(1)?[0] {
            TRUE => Ok(true),
            FALSE => Ok(false),
            other => Err(decoding(format!("expected boolean, found 0x{:02x}", other))),
        }
    }

    /// Read a byte string, borrowed from the input.
    pub fn read_bytes(&mut self, tag: Tag) -> Result<&'a [u8]> {
        self.expect_item(tag)?;
        let len = self.read_typed_head(major::BYTES, "byte string")?;
        let len = usize::try_from(len).map_err(|_| decoding("byte string too long"))?;
        self.take(len)
    }

    /// Enter a structure; returns its field count.
    pub fn enter_structure(&mut self, tag: Tag) -> Result<usize> {
        self.expect_item(tag)?;
        let fields = self.read_typed_head(major::MAP, "structure")?;
        self.push(ContainerKind::Structure, fields)?;
        usize::try_from(fields).map_err(|_| decoding("structure too large"))
    }

    /// Enter an array; returns its element count.
    pub fn enter_array(&mut self, tag: Tag) -> Result<usize> {
        self.expect_item(tag)?;
        let elements = self.read_typed_head(major::ARRAY, "array")?;
        self.push(ContainerKind::Array, elements)?;
        usize::try_from(elements).map_err(|_| decoding("array too large"))
    }

    /// Items left in the innermost container.
    pub fn remaining(&self) -> u64 {
        self.depth.checked_sub(1).map_or(0, |i| self.stack[i].remaining)
    }

    /// Leave the innermost container, which must be fully consumed.
    pub fn exit_container(&mut self) -> Result<()> {
        let i = self.depth.checked_sub(1).ok_or_else(|| decoding("not in a container"))?;
        if self.stack[i].remaining != 0 {
            return Err(decoding(format!("{} trailing items", self.stack[i].remaining)));
        }
        self.depth = i;
        Ok(())
    }

    /// Verify the input has been consumed exactly.
    pub fn finish(self) -> Result<()> {
        if self.depth != 0 {
            return Err(decoding("unterminated container"));
        }
        if self.pos != self.buf.len() {
            return Err(decoding(format!("{} trailing bytes", self.buf.len() - self.pos)));
        }
        Ok(())
    }

    fn push(&mut self, kind: ContainerKind, remaining: u64) -> Result<()> {
        if self.depth == MAX_DEPTH {
            return Err(decoding("nesting too deep"));
        }
        self.stack[self.depth] = Frame { kind, remaining, last_field: None };
        self.depth += 1;
        Ok(())
    }

    /// Consume the label of the next item and check it is `tag`.
    fn expect_item(&mut self, tag: Tag) -> Result<()> {
        if self.depth == 0 {
            return match tag {
                Tag::Profile(id) => {
                    let found = self.read_typed_head(major::TAG, "structure tag")?;
                    if found != id {
                        return Err(decoding(format!("expected structure {}, found {}", id, found)));
                    }
                    Ok(())
                }
                Tag::Anonymous => Ok(()),
                Tag::Context(_) => Err(decoding("context tag outside a structure")),
            };
        }

        let i = self.depth - 1;
        let frame = self.stack[i];
        match (frame.kind, tag) {
            (ContainerKind::Structure, Tag::Context(field)) => {
                if frame.remaining == 0 {
                    return Err(decoding(format!("missing field {}", field)));
                }
                let found = self.read_typed_head(major::UINT, "field tag")?;
                if found != field {
                    return Err(decoding(format!("expected field {}, found {}", field, found)));
                }
                self.stack[i].remaining -= 1;
                Ok(())
            }
            (ContainerKind::Array, Tag::Anonymous) => {
                if frame.remaining == 0 {
                    return Err(decoding("array exhausted"));
                }
                self.stack[i].remaining -= 1;
                Ok(())
            }
            _ => Err(decoding("tag does not match container")),
        }
    }

    fn read_typed_head(&mut self, expected: u8, what: &str) -> Result<u64> {
        let (major, value) = self.read_head()?;
        if major != expected {
            return Err(decoding(format!("expected {}, found major type {}", what, major)));
        }
        Ok(value)
    }

    /// Read a head, rejecting indefinite lengths and non-minimal arguments.
    fn read_head(&mut self) -> Result<(u8, u64)> {
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;
        if major == major::SIMPLE {
            return Err(decoding(format!("unexpected simple value 0x{:02x}", initial)));
        }
        let (value, minimum) = match info {
            0..=23 => return Ok((major, info as u64)),
            24 => (self.take(1)?[0] as u64, 24),
            25 => (u16::from_be_bytes(self.take_array()?) as u64, 0x100),
            26 => (u32::from_be_bytes(self.take_array()?) as u64, 0x1_0000),
            27 => (u64::from_be_bytes(self.take_array()?), 0x1_0000_0000),
            _ => return Err(decoding("indefinite or reserved length")),
        };
        if value < minimum {
            return Err(decoding("non-canonical integer encoding"));
        }
        Ok((major, value))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| decoding("length overflow"))?;
        if end > self.buf.len() {
            return Err(decoding("unexpected end of input"));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: u64 = 0x5A5A;

    fn write_demo(buf: &mut [u8]) -> Result<usize> {
        let mut w = TagWriter::new(buf);
        w.start_structure(Tag::Profile(DEMO), 4)?;
        w.put_uint(Tag::Context(1), 500)?;
        w.put_bool(Tag::Context(2), true)?;
        w.start_array(Tag::Context(3), 2)?;
        w.put_uint(Tag::Anonymous, 7)?;
        w.put_uint(Tag::Anonymous, u64::MAX)?;
        w.end_container()?;
        w.put_bytes(Tag::Context(4), &[0xAA, 0xBB])?;
        w.end_container()?;
        w.finish()
    }

    #[test]
    fn test_writer_bytes() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let expected = hex::decode(concat!(
            "d95a5a", "a4", "011901f4", "02f5", "0382", "07", "1bffffffffffffffff", "0442aabb"
        ))
        .unwrap();
        assert_eq!(&buf[..len], &expected[..]);
    }

    #[test]
    fn test_writer_output_is_cbor() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let value: ciborium::value::Value = ciborium::from_reader(&buf[..len]).unwrap();
        match value {
            ciborium::value::Value::Tag(tag, inner) => {
                assert_eq!(tag, DEMO);
                assert!(matches!(*inner, ciborium::value::Value::Map(ref m) if m.len() == 4));
            }
            other => panic!("expected tag, got {:?}", other),
        }
    }

    #[test]
    fn test_reader_roundtrip() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();

        let mut r = TagReader::new(&buf[..len]);
        assert_eq!(r.enter_structure(Tag::Profile(DEMO)).unwrap(), 4);
        assert_eq!(r.read_uint::<u16>(Tag::Context(1)).unwrap(), 500);
        assert!(r.read_bool(Tag::Context(2)).unwrap());
        assert_eq!(r.enter_array(Tag::Context(3)).unwrap(), 2);
        assert_eq!(r.read_uint::<u8>(Tag::Anonymous).unwrap(), 7);
        assert_eq!(r.read_uint::<u64>(Tag::Anonymous).unwrap(), u64::MAX);
        r.exit_container().unwrap();
        assert_eq!(r.read_bytes(Tag::Context(4)).unwrap(), &[0xAA, 0xBB]);
        r.exit_container().unwrap();
        r.finish().unwrap();
    }

    #[test]
    fn test_writer_buffer_too_small() {
        let mut buf = [0u8; 10];
        assert_eq!(write_demo(&mut buf), Err(FabricError::BufferTooSmall));
    }

    #[test]
    fn test_writer_rejects_descending_tags() {
        let mut buf = [0u8; 16];
        let mut w = TagWriter::new(&mut buf);
        w.start_structure(Tag::Profile(DEMO), 2).unwrap();
        w.put_uint(Tag::Context(2), 1).unwrap();
        assert_eq!(w.put_uint(Tag::Context(1), 1), Err(FabricError::InvalidArgument));
    }

    #[test]
    fn test_writer_rejects_undeclared_field() {
        let mut buf = [0u8; 16];
        let mut w = TagWriter::new(&mut buf);
        w.start_structure(Tag::Profile(DEMO), 1).unwrap();
        w.put_uint(Tag::Context(1), 1).unwrap();
        assert_eq!(w.put_uint(Tag::Context(2), 1), Err(FabricError::InvalidArgument));
    }

    #[test]
    fn test_reader_rejects_wrong_field() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let mut r = TagReader::new(&buf[..len]);
        r.enter_structure(Tag::Profile(DEMO)).unwrap();
        assert!(matches!(r.read_uint::<u16>(Tag::Context(2)), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_out_of_range() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let mut r = TagReader::new(&buf[..len]);
        r.enter_structure(Tag::Profile(DEMO)).unwrap();
        assert!(matches!(r.read_uint::<u8>(Tag::Context(1)), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_trailing_fields() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let mut r = TagReader::new(&buf[..len]);
        r.enter_structure(Tag::Profile(DEMO)).unwrap();
        r.read_uint::<u16>(Tag::Context(1)).unwrap();
        assert!(matches!(r.exit_container(), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_trailing_bytes() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let mut r = TagReader::new(&buf[..len + 1]);
        r.enter_structure(Tag::Profile(DEMO)).unwrap();
        r.read_uint::<u16>(Tag::Context(1)).unwrap();
        r.read_bool(Tag::Context(2)).unwrap();
        r.enter_array(Tag::Context(3)).unwrap();
        r.read_uint::<u8>(Tag::Anonymous).unwrap();
        r.read_uint::<u64>(Tag::Anonymous).unwrap();
        r.exit_container().unwrap();
        r.read_bytes(Tag::Context(4)).unwrap();
        r.exit_container().unwrap();
        assert!(matches!(r.finish(), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_non_canonical_integer() {
        // 5 encoded with a one-byte argument
        let bytes = [0x18, 0x05];
        let mut r = TagReader::new(&bytes);
        assert!(matches!(r.read_uint::<u8>(Tag::Anonymous), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_indefinite_length() {
        let bytes = [0xbf, 0xff];
        let mut r = TagReader::new(&bytes);
        assert!(matches!(r.enter_structure(Tag::Anonymous), Err(FabricError::Decoding(_))));
    }

    #[test]
    fn test_reader_rejects_truncated_input() {
        let mut buf = [0u8; 64];
        let len = write_demo(&mut buf).unwrap();
        let mut r = TagReader::new(&buf[..len - 1]);
        r.enter_structure(Tag::Profile(DEMO)).unwrap();
        r.read_uint::<u16>(Tag::Context(1)).unwrap();
        r.read_bool(Tag::Context(2)).unwrap();
        r.enter_array(Tag::Context(3)).unwrap();
        r.read_uint::<u8>(Tag::Anonymous).unwrap();
        r.read_uint::<u64>(Tag::Anonymous).unwrap();
        r.exit_container().unwrap();
        assert!(matches!(r.read_bytes(Tag::Context(4)), Err(FabricError::Decoding(_))));
    }
}
