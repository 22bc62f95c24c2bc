//! Typed per-document value columns
//!
//! Every column variant shares one contract:
//! - `writer.add(docnum, value)` in non-decreasing docnum order, gaps are
//!   filled with the column default
//! - `writer.finish(doc_count)` writes trailing defaults plus the variant's
//!   trailing metadata and a common footer (`doc_count`, type tag, version)
//! - `reader.get(docnum)` returns a value for every docnum in
//!   `[0, doc_count)`, written or default

mod bits;
mod compressed;
mod fixed;
mod list;
mod numeric;
mod refbytes;
mod structs;
mod varbytes;

use std::cmp::Reverse;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FathomError, Result};

pub use bits::{BitColumn, BitReader};
pub use compressed::{CompressedBlockColumn, CompressedColumn};
pub use fixed::FixedBytesColumn;
pub use list::ListColumn;
pub use numeric::{NumericColumn, NumericType};
pub use refbytes::{RefBytesColumn, MAX_UNIQUE_VALUES};
pub use structs::{StructColumn, StructMember};
pub use varbytes::{VarBytesColumn, VarBytesReader};

const FOOTER_VERSION: u8 = 1;
const FOOTER_LEN: usize = 6;

/// A column value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Tuple(Vec<Value>),
    List(Vec<Value>),
}

impl Value {
    pub fn text(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Order-preserving byte key for this value
    ///
    /// Tuple and list items are each escaped (`00` becomes `00 FF`) and
    /// closed with `00 00`, so item boundaries survive concatenation and a
    /// shorter prefix sorts first.
    pub fn sort_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Int(v) => ((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec(),
            Value::UInt(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => float_key(v.to_bits()).to_be_bytes().to_vec(),
            Value::Bool(b) => vec![*b as u8],
            Value::Tuple(items) | Value::List(items) => {
                let mut out = Vec::new();
                for item in items {
                    for byte in item.sort_bytes() {
                        out.push(byte);
                        if byte == 0 {
                            out.push(0xFF);
                        }
                    }
                    out.extend_from_slice(&[0, 0]);
                }
                out
            }
        }
    }

    pub(crate) fn expect_bytes(&self, column: &str) -> Result<&[u8]> {
        self.as_bytes().ok_or_else(|| {
            FathomError::invalid_value(format!("{} column expects bytes, got {:?}", column, self))
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Map IEEE-754 bits onto an unsigned key with the same total order.
pub(crate) fn float_key(bits: u64) -> u64 {
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Key used to order documents by a column value
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Key(Vec<u8>),
    Reversed(Reverse<Vec<u8>>),
}

impl SortKey {
    pub fn new(bytes: Vec<u8>, reverse: bool) -> Self {
        if reverse {
            SortKey::Reversed(Reverse(bytes))
        } else {
            SortKey::Key(bytes)
        }
    }
}

/// Non-fatal conditions recorded while writing a column
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnWarning {
    /// The dedup table was full; `dropped` values were stored as the default
    RefTableOverflow { dropped: u64 },
}

/// Bytes and warnings produced by a finished column writer
#[derive(Debug)]
pub struct FinishedColumn {
    pub data: Vec<u8>,
    pub warnings: Vec<ColumnWarning>,
}

pub trait ColumnWriter: Send {
    /// Add the value for `docnum`. Documents skipped since the last call get
    /// the default.
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()>;

    /// Flush trailing defaults up to `doc_count` and the column trailer.
    fn finish(self: Box<Self>, doc_count: u32) -> Result<FinishedColumn>;
}

pub trait ColumnReader: Send + Sync {
    fn doc_count(&self) -> u32;

    fn get(&self, docnum: u32) -> Result<Value>;

    fn sort_key(&self, docnum: u32, reverse: bool) -> Result<SortKey> {
        Ok(SortKey::new(self.get(docnum)?.sort_bytes(), reverse))
    }

    /// A fresh iterator over every value in docnum order
    fn iter(&self) -> Box<dyn Iterator<Item = Result<Value>> + '_> {
        Box::new((0..self.doc_count()).map(move |docnum| self.get(docnum)))
    }
}

/// Column type declared for a field
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    VarBytes(VarBytesColumn),
    FixedBytes(FixedBytesColumn),
    RefBytes(RefBytesColumn),
    Numeric(NumericColumn),
    Bit(BitColumn),
    Compressed(CompressedColumn),
    CompressedBlock(CompressedBlockColumn),
    Struct(StructColumn),
    List(ListColumn),
}

impl Column {
    pub fn writer(&self) -> Box<dyn ColumnWriter> {
        match self {
            Column::VarBytes(c) => Box::new(c.writer()),
            Column::FixedBytes(c) => Box::new(c.writer()),
            Column::RefBytes(c) => Box::new(c.writer()),
            Column::Numeric(c) => Box::new(c.writer()),
            Column::Bit(c) => Box::new(c.writer()),
            Column::Compressed(c) => Box::new(c.writer()),
            Column::CompressedBlock(c) => Box::new(c.writer()),
            Column::Struct(c) => Box::new(c.writer()),
            Column::List(c) => Box::new(c.writer()),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<Box<dyn ColumnReader>> {
        Ok(match self {
            Column::VarBytes(c) => Box::new(c.reader(data)?),
            Column::FixedBytes(c) => Box::new(c.reader(data)?),
            Column::RefBytes(c) => Box::new(c.reader(data)?),
            Column::Numeric(c) => Box::new(c.reader(data)?),
            Column::Bit(c) => Box::new(c.reader(data)?),
            Column::Compressed(c) => Box::new(c.reader(data)?),
            Column::CompressedBlock(c) => Box::new(c.reader(data)?),
            Column::Struct(c) => Box::new(c.reader(data)?),
            Column::List(c) => Box::new(c.reader(data)?),
        })
    }

    pub fn default_value(&self) -> Value {
        match self {
            Column::VarBytes(c) => Value::Bytes(c.default.clone()),
            Column::FixedBytes(c) => Value::Bytes(c.default().to_vec()),
            Column::RefBytes(c) => Value::Bytes(c.default.clone()),
            Column::Numeric(c) => c.default_value(),
            Column::Bit(_) => Value::Bool(false),
            Column::Compressed(c) => Value::Bytes(c.default.clone()),
            Column::CompressedBlock(c) => Value::Bytes(c.default.clone()),
            Column::Struct(c) => c.default_value(),
            Column::List(_) => Value::List(Vec::new()),
        }
    }

    pub fn type_tag(&self) -> u8 {
        match self {
            Column::VarBytes(_) => 1,
            Column::FixedBytes(_) => 2,
            Column::RefBytes(_) => 3,
            Column::Numeric(_) => 4,
            Column::Bit(_) => 5,
            Column::Compressed(_) => 6,
            Column::CompressedBlock(_) => 7,
            Column::Struct(_) => 8,
            Column::List(_) => 9,
        }
    }

    /// Append one value as a list element
    pub(crate) fn encode_element(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Column::FixedBytes(c) => out.extend_from_slice(c.check(value)?),
            Column::Numeric(c) => c.kind.encode(value, out)?,
            Column::Struct(c) => c.encode(value, out)?,
            Column::Bit(_) => match value {
                Value::Bool(b) => out.push(*b as u8),
                other => {
                    return Err(FathomError::invalid_value(format!(
                        "bit column expects a bool, got {:?}",
                        other
                    )))
                }
            },
            Column::List(c) => c.encode_list(value, out)?,
            Column::VarBytes(_)
            | Column::RefBytes(_)
            | Column::Compressed(_)
            | Column::CompressedBlock(_) => {
                let bytes = value.expect_bytes("list element")?;
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Read one list element written by `encode_element`
    pub(crate) fn decode_element(&self, input: &mut &[u8]) -> Result<Value> {
        match self {
            Column::FixedBytes(c) => Ok(Value::Bytes(take(input, c.length)?.to_vec())),
            Column::Numeric(c) => c.kind.decode(take(input, c.kind.width())?),
            Column::Struct(c) => c.decode(take(input, c.width())?),
            Column::Bit(_) => Ok(Value::Bool(take(input, 1)?[0] != 0)),
            Column::List(c) => c.decode_list(input),
            Column::VarBytes(_)
            | Column::RefBytes(_)
            | Column::Compressed(_)
            | Column::CompressedBlock(_) => {
                let len = input
                    .read_u32::<BigEndian>()
                    .map_err(|e| FathomError::truncated("list element length", e))?;
                Ok(Value::Bytes(take(input, len as usize)?.to_vec()))
            }
        }
    }
}

/// Tracks the next docnum a writer expects and reports gaps to fill.
#[derive(Debug, Default)]
pub(crate) struct DocCursor {
    count: u32,
}

impl DocCursor {
    /// Number of default values to emit before storing `docnum`.
    pub(crate) fn advance(&mut self, docnum: u32) -> Result<u32> {
        if docnum < self.count {
            return Err(FathomError::state(format!(
                "column docnum {} added after docnum {}",
                docnum,
                self.count - 1
            )));
        }
        let gap = docnum - self.count;
        self.count = docnum + 1;
        Ok(gap)
    }

    /// Number of trailing defaults needed to reach `doc_count`.
    pub(crate) fn finish(&mut self, doc_count: u32) -> Result<u32> {
        if doc_count < self.count {
            return Err(FathomError::state(format!(
                "column finished with doc count {} but holds {} documents",
                doc_count, self.count
            )));
        }
        let gap = doc_count - self.count;
        self.count = doc_count;
        Ok(gap)
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}

pub(crate) fn write_footer(out: &mut Vec<u8>, tag: u8, doc_count: u32) {
    out.extend_from_slice(&doc_count.to_be_bytes());
    out.push(tag);
    out.push(FOOTER_VERSION);
}

/// Strip and validate the common footer; returns the body and doc count.
pub(crate) fn read_footer(data: &Bytes, tag: u8) -> Result<(Bytes, u32)> {
    if data.len() < FOOTER_LEN {
        return Err(FathomError::format("column file shorter than its footer"));
    }
    let footer = &data[data.len() - FOOTER_LEN..];
    if footer[5] != FOOTER_VERSION {
        return Err(FathomError::format(format!(
            "unknown column footer version {}",
            footer[5]
        )));
    }
    if footer[4] != tag {
        return Err(FathomError::format(format!(
            "column type tag {} does not match declared type {}",
            footer[4], tag
        )));
    }
    let doc_count = u32::from_be_bytes([footer[0], footer[1], footer[2], footer[3]]);
    Ok((data.slice(..data.len() - FOOTER_LEN), doc_count))
}

pub(crate) fn check_docnum(docnum: u32, doc_count: u32) -> Result<()> {
    if docnum >= doc_count {
        return Err(FathomError::DocumentOutOfRange { docnum, doc_count });
    }
    Ok(())
}

/// Split `len` bytes off the front of `input`.
pub(crate) fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(FathomError::format(format!(
            "expected {} bytes, {} remain",
            len,
            input.len()
        )));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

/// Read a big-endian unsigned integer of `width` bytes (1, 2, 4 or 8).
pub(crate) fn read_uint(input: &mut &[u8], width: usize) -> Result<u64> {
    let value = match width {
        1 => input.read_u8().map(u64::from),
        2 => input.read_u16::<BigEndian>().map(u64::from),
        4 => input.read_u32::<BigEndian>().map(u64::from),
        8 => input.read_u64::<BigEndian>(),
        _ => return Err(FathomError::format(format!("bad integer width {}", width))),
    };
    value.map_err(|e| FathomError::truncated("packed integer", e))
}

pub(crate) fn write_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

/// Smallest of 1, 2 or 4 bytes able to hold `max`.
pub(crate) fn uint_width(max: u64) -> usize {
    if max <= u8::MAX as u64 {
        1
    } else if max <= u16::MAX as u64 {
        2
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_cursor_gaps() {
        let mut cursor = DocCursor::default();
        assert_eq!(cursor.advance(0).unwrap(), 0);
        assert_eq!(cursor.advance(3).unwrap(), 2);
        assert!(cursor.advance(3).is_err());
        assert_eq!(cursor.finish(10).unwrap(), 6);
        assert!(cursor.finish(5).is_err());
    }

    #[test]
    fn test_footer_tag_mismatch() {
        let mut out = b"body".to_vec();
        write_footer(&mut out, 4, 12);
        let data = Bytes::from(out);

        let (body, doc_count) = read_footer(&data, 4).unwrap();
        assert_eq!(&body[..], b"body");
        assert_eq!(doc_count, 12);

        assert!(matches!(read_footer(&data, 1), Err(FathomError::Format(_))));
        assert!(read_footer(&Bytes::from_static(b"xx"), 4).is_err());
    }

    #[test]
    fn test_value_sort_bytes_order() {
        assert!(Value::Int(-5).sort_bytes() < Value::Int(3).sort_bytes());
        assert!(Value::Float(-1.5).sort_bytes() < Value::Float(0.25).sort_bytes());
        assert!(Value::Float(2.0).sort_bytes() < Value::Float(10.0).sort_bytes());
        assert!(Value::text("abc").sort_bytes() < Value::text("abd").sort_bytes());
    }

    #[test]
    fn test_composite_sort_bytes_keep_item_boundaries() {
        let split = |a: &str, b: &str| Value::Tuple(vec![Value::text(a), Value::text(b)]);
        assert_ne!(split("ab", "c").sort_bytes(), split("a", "bc").sort_bytes());
        assert!(split("a", "zz").sort_bytes() < split("ab", "c").sort_bytes());
        assert!(split("a", "b").sort_bytes() < split("a", "ba").sort_bytes());

        let list = |items: &[&[u8]]| {
            Value::List(items.iter().map(|b| Value::Bytes(b.to_vec())).collect())
        };
        assert_ne!(list(&[b"\0"]).sort_bytes(), list(&[b"", b""]).sort_bytes());
        assert_ne!(list(&[]).sort_bytes(), list(&[b""]).sort_bytes());
        assert!(list(&[b"a"]).sort_bytes() < list(&[b"a", b""]).sort_bytes());
        assert!(list(&[b"a\0"]).sort_bytes() < list(&[b"a\x01"]).sort_bytes());
        assert!(
            Value::List(vec![Value::Int(-1)]).sort_bytes()
                < Value::List(vec![Value::Int(0)]).sort_bytes()
        );
    }

    #[test]
    fn test_reversed_sort_key() {
        let a = SortKey::new(b"a".to_vec(), true);
        let ab = SortKey::new(b"ab".to_vec(), true);
        assert!(ab < a);
        assert!(SortKey::new(b"a".to_vec(), false) < SortKey::new(b"ab".to_vec(), false));
    }

    #[test]
    fn test_uint_roundtrip_widths() {
        let mut out = Vec::new();
        write_uint(&mut out, 200, 1);
        write_uint(&mut out, 40_000, 2);
        write_uint(&mut out, 70_000, 4);
        let mut input = &out[..];
        assert_eq!(read_uint(&mut input, 1).unwrap(), 200);
        assert_eq!(read_uint(&mut input, 2).unwrap(), 40_000);
        assert_eq!(read_uint(&mut input, 4).unwrap(), 70_000);
        assert_eq!(uint_width(300), 2);
    }
}
