//! Fixed-width numeric column
//!
//! Values are packed big-endian at the width of the declared `NumericType`,
//! followed by a type byte. Sort keys are derived from the raw bytes without
//! decoding the value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    check_docnum, read_footer, write_footer, ColumnReader, ColumnWriter, DocCursor,
    FinishedColumn, SortKey, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl NumericType {
    pub fn width(&self) -> usize {
        match self {
            NumericType::I8 | NumericType::U8 => 1,
            NumericType::I16 | NumericType::U16 => 2,
            NumericType::I32 | NumericType::U32 | NumericType::F32 => 4,
            NumericType::I64 | NumericType::U64 | NumericType::F64 => 8,
        }
    }

    fn code(&self) -> u8 {
        match self {
            NumericType::I8 => 0,
            NumericType::I16 => 1,
            NumericType::I32 => 2,
            NumericType::I64 => 3,
            NumericType::U8 => 4,
            NumericType::U16 => 5,
            NumericType::U32 => 6,
            NumericType::U64 => 7,
            NumericType::F32 => 8,
            NumericType::F64 => 9,
        }
    }

    fn is_signed(&self) -> bool {
        matches!(
            self,
            NumericType::I8 | NumericType::I16 | NumericType::I32 | NumericType::I64
        )
    }

    fn is_float(&self) -> bool {
        matches!(self, NumericType::F32 | NumericType::F64)
    }

    pub fn zero(&self) -> Value {
        if self.is_float() {
            Value::Float(0.0)
        } else if self.is_signed() {
            Value::Int(0)
        } else {
            Value::UInt(0)
        }
    }

    /// Append the big-endian encoding of `value`
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let out_of_range = || {
            FathomError::invalid_value(format!("{:?} does not fit in {:?}", value, self))
        };

        if self.is_float() {
            let v = match value {
                Value::Float(v) => *v,
                Value::Int(v) => *v as f64,
                Value::UInt(v) => *v as f64,
                _ => return Err(out_of_range()),
            };
            match self {
                NumericType::F32 => out.extend_from_slice(&(v as f32).to_be_bytes()),
                _ => out.extend_from_slice(&v.to_be_bytes()),
            }
            return Ok(());
        }

        let v: i128 = match value {
            Value::Int(v) => *v as i128,
            Value::UInt(v) => *v as i128,
            _ => return Err(out_of_range()),
        };
        let width = self.width();
        let (min, max) = if self.is_signed() {
            let bits = width as u32 * 8 - 1;
            (-(1i128 << bits), (1i128 << bits) - 1)
        } else {
            (0, (1i128 << (width as u32 * 8)) - 1)
        };
        if v < min || v > max {
            return Err(out_of_range());
        }
        // two's complement truncation keeps the low `width` bytes
        let bytes = (v as u64).to_be_bytes();
        out.extend_from_slice(&bytes[8 - width..]);
        Ok(())
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Value> {
        if raw.len() != self.width() {
            return Err(FathomError::format(format!(
                "{:?} value needs {} bytes, got {}",
                self,
                self.width(),
                raw.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[8 - raw.len()..].copy_from_slice(raw);
        let unsigned = u64::from_be_bytes(buf);
        Ok(match self {
            NumericType::I8 => Value::Int(raw[0] as i8 as i64),
            NumericType::I16 => Value::Int(unsigned as u16 as i16 as i64),
            NumericType::I32 => Value::Int(unsigned as u32 as i32 as i64),
            NumericType::I64 => Value::Int(unsigned as i64),
            NumericType::U8 | NumericType::U16 | NumericType::U32 | NumericType::U64 => {
                Value::UInt(unsigned)
            }
            NumericType::F32 => Value::Float(f32::from_bits(unsigned as u32) as f64),
            NumericType::F64 => Value::Float(f64::from_bits(unsigned)),
        })
    }

    /// Order-preserving key computed directly from the encoded bytes
    pub fn sort_key(&self, raw: &[u8], reverse: bool) -> Vec<u8> {
        let mut key = raw.to_vec();
        if self.is_float() {
            if key[0] & 0x80 != 0 {
                key.iter_mut().for_each(|b| *b = !*b);
            } else {
                key[0] |= 0x80;
            }
        } else if self.is_signed() {
            key[0] ^= 0x80;
        }
        if reverse {
            key.iter_mut().for_each(|b| *b = !*b);
        }
        key
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumericColumn {
    pub kind: NumericType,
    default: Vec<u8>,
}

impl NumericColumn {
    /// Column defaulting to zero
    pub fn new(kind: NumericType) -> Self {
        Self {
            kind,
            default: vec![0; kind.width()],
        }
    }

    pub fn with_default(kind: NumericType, default: &Value) -> Result<Self> {
        let mut encoded = Vec::with_capacity(kind.width());
        kind.encode(default, &mut encoded)?;
        Ok(Self {
            kind,
            default: encoded,
        })
    }

    pub fn default_value(&self) -> Value {
        self.kind
            .decode(&self.default)
            .unwrap_or_else(|_| self.kind.zero())
    }

    pub fn writer(&self) -> NumericWriter {
        NumericWriter {
            column: self.clone(),
            data: Vec::new(),
            cursor: DocCursor::default(),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<NumericReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        let code = *body
            .last()
            .ok_or_else(|| FathomError::format("numeric column missing type byte"))?;
        if code != self.kind.code() {
            return Err(FathomError::format(format!(
                "numeric column type byte {} does not match {:?}",
                code, self.kind
            )));
        }
        let expected = doc_count as usize * self.kind.width();
        if body.len() - 1 != expected {
            return Err(FathomError::format(format!(
                "numeric column holds {} bytes, expected {}",
                body.len() - 1,
                expected
            )));
        }
        Ok(NumericReader {
            data: body.slice(..expected),
            kind: self.kind,
            doc_count,
        })
    }
}

pub struct NumericWriter {
    column: NumericColumn,
    data: Vec<u8>,
    cursor: DocCursor,
}

impl NumericWriter {
    fn fill(&mut self, count: u32) {
        for _ in 0..count {
            self.data.extend_from_slice(&self.column.default);
        }
    }
}

impl ColumnWriter for NumericWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let mut encoded = Vec::with_capacity(8);
        self.column.kind.encode(value, &mut encoded)?;
        let gap = self.cursor.advance(docnum)?;
        self.fill(gap);
        self.data.extend_from_slice(&encoded);
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let gap = self.cursor.finish(doc_count)?;
        self.fill(gap);
        let mut data = std::mem::take(&mut self.data);
        data.push(self.column.kind.code());
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

pub struct NumericReader {
    data: Bytes,
    kind: NumericType,
    doc_count: u32,
}

impl NumericReader {
    fn raw(&self, docnum: u32) -> Result<&[u8]> {
        check_docnum(docnum, self.doc_count)?;
        let width = self.kind.width();
        let start = docnum as usize * width;
        Ok(&self.data[start..start + width])
    }
}

impl ColumnReader for NumericReader {
    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        self.kind.decode(self.raw(docnum)?)
    }

    fn sort_key(&self, docnum: u32, reverse: bool) -> Result<SortKey> {
        Ok(SortKey::Key(self.kind.sort_key(self.raw(docnum)?, reverse)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(column: &NumericColumn, values: &[(u32, Value)], doc_count: u32) -> NumericReader {
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        for (docnum, value) in values {
            writer.add(*docnum, value).unwrap();
        }
        column
            .reader(Bytes::from(writer.finish(doc_count).unwrap().data))
            .unwrap()
    }

    #[test]
    fn test_signed_roundtrip_with_default() {
        let column = NumericColumn::with_default(NumericType::I16, &Value::Int(-1)).unwrap();
        let reader = build(
            &column,
            &[(0, Value::Int(-300)), (2, Value::Int(32_767))],
            4,
        );
        assert_eq!(reader.get(0).unwrap(), Value::Int(-300));
        assert_eq!(reader.get(1).unwrap(), Value::Int(-1));
        assert_eq!(reader.get(2).unwrap(), Value::Int(32_767));
        assert_eq!(reader.get(3).unwrap(), Value::Int(-1));
        assert_eq!(column.default_value(), Value::Int(-1));
    }

    #[test]
    fn test_range_checked() {
        let mut writer = NumericColumn::new(NumericType::U8).writer();
        assert!(matches!(
            writer.add(0, &Value::UInt(256)),
            Err(FathomError::InvalidValue(_))
        ));
        assert!(writer.add(0, &Value::Int(-1)).is_err());
        assert!(writer.add(0, &Value::text("7")).is_err());
        writer.add(0, &Value::UInt(255)).unwrap();
    }

    #[test]
    fn test_sort_keys_follow_value_order() {
        let column = NumericColumn::new(NumericType::I32);
        let values = [-70_000i64, -1, 0, 5, 1 << 20];
        let entries: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32, Value::Int(*v)))
            .collect();
        let reader = build(&column, &entries, values.len() as u32);

        let keys: Vec<_> = (0..5).map(|i| reader.sort_key(i, false).unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        let reversed: Vec<_> = (0..5).map(|i| reader.sort_key(i, true).unwrap()).collect();
        assert!(reversed.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_float_sort_keys() {
        let column = NumericColumn::new(NumericType::F64);
        let values = [-2.5, -0.5, 0.0, 0.25, 1e10];
        let entries: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u32, Value::Float(*v)))
            .collect();
        let reader = build(&column, &entries, values.len() as u32);
        let keys: Vec<_> = (0..5).map(|i| reader.sort_key(i, false).unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(reader.get(0).unwrap(), Value::Float(-2.5));
    }

    #[test]
    fn test_type_byte_mismatch() {
        let column = NumericColumn::new(NumericType::U32);
        let data = Box::new(column.writer()).finish(2).unwrap().data;
        let other = NumericColumn::new(NumericType::I32);
        assert!(matches!(
            other.reader(Bytes::from(data)),
            Err(FathomError::Format(_))
        ));
    }
}
