//! Fixed-length bytes column
//!
//! Values are packed back to back with no length array. Documents after the
//! last explicitly added one are not stored; a trailing u32 records how many
//! values are physically present.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use super::{
    check_docnum, read_footer, write_footer, ColumnReader, ColumnWriter, DocCursor,
    FinishedColumn, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct FixedBytesColumn {
    pub length: usize,
    default: Vec<u8>,
}

impl FixedBytesColumn {
    /// Column of `length`-byte values defaulting to all zeros
    pub fn new(length: usize) -> Self {
        Self {
            length,
            default: vec![0; length],
        }
    }

    pub fn with_default(length: usize, default: impl Into<Vec<u8>>) -> Result<Self> {
        let default = default.into();
        if default.len() != length {
            return Err(FathomError::invalid_value(format!(
                "default of {} bytes for a {}-byte column",
                default.len(),
                length
            )));
        }
        Ok(Self { length, default })
    }

    pub fn default(&self) -> &[u8] {
        &self.default
    }

    /// Borrow the bytes of `value` if it has the column's width
    pub(crate) fn check<'a>(&self, value: &'a Value) -> Result<&'a [u8]> {
        let bytes = value.expect_bytes("fixed bytes")?;
        if bytes.len() != self.length {
            return Err(FathomError::invalid_value(format!(
                "fixed bytes column expects {} bytes, got {}",
                self.length,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub fn writer(&self) -> FixedBytesWriter {
        FixedBytesWriter {
            column: self.clone(),
            data: Vec::new(),
            cursor: DocCursor::default(),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<FixedBytesReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        if body.len() < 4 {
            return Err(FathomError::format("fixed bytes column missing stored count"));
        }
        let stored = BigEndian::read_u32(&body[body.len() - 4..]);
        let values_len = stored as usize * self.length;
        if stored > doc_count || values_len != body.len() - 4 {
            return Err(FathomError::format(format!(
                "fixed bytes column stores {} values in {} bytes",
                stored,
                body.len() - 4
            )));
        }
        Ok(FixedBytesReader {
            data: body.slice(..values_len),
            length: self.length,
            default: Bytes::from(self.default.clone()),
            stored,
            doc_count,
        })
    }
}

pub struct FixedBytesWriter {
    column: FixedBytesColumn,
    data: Vec<u8>,
    cursor: DocCursor,
}

impl ColumnWriter for FixedBytesWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bytes = self.column.check(value)?;
        let gap = self.cursor.advance(docnum)?;
        for _ in 0..gap {
            self.data.extend_from_slice(&self.column.default);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let stored = self.cursor.count();
        // trailing defaults are implied by the doc count
        self.cursor.finish(doc_count)?;
        let mut data = std::mem::take(&mut self.data);
        data.extend_from_slice(&stored.to_be_bytes());
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

pub struct FixedBytesReader {
    data: Bytes,
    length: usize,
    default: Bytes,
    stored: u32,
    doc_count: u32,
}

impl FixedBytesReader {
    pub fn get_bytes(&self, docnum: u32) -> Result<Bytes> {
        check_docnum(docnum, self.doc_count)?;
        if docnum >= self.stored {
            return Ok(self.default.clone());
        }
        let start = docnum as usize * self.length;
        Ok(self.data.slice(start..start + self.length))
    }
}

impl ColumnReader for FixedBytesReader {
    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        Ok(Value::Bytes(self.get_bytes(docnum)?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_defaults_not_stored() {
        let column = FixedBytesColumn::with_default(2, b"zz".to_vec()).unwrap();
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        writer.add(1, &Value::Bytes(b"ab".to_vec())).unwrap();
        let finished = writer.finish(1000).unwrap();
        // two stored values, the stored count and the footer
        assert_eq!(finished.data.len(), 2 * 2 + 4 + 6);

        let reader = column.reader(Bytes::from(finished.data)).unwrap();
        assert_eq!(reader.doc_count(), 1000);
        assert_eq!(reader.get(0).unwrap(), Value::Bytes(b"zz".to_vec()));
        assert_eq!(reader.get(1).unwrap(), Value::Bytes(b"ab".to_vec()));
        assert_eq!(reader.get(999).unwrap(), Value::Bytes(b"zz".to_vec()));
        assert!(reader.get(1000).is_err());
    }

    #[test]
    fn test_wrong_width_rejected() {
        let column = FixedBytesColumn::new(4);
        let mut writer = column.writer();
        assert!(matches!(
            writer.add(0, &Value::Bytes(b"abc".to_vec())),
            Err(FathomError::InvalidValue(_))
        ));
        assert!(FixedBytesColumn::with_default(4, b"ab".to_vec()).is_err());
    }

    #[test]
    fn test_empty_column() {
        let column = FixedBytesColumn::new(3);
        let finished = Box::new(column.writer()).finish(0).unwrap();
        let reader = column.reader(Bytes::from(finished.data)).unwrap();
        assert_eq!(reader.doc_count(), 0);
        assert_eq!(reader.iter().count(), 0);
    }
}
