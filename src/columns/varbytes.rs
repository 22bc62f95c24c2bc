//! Variable-length bytes column
//!
//! Layout: concatenated values, then one big-endian length per document
//! packed at 1, 2 or 4 bytes, then the length width, then the footer.

use bytes::Bytes;
use parking_lot::Mutex;

use super::{
    check_docnum, read_footer, read_uint, uint_width, write_footer, write_uint, ColumnReader,
    ColumnWriter, DocCursor, FinishedColumn, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 1;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarBytesColumn {
    pub default: Vec<u8>,
}

impl VarBytesColumn {
    pub fn new(default: impl Into<Vec<u8>>) -> Self {
        Self {
            default: default.into(),
        }
    }

    pub fn writer(&self) -> VarBytesWriter {
        VarBytesWriter::new(self.default.clone())
    }

    pub fn reader(&self, data: Bytes) -> Result<VarBytesReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        VarBytesReader::from_body(body, doc_count)
    }
}

pub struct VarBytesWriter {
    default: Vec<u8>,
    data: Vec<u8>,
    lengths: Vec<u32>,
    cursor: DocCursor,
}

impl VarBytesWriter {
    pub(crate) fn new(default: Vec<u8>) -> Self {
        Self {
            default,
            data: Vec::new(),
            lengths: Vec::new(),
            cursor: DocCursor::default(),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.lengths.push(bytes.len() as u32);
    }

    fn fill(&mut self, count: u32) {
        for _ in 0..count {
            self.data.extend_from_slice(&self.default);
            self.lengths.push(self.default.len() as u32);
        }
    }

    pub(crate) fn add_bytes(&mut self, docnum: u32, bytes: &[u8]) -> Result<()> {
        let gap = self.cursor.advance(docnum)?;
        self.fill(gap);
        self.push(bytes);
        Ok(())
    }

    /// Data and length array without the footer, for wrapping columns.
    pub(crate) fn finish_body(mut self, doc_count: u32) -> Result<Vec<u8>> {
        let gap = self.cursor.finish(doc_count)?;
        self.fill(gap);

        let max_len = self.lengths.iter().copied().max().unwrap_or(0);
        let width = uint_width(max_len as u64);
        let mut out = self.data;
        out.reserve(self.lengths.len() * width + 1);
        for len in &self.lengths {
            write_uint(&mut out, *len as u64, width);
        }
        out.push(width as u8);
        Ok(out)
    }
}

impl ColumnWriter for VarBytesWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bytes = value.expect_bytes("var bytes")?;
        self.add_bytes(docnum, bytes)
    }

    fn finish(self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let mut data = self.finish_body(doc_count)?;
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

pub struct VarBytesReader {
    data: Bytes,
    /// Prefix sums of the length array, `doc_count + 1` entries
    offsets: Vec<u64>,
    /// Most recent lookup
    recent: Mutex<Option<(u32, Bytes)>>,
}

impl VarBytesReader {
    pub(crate) fn from_body(body: Bytes, doc_count: u32) -> Result<Self> {
        let width = *body
            .last()
            .ok_or_else(|| FathomError::format("empty var bytes column"))? as usize;
        if !matches!(width, 1 | 2 | 4) {
            return Err(FathomError::format(format!(
                "bad var bytes length width {}",
                width
            )));
        }
        let lengths_len = doc_count as usize * width;
        if body.len() < lengths_len + 1 {
            return Err(FathomError::format("var bytes length array truncated"));
        }
        let data_len = body.len() - 1 - lengths_len;

        let mut offsets = Vec::with_capacity(doc_count as usize + 1);
        offsets.push(0u64);
        let mut input = &body[data_len..body.len() - 1];
        let mut total = 0u64;
        for _ in 0..doc_count {
            total += read_uint(&mut input, width)?;
            offsets.push(total);
        }
        if total != data_len as u64 {
            return Err(FathomError::format(format!(
                "var bytes lengths sum to {} but data holds {} bytes",
                total, data_len
            )));
        }

        Ok(Self {
            data: body.slice(..data_len),
            offsets,
            recent: Mutex::new(None),
        })
    }

    /// Value bytes for a document, shared with the file buffer
    pub fn get_bytes(&self, docnum: u32) -> Result<Bytes> {
        check_docnum(docnum, self.doc_count())?;
        let mut recent = self.recent.lock();
        if let Some((cached, bytes)) = recent.as_ref() {
            if *cached == docnum {
                return Ok(bytes.clone());
            }
        }
        let start = self.offsets[docnum as usize] as usize;
        let end = self.offsets[docnum as usize + 1] as usize;
        let bytes = self.data.slice(start..end);
        *recent = Some((docnum, bytes.clone()));
        Ok(bytes)
    }
}

impl ColumnReader for VarBytesReader {
    fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        Ok(Value::Bytes(self.get_bytes(docnum)?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(column: &VarBytesColumn, values: &[(u32, &str)], doc_count: u32) -> VarBytesReader {
        let mut writer = Box::new(column.writer());
        for (docnum, value) in values {
            writer.add(*docnum, &Value::text(value)).unwrap();
        }
        let finished = writer.finish(doc_count).unwrap();
        column.reader(Bytes::from(finished.data)).unwrap()
    }

    #[test]
    fn test_gaps_and_tail_get_default() {
        let column = VarBytesColumn::new("none");
        let reader = finish(&column, &[(0, "alpha"), (3, "delta")], 6);

        assert_eq!(reader.doc_count(), 6);
        assert_eq!(reader.get(0).unwrap(), Value::text("alpha"));
        assert_eq!(reader.get(1).unwrap(), Value::text("none"));
        assert_eq!(reader.get(2).unwrap(), Value::text("none"));
        assert_eq!(reader.get(3).unwrap(), Value::text("delta"));
        assert_eq!(reader.get(5).unwrap(), Value::text("none"));
        assert!(matches!(
            reader.get(6),
            Err(FathomError::DocumentOutOfRange { docnum: 6, .. })
        ));
    }

    #[test]
    fn test_wide_lengths() {
        let column = VarBytesColumn::default();
        let big = "x".repeat(70_000);
        let reader = finish(&column, &[(1, big.as_str())], 2);
        assert_eq!(reader.get(0).unwrap(), Value::Bytes(Vec::new()));
        assert_eq!(reader.get_bytes(1).unwrap().len(), 70_000);
        // cached lookup returns the same bytes
        assert_eq!(reader.get_bytes(1).unwrap().len(), 70_000);
    }

    #[test]
    fn test_iter_restarts() {
        let column = VarBytesColumn::default();
        let reader = finish(&column, &[(0, "a"), (1, "b")], 2);
        let first: Vec<_> = reader.iter().map(|v| v.unwrap()).collect();
        let second: Vec<_> = reader.iter().map(|v| v.unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![Value::text("a"), Value::text("b")]);
    }

    #[test]
    fn test_out_of_order_add_is_state_error() {
        let column = VarBytesColumn::default();
        let mut writer = column.writer();
        writer.add(2, &Value::text("b")).unwrap();
        assert!(matches!(
            writer.add(1, &Value::text("a")),
            Err(FathomError::State(_))
        ));
    }

    #[test]
    fn test_rejects_non_bytes() {
        let mut writer = VarBytesColumn::default().writer();
        assert!(matches!(
            writer.add(0, &Value::Int(1)),
            Err(FathomError::InvalidValue(_))
        ));
    }
}
