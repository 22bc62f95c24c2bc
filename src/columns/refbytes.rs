//! Deduplicated bytes column
//!
//! Each document stores a 1- or 2-byte reference into a table of unique
//! values. The default always occupies reference 0. Once the table holds
//! `MAX_UNIQUE_VALUES` entries, further new values are stored as the default
//! and reported through `ColumnWarning::RefTableOverflow`.

use std::collections::HashMap;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;

use super::{
    check_docnum, read_footer, read_uint, take, write_footer, write_uint, ColumnReader,
    ColumnWarning, ColumnWriter, DocCursor, FinishedColumn, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 3;

/// Capacity of the unique-value table, default included
pub const MAX_UNIQUE_VALUES: usize = 65_535;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefBytesColumn {
    pub default: Vec<u8>,
}

impl RefBytesColumn {
    pub fn new(default: impl Into<Vec<u8>>) -> Self {
        Self {
            default: default.into(),
        }
    }

    pub fn writer(&self) -> RefBytesWriter {
        let mut lookup = HashMap::new();
        lookup.insert(self.default.clone(), 0u16);
        RefBytesWriter {
            table: vec![self.default.clone()],
            lookup,
            refs: Vec::new(),
            cursor: DocCursor::default(),
            dropped: 0,
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<RefBytesReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        if body.len() < 5 {
            return Err(FathomError::format("ref bytes column missing table trailer"));
        }
        let width = body[body.len() - 1] as usize;
        if !matches!(width, 1 | 2) {
            return Err(FathomError::format(format!("bad ref width {}", width)));
        }
        let mut trailer = &body[body.len() - 5..body.len() - 1];
        let table_len = trailer
            .read_u32::<BigEndian>()
            .map_err(|e| FathomError::truncated("ref table length", e))?
            as usize;

        let refs_len = doc_count as usize * width;
        if refs_len > body.len() - 5 {
            return Err(FathomError::format("ref array truncated"));
        }
        let mut input = &body[refs_len..body.len() - 5];
        let mut table = Vec::with_capacity(table_len);
        for _ in 0..table_len {
            let len = input
                .read_u32::<BigEndian>()
                .map_err(|e| FathomError::truncated("ref table entry", e))?;
            table.push(Bytes::copy_from_slice(take(&mut input, len as usize)?));
        }
        if table.is_empty() || !input.is_empty() {
            return Err(FathomError::format("malformed ref table"));
        }

        Ok(RefBytesReader {
            refs: body.slice(..refs_len),
            width,
            table,
            doc_count,
        })
    }
}

pub struct RefBytesWriter {
    table: Vec<Vec<u8>>,
    lookup: HashMap<Vec<u8>, u16>,
    refs: Vec<u16>,
    cursor: DocCursor,
    dropped: u64,
}

impl RefBytesWriter {
    fn reference(&mut self, bytes: &[u8]) -> u16 {
        if let Some(&existing) = self.lookup.get(bytes) {
            return existing;
        }
        if self.table.len() >= MAX_UNIQUE_VALUES {
            if self.dropped == 0 {
                tracing::warn!(
                    capacity = MAX_UNIQUE_VALUES,
                    "ref bytes table full, storing further new values as the default"
                );
            }
            self.dropped += 1;
            return 0;
        }
        let id = self.table.len() as u16;
        self.table.push(bytes.to_vec());
        self.lookup.insert(bytes.to_vec(), id);
        id
    }
}

impl ColumnWriter for RefBytesWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bytes = value.expect_bytes("ref bytes")?;
        let gap = self.cursor.advance(docnum)?;
        self.refs.extend(std::iter::repeat(0).take(gap as usize));
        let id = self.reference(bytes);
        self.refs.push(id);
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let gap = self.cursor.finish(doc_count)?;
        self.refs.extend(std::iter::repeat(0).take(gap as usize));

        let width = if self.table.len() <= 256 { 1 } else { 2 };
        let mut data = Vec::with_capacity(self.refs.len() * width);
        for id in &self.refs {
            write_uint(&mut data, *id as u64, width);
        }
        for value in &self.table {
            data.extend_from_slice(&(value.len() as u32).to_be_bytes());
            data.extend_from_slice(value);
        }
        data.extend_from_slice(&(self.table.len() as u32).to_be_bytes());
        data.push(width as u8);
        write_footer(&mut data, TAG, doc_count);

        let mut warnings = Vec::new();
        if self.dropped > 0 {
            warnings.push(ColumnWarning::RefTableOverflow {
                dropped: self.dropped,
            });
        }
        Ok(FinishedColumn { data, warnings })
    }
}

pub struct RefBytesReader {
    refs: Bytes,
    width: usize,
    table: Vec<Bytes>,
    doc_count: u32,
}

impl RefBytesReader {
    pub fn get_bytes(&self, docnum: u32) -> Result<Bytes> {
        check_docnum(docnum, self.doc_count)?;
        let start = docnum as usize * self.width;
        let mut input = &self.refs[start..start + self.width];
        let id = read_uint(&mut input, self.width)? as usize;
        self.table.get(id).cloned().ok_or_else(|| {
            FathomError::format(format!(
                "ref {} outside table of {} values",
                id,
                self.table.len()
            ))
        })
    }

    /// Number of unique values, default included
    pub fn unique_count(&self) -> usize {
        self.table.len()
    }
}

impl ColumnReader for RefBytesReader {
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
    fn test_dedup_and_defaults() {
        let column = RefBytesColumn::new("unknown");
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        writer.add(0, &Value::text("red")).unwrap();
        writer.add(1, &Value::text("blue")).unwrap();
        writer.add(2, &Value::text("red")).unwrap();
        writer.add(5, &Value::text("blue")).unwrap();
        let finished = writer.finish(7).unwrap();
        assert!(finished.warnings.is_empty());

        let reader = column.reader(Bytes::from(finished.data)).unwrap();
        assert_eq!(reader.unique_count(), 3);
        let values: Vec<_> = reader.iter().map(|v| v.unwrap()).collect();
        let expected: Vec<Value> = ["red", "blue", "red", "unknown", "unknown", "blue", "unknown"]
            .iter()
            .map(|s| Value::text(s))
            .collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_overflow_stores_default_with_warning() {
        let column = RefBytesColumn::default();
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        for docnum in 0..70_000u32 {
            let value = Value::Bytes(format!("value-{}", docnum).into_bytes());
            writer.add(docnum, &value).unwrap();
        }
        let finished = writer.finish(70_000).unwrap();
        let accepted = (MAX_UNIQUE_VALUES - 1) as u64;
        assert_eq!(
            finished.warnings,
            vec![ColumnWarning::RefTableOverflow {
                dropped: 70_000 - accepted
            }]
        );

        let reader = column.reader(Bytes::from(finished.data)).unwrap();
        assert_eq!(reader.unique_count(), MAX_UNIQUE_VALUES);
        assert_eq!(reader.get(0).unwrap(), Value::text("value-0"));
        let last_kept = accepted as u32 - 1;
        assert_eq!(
            reader.get(last_kept).unwrap(),
            Value::Bytes(format!("value-{}", last_kept).into_bytes())
        );
        assert_eq!(reader.get(last_kept + 1).unwrap(), Value::Bytes(Vec::new()));
        assert_eq!(reader.get(69_999).unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_existing_values_still_resolve_after_overflow() {
        let column = RefBytesColumn::default();
        let mut writer = column.writer();
        for i in 0..MAX_UNIQUE_VALUES as u32 + 10 {
            writer.add(i, &Value::Bytes(i.to_be_bytes().to_vec())).unwrap();
        }
        let next = MAX_UNIQUE_VALUES as u32 + 10;
        writer.add(next, &Value::Bytes(5u32.to_be_bytes().to_vec())).unwrap();
        let finished = Box::new(writer).finish(next + 1).unwrap();
        let reader = column.reader(Bytes::from(finished.data)).unwrap();
        assert_eq!(
            reader.get(next).unwrap(),
            Value::Bytes(5u32.to_be_bytes().to_vec())
        );
    }
}
