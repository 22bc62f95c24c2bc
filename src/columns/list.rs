//! Multi-valued column
//!
//! Each document holds a u32 element count followed by the elements encoded
//! by the element column type, inside a var bytes layout. The default is the
//! empty list.

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;

use super::varbytes::{VarBytesReader, VarBytesWriter};
use super::{read_footer, write_footer, Column, ColumnReader, ColumnWriter, FinishedColumn, Value};
use crate::error::{FathomError, Result};

const TAG: u8 = 9;

#[derive(Clone, Debug, PartialEq)]
pub struct ListColumn {
    pub element: Box<Column>,
}

impl ListColumn {
    pub fn new(element: Column) -> Self {
        Self {
            element: Box::new(element),
        }
    }

    pub(crate) fn encode_list(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let items = match value {
            Value::List(items) => items,
            other => {
                return Err(FathomError::invalid_value(format!(
                    "list column expects a list, got {:?}",
                    other
                )))
            }
        };
        out.extend_from_slice(&(items.len() as u32).to_be_bytes());
        for item in items {
            self.element.encode_element(item, out)?;
        }
        Ok(())
    }

    pub(crate) fn decode_list(&self, input: &mut &[u8]) -> Result<Value> {
        let count = input
            .read_u32::<BigEndian>()
            .map_err(|e| FathomError::truncated("list count", e))?;
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            items.push(self.element.decode_element(input)?);
        }
        Ok(Value::List(items))
    }

    pub fn writer(&self) -> ListWriter {
        ListWriter {
            column: self.clone(),
            inner: VarBytesWriter::new(Vec::new()),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<ListReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        Ok(ListReader {
            column: self.clone(),
            inner: VarBytesReader::from_body(body, doc_count)?,
        })
    }
}

pub struct ListWriter {
    column: ListColumn,
    inner: VarBytesWriter,
}

impl ColumnWriter for ListWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let mut encoded = Vec::new();
        self.column.encode_list(value, &mut encoded)?;
        self.inner.add_bytes(docnum, &encoded)
    }

    fn finish(self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let mut data = self.inner.finish_body(doc_count)?;
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

pub struct ListReader {
    column: ListColumn,
    inner: VarBytesReader,
}

impl ColumnReader for ListReader {
    fn doc_count(&self) -> u32 {
        self.inner.doc_count()
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        let stored = self.inner.get_bytes(docnum)?;
        if stored.is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        let mut input = &stored[..];
        let value = self.column.decode_list(&mut input)?;
        if !input.is_empty() {
            return Err(FathomError::format(format!(
                "{} trailing bytes after list of document {}",
                input.len(),
                docnum
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{NumericColumn, NumericType, VarBytesColumn};

    #[test]
    fn test_numeric_list() {
        let column = ListColumn::new(Column::Numeric(NumericColumn::new(NumericType::U16)));
        let mut writer = Column::List(column.clone()).writer();
        writer
            .add(
                0,
                &Value::List(vec![Value::UInt(1), Value::UInt(2), Value::UInt(600)]),
            )
            .unwrap();
        writer.add(2, &Value::List(Vec::new())).unwrap();
        let data = writer.finish(3).unwrap().data;

        let reader = column.reader(Bytes::from(data)).unwrap();
        assert_eq!(
            reader.get(0).unwrap(),
            Value::List(vec![Value::UInt(1), Value::UInt(2), Value::UInt(600)])
        );
        assert_eq!(reader.get(1).unwrap(), Value::List(Vec::new()));
        assert_eq!(reader.get(2).unwrap(), Value::List(Vec::new()));
    }

    #[test]
    fn test_nested_bytes_list() {
        let inner = ListColumn::new(Column::VarBytes(VarBytesColumn::default()));
        let column = ListColumn::new(Column::List(inner));
        let value = Value::List(vec![
            Value::List(vec![Value::text("a"), Value::text("bc")]),
            Value::List(vec![]),
        ]);
        let mut writer = column.writer();
        writer.add(0, &value).unwrap();
        let data = Box::new(writer).finish(1).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();
        assert_eq!(reader.get(0).unwrap(), value);
    }

    #[test]
    fn test_rejects_scalar() {
        let column = ListColumn::new(Column::VarBytes(VarBytesColumn::default()));
        let mut writer = column.writer();
        assert!(writer.add(0, &Value::text("x")).is_err());
    }
}
