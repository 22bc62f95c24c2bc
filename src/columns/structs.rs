//! Fixed-layout tuple column

use bytes::Bytes;

use super::{
    check_docnum, read_footer, take, write_footer, ColumnReader, ColumnWriter, DocCursor,
    FinishedColumn, NumericType, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructMember {
    Numeric(NumericType),
    /// Fixed number of raw bytes
    Bytes(usize),
}

impl StructMember {
    fn width(&self) -> usize {
        match self {
            StructMember::Numeric(kind) => kind.width(),
            StructMember::Bytes(len) => *len,
        }
    }
}

/// Each document is a tuple packed in member order; the default is all zeros
#[derive(Clone, Debug, PartialEq)]
pub struct StructColumn {
    pub members: Vec<StructMember>,
}

impl StructColumn {
    pub fn new(members: Vec<StructMember>) -> Self {
        Self { members }
    }

    pub fn width(&self) -> usize {
        self.members.iter().map(|m| m.width()).sum()
    }

    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let items = match value {
            Value::Tuple(items) if items.len() == self.members.len() => items,
            other => {
                return Err(FathomError::invalid_value(format!(
                    "struct column expects a tuple of {} members, got {:?}",
                    self.members.len(),
                    other
                )))
            }
        };
        for (member, item) in self.members.iter().zip(items) {
            match member {
                StructMember::Numeric(kind) => kind.encode(item, out)?,
                StructMember::Bytes(len) => {
                    let bytes = item.expect_bytes("struct member")?;
                    if bytes.len() != *len {
                        return Err(FathomError::invalid_value(format!(
                            "struct member expects {} bytes, got {}",
                            len,
                            bytes.len()
                        )));
                    }
                    out.extend_from_slice(bytes);
                }
            }
        }
        Ok(())
    }

    pub fn decode(&self, mut raw: &[u8]) -> Result<Value> {
        let mut items = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let field = take(&mut raw, member.width())?;
            items.push(match member {
                StructMember::Numeric(kind) => kind.decode(field)?,
                StructMember::Bytes(_) => Value::Bytes(field.to_vec()),
            });
        }
        Ok(Value::Tuple(items))
    }

    pub fn default_value(&self) -> Value {
        Value::Tuple(
            self.members
                .iter()
                .map(|member| match member {
                    StructMember::Numeric(kind) => kind.zero(),
                    StructMember::Bytes(len) => Value::Bytes(vec![0; *len]),
                })
                .collect(),
        )
    }

    pub fn writer(&self) -> StructWriter {
        StructWriter {
            column: self.clone(),
            width: self.width(),
            data: Vec::new(),
            cursor: DocCursor::default(),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<StructReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        let width = self.width();
        if body.len() != doc_count as usize * width {
            return Err(FathomError::format(format!(
                "struct column of width {} holds {} bytes for {} documents",
                width,
                body.len(),
                doc_count
            )));
        }
        Ok(StructReader {
            column: self.clone(),
            width,
            data: body,
            doc_count,
        })
    }
}

pub struct StructWriter {
    column: StructColumn,
    width: usize,
    data: Vec<u8>,
    cursor: DocCursor,
}

impl ColumnWriter for StructWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let mut record = Vec::with_capacity(self.width);
        self.column.encode(value, &mut record)?;
        let gap = self.cursor.advance(docnum)?;
        self.data
            .resize(self.data.len() + gap as usize * self.width, 0);
        self.data.extend_from_slice(&record);
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let gap = self.cursor.finish(doc_count)?;
        let mut data = std::mem::take(&mut self.data);
        data.resize(data.len() + gap as usize * self.width, 0);
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

pub struct StructReader {
    column: StructColumn,
    width: usize,
    data: Bytes,
    doc_count: u32,
}

impl ColumnReader for StructReader {
    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        check_docnum(docnum, self.doc_count)?;
        let start = docnum as usize * self.width;
        self.column.decode(&self.data[start..start + self.width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_column() -> StructColumn {
        StructColumn::new(vec![
            StructMember::Numeric(NumericType::I32),
            StructMember::Numeric(NumericType::F32),
            StructMember::Bytes(2),
        ])
    }

    #[test]
    fn test_struct_roundtrip() {
        let column = point_column();
        assert_eq!(column.width(), 10);
        let value = Value::Tuple(vec![
            Value::Int(-12),
            Value::Float(1.5),
            Value::Bytes(b"ok".to_vec()),
        ]);

        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        writer.add(1, &value).unwrap();
        let data = writer.finish(3).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();

        assert_eq!(reader.get(0).unwrap(), column.default_value());
        assert_eq!(reader.get(1).unwrap(), value);
        assert_eq!(reader.get(2).unwrap(), column.default_value());
    }

    #[test]
    fn test_struct_shape_checked() {
        let column = point_column();
        let mut writer = column.writer();
        assert!(writer
            .add(0, &Value::Tuple(vec![Value::Int(1)]))
            .is_err());
        assert!(writer
            .add(
                0,
                &Value::Tuple(vec![
                    Value::Int(1),
                    Value::Float(0.0),
                    Value::Bytes(b"toolong".to_vec())
                ])
            )
            .is_err());
    }
}
