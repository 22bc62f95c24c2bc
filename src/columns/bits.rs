//! Boolean column
//!
//! Small bitsets are stored as a serialized roaring bitmap and loaded fully;
//! bitsets of at least `compress_at` raw bytes are stored as plain LSB-first
//! bits and probed in place.

use bytes::Bytes;
use roaring::RoaringBitmap;

use super::{
    check_docnum, read_footer, write_footer, ColumnReader, ColumnWriter, DocCursor,
    FinishedColumn, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 5;

const MODE_RAW: u8 = 0;
const MODE_ROARING: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct BitColumn {
    /// Raw bitsets smaller than this many bytes are stored compressed
    pub compress_at: usize,
}

impl Default for BitColumn {
    fn default() -> Self {
        Self { compress_at: 2048 }
    }
}

impl BitColumn {
    pub fn new(compress_at: usize) -> Self {
        Self { compress_at }
    }

    pub fn writer(&self) -> BitWriter {
        BitWriter {
            compress_at: self.compress_at,
            set: RoaringBitmap::new(),
            cursor: DocCursor::default(),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<BitReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        let mode = *body
            .last()
            .ok_or_else(|| FathomError::format("bit column missing mode byte"))?;
        let bits = body.slice(..body.len() - 1);
        let storage = match mode {
            MODE_ROARING => BitStorage::Loaded(
                RoaringBitmap::deserialize_from(&bits[..])
                    .map_err(|e| FathomError::truncated("roaring bitmap", e))?,
            ),
            MODE_RAW => {
                if bits.len() != raw_len(doc_count) {
                    return Err(FathomError::format(format!(
                        "raw bitset of {} bytes for {} documents",
                        bits.len(),
                        doc_count
                    )));
                }
                BitStorage::Raw(bits)
            }
            other => {
                return Err(FathomError::format(format!("unknown bit column mode {}", other)))
            }
        };
        Ok(BitReader { storage, doc_count })
    }
}

fn raw_len(doc_count: u32) -> usize {
    (doc_count as usize + 7) / 8
}

pub struct BitWriter {
    compress_at: usize,
    set: RoaringBitmap,
    cursor: DocCursor,
}

impl ColumnWriter for BitWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bit = match value {
            Value::Bool(b) => *b,
            other => {
                return Err(FathomError::invalid_value(format!(
                    "bit column expects a bool, got {:?}",
                    other
                )))
            }
        };
        self.cursor.advance(docnum)?;
        if bit {
            self.set.insert(docnum);
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        self.cursor.finish(doc_count)?;
        let len = raw_len(doc_count);
        let mut data;
        if len < self.compress_at {
            data = Vec::with_capacity(self.set.serialized_size() + 7);
            self.set.serialize_into(&mut data)?;
            data.push(MODE_ROARING);
        } else {
            data = vec![0u8; len];
            for docnum in self.set.iter() {
                data[docnum as usize / 8] |= 1 << (docnum % 8);
            }
            data.push(MODE_RAW);
        }
        write_footer(&mut data, TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

enum BitStorage {
    Loaded(RoaringBitmap),
    Raw(Bytes),
}

pub struct BitReader {
    storage: BitStorage,
    doc_count: u32,
}

impl BitReader {
    pub fn is_set(&self, docnum: u32) -> Result<bool> {
        check_docnum(docnum, self.doc_count)?;
        Ok(match &self.storage {
            BitStorage::Loaded(set) => set.contains(docnum),
            BitStorage::Raw(bits) => bits[docnum as usize / 8] & (1 << (docnum % 8)) != 0,
        })
    }

    /// Number of documents whose bit is set
    pub fn count_set(&self) -> u64 {
        match &self.storage {
            BitStorage::Loaded(set) => set.len(),
            BitStorage::Raw(bits) => bits.iter().map(|b| b.count_ones() as u64).sum(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.storage, BitStorage::Loaded(_))
    }
}

impl ColumnReader for BitReader {
    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        Ok(Value::Bool(self.is_set(docnum)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(column: &BitColumn, set: &[u32], doc_count: u32) -> BitReader {
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        for docnum in set {
            writer.add(*docnum, &Value::Bool(true)).unwrap();
        }
        column
            .reader(Bytes::from(writer.finish(doc_count).unwrap().data))
            .unwrap()
    }

    #[test]
    fn test_small_bitset_is_compressed() {
        let column = BitColumn::default();
        let reader = build(&column, &[1, 7, 64], 100);
        assert!(reader.is_compressed());
        assert_eq!(reader.count_set(), 3);
        assert_eq!(reader.get(7).unwrap(), Value::Bool(true));
        assert_eq!(reader.get(8).unwrap(), Value::Bool(false));
        assert_eq!(reader.get(99).unwrap(), Value::Bool(false));
        assert!(reader.get(100).is_err());
    }

    #[test]
    fn test_large_bitset_is_raw() {
        let column = BitColumn::new(4);
        let reader = build(&column, &[0, 9, 31, 32], 40);
        assert!(!reader.is_compressed());
        assert_eq!(reader.count_set(), 4);
        let set: Vec<u32> = (0..40)
            .filter(|d| reader.get(*d).unwrap() == Value::Bool(true))
            .collect();
        assert_eq!(set, vec![0, 9, 31, 32]);
    }

    #[test]
    fn test_false_values_and_gaps() {
        let column = BitColumn::default();
        let mut writer = column.writer();
        writer.add(0, &Value::Bool(false)).unwrap();
        writer.add(3, &Value::Bool(true)).unwrap();
        assert!(writer.add(2, &Value::Bool(true)).is_err());
        let data = Box::new(writer).finish(5).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();
        let values: Vec<_> = reader.iter().map(|v| v.unwrap()).collect();
        assert_eq!(
            values,
            vec![false, false, false, true, false]
                .into_iter()
                .map(Value::Bool)
                .collect::<Vec<_>>()
        );
    }
}
