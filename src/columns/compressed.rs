//! LZ4-compressed bytes columns
//!
//! `CompressedColumn` stores each value inside a var bytes layout behind a
//! one byte tag: `RAW` for values at or under the threshold or that LZ4
//! does not shrink, `LZ4` otherwise. `CompressedBlockColumn` batches consecutive values into blocks of
//! roughly `block_size` uncompressed bytes, trading random-access latency for
//! a better ratio on small values.

use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use parking_lot::Mutex;

use super::varbytes::{VarBytesReader, VarBytesWriter};
use super::{
    check_docnum, read_footer, take, write_footer, ColumnReader, ColumnWriter, DocCursor,
    FinishedColumn, Value,
};
use crate::error::{FathomError, Result};

const TAG: u8 = 6;
const BLOCK_TAG: u8 = 7;

const VALUE_RAW: u8 = 0;
const VALUE_LZ4: u8 = 1;

/// Index entry: start docnum, offset, compressed length
const INDEX_ENTRY_LEN: usize = 4 + 8 + 4;

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| FathomError::format(format!("lz4 decompression failed: {}", e)))
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompressedColumn {
    pub default: Vec<u8>,
    /// Values of at most this many bytes are stored raw
    pub threshold: usize,
}

impl Default for CompressedColumn {
    fn default() -> Self {
        Self {
            default: Vec::new(),
            threshold: 64,
        }
    }
}

impl CompressedColumn {
    pub fn new(default: impl Into<Vec<u8>>) -> Self {
        Self {
            default: default.into(),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn writer(&self) -> CompressedWriter {
        // an empty stored value stands for the default
        CompressedWriter {
            inner: VarBytesWriter::new(Vec::new()),
            threshold: self.threshold,
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<CompressedReader> {
        let (body, doc_count) = read_footer(&data, TAG)?;
        Ok(CompressedReader {
            inner: VarBytesReader::from_body(body, doc_count)?,
            default: self.default.clone(),
        })
    }
}

pub struct CompressedWriter {
    inner: VarBytesWriter,
    threshold: usize,
}

impl CompressedWriter {
    fn tagged(&self, bytes: &[u8]) -> Vec<u8> {
        if bytes.len() > self.threshold {
            let packed = lz4_flex::compress_prepend_size(bytes);
            if packed.len() < bytes.len() {
                let mut out = Vec::with_capacity(packed.len() + 1);
                out.push(VALUE_LZ4);
                out.extend_from_slice(&packed);
                return out;
            }
        }
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(VALUE_RAW);
        out.extend_from_slice(bytes);
        out
    }
}

impl ColumnWriter for CompressedWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bytes = value.expect_bytes("compressed")?;
        let stored = self.tagged(bytes);
        self.inner.add_bytes(docnum, &stored)
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

pub struct CompressedReader {
    inner: VarBytesReader,
    default: Vec<u8>,
}

impl ColumnReader for CompressedReader {
    fn doc_count(&self) -> u32 {
        self.inner.doc_count()
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        let stored = self.inner.get_bytes(docnum)?;
        match stored.split_first() {
            None => Ok(Value::Bytes(self.default.clone())),
            Some((&VALUE_RAW, raw)) => Ok(Value::Bytes(raw.to_vec())),
            Some((&VALUE_LZ4, packed)) => Ok(Value::Bytes(decompress(packed)?)),
            Some((other, _)) => Err(FathomError::format(format!(
                "unknown compressed value tag {} for document {}",
                other, docnum
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompressedBlockColumn {
    pub default: Vec<u8>,
    /// Target uncompressed size of one block
    pub block_size: usize,
}

impl Default for CompressedBlockColumn {
    fn default() -> Self {
        Self {
            default: Vec::new(),
            // 32KB
            block_size: 32 * 1024,
        }
    }
}

impl CompressedBlockColumn {
    pub fn new(default: impl Into<Vec<u8>>, block_size: usize) -> Self {
        Self {
            default: default.into(),
            block_size: block_size.max(1),
        }
    }

    pub fn writer(&self) -> CompressedBlockWriter {
        CompressedBlockWriter {
            default: self.default.clone(),
            block_size: self.block_size,
            pending: Vec::new(),
            pending_bytes: 0,
            block_start: 0,
            data: Vec::new(),
            index: Vec::new(),
            cursor: DocCursor::default(),
        }
    }

    pub fn reader(&self, data: Bytes) -> Result<CompressedBlockReader> {
        let (body, doc_count) = read_footer(&data, BLOCK_TAG)?;
        if body.len() < 4 {
            return Err(FathomError::format("block column missing block count"));
        }
        let mut tail = &body[body.len() - 4..];
        let block_count = tail
            .read_u32::<BigEndian>()
            .map_err(|e| FathomError::truncated("block count", e))? as usize;
        let index_len = block_count * INDEX_ENTRY_LEN;
        if index_len > body.len() - 4 {
            return Err(FathomError::format("block index truncated"));
        }
        let blocks_end = body.len() - 4 - index_len;
        let mut input = &body[blocks_end..body.len() - 4];
        let mut index = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let entry = (|| -> std::io::Result<BlockEntry> {
                Ok(BlockEntry {
                    start: input.read_u32::<BigEndian>()?,
                    offset: input.read_u64::<BigEndian>()?,
                    len: input.read_u32::<BigEndian>()?,
                })
            })()
            .map_err(|e| FathomError::truncated("block index entry", e))?;
            if entry.offset + entry.len as u64 > blocks_end as u64 {
                return Err(FathomError::format("block extends past the data section"));
            }
            index.push(entry);
        }

        Ok(CompressedBlockReader {
            blocks: body.slice(..blocks_end),
            index,
            doc_count,
            recent: Mutex::new(None),
        })
    }
}

pub struct CompressedBlockWriter {
    default: Vec<u8>,
    block_size: usize,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
    block_start: u32,
    data: Vec<u8>,
    index: Vec<BlockEntry>,
    cursor: DocCursor,
}

impl CompressedBlockWriter {
    fn push(&mut self, bytes: Vec<u8>) {
        self.pending_bytes += bytes.len();
        self.pending.push(bytes);
        if self.pending_bytes >= self.block_size {
            self.flush_block();
        }
    }

    fn flush_block(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let count = self.pending.len();
        let mut raw = Vec::with_capacity(4 + count * 4 + self.pending_bytes);
        raw.extend_from_slice(&(count as u32).to_be_bytes());
        for value in &self.pending {
            raw.extend_from_slice(&(value.len() as u32).to_be_bytes());
        }
        for value in self.pending.drain(..) {
            raw.extend_from_slice(&value);
        }
        let compressed = lz4_flex::compress_prepend_size(&raw);
        self.index.push(BlockEntry {
            start: self.block_start,
            offset: self.data.len() as u64,
            len: compressed.len() as u32,
        });
        self.data.extend_from_slice(&compressed);
        self.block_start += count as u32;
        self.pending_bytes = 0;
    }
}

impl ColumnWriter for CompressedBlockWriter {
    fn add(&mut self, docnum: u32, value: &Value) -> Result<()> {
        let bytes = value.expect_bytes("compressed block")?.to_vec();
        let gap = self.cursor.advance(docnum)?;
        for _ in 0..gap {
            self.push(self.default.clone());
        }
        self.push(bytes);
        Ok(())
    }

    fn finish(mut self: Box<Self>, doc_count: u32) -> Result<FinishedColumn> {
        let gap = self.cursor.finish(doc_count)?;
        for _ in 0..gap {
            self.push(self.default.clone());
        }
        self.flush_block();

        let mut data = std::mem::take(&mut self.data);
        for entry in &self.index {
            data.extend_from_slice(&entry.start.to_be_bytes());
            data.extend_from_slice(&entry.offset.to_be_bytes());
            data.extend_from_slice(&entry.len.to_be_bytes());
        }
        data.extend_from_slice(&(self.index.len() as u32).to_be_bytes());
        write_footer(&mut data, BLOCK_TAG, doc_count);
        Ok(FinishedColumn {
            data,
            warnings: Vec::new(),
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct BlockEntry {
    start: u32,
    offset: u64,
    len: u32,
}

struct DecodedBlock {
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl DecodedBlock {
    fn decode(compressed: &[u8]) -> Result<Self> {
        let raw = decompress(compressed)?;
        let mut input = &raw[..];
        let count = input
            .read_u32::<BigEndian>()
            .map_err(|e| FathomError::truncated("block value count", e))?;
        let mut offsets = Vec::with_capacity(count as usize + 1);
        offsets.push(0);
        let mut total = 0usize;
        for _ in 0..count {
            let len = input
                .read_u32::<BigEndian>()
                .map_err(|e| FathomError::truncated("block value length", e))?;
            total += len as usize;
            offsets.push(total);
        }
        let data = take(&mut input, total)?.to_vec();
        Ok(Self { offsets, data })
    }

    fn value(&self, i: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(i)?;
        let end = *self.offsets.get(i + 1)?;
        Some(&self.data[start..end])
    }
}

pub struct CompressedBlockReader {
    blocks: Bytes,
    index: Vec<BlockEntry>,
    doc_count: u32,
    /// Last decompressed block
    recent: Mutex<Option<(usize, Arc<DecodedBlock>)>>,
}

impl CompressedBlockReader {
    fn block(&self, i: usize) -> Result<Arc<DecodedBlock>> {
        let mut recent = self.recent.lock();
        if let Some((cached, block)) = recent.as_ref() {
            if *cached == i {
                return Ok(block.clone());
            }
        }
        let entry = self.index[i];
        let start = entry.offset as usize;
        let block = Arc::new(DecodedBlock::decode(
            &self.blocks[start..start + entry.len as usize],
        )?);
        *recent = Some((i, block.clone()));
        Ok(block)
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }
}

impl ColumnReader for CompressedBlockReader {
    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn get(&self, docnum: u32) -> Result<Value> {
        check_docnum(docnum, self.doc_count)?;
        let i = self
            .index
            .partition_point(|entry| entry.start <= docnum)
            .checked_sub(1)
            .ok_or_else(|| FathomError::format("no block covers document"))?;
        let block = self.block(i)?;
        let value = block
            .value((docnum - self.index[i].start) as usize)
            .ok_or_else(|| {
                FathomError::format(format!("document {} missing from its block", docnum))
            })?;
        Ok(Value::Bytes(value.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_value_compression() {
        let column = CompressedColumn::new("n/a");
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        let long = "abc".repeat(500);
        writer.add(0, &Value::text(&long)).unwrap();
        writer.add(2, &Value::text("")).unwrap();
        let data = writer.finish(4).unwrap().data;
        assert!(data.len() < long.len());

        let reader = column.reader(Bytes::from(data)).unwrap();
        assert_eq!(reader.get(0).unwrap(), Value::text(&long));
        assert_eq!(reader.get(1).unwrap(), Value::text("n/a"));
        // an explicitly empty value is not confused with the default
        assert_eq!(reader.get(2).unwrap(), Value::text(""));
        assert_eq!(reader.get(3).unwrap(), Value::text("n/a"));
    }

    #[test]
    fn test_short_values_are_stored_raw() {
        let column = CompressedColumn::new(Vec::new());
        let writer = column.writer();
        assert_eq!(writer.tagged(b"xyz"), vec![VALUE_RAW, b'x', b'y', b'z']);
        // long but incompressible
        let noise: Vec<u8> = (0..200u32).map(|i| (i * 7919 % 251) as u8).collect();
        assert_eq!(writer.tagged(&noise)[0], VALUE_RAW);
        assert_eq!(writer.tagged(&[b'a'; 200])[0], VALUE_LZ4);

        let mut writer: Box<dyn ColumnWriter> = Box::new(writer);
        writer.add(0, &Value::text("xyz")).unwrap();
        writer.add(1, &Value::Bytes(noise.clone())).unwrap();
        let data = writer.finish(2).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();
        assert_eq!(reader.get(0).unwrap(), Value::text("xyz"));
        assert_eq!(reader.get(1).unwrap(), Value::Bytes(noise));
    }

    #[test]
    fn test_threshold_zero_still_skips_growth() {
        let column = CompressedColumn::new(Vec::new()).with_threshold(0);
        let writer = column.writer();
        assert_eq!(writer.tagged(b"ab"), vec![VALUE_RAW, b'a', b'b']);
        assert_eq!(writer.tagged(&[0; 64])[0], VALUE_LZ4);
    }

    #[test]
    fn test_block_boundaries() {
        let column = CompressedBlockColumn::new("-", 64);
        let mut writer: Box<dyn ColumnWriter> = Box::new(column.writer());
        for docnum in (0..200u32).step_by(2) {
            writer
                .add(docnum, &Value::Bytes(format!("value {}", docnum).into_bytes()))
                .unwrap();
        }
        let data = writer.finish(205).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();
        assert!(reader.block_count() > 1);

        for docnum in 0..205u32 {
            let expected = if docnum % 2 == 0 && docnum < 200 {
                Value::Bytes(format!("value {}", docnum).into_bytes())
            } else {
                Value::text("-")
            };
            assert_eq!(reader.get(docnum).unwrap(), expected);
        }
        // walking backwards crosses blocks and replaces the cached one
        assert_eq!(
            reader.get(0).unwrap(),
            Value::Bytes(b"value 0".to_vec())
        );
    }

    #[test]
    fn test_empty_block_column() {
        let column = CompressedBlockColumn::default();
        let data = Box::new(column.writer()).finish(0).unwrap().data;
        let reader = column.reader(Bytes::from(data)).unwrap();
        assert_eq!(reader.block_count(), 0);
        assert!(reader.get(0).is_err());
    }
}
