//! Term index backed by an FST
//!
//! Keys are the big-endian field id followed by the term bytes, so one
//! field's terms form a contiguous, ordered range. The FST value is the
//! offset of the term's `TermInfo` record in the records area.
//!
//! File layout: magic `FTRM`, u32 fst length, fst bytes, then records each
//! written as `u32 length ++ TermInfo`.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use super::terminfo::TermInfo;
use super::types::FieldId;
use crate::error::{FathomError, Result};

pub const TERMS_MAGIC: &[u8; 4] = b"FTRM";

/// Build the index key of `term` in `field`
pub fn term_key(field: FieldId, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + term.len());
    key.extend_from_slice(&field.to_be_bytes());
    key.extend_from_slice(term);
    key
}

fn split_key(key: &[u8]) -> Result<(FieldId, &[u8])> {
    if key.len() < 2 {
        return Err(FathomError::format("term key shorter than its field id"));
    }
    Ok((BigEndian::read_u16(&key[..2]), &key[2..]))
}

/// Builder for a term index; terms must arrive in key order
pub struct TermIndexWriter {
    builder: MapBuilder<Vec<u8>>,
    records: Vec<u8>,
    len: usize,
}

impl TermIndexWriter {
    pub fn new() -> Self {
        Self {
            builder: MapBuilder::memory(),
            records: Vec::new(),
            len: 0,
        }
    }

    pub fn add(&mut self, field: FieldId, term: &[u8], info: &TermInfo) -> Result<()> {
        let offset = self.records.len() as u64;
        self.builder
            .insert(term_key(field, term), offset)
            .map_err(|e| {
                FathomError::state(format!(
                    "term {:?} of field {} out of order: {}",
                    String::from_utf8_lossy(term),
                    field,
                    e
                ))
            })?;
        let record = info.encode();
        self.records
            .extend_from_slice(&(record.len() as u32).to_be_bytes());
        self.records.extend_from_slice(&record);
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let fst = self
            .builder
            .into_inner()
            .map_err(|e| FathomError::format(format!("term index build failed: {}", e)))?;
        let mut out = Vec::with_capacity(8 + fst.len() + self.records.len());
        out.extend_from_slice(TERMS_MAGIC);
        out.extend_from_slice(&(fst.len() as u32).to_be_bytes());
        out.extend_from_slice(&fst);
        out.extend_from_slice(&self.records);
        Ok(out)
    }
}

impl Default for TermIndexWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a term index
pub struct TermIndex {
    fst: Map<Bytes>,
    records: Bytes,
}

impl TermIndex {
    pub fn open(data: Bytes) -> Result<Self> {
        if data.len() < 8 || &data[..4] != TERMS_MAGIC {
            return Err(FathomError::format("bad term index magic"));
        }
        let fst_len = BigEndian::read_u32(&data[4..8]) as usize;
        if 8 + fst_len > data.len() {
            return Err(FathomError::format(format!(
                "term index fst of {} bytes exceeds file of {}",
                fst_len,
                data.len()
            )));
        }
        let fst = Map::new(data.slice(8..8 + fst_len))
            .map_err(|e| FathomError::format(format!("bad term index fst: {}", e)))?;
        Ok(Self {
            fst,
            records: data.slice(8 + fst_len..),
        })
    }

    fn record(&self, offset: u64) -> Result<TermInfo> {
        let start = offset as usize;
        let len = self
            .records
            .get(start..start + 4)
            .map(BigEndian::read_u32)
            .ok_or_else(|| FathomError::format("term record length beyond file"))?
            as usize;
        let body = self
            .records
            .get(start + 4..start + 4 + len)
            .ok_or_else(|| FathomError::format("term record beyond file"))?;
        TermInfo::decode(body)
    }

    pub fn get(&self, field: FieldId, term: &[u8]) -> Result<Option<TermInfo>> {
        match self.fst.get(term_key(field, term)) {
            Some(offset) => self.record(offset).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, field: FieldId, term: &[u8]) -> bool {
        self.fst.contains_key(term_key(field, term))
    }

    /// Every term of `field` in order
    pub fn terms(&self, field: FieldId) -> Result<Vec<(Vec<u8>, TermInfo)>> {
        let lower = field.to_be_bytes();
        let mut stream = match field.checked_add(1) {
            Some(next) => self
                .fst
                .range()
                .ge(lower)
                .lt(next.to_be_bytes())
                .into_stream(),
            None => self.fst.range().ge(lower).into_stream(),
        };
        let mut out = Vec::new();
        while let Some((key, offset)) = stream.next() {
            let (_, term) = split_key(key)?;
            out.push((term.to_vec(), self.record(offset)?));
        }
        Ok(out)
    }

    /// Every term of every field in key order
    pub fn all_terms(&self) -> Result<Vec<(FieldId, Vec<u8>, TermInfo)>> {
        let mut stream = self.fst.stream();
        let mut out = Vec::with_capacity(self.len());
        while let Some((key, offset)) = stream.next() {
            let (field, term) = split_key(key)?;
            out.push((field, term.to_vec(), self.record(offset)?));
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.fst.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fst.is_empty()
    }
}
