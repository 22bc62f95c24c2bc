//! Per-term statistics and storage locator
//!
//! Fixed layout, big-endian:
//! `weight: f64, doc_freq: u32, min_length: u32, max_length: u32,
//! max_weight: f32, min_id: u32, max_id: u32, kind: u8` followed by either
//! `offset: u64, length: u64` (postings file extent) or the inline block
//! record bytes.

use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;

use super::types::DocNum;
use crate::error::{FathomError, Result};

const KIND_EXTENT: u8 = 0;
const KIND_INLINE: u8 = 1;

const HEADER_LEN: usize = 8 + 4 * 4 + 4 + 4 + 1;

/// Where a term's postings live
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TermStorage {
    /// Byte range of the term's blocks in the postings file
    Extent { offset: u64, length: u64 },
    /// Encoded block record holding every posting
    Inline(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TermInfo {
    /// Sum of posting weights
    pub weight: f64,
    pub doc_freq: u32,
    pub min_length: u32,
    pub max_length: u32,
    pub max_weight: f32,
    pub min_id: DocNum,
    pub max_id: DocNum,
    pub storage: TermStorage,
}

impl Default for TermInfo {
    fn default() -> Self {
        Self {
            weight: 0.0,
            doc_freq: 0,
            min_length: u32::MAX,
            max_length: 0,
            max_weight: 0.0,
            min_id: DocNum::MAX,
            max_id: 0,
            storage: TermStorage::Extent {
                offset: 0,
                length: 0,
            },
        }
    }
}

impl TermInfo {
    /// Fold one posting into the aggregates
    pub(crate) fn add(&mut self, id: Option<DocNum>, weight: f32, length: u32) {
        self.weight += weight as f64;
        self.doc_freq += 1;
        self.min_length = self.min_length.min(length);
        self.max_length = self.max_length.max(length);
        self.max_weight = self.max_weight.max(weight);
        if let Some(id) = id {
            self.min_id = self.min_id.min(id);
            self.max_id = self.max_id.max(id);
        }
    }

    /// Replace untouched minimums so empty aggregates encode as zeros
    pub(crate) fn normalize(&mut self) {
        if self.min_length == u32::MAX {
            self.min_length = 0;
        }
        if self.min_id == DocNum::MAX && self.max_id == 0 {
            self.min_id = 0;
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.storage, TermStorage::Inline(_))
    }

    /// `(offset, length)` in the postings file for non-inline terms
    pub fn extent(&self) -> Option<(u64, u64)> {
        match self.storage {
            TermStorage::Extent { offset, length } => Some((offset, length)),
            TermStorage::Inline(_) => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.extend_from_slice(&self.weight.to_be_bytes());
        out.extend_from_slice(&self.doc_freq.to_be_bytes());
        out.extend_from_slice(&self.min_length.to_be_bytes());
        out.extend_from_slice(&self.max_length.to_be_bytes());
        out.extend_from_slice(&self.max_weight.to_be_bytes());
        out.extend_from_slice(&self.min_id.to_be_bytes());
        out.extend_from_slice(&self.max_id.to_be_bytes());
        match &self.storage {
            TermStorage::Extent { offset, length } => {
                out.push(KIND_EXTENT);
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
            }
            TermStorage::Inline(record) => {
                out.push(KIND_INLINE);
                out.extend_from_slice(record);
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(FathomError::format(format!(
                "term info of {} bytes is shorter than its header",
                data.len()
            )));
        }
        let mut input = data;
        let truncated = |e| FathomError::truncated("term info", e);
        let weight = input.read_f64::<BigEndian>().map_err(truncated)?;
        let doc_freq = input.read_u32::<BigEndian>().map_err(truncated)?;
        let min_length = input.read_u32::<BigEndian>().map_err(truncated)?;
        let max_length = input.read_u32::<BigEndian>().map_err(truncated)?;
        let max_weight = input.read_f32::<BigEndian>().map_err(truncated)?;
        let min_id = input.read_u32::<BigEndian>().map_err(truncated)?;
        let max_id = input.read_u32::<BigEndian>().map_err(truncated)?;
        let kind = input.read_u8().map_err(truncated)?;
        let storage = match kind {
            KIND_EXTENT => {
                let offset = input.read_u64::<BigEndian>().map_err(truncated)?;
                let length = input.read_u64::<BigEndian>().map_err(truncated)?;
                TermStorage::Extent { offset, length }
            }
            KIND_INLINE => TermStorage::Inline(input.to_vec()),
            other => {
                return Err(FathomError::format(format!(
                    "unknown term storage kind {}",
                    other
                )))
            }
        };
        Ok(Self {
            weight,
            doc_freq,
            min_length,
            max_length,
            max_weight,
            min_id,
            max_id,
            storage,
        })
    }
}
