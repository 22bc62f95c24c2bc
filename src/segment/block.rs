//! Posting block records
//!
//! A block record holds the ids, weights and payloads of one block in a
//! minified form. The encoding is a version byte followed by three sections,
//! each written as `[kind: u8][varint length][bytes]`:
//!
//! - ids: numeric ids as a packed gap run (see `bitpack`), or text ids as
//!   varint-length-prefixed byte strings
//! - weights: absent (all 1.0), one f32, or one f32 per posting
//! - payloads: one joined buffer of fixed-size payloads, or a list of
//!   varint-length-prefixed byte strings

use byteorder::{BigEndian, ByteOrder};

use super::bitpack::{pack_ids, read_vint, take, unpack_ids, write_vint};
use crate::error::{FathomError, Result};

pub const BLOCK_RECORD_VERSION: u8 = 1;

/// Upper bound on postings per record, for blocks and inlined terms alike
pub const MAX_BLOCK_POSTINGS: usize = 1 << 16;

const IDS_NUMERIC: u8 = 0;
const IDS_TEXT: u8 = 1;

const WEIGHTS_ALL_ONE: u8 = 0;
const WEIGHTS_UNIFORM: u8 = 1;
const WEIGHTS_PER_POSTING: u8 = 2;

const PAYLOADS_FIXED: u8 = 0;
const PAYLOADS_VARIABLE: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum BlockIds {
    Numeric(Vec<u32>),
    Text(Vec<Vec<u8>>),
}

impl BlockIds {
    pub fn len(&self) -> usize {
        match self {
            BlockIds::Numeric(ids) => ids.len(),
            BlockIds::Text(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockWeights {
    AllOne,
    Uniform(f32),
    PerPosting(Vec<f32>),
}

impl BlockWeights {
    pub fn minify(weights: &[f32]) -> Self {
        match weights.first() {
            None => BlockWeights::AllOne,
            Some(&first) if weights.iter().all(|w| *w == first) => {
                if first == 1.0 {
                    BlockWeights::AllOne
                } else {
                    BlockWeights::Uniform(first)
                }
            }
            Some(_) => BlockWeights::PerPosting(weights.to_vec()),
        }
    }

    pub fn get(&self, i: usize) -> f32 {
        match self {
            BlockWeights::AllOne => 1.0,
            BlockWeights::Uniform(w) => *w,
            BlockWeights::PerPosting(ws) => ws.get(i).copied().unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockPayloads {
    Fixed { size: usize, data: Vec<u8> },
    Variable(Vec<Vec<u8>>),
}

impl BlockPayloads {
    /// Join payloads when the format fixes their size
    pub fn minify(payloads: Vec<Vec<u8>>, fixed_size: Option<usize>) -> Self {
        match fixed_size {
            Some(size) => BlockPayloads::Fixed {
                size,
                data: payloads.concat(),
            },
            None => BlockPayloads::Variable(payloads),
        }
    }

    pub fn get(&self, i: usize) -> &[u8] {
        match self {
            BlockPayloads::Fixed { size, data } => i
                .checked_mul(*size)
                .and_then(|start| Some(start..start.checked_add(*size)?))
                .and_then(|range| data.get(range))
                .unwrap_or(&[]),
            BlockPayloads::Variable(list) => list.get(i).map(|p| &p[..]).unwrap_or(&[]),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockRecord {
    pub ids: BlockIds,
    pub weights: BlockWeights,
    pub payloads: BlockPayloads,
}

impl BlockRecord {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let count = self.len();
        let mut out = vec![BLOCK_RECORD_VERSION];
        write_vint(&mut out, count as u32);

        let mut section = Vec::new();
        let kind = match &self.ids {
            BlockIds::Numeric(ids) => {
                pack_ids(ids, &mut section);
                IDS_NUMERIC
            }
            BlockIds::Text(ids) => {
                write_byte_strings(&mut section, ids);
                IDS_TEXT
            }
        };
        write_section(&mut out, kind, &section);

        section.clear();
        let kind = match &self.weights {
            BlockWeights::AllOne => WEIGHTS_ALL_ONE,
            BlockWeights::Uniform(w) => {
                section.extend_from_slice(&w.to_be_bytes());
                WEIGHTS_UNIFORM
            }
            BlockWeights::PerPosting(ws) => {
                for w in ws {
                    section.extend_from_slice(&w.to_be_bytes());
                }
                WEIGHTS_PER_POSTING
            }
        };
        write_section(&mut out, kind, &section);

        section.clear();
        let kind = match &self.payloads {
            BlockPayloads::Fixed { size, data } => {
                write_vint(&mut section, *size as u32);
                section.extend_from_slice(data);
                PAYLOADS_FIXED
            }
            BlockPayloads::Variable(list) => {
                write_byte_strings(&mut section, list);
                PAYLOADS_VARIABLE
            }
        };
        write_section(&mut out, kind, &section);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&version, mut rest) = data
            .split_first()
            .ok_or_else(|| FathomError::format("empty block record"))?;
        if version != BLOCK_RECORD_VERSION {
            return Err(FathomError::format(format!(
                "unknown block record version {}",
                version
            )));
        }
        let count = read_vint(&mut rest)? as usize;
        if count > MAX_BLOCK_POSTINGS {
            return Err(FathomError::format(format!(
                "block record claims {} postings",
                count
            )));
        }

        let (kind, section) = read_section(&mut rest)?;
        let ids = match kind {
            IDS_NUMERIC => BlockIds::Numeric(unpack_ids(section, count)?),
            IDS_TEXT => BlockIds::Text(read_byte_strings(section, count)?),
            other => return Err(FathomError::format(format!("unknown id kind {}", other))),
        };

        let (kind, section) = read_section(&mut rest)?;
        let weights = match kind {
            WEIGHTS_ALL_ONE if section.is_empty() => BlockWeights::AllOne,
            WEIGHTS_UNIFORM if section.len() == 4 => {
                BlockWeights::Uniform(BigEndian::read_f32(section))
            }
            WEIGHTS_PER_POSTING if section.len() / 4 == count && section.len() % 4 == 0 => {
                BlockWeights::PerPosting(
                    section.chunks_exact(4).map(BigEndian::read_f32).collect(),
                )
            }
            other => {
                return Err(FathomError::format(format!(
                    "bad weight section kind {} of {} bytes",
                    other,
                    section.len()
                )))
            }
        };

        let (kind, mut section) = read_section(&mut rest)?;
        let payloads = match kind {
            PAYLOADS_FIXED => {
                let size = read_vint(&mut section)? as usize;
                if size.checked_mul(count) != Some(section.len()) {
                    return Err(FathomError::format(format!(
                        "{} fixed payloads of {} bytes in a {} byte section",
                        count,
                        size,
                        section.len()
                    )));
                }
                BlockPayloads::Fixed {
                    size,
                    data: section.to_vec(),
                }
            }
            PAYLOADS_VARIABLE => BlockPayloads::Variable(read_byte_strings(section, count)?),
            other => {
                return Err(FathomError::format(format!("unknown payload kind {}", other)))
            }
        };

        if !rest.is_empty() {
            return Err(FathomError::format("trailing bytes after block record"));
        }
        Ok(Self {
            ids,
            weights,
            payloads,
        })
    }
}

fn write_section(out: &mut Vec<u8>, kind: u8, section: &[u8]) {
    out.push(kind);
    write_vint(out, section.len() as u32);
    out.extend_from_slice(section);
}

fn read_section<'a>(rest: &mut &'a [u8]) -> Result<(u8, &'a [u8])> {
    let kind = take(rest, 1, "section kind")?[0];
    let len = read_vint(rest)? as usize;
    Ok((kind, take(rest, len, "block record section")?))
}

fn write_byte_strings(out: &mut Vec<u8>, strings: &[Vec<u8>]) {
    for s in strings {
        write_vint(out, s.len() as u32);
        out.extend_from_slice(s);
    }
}

fn read_byte_strings(mut section: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
    // every string costs at least its length byte
    let mut out = Vec::with_capacity(count.min(section.len()));
    for _ in 0..count {
        let len = read_vint(&mut section)? as usize;
        out.push(take(&mut section, len, "byte string")?.to_vec());
    }
    if !section.is_empty() {
        return Err(FathomError::format("trailing bytes in byte string section"));
    }
    Ok(out)
}
