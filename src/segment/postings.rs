//! Postings file writer
//!
//! File layout: the magic `FPST`, then the blocks of every term back to back.
//! Each block is
//!
//! - length: i32 big-endian, negated on the final block of a term
//! - info: version, count, last id, max weight, compression flag and the
//!   byte-encoded min/max field length (fixed 16 bytes)
//! - body: a block record, LZ4 compressed when that pays off
//!
//! Terms with fewer than `inline_limit` postings that never filled a block
//! are kept inside their `TermInfo` and use no file bytes.

use byteorder::{BigEndian, ByteOrder};

use super::block::{BlockIds, BlockPayloads, BlockRecord, BlockWeights, MAX_BLOCK_POSTINGS};
use super::terminfo::{TermInfo, TermStorage};
use super::types::{length_to_byte, DocNum};
use crate::config::WriterConfig;
use crate::error::{FathomError, Result};
use crate::schema::PostingFormat;

pub const POSTINGS_MAGIC: &[u8; 4] = b"FPST";

pub const BLOCK_INFO_VERSION: u8 = 1;
pub const BLOCK_INFO_LEN: usize = 16;

/// Skip summary written ahead of every block body
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockInfo {
    pub count: u32,
    /// Last numeric id in the block, 0 for text ids
    pub last_id: DocNum,
    pub max_weight: f32,
    pub compressed: bool,
    pub min_length: u8,
    pub max_length: u8,
}

impl BlockInfo {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(BLOCK_INFO_VERSION);
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.last_id.to_be_bytes());
        out.extend_from_slice(&self.max_weight.to_be_bytes());
        out.push(self.compressed as u8);
        out.push(self.min_length);
        out.push(self.max_length);
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_INFO_LEN {
            return Err(FathomError::format("block info truncated"));
        }
        if data[0] != BLOCK_INFO_VERSION {
            return Err(FathomError::format(format!(
                "unknown block info version {}",
                data[0]
            )));
        }
        Ok(Self {
            count: BigEndian::read_u32(&data[1..5]),
            last_id: BigEndian::read_u32(&data[5..9]),
            max_weight: BigEndian::read_f32(&data[9..13]),
            compressed: data[13] != 0,
            min_length: data[14],
            max_length: data[15],
        })
    }
}

/// Id of one posting: a document number, or a term for term vectors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostingId<'a> {
    Doc(DocNum),
    Term(&'a [u8]),
}

impl From<DocNum> for PostingId<'_> {
    fn from(docnum: DocNum) -> Self {
        PostingId::Doc(docnum)
    }
}

impl<'a> From<&'a [u8]> for PostingId<'a> {
    fn from(term: &'a [u8]) -> Self {
        PostingId::Term(term)
    }
}

/// Postings of the current block
#[derive(Default)]
struct PendingBlock {
    numeric: Vec<DocNum>,
    text: Vec<Vec<u8>>,
    weights: Vec<f32>,
    payloads: Vec<Vec<u8>>,
    min_length: u32,
    max_length: u32,
}

impl PendingBlock {
    fn len(&self) -> usize {
        self.weights.len()
    }

    fn clear(&mut self) {
        self.numeric.clear();
        self.text.clear();
        self.weights.clear();
        self.payloads.clear();
    }
}

struct OpenTerm {
    format: PostingFormat,
    info: TermInfo,
    /// File offset of the term's first block
    start: u64,
    /// Header position of the most recently flushed block
    last_header: Option<usize>,
    text_ids: Option<bool>,
    last_doc: Option<DocNum>,
    last_term: Option<Vec<u8>>,
}

/// Writer for a postings file
pub struct PostingsWriter {
    block_limit: usize,
    inline_limit: usize,
    compress_threshold: usize,
    compress: bool,
    data: Vec<u8>,
    block: PendingBlock,
    term: Option<OpenTerm>,
    blocks_written: u64,
}

impl PostingsWriter {
    pub fn new(config: &WriterConfig) -> Self {
        Self {
            block_limit: config.block_limit.clamp(1, MAX_BLOCK_POSTINGS),
            inline_limit: config.inline_limit.min(MAX_BLOCK_POSTINGS),
            compress_threshold: config.compress_threshold,
            compress: config.compress_blocks,
            data: POSTINGS_MAGIC.to_vec(),
            block: PendingBlock::default(),
            term: None,
            blocks_written: 0,
        }
    }

    /// Never inline; used for term vectors, which are addressed by offset
    pub fn without_inlining(mut self) -> Self {
        self.inline_limit = 0;
        self
    }

    pub fn start_postings(&mut self, format: PostingFormat) -> Result<()> {
        if self.term.is_some() {
            return Err(FathomError::state(
                "start_postings called while a term is open",
            ));
        }
        self.block.clear();
        self.term = Some(OpenTerm {
            format,
            info: TermInfo::default(),
            start: self.data.len() as u64,
            last_header: None,
            text_ids: None,
            last_doc: None,
            last_term: None,
        });
        Ok(())
    }

    pub fn add_posting<'a>(
        &mut self,
        id: impl Into<PostingId<'a>>,
        weight: f32,
        payload: &[u8],
        length: u32,
    ) -> Result<()> {
        let id = id.into();
        let term = self
            .term
            .as_mut()
            .ok_or_else(|| FathomError::state("add_posting called outside a term"))?;

        if let Some(size) = term.format.payload_size {
            if payload.len() != size {
                return Err(FathomError::invalid_value(format!(
                    "payload of {} bytes for a {}-byte posting format",
                    payload.len(),
                    size
                )));
            }
        }

        let is_text = matches!(id, PostingId::Term(_));
        if *term.text_ids.get_or_insert(is_text) != is_text {
            return Err(FathomError::state("mixed document and term ids in one list"));
        }

        match id {
            PostingId::Doc(docnum) => {
                if let Some(last) = term.last_doc {
                    if docnum <= last {
                        return Err(FathomError::state(format!(
                            "posting id {} not greater than previous id {}",
                            docnum, last
                        )));
                    }
                }
                term.last_doc = Some(docnum);
                term.info.add(Some(docnum), weight, length);
                self.block.numeric.push(docnum);
            }
            PostingId::Term(text) => {
                if let Some(last) = &term.last_term {
                    if text <= &last[..] {
                        return Err(FathomError::state(format!(
                            "posting id {:?} not greater than previous id {:?}",
                            String::from_utf8_lossy(text),
                            String::from_utf8_lossy(last)
                        )));
                    }
                }
                term.last_term = Some(text.to_vec());
                term.info.add(None, weight, length);
                self.block.text.push(text.to_vec());
            }
        }

        if self.block.len() == 0 {
            self.block.min_length = length;
            self.block.max_length = length;
        } else {
            self.block.min_length = self.block.min_length.min(length);
            self.block.max_length = self.block.max_length.max(length);
        }
        self.block.weights.push(weight);
        self.block.payloads.push(payload.to_vec());

        if self.block.len() >= self.block_limit {
            let format = term.format;
            let header = self.flush_block(format, is_text, false)?;
            if let Some(term) = self.term.as_mut() {
                term.last_header = Some(header);
            }
        }
        Ok(())
    }

    /// Close the current term and return its statistics and locator
    pub fn finish_postings(&mut self) -> Result<TermInfo> {
        let mut term = self
            .term
            .take()
            .ok_or_else(|| FathomError::state("finish_postings called outside a term"))?;

        let count = term.info.doc_freq as usize;
        let text_ids = term.text_ids.unwrap_or(false);
        if term.last_header.is_none() && count < self.inline_limit {
            let record = self.take_record(term.format, text_ids);
            term.info.storage = TermStorage::Inline(record.encode());
        } else {
            if self.block.len() > 0 {
                self.flush_block(term.format, text_ids, true)?;
            } else if let Some(header) = term.last_header {
                mark_last(&mut self.data, header);
            }
            term.info.storage = TermStorage::Extent {
                offset: term.start,
                length: self.data.len() as u64 - term.start,
            };
        }
        term.info.normalize();
        Ok(term.info)
    }

    fn take_record(&mut self, format: PostingFormat, text_ids: bool) -> BlockRecord {
        let ids = if text_ids {
            BlockIds::Text(std::mem::take(&mut self.block.text))
        } else {
            BlockIds::Numeric(std::mem::take(&mut self.block.numeric))
        };
        let weights = BlockWeights::minify(&self.block.weights);
        let payloads =
            BlockPayloads::minify(std::mem::take(&mut self.block.payloads), format.payload_size);
        self.block.clear();
        BlockRecord {
            ids,
            weights,
            payloads,
        }
    }

    /// Write the pending block; returns the position of its length prefix
    fn flush_block(&mut self, format: PostingFormat, text_ids: bool, last: bool) -> Result<usize> {
        let info = BlockInfo {
            count: self.block.len() as u32,
            last_id: if text_ids {
                0
            } else {
                self.block.numeric.last().copied().unwrap_or(0)
            },
            max_weight: self.block.weights.iter().copied().fold(0.0, f32::max),
            compressed: false,
            min_length: length_to_byte(self.block.min_length),
            max_length: length_to_byte(self.block.max_length),
        };
        let record = self.take_record(format, text_ids).encode();

        let (body, compressed) = if self.compress && record.len() > self.compress_threshold {
            let packed = lz4_flex::compress_prepend_size(&record);
            if packed.len() < record.len() {
                (packed, true)
            } else {
                (record, false)
            }
        } else {
            (record, false)
        };

        let total = BLOCK_INFO_LEN + body.len();
        let length = i32::try_from(total)
            .map_err(|_| FathomError::invalid_value(format!("block of {} bytes", total)))?;
        let header = self.data.len();
        self.data
            .extend_from_slice(&(if last { -length } else { length }).to_be_bytes());
        BlockInfo { compressed, ..info }.encode(&mut self.data);
        self.data.extend_from_slice(&body);
        self.blocks_written += 1;
        Ok(header)
    }

    pub fn is_term_open(&self) -> bool {
        self.term.is_some()
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Bytes written so far, magic included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() == POSTINGS_MAGIC.len()
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.term.is_some() {
            return Err(FathomError::state("postings closed with a term still open"));
        }
        Ok(self.data)
    }
}

/// Negate a block length already written at `header`
fn mark_last(data: &mut [u8], header: usize) {
    let length = BigEndian::read_i32(&data[header..header + 4]);
    BigEndian::write_i32(&mut data[header..header + 4], -length.abs());
}
