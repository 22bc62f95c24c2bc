//! Posting list matcher
//!
//! Walks a term's blocks in order. Block infos are read eagerly as the
//! matcher moves, but a block's record is only decoded (and decompressed)
//! when a posting inside it is accessed, so `skip_to` and `skip_to_quality`
//! can pass over whole blocks without touching their bodies.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use super::block::{BlockIds, BlockRecord};
use super::postings::{BlockInfo, BLOCK_INFO_LEN, POSTINGS_MAGIC};
use super::terminfo::{TermInfo, TermStorage};
use super::types::DocNum;
use crate::error::{FathomError, Result};

enum Source {
    File {
        data: Bytes,
        /// Position of the current block's length prefix
        header: usize,
        /// Absolute block length
        length: usize,
        /// End of the term's extent
        end: usize,
    },
    Inline,
}

pub struct Matcher {
    source: Source,
    info: BlockInfo,
    last: bool,
    record: Option<BlockRecord>,
    pos: usize,
    active: bool,
}

impl Matcher {
    /// Matcher over the postings described by `info`
    pub fn new(postings: Bytes, info: &TermInfo) -> Result<Self> {
        match &info.storage {
            TermStorage::Inline(bytes) => Self::inline(BlockRecord::decode(bytes)?),
            TermStorage::Extent { offset, length } => {
                let end = offset
                    .checked_add(*length)
                    .filter(|end| *end <= postings.len() as u64)
                    .ok_or_else(|| {
                        FathomError::format(format!(
                            "postings extent {}+{} beyond file of {} bytes",
                            offset,
                            length,
                            postings.len()
                        ))
                    })?;
                Self::at(postings, *offset as usize, end as usize)
            }
        }
    }

    /// Matcher over a list starting at `offset`, ending at its last block
    pub fn at_offset(postings: Bytes, offset: u64) -> Result<Self> {
        let end = postings.len();
        Self::at(postings, offset as usize, end)
    }

    fn at(data: Bytes, offset: usize, end: usize) -> Result<Self> {
        if data.len() < POSTINGS_MAGIC.len() || &data[..POSTINGS_MAGIC.len()] != POSTINGS_MAGIC {
            return Err(FathomError::format("bad postings file magic"));
        }
        if offset < POSTINGS_MAGIC.len() || offset >= end {
            return Err(FathomError::format(format!(
                "postings offset {} outside {}..{}",
                offset,
                POSTINGS_MAGIC.len(),
                end
            )));
        }
        let mut matcher = Self {
            source: Source::File {
                data,
                header: offset,
                length: 0,
                end,
            },
            info: BlockInfo {
                count: 0,
                last_id: 0,
                max_weight: 0.0,
                compressed: false,
                min_length: 0,
                max_length: 0,
            },
            last: false,
            record: None,
            pos: 0,
            active: true,
        };
        matcher.read_block_header()?;
        Ok(matcher)
    }

    fn inline(record: BlockRecord) -> Result<Self> {
        let last_id = match &record.ids {
            BlockIds::Numeric(ids) => ids.last().copied().unwrap_or(0),
            BlockIds::Text(_) => 0,
        };
        let count = record.len();
        let max_weight = (0..count)
            .map(|i| record.weights.get(i))
            .fold(0.0, f32::max);
        Ok(Self {
            source: Source::Inline,
            info: BlockInfo {
                count: count as u32,
                last_id,
                max_weight,
                compressed: false,
                min_length: 0,
                max_length: 0,
            },
            last: true,
            record: Some(record),
            pos: 0,
            active: count > 0,
        })
    }

    /// Parse the length prefix and info of the block at the current header
    fn read_block_header(&mut self) -> Result<()> {
        let (data, header, length, end) = match &mut self.source {
            Source::File {
                data,
                header,
                length,
                end,
            } => (data, *header, length, *end),
            Source::Inline => return Ok(()),
        };
        if header + 4 > end {
            return Err(FathomError::format("block length prefix beyond extent"));
        }
        let raw = BigEndian::read_i32(&data[header..header + 4]);
        if raw == 0 {
            return Err(FathomError::format(format!("zero block length at {}", header)));
        }
        let abs = raw.unsigned_abs() as usize;
        if abs < BLOCK_INFO_LEN || header + 4 + abs > end {
            return Err(FathomError::format(format!(
                "block length {} at {} out of range",
                raw, header
            )));
        }
        self.info = BlockInfo::decode(&data[header + 4..header + 4 + BLOCK_INFO_LEN])?;
        if self.info.count == 0 {
            return Err(FathomError::format(format!("empty block at {}", header)));
        }
        *length = abs;
        self.last = raw < 0;
        self.record = None;
        self.pos = 0;
        Ok(())
    }

    /// Move to the following block, or deactivate after the last one
    fn advance_block(&mut self) -> Result<()> {
        if self.last {
            self.active = false;
            return Ok(());
        }
        if let Source::File { header, length, .. } = &mut self.source {
            *header += 4 + *length;
        }
        self.read_block_header()
    }

    fn record(&mut self) -> Result<&BlockRecord> {
        if !self.active {
            return Err(FathomError::state("matcher is exhausted"));
        }
        if self.record.is_none() {
            let (data, header, length) = match &self.source {
                Source::File {
                    data,
                    header,
                    length,
                    ..
                } => (data, *header, *length),
                Source::Inline => return Err(FathomError::state("inline record missing")),
            };
            let body = &data[header + 4 + BLOCK_INFO_LEN..header + 4 + length];
            let record = if self.info.compressed {
                let raw = lz4_flex::decompress_size_prepended(body).map_err(|e| {
                    FathomError::format(format!("block decompression failed: {}", e))
                })?;
                BlockRecord::decode(&raw)?
            } else {
                BlockRecord::decode(body)?
            };
            if record.len() != self.info.count as usize {
                return Err(FathomError::format(format!(
                    "block info says {} postings, record holds {}",
                    self.info.count,
                    record.len()
                )));
            }
            self.record = Some(record);
        }
        self.record
            .as_ref()
            .ok_or_else(|| FathomError::state("block record not loaded"))
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Advance to the next posting; false once the list is exhausted
    pub fn next(&mut self) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        self.pos += 1;
        if self.pos >= self.info.count as usize {
            self.advance_block()?;
        }
        Ok(self.active)
    }

    pub fn id(&mut self) -> Result<DocNum> {
        let pos = self.pos;
        match &self.record()?.ids {
            BlockIds::Numeric(ids) => Ok(ids[pos]),
            BlockIds::Text(_) => Err(FathomError::state("term vector postings have text ids")),
        }
    }

    /// Id of a term vector posting
    pub fn term(&mut self) -> Result<&[u8]> {
        let pos = self.pos;
        match &self.record()?.ids {
            BlockIds::Text(ids) => Ok(&ids[pos]),
            BlockIds::Numeric(_) => Err(FathomError::state("postings have numeric ids")),
        }
    }

    pub fn weight(&mut self) -> Result<f32> {
        let pos = self.pos;
        Ok(self.record()?.weights.get(pos))
    }

    pub fn payload(&mut self) -> Result<&[u8]> {
        let pos = self.pos;
        Ok(self.record()?.payloads.get(pos))
    }

    /// Upper bound on the weight of any posting in the current block
    pub fn block_quality(&self) -> f32 {
        self.info.max_weight
    }

    pub fn block_info(&self) -> &BlockInfo {
        &self.info
    }

    /// Whether the current block's body has been decoded
    pub fn is_block_loaded(&self) -> bool {
        self.record.is_some()
    }

    /// Move to the first posting with id >= `target`
    pub fn skip_to(&mut self, target: DocNum) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        while self.info.last_id < target {
            if self.last {
                self.active = false;
                return Ok(false);
            }
            self.advance_block()?;
        }
        while self.id()? < target {
            self.next()?;
        }
        Ok(true)
    }

    /// Skip blocks whose max weight is not above `min_quality`; returns the
    /// number of blocks skipped
    pub fn skip_to_quality(&mut self, min_quality: f32) -> Result<usize> {
        let mut skipped = 0;
        while self.active && self.info.max_weight <= min_quality {
            self.advance_block()?;
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Every remaining id, exhausting the matcher
    pub fn all_ids(&mut self) -> Result<Vec<DocNum>> {
        let mut ids = Vec::new();
        while self.active {
            ids.push(self.id()?);
            self.next()?;
        }
        Ok(ids)
    }

    /// Every remaining `(id, weight, payload)`, exhausting the matcher
    pub fn all_postings(&mut self) -> Result<Vec<(DocNum, f32, Vec<u8>)>> {
        let mut out = Vec::new();
        while self.active {
            let id = self.id()?;
            let weight = self.weight()?;
            let payload = self.payload()?.to_vec();
            out.push((id, weight, payload));
            self.next()?;
        }
        Ok(out)
    }

    /// Every remaining term vector entry, exhausting the matcher
    pub fn all_terms(&mut self) -> Result<Vec<(Vec<u8>, f32, Vec<u8>)>> {
        let mut out = Vec::new();
        while self.active {
            let term = self.term()?.to_vec();
            let weight = self.weight()?;
            let payload = self.payload()?.to_vec();
            out.push((term, weight, payload));
            self.next()?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::schema::PostingFormat;
    use crate::segment::postings::PostingsWriter;

    fn write_term(postings: &[(u32, f32)], block_limit: usize) -> (Bytes, TermInfo) {
        let config = WriterConfig::default()
            .with_block_limit(block_limit)
            .with_compress_threshold(8);
        let mut writer = PostingsWriter::new(&config);
        writer.start_postings(PostingFormat::default()).unwrap();
        for (id, weight) in postings {
            writer.add_posting(*id, *weight, b"", 1).unwrap();
        }
        let info = writer.finish_postings().unwrap();
        (Bytes::from(writer.into_bytes().unwrap()), info)
    }

    #[test]
    fn test_ids_strictly_increasing_across_blocks() {
        let postings: Vec<_> = (0..300u32).map(|i| (i * 7 + 1, 1.0)).collect();
        let (data, info) = write_term(&postings, 16);
        let ids = Matcher::new(data, &info).unwrap().all_ids().unwrap();
        assert_eq!(ids.len(), 300);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], info.min_id);
        assert_eq!(*ids.last().unwrap(), info.max_id);
    }

    #[test]
    fn test_skip_to_does_not_decode_skipped_blocks() {
        let postings: Vec<_> = (0..100u32).map(|i| (i * 2, 1.0)).collect();
        let (data, info) = write_term(&postings, 10);
        let mut matcher = Matcher::new(data, &info).unwrap();
        assert!(matcher.skip_to(151).unwrap());
        assert_eq!(matcher.id().unwrap(), 152);
        assert!(matcher.skip_to(152).unwrap());
        assert_eq!(matcher.id().unwrap(), 152);
        assert!(!matcher.skip_to(1_000).unwrap());
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_skip_lands_in_block_without_loading_earlier_ones() {
        let postings: Vec<_> = (0..40u32).map(|i| (i, 1.0)).collect();
        let (data, info) = write_term(&postings, 10);
        let mut matcher = Matcher::new(data, &info).unwrap();
        assert!(!matcher.is_block_loaded());
        matcher.skip_to(25).unwrap();
        assert_eq!(matcher.block_info().last_id, 29);
        assert_eq!(matcher.id().unwrap(), 25);
    }

    #[test]
    fn test_skip_to_quality_counts_blocks() {
        // blocks of 4: max weights 1, 1, 5, 1
        let mut postings: Vec<_> = (0..16u32).map(|i| (i, 1.0)).collect();
        postings[9].1 = 5.0;
        let (data, info) = write_term(&postings, 4);
        assert_eq!(info.max_weight, 5.0);

        let mut matcher = Matcher::new(data, &info).unwrap();
        assert_eq!(matcher.skip_to_quality(2.0).unwrap(), 2);
        assert_eq!(matcher.block_quality(), 5.0);
        assert_eq!(matcher.id().unwrap(), 8);
        matcher.next().unwrap();
        assert_eq!(matcher.weight().unwrap(), 5.0);
        assert_eq!(matcher.skip_to_quality(5.0).unwrap(), 2);
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_inline_matcher() {
        let (data, info) = write_term(&[(42, 3.0)], 16);
        assert!(info.is_inline());
        let mut matcher = Matcher::new(data, &info).unwrap();
        assert_eq!(matcher.id().unwrap(), 42);
        assert_eq!(matcher.weight().unwrap(), 3.0);
        assert!(!matcher.next().unwrap());
    }

    #[test]
    fn test_inline_term_skips_on_quality() {
        let (data, info) = write_term(&[(5, 2.0)], 16);
        assert!(info.is_inline());

        let mut matcher = Matcher::new(data.clone(), &info).unwrap();
        assert_eq!(matcher.block_quality(), 2.0);
        assert_eq!(matcher.skip_to_quality(1.5).unwrap(), 0);
        assert!(matcher.is_active());
        assert_eq!(matcher.id().unwrap(), 5);

        // the only block is not above the bar
        let mut matcher = Matcher::new(data.clone(), &info).unwrap();
        assert_eq!(matcher.skip_to_quality(2.0).unwrap(), 1);
        assert!(!matcher.is_active());
        assert!(!matcher.next().unwrap());
        assert!(matcher.id().is_err());

        let mut matcher = Matcher::new(data, &info).unwrap();
        assert_eq!(matcher.skip_to_quality(10.0).unwrap(), 1);
        assert!(!matcher.skip_to(0).unwrap());
    }

    #[test]
    fn test_corrupt_length_is_format_error() {
        let postings: Vec<_> = (0..20u32).map(|i| (i, 1.0)).collect();
        let (data, info) = write_term(&postings, 8);
        let (offset, _) = info.extent().unwrap();
        let mut bytes = data.to_vec();
        let at = offset as usize;
        bytes[at..at + 4].copy_from_slice(&0i32.to_be_bytes());
        assert!(matches!(
            Matcher::new(Bytes::from(bytes.clone()), &info),
            Err(FathomError::Format(_))
        ));

        bytes[at..at + 4].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            Matcher::new(Bytes::from(bytes.clone()), &info),
            Err(FathomError::Format(_))
        ));

        bytes[0] = b'X';
        assert!(Matcher::new(Bytes::from(bytes), &info).is_err());
    }
}
