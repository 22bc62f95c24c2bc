//! Table of contents: the durable list of active segments
//!
//! Each commit writes a new generation `_toc_<generation>.bin`:
//! 1. write `_toc_<generation>.bin.tmp` and fsync
//! 2. rename over the final name and fsync the directory
//! 3. only then delete older generations
//!
//! The file is the magic `FTOC`, a u32 format version, the u32 CRC32 of the
//! payload, then the bincode payload.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use super::types::{FieldId, SegmentId};
use crate::error::{FathomError, Result};
use crate::storage::Storage;

pub const TOC_MAGIC: &[u8; 4] = b"FTOC";
pub const TOC_PREFIX: &str = "_toc_";
const TOC_SUFFIX: &str = ".bin";
const HEADER_LEN: usize = 12;

/// Metadata of one committed segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    /// TOC generation that first published the segment
    pub generation: u64,
    pub doc_count_all: u32,
    /// Serialized roaring bitmap of deleted docnums
    pub deleted: Vec<u8>,
    pub deleted_count: u32,
    /// Sum of field lengths per indexed field
    pub field_length_totals: BTreeMap<String, u64>,
    pub compound: bool,
    pub size_bytes: u64,
    /// Files owned by the segment
    pub files: Vec<String>,
}

impl SegmentMeta {
    pub fn new(id: SegmentId, generation: u64, doc_count_all: u32) -> Self {
        Self {
            id,
            generation,
            doc_count_all,
            deleted: Vec::new(),
            deleted_count: 0,
            field_length_totals: BTreeMap::new(),
            compound: false,
            size_bytes: 0,
            files: Vec::new(),
        }
    }

    /// Live documents
    pub fn doc_count(&self) -> u32 {
        self.doc_count_all - self.deleted_count
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }

    pub fn deleted_set(&self) -> Result<RoaringBitmap> {
        if self.deleted.is_empty() {
            return Ok(RoaringBitmap::new());
        }
        RoaringBitmap::deserialize_from(&self.deleted[..])
            .map_err(|e| FathomError::truncated("deleted set", e))
    }

    pub fn set_deleted(&mut self, deleted: &RoaringBitmap) -> Result<()> {
        self.deleted.clear();
        if !deleted.is_empty() {
            deleted.serialize_into(&mut self.deleted)?;
        }
        self.deleted_count = deleted.len() as u32;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    pub version: u32,
    pub generation: u64,
    /// Field numbering shared by every segment; ids are positions
    pub fields: Vec<String>,
    pub next_segment_id: SegmentId,
    pub segments: Vec<SegmentMeta>,
}

impl Toc {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            fields: Vec::new(),
            next_segment_id: SegmentId::new(0),
            segments: Vec::new(),
        }
    }

    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f == name)
            .map(|i| i as FieldId)
    }

    /// Append unnumbered field names, keeping existing ids stable
    pub fn ensure_fields<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if self.field_id(name).is_none() {
                if self.fields.len() > FieldId::MAX as usize {
                    return Err(FathomError::invalid_value("too many fields"));
                }
                self.fields.push(name.to_string());
            }
        }
        Ok(())
    }

    pub fn segment(&self, id: SegmentId) -> Option<&SegmentMeta> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn doc_count_all(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count_all as u64).sum()
    }

    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count() as u64).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }

    pub fn file_name(generation: u64) -> String {
        format!("{}{}{}", TOC_PREFIX, generation, TOC_SUFFIX)
    }

    /// Generation encoded in a TOC file name
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_prefix(TOC_PREFIX)?
            .strip_suffix(TOC_SUFFIX)?
            .parse()
            .ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(TOC_MAGIC);
        out.extend_from_slice(&Self::VERSION.to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN || &data[..4] != TOC_MAGIC {
            return Err(FathomError::format("bad TOC magic"));
        }
        let version = BigEndian::read_u32(&data[4..8]);
        if version != Self::VERSION {
            return Err(FathomError::format(format!("unknown TOC version {}", version)));
        }
        let expected = BigEndian::read_u32(&data[8..12]);
        let payload = &data[HEADER_LEN..];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(FathomError::format(format!(
                "TOC checksum mismatch: stored {:08x}, computed {:08x}",
                expected, actual
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }

    /// Publish this TOC under its generation via a temp file and rename
    pub fn write(&self, storage: &dyn Storage) -> Result<()> {
        let name = Self::file_name(self.generation);
        let tmp = format!("{}.tmp", name);
        storage.write_file(&tmp, &self.encode()?)?;
        storage.rename(&tmp, &name)
    }

    /// Every TOC generation present, ascending
    pub fn generations(storage: &dyn Storage) -> Result<Vec<u64>> {
        let mut generations: Vec<u64> = storage
            .list()?
            .iter()
            .filter_map(|name| Self::parse_file_name(name))
            .collect();
        generations.sort_unstable();
        Ok(generations)
    }

    /// The newest TOC, if the index has one
    pub fn read_latest(storage: &dyn Storage) -> Result<Option<Self>> {
        match Self::generations(storage)?.last() {
            Some(&generation) => {
                let data = storage.read_file(&Self::file_name(generation))?;
                Self::decode(&data).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Default for Toc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    fn sample() -> Toc {
        let mut toc = Toc::new();
        toc.generation = 3;
        toc.ensure_fields(["title", "body"]).unwrap();
        let id = toc.allocate_segment_id();
        let mut meta = SegmentMeta::new(id, 3, 10);
        let mut deleted = RoaringBitmap::new();
        deleted.insert(2);
        deleted.insert(7);
        meta.set_deleted(&deleted).unwrap();
        meta.field_length_totals.insert("body".to_string(), 42);
        toc.segments.push(meta);
        toc
    }

    #[test]
    fn test_field_ids_are_stable() {
        let mut toc = sample();
        toc.ensure_fields(["body", "tags"]).unwrap();
        assert_eq!(toc.field_id("title"), Some(0));
        assert_eq!(toc.field_id("body"), Some(1));
        assert_eq!(toc.field_id("tags"), Some(2));
        assert_eq!(toc.field_id("nope"), None);
    }

    #[test]
    fn test_encode_checks_crc() {
        let toc = sample();
        let mut data = toc.encode().unwrap();
        let decoded = Toc::decode(&data).unwrap();
        assert_eq!(decoded, toc);
        assert_eq!(decoded.segments[0].doc_count(), 8);
        assert!(decoded.segments[0].deleted_set().unwrap().contains(7));

        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(matches!(Toc::decode(&data), Err(FathomError::Format(_))));
    }

    #[test]
    fn test_latest_generation_wins() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(Toc::read_latest(&storage).unwrap().is_none());

        let mut toc = sample();
        toc.write(&storage).unwrap();
        toc.generation = 12;
        toc.write(&storage).unwrap();
        assert_eq!(Toc::generations(&storage).unwrap(), vec![3, 12]);
        assert_eq!(Toc::read_latest(&storage).unwrap().unwrap().generation, 12);
        assert!(!storage.exists("_toc_12.bin.tmp"));
        assert_eq!(Toc::parse_file_name("_toc_12.bin.tmp"), None);
    }
}
