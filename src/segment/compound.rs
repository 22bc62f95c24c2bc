//! Compound segment file
//!
//! Bundles every file of a segment into one: the magic `FCMP`, the file
//! bodies back to back, a bincode directory of `(name, offset, length)`,
//! and finally the u64 big-endian offset of that directory.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::{FathomError, Result};

pub const COMPOUND_MAGIC: &[u8; 4] = b"FCMP";

pub fn build_compound(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let total: usize = files.iter().map(|(_, data)| data.len()).sum();
    let mut out = Vec::with_capacity(COMPOUND_MAGIC.len() + total + 64 * files.len() + 8);
    out.extend_from_slice(COMPOUND_MAGIC);

    let mut directory = Vec::with_capacity(files.len());
    for (name, data) in files {
        directory.push((name.clone(), out.len() as u64, data.len() as u64));
        out.extend_from_slice(data);
    }

    let directory_offset = out.len() as u64;
    bincode::serialize_into(&mut out, &directory)?;
    out.extend_from_slice(&directory_offset.to_be_bytes());
    Ok(out)
}

/// Sub-files of a compound file, sharing its buffer
#[derive(Debug)]
pub struct CompoundReader {
    data: Bytes,
    entries: BTreeMap<String, (usize, usize)>,
}

impl CompoundReader {
    pub fn open(data: Bytes) -> Result<Self> {
        if data.len() < COMPOUND_MAGIC.len() + 8 || &data[..4] != COMPOUND_MAGIC {
            return Err(FathomError::format("bad compound file magic"));
        }
        let trailer = data.len() - 8;
        let directory_offset = BigEndian::read_u64(&data[trailer..]) as usize;
        if directory_offset < COMPOUND_MAGIC.len() || directory_offset > trailer {
            return Err(FathomError::format(format!(
                "compound directory offset {} out of range",
                directory_offset
            )));
        }
        let directory: Vec<(String, u64, u64)> =
            bincode::deserialize(&data[directory_offset..trailer])?;

        let mut entries = BTreeMap::new();
        for (name, offset, length) in directory {
            let in_bounds = offset >= COMPOUND_MAGIC.len() as u64
                && offset
                    .checked_add(length)
                    .map_or(false, |end| end <= directory_offset as u64);
            if !in_bounds {
                return Err(FathomError::format(format!(
                    "compound entry {} at {}+{} overlaps the directory",
                    name, offset, length
                )));
            }
            // both fit below directory_offset, itself a usize
            entries.insert(name, (offset as usize, length as usize));
        }
        Ok(Self { data, entries })
    }

    pub fn get(&self, name: &str) -> Result<Bytes> {
        let (start, len) = self.entries.get(name).ok_or_else(|| {
            FathomError::format(format!("compound file has no entry {}", name))
        })?;
        Ok(self.data.slice(*start..*start + *len))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_slice_the_buffer() {
        let files = vec![
            ("seg_000001.trm".to_string(), b"terms".to_vec()),
            ("seg_000001.pst".to_string(), Vec::new()),
            ("seg_000001_title.col".to_string(), vec![7; 300]),
        ];
        let reader = CompoundReader::open(Bytes::from(build_compound(&files).unwrap())).unwrap();
        assert_eq!(&reader.get("seg_000001.trm").unwrap()[..], b"terms");
        assert!(reader.get("seg_000001.pst").unwrap().is_empty());
        assert_eq!(reader.get("seg_000001_title.col").unwrap().len(), 300);
        assert!(reader.get("missing").is_err());
        assert_eq!(reader.names().count(), 3);
    }

    #[test]
    fn test_corrupt_trailer() {
        let mut data = build_compound(&[("a".to_string(), b"x".to_vec())]).unwrap();
        let len = data.len();
        data[len - 8..].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            CompoundReader::open(Bytes::from(data)),
            Err(FathomError::Format(_))
        ));
    }

    #[test]
    fn test_entry_length_cannot_wrap() {
        let mut data = COMPOUND_MAGIC.to_vec();
        data.extend_from_slice(b"x");
        let directory_offset = data.len() as u64;
        let directory = vec![("a".to_string(), 4u64, u64::MAX - 1)];
        bincode::serialize_into(&mut data, &directory).unwrap();
        data.extend_from_slice(&directory_offset.to_be_bytes());
        assert!(matches!(
            CompoundReader::open(Bytes::from(data)),
            Err(FathomError::Format(_))
        ));
    }
}
