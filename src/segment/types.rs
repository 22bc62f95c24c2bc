//! Core types for segments

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document number within one segment (0..doc_count_all)
pub type DocNum = u32;

/// Position of a field name in the TOC field list
pub type FieldId = u16;

/// Segment identifier (monotonically increasing per index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Prefix shared by every file of this segment
    pub fn file_prefix(&self) -> String {
        format!("{}{:06}", SEGMENT_FILE_PREFIX, self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

pub const SEGMENT_FILE_PREFIX: &str = "seg_";

/// Per-segment file extensions
pub mod ext {
    pub const TERMS: &str = "trm";
    pub const POSTINGS: &str = "pst";
    pub const VECTORS: &str = "vps";
    pub const STORED: &str = "sto";
    pub const COLUMN: &str = "col";
    pub const LENGTHS: &str = "len";
    pub const VECTOR_OFFSETS: &str = "vpo";
    pub const COMPOUND: &str = "cmp";
}

/// Name of a whole-segment file such as `seg_000003.pst`
pub fn segment_file(id: SegmentId, ext: &str) -> String {
    format!("{}.{}", id.file_prefix(), ext)
}

/// Name of a per-field file such as `seg_000003_title.col`
pub fn field_file(id: SegmentId, field: &str, ext: &str) -> String {
    format!("{}_{}.{}", id.file_prefix(), field, ext)
}

// Field lengths are summarised in one byte per block, using the same
// 4-bit-mantissa float encoding as Lucene's SmallFloat.intToByte4: small
// values are exact, larger ones round down.

const MAX_INT4: u32 = long_to_int4(i32::MAX as u64);
const NUM_FREE_VALUES: u32 = 255 - MAX_INT4;

const fn long_to_int4(i: u64) -> u32 {
    let num_bits = 64 - i.leading_zeros();
    if num_bits < 4 {
        i as u32
    } else {
        let shift = num_bits - 4;
        let mut encoded = (i >> shift) as u32;
        encoded &= 0x07;
        encoded |= (shift + 1) << 3;
        encoded
    }
}

fn int4_to_long(i: u32) -> u64 {
    let bits = (i & 0x07) as u64;
    let shift = (i >> 3) as i32 - 1;
    if shift == -1 {
        bits
    } else {
        (bits | 0x08) << shift
    }
}

/// Encode a field length into one byte, rounding down
pub fn length_to_byte(length: u32) -> u8 {
    let length = length.min(i32::MAX as u32);
    if length < NUM_FREE_VALUES {
        length as u8
    } else {
        (NUM_FREE_VALUES + long_to_int4((length - NUM_FREE_VALUES) as u64)) as u8
    }
}

pub fn byte_to_length(byte: u8) -> u32 {
    let i = byte as u32;
    if i < NUM_FREE_VALUES {
        i
    } else {
        let decoded = NUM_FREE_VALUES as u64 + int4_to_long(i - NUM_FREE_VALUES);
        decoded.min(i32::MAX as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_names() {
        let id = SegmentId::new(42);
        assert_eq!(segment_file(id, ext::POSTINGS), "seg_000042.pst");
        assert_eq!(field_file(id, "title", ext::COLUMN), "seg_000042_title.col");
        assert_eq!(id.next(), SegmentId(43));
    }

    #[test]
    fn test_length_byte_small_values_exact() {
        assert_eq!(NUM_FREE_VALUES, 24);
        for length in 0..=40 {
            assert_eq!(byte_to_length(length_to_byte(length)), length);
        }
    }

    #[test]
    fn test_length_byte_monotonic_and_rounds_down() {
        let mut previous = 0u8;
        for length in [0u32, 1, 23, 24, 100, 1_000, 65_536, 1 << 30, u32::MAX] {
            let byte = length_to_byte(length);
            assert!(byte >= previous);
            assert!(byte_to_length(byte) <= length.min(i32::MAX as u32));
            previous = byte;
        }
        assert_eq!(length_to_byte(u32::MAX), 255);
    }
}
