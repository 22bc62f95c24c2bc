//! Integer codecs for block records
//!
//! Varints are LEB128: seven bits per byte, low group first, high bit set
//! on every byte except the last. Readers advance a `&mut &[u8]` cursor.
//!
//! A packed id run is `[vint first id][u8 width][gaps]`, where each gap is
//! `id[i] - id[i - 1] - 1` stored LSB first at `width` bits. The gap area
//! must be exactly as long as `count - 1` gaps need.

use crate::error::{FathomError, Result};

pub fn write_vint(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn read_vint(input: &mut &[u8]) -> Result<u32> {
    let mut value = 0u32;
    for group in 0..5 {
        let (&byte, rest) = input
            .split_first()
            .ok_or_else(|| FathomError::format("truncated varint"))?;
        *input = rest;
        // the fifth group only has four bits left in a u32
        if group == 4 && byte > 0x0F {
            return Err(FathomError::format("varint overflows u32"));
        }
        value |= ((byte & 0x7F) as u32) << (7 * group);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(FathomError::format("varint overflows u32"))
}

/// Split `len` bytes off the front of the cursor
pub(crate) fn take<'a>(input: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(FathomError::format(format!(
            "{} needs {} bytes, {} left",
            what,
            len,
            input.len()
        )));
    }
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}

/// Pack strictly increasing ids. An empty run writes nothing.
pub fn pack_ids(ids: &[u32], out: &mut Vec<u8>) {
    let Some(&first) = ids.first() else {
        return;
    };
    let gaps: Vec<u32> = ids
        .windows(2)
        .map(|pair| {
            debug_assert!(pair[1] > pair[0], "ids must increase");
            pair[1].saturating_sub(pair[0]).saturating_sub(1)
        })
        .collect();
    let width = gaps
        .iter()
        .map(|g| 32 - g.leading_zeros())
        .max()
        .unwrap_or(0);

    write_vint(out, first);
    out.push(width as u8);
    let mut acc = 0u64;
    let mut filled = 0u32;
    for gap in gaps {
        acc |= (gap as u64) << filled;
        filled += width;
        while filled >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        out.push(acc as u8);
    }
}

/// Inverse of [`pack_ids`]; `input` must hold exactly one run of `count` ids
pub fn unpack_ids(mut input: &[u8], count: usize) -> Result<Vec<u32>> {
    if count == 0 {
        if !input.is_empty() {
            return Err(FathomError::format("bytes in an empty id run"));
        }
        return Ok(Vec::new());
    }
    let first = read_vint(&mut input)?;
    let width = take(&mut input, 1, "gap width")?[0] as u32;
    if width > 32 {
        return Err(FathomError::format(format!("gap width {} exceeds 32", width)));
    }
    let gap_count = (count - 1) as u64;
    let needed = (gap_count * width as u64 + 7) / 8;
    if needed != input.len() as u64 {
        return Err(FathomError::format(format!(
            "{} gaps at width {} need {} bytes, found {}",
            gap_count,
            width,
            needed,
            input.len()
        )));
    }

    let mask = (1u64 << width) - 1;
    let mut bytes = input.iter();
    let mut acc = 0u64;
    let mut filled = 0u32;
    let mut ids = Vec::with_capacity(count);
    let mut last = first;
    ids.push(first);
    for _ in 1..count {
        while filled < width {
            let byte = bytes
                .next()
                .ok_or_else(|| FathomError::format("gap area truncated"))?;
            acc |= (*byte as u64) << filled;
            filled += 8;
        }
        let gap = (acc & mask) as u32;
        acc >>= width;
        filled -= width;
        last = last
            .checked_add(gap)
            .and_then(|id| id.checked_add(1))
            .ok_or_else(|| FathomError::format("posting id overflows u32"))?;
        ids.push(last);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_boundaries() {
        let mut out = Vec::new();
        for v in [0, 127, 128, 16_383, 16_384, u32::MAX] {
            write_vint(&mut out, v);
        }
        // 1 + 1 + 2 + 2 + 3 + 5 bytes
        assert_eq!(out.len(), 14);

        let mut cursor = &out[..];
        for v in [0, 127, 128, 16_383, 16_384, u32::MAX] {
            assert_eq!(read_vint(&mut cursor).unwrap(), v);
        }
        assert!(cursor.is_empty());
        assert!(read_vint(&mut cursor).is_err());
    }

    #[test]
    fn test_vint_rejects_a_sixth_group() {
        let mut cursor = &[0xFF, 0xFF, 0xFF, 0xFF, 0x1F][..];
        assert!(matches!(read_vint(&mut cursor), Err(FathomError::Format(_))));
        let mut cursor = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x01][..];
        assert!(read_vint(&mut cursor).is_err());
    }

    #[test]
    fn test_gap_width_follows_the_largest_gap() {
        let mut consecutive = Vec::new();
        pack_ids(&[7, 8, 9, 10], &mut consecutive);
        // first id, width 0, no gap bytes
        assert_eq!(consecutive, vec![7, 0]);
        assert_eq!(unpack_ids(&consecutive, 4).unwrap(), vec![7, 8, 9, 10]);

        let mut spread = Vec::new();
        pack_ids(&[0, 2, 1_000, u32::MAX], &mut spread);
        assert_eq!(spread[1], 32);
        assert_eq!(unpack_ids(&spread, 4).unwrap(), vec![0, 2, 1_000, u32::MAX]);
    }

    #[test]
    fn test_unpack_checks_the_gap_area_length() {
        let mut out = Vec::new();
        pack_ids(&[500, 600, 700], &mut out);
        assert!(unpack_ids(&out, 3).is_ok());

        let mut short = out.clone();
        short.pop();
        assert!(unpack_ids(&short, 3).is_err());

        let mut long = out.clone();
        long.push(0);
        assert!(unpack_ids(&long, 3).is_err());

        // a count that disagrees with the gap area
        assert!(unpack_ids(&out, 40).is_err());
        assert!(unpack_ids(&out, 0).is_err());
    }

    #[test]
    fn test_unpack_rejects_bad_widths_and_overflow() {
        assert!(matches!(
            unpack_ids(&[0, 33, 0, 0, 0, 0, 0], 2),
            Err(FathomError::Format(_))
        ));
        // width 0 runs past u32::MAX
        let mut out = Vec::new();
        write_vint(&mut out, u32::MAX - 1);
        out.push(0);
        assert!(unpack_ids(&out, 2).is_ok());
        assert!(unpack_ids(&out, 3).is_err());
    }
}
