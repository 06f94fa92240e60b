/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Compression utilities for columnar data.
//!
//! Int64 columns: delta encoding -> zig-zag -> unsigned varint.
//! Varchar columns: delta-encoded offsets as varints, data bytes ZSTD
//! compressed, framed as `varint(len_of_compressed_offsets) ||
//! compressed_offsets || compressed_data`.

use crate::error::EngineError;

/// ZSTD compression level used for varchar data payloads.
const ZSTD_LEVEL: i32 = 3;

/// Write an unsigned LEB128 varint. At most 10 bytes for a 64-bit value.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read an unsigned LEB128 varint starting at `*pos`, advancing the cursor.
pub fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64, EngineError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(EngineError::Codec("varint too long".into()));
        }
        let byte = *data
            .get(*pos)
            .ok_or_else(|| EngineError::Codec("truncated varint".into()))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// ZigZag-map a signed value so that small magnitudes encode small.
pub fn zigzag_encode(n: i64) -> u64 {
    (n.wrapping_shl(1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
pub fn zigzag_decode(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

/// Compress an int64 column: each value is stored as the zig-zagged varint of
/// its delta from the previous value (the first delta is from zero).
pub fn compress_int64_column(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0i64;
    for &v in values {
        let delta = v.wrapping_sub(prev);
        prev = v;
        write_varint(&mut out, zigzag_encode(delta));
    }
    out
}

/// Decompress an int64 column. The row count is carried out-of-band in the
/// file metadata; exactly that many varints must be present.
pub fn decompress_int64_column(data: &[u8], num_rows: u64) -> Result<Vec<i64>, EngineError> {
    let mut pos = 0usize;
    let mut values = Vec::with_capacity(num_rows as usize);
    let mut prev = 0i64;
    for _ in 0..num_rows {
        let zz = read_varint(data, &mut pos)?;
        let v = prev.wrapping_add(zigzag_decode(zz));
        values.push(v);
        prev = v;
    }
    if pos != data.len() {
        return Err(EngineError::Codec(format!(
            "int64 column has {} trailing bytes after {} rows",
            data.len() - pos,
            num_rows
        )));
    }
    Ok(values)
}

/// Compress a varchar column. Offsets are non-decreasing, so their deltas are
/// written as plain varints without zig-zag; the data bytes go through ZSTD.
pub fn compress_varchar_column(offsets: &[u64], data: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut offsets_buf = Vec::with_capacity(offsets.len());
    let mut prev = 0u64;
    for &off in offsets {
        write_varint(&mut offsets_buf, off.wrapping_sub(prev));
        prev = off;
    }

    let compressed_data = zstd::encode_all(data, ZSTD_LEVEL)
        .map_err(|e| EngineError::Codec(format!("zstd compression failed: {e}")))?;

    let mut out = Vec::with_capacity(offsets_buf.len() + compressed_data.len() + 4);
    write_varint(&mut out, offsets_buf.len() as u64);
    out.extend_from_slice(&offsets_buf);
    out.extend_from_slice(&compressed_data);
    Ok(out)
}

/// Decompress a varchar column back into its offsets and contiguous bytes.
pub fn decompress_varchar_column(
    input: &[u8],
    num_rows: u64,
) -> Result<(Vec<u64>, Vec<u8>), EngineError> {
    let mut pos = 0usize;
    let offsets_len = read_varint(input, &mut pos)? as usize;
    let offsets_end = pos
        .checked_add(offsets_len)
        .filter(|end| *end <= input.len())
        .ok_or_else(|| EngineError::Codec("truncated varchar offsets block".into()))?;

    let offsets_bytes = &input[pos..offsets_end];
    let mut off_pos = 0usize;
    let mut offsets = Vec::with_capacity(num_rows as usize);
    let mut prev = 0u64;
    for _ in 0..num_rows {
        let delta = read_varint(offsets_bytes, &mut off_pos)?;
        let off = prev.wrapping_add(delta);
        offsets.push(off);
        prev = off;
    }
    if off_pos != offsets_bytes.len() {
        return Err(EngineError::Codec(format!(
            "varchar offsets block has {} trailing bytes after {} rows",
            offsets_bytes.len() - off_pos,
            num_rows
        )));
    }

    let data = zstd::decode_all(&input[offsets_end..])
        .map_err(|e| EngineError::Codec(format!("zstd decompression failed: {e}")))?;
    Ok((offsets, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_known_values() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_encode(2), 4);
    }

    #[test]
    fn test_zigzag_roundtrip() {
        let cases = [
            0i64,
            1,
            -1,
            127,
            -127,
            128,
            -128,
            16383,
            -16383,
            i64::MAX,
            i64::MIN,
        ];
        for n in cases {
            assert_eq!(zigzag_decode(zigzag_encode(n)), n);
        }
    }

    #[test]
    fn test_varint_roundtrip_and_length() {
        let cases = [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64, u64::MAX];
        for v in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            assert!(buf.len() <= 10, "varint for {v} took {} bytes", buf.len());

            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_varint_truncated() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX);
        buf.pop();

        let mut pos = 0;
        assert!(matches!(
            read_varint(&buf, &mut pos),
            Err(EngineError::Codec(_))
        ));
    }

    #[test]
    fn test_varint_too_long() {
        let buf = [0x80u8; 11];
        let mut pos = 0;
        assert!(matches!(
            read_varint(&buf, &mut pos),
            Err(EngineError::Codec(_))
        ));
    }

    #[test]
    fn test_int64_column_roundtrip() {
        let cases: Vec<Vec<i64>> = vec![
            vec![],
            vec![42],
            vec![100, 102, 101, 103, 104, 105],
            vec![-5, 0, 5, i64::MIN, i64::MAX, 7],
            (0..1000).map(|i| i * 3 - 500).collect(),
        ];
        for values in cases {
            let compressed = compress_int64_column(&values);
            let decompressed = decompress_int64_column(&compressed, values.len() as u64).unwrap();
            assert_eq!(values, decompressed);
        }
    }

    #[test]
    fn test_int64_column_row_count_mismatch() {
        let compressed = compress_int64_column(&[1, 2, 3]);
        assert!(matches!(
            decompress_int64_column(&compressed, 5),
            Err(EngineError::Codec(_))
        ));
        assert!(matches!(
            decompress_int64_column(&compressed, 2),
            Err(EngineError::Codec(_))
        ));
    }

    fn varchar_parts(values: &[&str]) -> (Vec<u64>, Vec<u8>) {
        let mut offsets = Vec::with_capacity(values.len());
        let mut data = Vec::new();
        for v in values {
            offsets.push(data.len() as u64);
            data.extend_from_slice(v.as_bytes());
        }
        (offsets, data)
    }

    #[test]
    fn test_varchar_column_roundtrip() {
        let cases: Vec<Vec<&str>> = vec![
            vec![],
            vec![""],
            vec!["Hello", "World", "Test"],
            vec!["", "a", "", "bcd", ""],
            vec!["zażółć", "gęślą", "jaźń"],
        ];
        for values in cases {
            let (offsets, data) = varchar_parts(&values);
            let compressed = compress_varchar_column(&offsets, &data).unwrap();
            let (got_offsets, got_data) =
                decompress_varchar_column(&compressed, values.len() as u64).unwrap();
            assert_eq!(offsets, got_offsets);
            assert_eq!(data, got_data);
        }
    }

    #[test]
    fn test_varchar_column_truncated() {
        let (offsets, data) = varchar_parts(&["abc", "def"]);
        let compressed = compress_varchar_column(&offsets, &data).unwrap();
        assert!(matches!(
            decompress_varchar_column(&compressed[..1], 2),
            Err(EngineError::Codec(_))
        ));
    }
}
