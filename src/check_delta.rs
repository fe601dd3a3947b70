//! In-place decompression safety check
//!
//! The main block is loaded so that its compressed stream ends exactly at the
//! top of RAM and is decompressed upwards into the same memory. That only works
//! if the write cursor never overtakes the read cursor. The last `delta` bytes
//! of the block are left out of the stream and carried by the launcher instead,
//! which gives the read cursor that much head start.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::compress::{compress, END_MARKER};
use crate::error::ConvertError;
use crate::zx_layout::Layout;
use log::debug;

/// Main block size: RAM from 0x5B00 up to 0xFFFF
pub const MAIN_BLOCK_SIZE: usize = 0x10000 - 0x5B00;

/// Smallest delta tried
pub const MIN_DELTA: usize = 3;

/// Largest delta the launcher can carry
pub const MAX_DELTA: usize = 128;

/// Room between RAMTOP and the top of memory for the compressed main block
pub const MAIN_LOAD_BUDGET: usize = 0x10000 - 0x6100;

/// Compressed main block with the bytes left to the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedMain {
    pub data: Vec<u8>,
    pub delta: usize,
}

/// Worst amount by which writes run ahead of reads when `stream` is
/// decompressed in place within `region_size` bytes, or 0 if they never do
pub fn analyze(stream: &[u8], region_size: usize) -> usize {
    let mut read = region_size as i64 - stream.len() as i64;
    let mut write = 0i64;
    let mut worst = 0i64;
    let mut i = 0;

    while let Some(&c) = stream.get(i) {
        if c == END_MARKER {
            break;
        }

        if c < 0x20 {
            let count = c as i64 + 1;
            i += 1 + count as usize;
            read += 1 + count;
            write += count;
        } else {
            let mut length = (c >> 5) as i64 + 2;
            i += 1;
            read += 1;
            if c >> 5 == 7 {
                // a truncated stream counts the missing byte as 0 and ends at
                // the next read
                length += stream.get(i).copied().unwrap_or(0) as i64;
                i += 1;
                read += 1;
            }
            // low offset byte
            i += 1;
            read += 1;
            write += length;
        }

        worst = worst.max(write - read);
    }

    worst as usize
}

/// Fixed-point delta search
///
/// `compress_prefix(delta)` compresses the region minus its last `delta`
/// bytes. The delta grows by the reported overlap until the stream is safe.
pub fn find_delta<F>(region_size: usize, mut compress_prefix: F) -> Result<PackedMain, ConvertError>
where
    F: FnMut(usize) -> Result<Vec<u8>, ConvertError>,
{
    let mut delta = MIN_DELTA;

    loop {
        let data = compress_prefix(delta)?;
        let overlap = analyze(&data, region_size);
        debug!("delta {}: {} bytes, overlap {}", delta, data.len(), overlap);

        if overlap == 0 {
            return Ok(PackedMain { data, delta });
        }

        delta += overlap;
        if delta > MAX_DELTA {
            return Err(ConvertError::CompressionInfeasible { delta, max: MAX_DELTA });
        }
    }
}

/// Compress the main block so it can be decompressed in place
pub fn pack_main_block(main: &[u8]) -> Result<PackedMain, ConvertError> {
    let region_size = main.len();
    let packed = find_delta(region_size, |delta| compress(&main[..region_size - delta], Layout::Linear))?;
    fit_load_budget(packed)
}

/// Stream plus carried bytes must fit between RAMTOP and the top of memory
pub fn fit_load_budget(packed: PackedMain) -> Result<PackedMain, ConvertError> {
    let size = packed.data.len() + packed.delta;
    if size > MAIN_LOAD_BUDGET {
        return Err(ConvertError::ImageTooLarge {
            what: "main block",
            size,
            limit: MAIN_LOAD_BUDGET,
        });
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_literals_never_overlap() {
        // 4 literals in a 10 byte region: read starts at 4
        let stream = [0x03, 1, 2, 3, 4, END_MARKER];
        assert_eq!(analyze(&stream, 10), 0);
    }

    #[test]
    fn test_analyze_match_overlap() {
        // literal, then a 9 byte match; region exactly fits the output
        let stream = [0x00, 5, 0xE0, 0x00, 0x00, END_MARKER];
        // read starts at 10 - 6 = 4: after literal read 6 write 1,
        // after match read 9 write 10
        assert_eq!(analyze(&stream, 10), 1);
        assert_eq!(analyze(&stream, 11), 0);
    }

    #[test]
    fn test_analyze_reports_worst_not_first() {
        let stream = [0xE0, 0x00, 0x00, 0xE0, 0x00, 0x00, END_MARKER];
        // read: 6-7=-1 -> 2 -> 5; write: 9 -> 18
        assert_eq!(analyze(&stream, 6), 13);
    }

    #[test]
    fn test_zero_overlap_keeps_min_delta() {
        let mut main = vec![0u8; MAIN_BLOCK_SIZE];
        main[MAIN_BLOCK_SIZE - 1] = 1;
        let packed = pack_main_block(&main).unwrap();
        assert_eq!(packed.delta, MIN_DELTA);
        assert_eq!(analyze(&packed.data, MAIN_BLOCK_SIZE), 0);
    }

    #[test]
    fn test_overlap_five_moves_delta_to_eight() {
        let mut tried = Vec::new();
        find_delta(20, |delta| {
            tried.push(delta);
            if delta == MIN_DELTA {
                // 14 byte stream in 20 bytes: read 6 -> 9, write 14 -> overlap 5
                Ok(vec![0xE0, 0x05, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, END_MARKER])
            } else {
                Ok(vec![END_MARKER])
            }
        })
        .unwrap();
        assert_eq!(tried, vec![3, 8]);
    }

    #[test]
    fn test_delta_ceiling() {
        let result = find_delta(10, |_| Ok(vec![0xE0, 0xFF, 0x00, END_MARKER]));
        assert!(matches!(
            result,
            Err(ConvertError::CompressionInfeasible { max: MAX_DELTA, .. })
        ));
    }

    #[test]
    fn test_truncated_stream_stops() {
        assert_eq!(analyze(&[0xE0], 10), 0);
        assert_eq!(analyze(&[0x05, 1, 2], 10), 0);
    }

    #[test]
    fn test_safe_stream_over_budget_rejected() {
        // literal-only stream: never overlaps, but too long to load
        let mut stream = Vec::new();
        while stream.len() < MAIN_LOAD_BUDGET {
            stream.push(30);
            stream.extend_from_slice(&[0x5A; 31]);
        }
        stream.push(END_MARKER);

        let packed = find_delta(MAIN_BLOCK_SIZE, |_| Ok(stream.clone())).unwrap();
        assert_eq!(packed.delta, MIN_DELTA);
        let err = fit_load_budget(packed).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::ImageTooLarge { what: "main block", limit: MAIN_LOAD_BUDGET, .. }
        ));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn test_exact_budget_fits() {
        let packed = PackedMain {
            data: vec![END_MARKER; MAIN_LOAD_BUDGET - MIN_DELTA],
            delta: MIN_DELTA,
        };
        assert!(fit_load_budget(packed).is_ok());
    }
}
