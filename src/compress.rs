//! Back-reference compressor for the Z80 decompressors
//!
//! Three passes over the buffer, in walk order:
//! 1. find the best match at every position
//! 2. walk backwards computing the cheapest cost to encode the tail
//! 3. walk forwards emitting literal runs and matches, shortening a match
//!    when that is cheaper
//!
//! Stream format, read by the loader's decompressor:
//! - `0x00..=0x1F`: literal run, the next `c + 1` bytes are copied
//! - `0xFF`: end of stream
//! - anything else: match, `c >> 5` is the length field and `c & 0x1F` the high
//!   offset bits. Field 7 is followed by an extra length byte. Then comes the
//!   low offset byte. Length is `field + 2` (plus the extra byte).
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::error::{try_buffer, ConvertError};
use crate::find_match::{find_match, FoundMatch, MIN_MATCH};
use crate::zx_layout::Layout;
use log::trace;

/// Terminates the stream and marks a control slot with no literals yet
pub const END_MARKER: u8 = 0xFF;

/// Largest literal run field: 31 literals share one control byte
pub const MAX_LITERAL_FIELD: u8 = 30;

/// Length field value that signals an extra length byte
const LONG_MATCH_FIELD: usize = 7;

/// Match lengths from here on cost an extra byte
const LONG_MATCH_LEN: usize = LONG_MATCH_FIELD + 2;

/// Compress `buf` in the given walk order
///
/// In display mode `buf` must hold a complete screen. The returned stream
/// always ends with [`END_MARKER`].
pub fn compress(buf: &[u8], layout: Layout) -> Result<Vec<u8>, ConvertError> {
    let order: Vec<usize> = layout.walk(buf.len()).collect();
    let n = order.len();

    let mut out = try_buffer("compressed stream", n + n / 31 + 2)?;
    if n == 0 {
        out.push(END_MARKER);
        return Ok(out);
    }

    let matches = find_matches(buf, &order, layout)?;
    let mut planned: Vec<usize> = matches.iter().map(|m| m.length).collect();
    let cost = plan_costs(&mut planned);

    // index of the current control byte; END_MARKER while it holds no literals
    let mut ctrl = 0;
    out.push(END_MARKER);

    let mut p = 0;
    while p < n {
        if planned[p] != 0 {
            shorten_match(&mut planned, &cost, p, out[ctrl]);
        }

        if planned[p] != 0 {
            let len = planned[p];
            let offset = match layout {
                Layout::Linear => matches[p].offset - 1,
                Layout::Display => matches[p].offset,
            };

            if out[ctrl] != END_MARKER {
                ctrl = out.len();
                out.push(0);
            }

            let mut field = len - 2;
            if field >= LONG_MATCH_FIELD {
                out.push((field - LONG_MATCH_FIELD) as u8);
                field = LONG_MATCH_FIELD;
            }
            out[ctrl] = ((field << 5) as u8) | (offset >> 8) as u8;
            out.push(offset as u8);

            ctrl = out.len();
            out.push(END_MARKER);
            p += len;
        } else {
            out.push(matches[p].literal);
            out[ctrl] = out[ctrl].wrapping_add(1);
            if out[ctrl] == MAX_LITERAL_FIELD || p == n - 1 {
                ctrl = out.len();
                out.push(END_MARKER);
            }
            p += 1;
        }
    }

    trace!("compressed {} bytes to {}", n, out.len());
    Ok(out)
}

fn find_matches(buf: &[u8], order: &[usize], layout: Layout) -> Result<Vec<FoundMatch>, ConvertError> {
    let mut matches = try_buffer("match table", order.len())?;

    // the first position has nothing behind it
    matches.push(FoundMatch {
        literal: buf[order[0]],
        ..FoundMatch::default()
    });
    for &pos in &order[1..] {
        matches.push(find_match(buf, pos, layout));
    }

    Ok(matches)
}

/// Backward cost pass
///
/// `cost[p]` estimates the bytes needed to encode everything from `p` on.
/// Matches longer than [`MIN_MATCH`] are cut back to the length whose
/// continuation is cheapest.
fn plan_costs(planned: &mut [usize]) -> Vec<f32> {
    let n = planned.len();
    let mut cost = vec![0.0f32; n];
    cost[n - 1] = 1.0;

    for p in (1..n.saturating_sub(1)).rev() {
        let (mut sum, next) = if planned[p] == 0 {
            let mut sum = 1.0;
            if planned[p + 1] != 0 {
                sum += (1.0 / planned[p + 1] as f32) / 10.0;
            }
            (sum, p + 1)
        } else {
            let len = planned[p];
            if p + len < n && len > MIN_MATCH {
                let mut best = len;
                for i in MIN_MATCH..len {
                    if cost[p + i] < cost[p + best] {
                        best = i;
                    }
                }
                planned[p] = best;
            }
            let sum = if planned[p] < LONG_MATCH_LEN { 2.0 } else { 3.0 };
            (sum, p + planned[p])
        };

        if next < n {
            sum += cost[next];
        }
        cost[p] = sum;
    }

    if n > 1 {
        cost[0] = 2.0 + cost[1];
    }
    cost
}

/// Forward refinement of the match planned at `p`
///
/// Tries every shorter length and keeps one whose total cost beats the full
/// match. Lengths below [`MIN_MATCH`] turn into literals, which cost one more
/// byte when they would need a fresh control byte.
fn shorten_match(planned: &mut [usize], cost: &[f32], p: usize, ctrl: u8) {
    let mut best = 0;

    for i in 1..planned[p] {
        let extra = if i < MIN_MATCH {
            let needs_control = ctrl == END_MARKER || ctrl as usize + i > MAX_LITERAL_FIELD as usize;
            i as f32 + if needs_control { 1.0 } else { 0.0 }
        } else if i < LONG_MATCH_LEN {
            2.0
        } else {
            3.0
        };
        if cost[p + i] + extra < cost[p + best] {
            best = i;
        }
    }

    if best == 0 {
        return;
    }
    if best < MIN_MATCH {
        for slot in &mut planned[p..p + best] {
            *slot = 0;
        }
    } else {
        planned[p] = best;
    }
}

/// Decode a stream produced by [`compress`]
///
/// Linear streams produce `len` bytes; display streams produce a full screen
/// and `len` is ignored. Returns `None` when the stream is malformed.
pub fn decompress(stream: &[u8], layout: Layout, len: usize) -> Option<Vec<u8>> {
    let end = layout.end(len);
    let mut out = vec![0u8; end];
    let mut pos = layout.start();
    let mut i = 0;

    loop {
        let c = *stream.get(i)?;
        i += 1;
        if c == END_MARKER {
            break;
        }

        if c < 0x20 {
            for _ in 0..=c {
                if pos >= end {
                    return None;
                }
                out[pos] = *stream.get(i)?;
                i += 1;
                pos = layout.next(pos);
            }
            continue;
        }

        let mut length = (c >> 5) as usize + 2;
        if (c >> 5) as usize == LONG_MATCH_FIELD {
            length += *stream.get(i)? as usize;
            i += 1;
        }
        let offset = ((c & 0x1F) as usize) << 8 | *stream.get(i)? as usize;
        i += 1;

        let mut src = match layout {
            Layout::Linear => pos.checked_sub(offset + 1)?,
            Layout::Display => offset,
        };
        for _ in 0..length {
            if pos >= end || src >= end {
                return None;
            }
            out[pos] = out[src];
            pos = layout.next(pos);
            src = layout.next(src);
        }
    }

    if pos != end {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zx_layout::SCREEN_SIZE;
    use proptest::prelude::*;

    #[test]
    fn test_empty_buffer() {
        let stream = compress(&[], Layout::Linear).unwrap();
        assert_eq!(stream, vec![END_MARKER]);
        assert_eq!(decompress(&stream, Layout::Linear, 0), Some(vec![]));
    }

    #[test]
    fn test_single_byte() {
        let stream = compress(&[0x42], Layout::Linear).unwrap();
        assert_eq!(stream, vec![0x00, 0x42, END_MARKER]);
    }

    #[test]
    fn test_short_literals() {
        let stream = compress(&[1, 2, 3], Layout::Linear).unwrap();
        assert_eq!(stream, vec![0x02, 1, 2, 3, END_MARKER]);
    }

    #[test]
    fn test_literal_run_splits_at_31() {
        let buf: Vec<u8> = (0..40u8).collect();
        let stream = compress(&buf, Layout::Linear).unwrap();
        assert_eq!(stream[0], 30);
        assert_eq!(&stream[1..32], &buf[..31]);
        assert_eq!(stream[32], 8);
        assert_eq!(&stream[33..42], &buf[31..]);
        assert_eq!(stream[42], END_MARKER);
        assert_eq!(stream.len(), 43);
    }

    #[test]
    fn test_run_becomes_match() {
        let buf = [5u8; 10];
        let stream = compress(&buf, Layout::Linear).unwrap();
        // one literal, then a 9 byte match at distance 1
        assert_eq!(stream, vec![0x00, 5, 0xE0, 0x00, 0x00, END_MARKER]);
        assert_eq!(decompress(&stream, Layout::Linear, buf.len()).unwrap(), buf);
    }

    #[test]
    fn test_long_zero_run() {
        let buf = vec![0u8; 1000];
        let stream = compress(&buf, Layout::Linear).unwrap();
        assert!(stream.len() < 20);
        assert_eq!(*stream.last().unwrap(), END_MARKER);
        assert_eq!(decompress(&stream, Layout::Linear, buf.len()).unwrap(), buf);
    }

    #[test]
    fn test_blank_screen() {
        let screen = vec![0u8; SCREEN_SIZE];
        let stream = compress(&screen, Layout::Display).unwrap();
        assert!(stream.len() < 100);
        assert_eq!(decompress(&stream, Layout::Display, SCREEN_SIZE).unwrap(), screen);
    }

    #[test]
    fn test_patterned_screen_round_trip() {
        let mut screen = vec![0u8; SCREEN_SIZE];
        for (i, b) in screen[..6144].iter_mut().enumerate() {
            *b = if (i >> 8) & 1 == 0 { 0xAA } else { (i & 0x0F) as u8 };
        }
        for (i, b) in screen[6144..].iter_mut().enumerate() {
            *b = 0x38 | (i / 32 % 8) as u8;
        }
        let stream = compress(&screen, Layout::Display).unwrap();
        assert!(stream.len() < SCREEN_SIZE);
        assert_eq!(decompress(&stream, Layout::Display, SCREEN_SIZE).unwrap(), screen);
    }

    #[test]
    fn test_match_control_never_reads_as_end_marker() {
        let mut buf = vec![0u8; 8300];
        for (i, b) in buf[..300].iter_mut().enumerate() {
            *b = (i * 7 % 251) as u8;
        }
        let copy: Vec<u8> = buf[..300].to_vec();
        buf[8000..8300].copy_from_slice(&copy);
        let stream = compress(&buf, Layout::Linear).unwrap();
        assert_eq!(decompress(&stream, Layout::Linear, buf.len()).unwrap(), buf);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_linear_round_trip(buf in proptest::collection::vec(0u8..4, 0..600)) {
            let stream = compress(&buf, Layout::Linear).unwrap();
            prop_assert_eq!(*stream.last().unwrap(), END_MARKER);
            prop_assert_eq!(decompress(&stream, Layout::Linear, buf.len()), Some(buf));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_display_round_trip(screen in proptest::collection::vec(0u8..4, SCREEN_SIZE)) {
            let stream = compress(&screen, Layout::Display).unwrap();
            prop_assert_eq!(*stream.last().unwrap(), END_MARKER);
            prop_assert_eq!(decompress(&stream, Layout::Display, SCREEN_SIZE), Some(screen));
        }
    }
}
