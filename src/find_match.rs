//! Longest back-reference search
//!
//! For every walk position the finder records the best earlier match: the
//! longest run of at least [`MIN_MATCH`] bytes, capped at [`MAX_MATCH`]. Ties
//! keep the earliest dictionary position.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::zx_layout::{Layout, PIXEL_SIZE, SCREEN_SIZE};

pub const MIN_MATCH: usize = 3;
pub const MAX_MATCH: usize = 256;

/// Linear search window. Keeps the high offset bits below 0x1F so a match
/// control byte can never read as the end marker.
pub const MAX_DISTANCE: usize = 7936;

/// Best match found at one walk position
///
/// `length == 0` means no usable match; the position is emitted as `literal`.
/// In display mode `offset` is the absolute screen position of the source, in
/// linear mode it is the backward distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FoundMatch {
    pub literal: u8,
    pub length: usize,
    pub offset: usize,
}

/// Search the best match for the position `pos` of `buf` in the given layout
pub fn find_match(buf: &[u8], pos: usize, layout: Layout) -> FoundMatch {
    match layout {
        Layout::Linear => find_linear_match(buf, pos),
        Layout::Display => find_display_match(buf, pos),
    }
}

/// Display order search over the whole dictionary walked so far
///
/// `screen` must hold at least [`SCREEN_SIZE`] bytes.
pub fn find_display_match(screen: &[u8], pos: usize) -> FoundMatch {
    let mut best = FoundMatch {
        literal: screen[pos],
        ..FoundMatch::default()
    };
    if pos == PIXEL_SIZE {
        return best;
    }

    let layout = Layout::Display;
    let mut dict = layout.start();

    loop {
        let mut len = 0;
        let mut src = pos;
        let mut dc = dict;
        let mut at_end = false;

        while screen[src] == screen[dc] {
            len += 1;
            if len == MAX_MATCH {
                break;
            }
            src = layout.next(src);
            if src == SCREEN_SIZE {
                at_end = true;
                break;
            }
            dc = layout.next(dc);
        }

        if len >= MIN_MATCH && len > best.length {
            best.length = len;
            best.offset = dict;
        }
        if at_end || len == MAX_MATCH {
            break;
        }

        dict = layout.next(dict);
        if dict == pos {
            break;
        }
    }

    best
}

/// Linear search within [`MAX_DISTANCE`] bytes behind `pos`
pub fn find_linear_match(buf: &[u8], pos: usize) -> FoundMatch {
    let mut best = FoundMatch {
        literal: buf[pos],
        ..FoundMatch::default()
    };

    for dict in pos.saturating_sub(MAX_DISTANCE)..pos {
        let mut len = 0;
        let mut src = pos;
        let mut dc = dict;
        let mut at_end = false;

        while buf[src] == buf[dc] {
            len += 1;
            if len == MAX_MATCH {
                break;
            }
            src += 1;
            if src == buf.len() {
                at_end = true;
                break;
            }
            dc += 1;
        }

        if len >= MIN_MATCH && len > best.length {
            best.length = len;
            best.offset = pos - dict;
        }
        if at_end || len == MAX_MATCH {
            break;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_no_match_for_short_repeat() {
        let buf = [1u8, 2, 1, 2, 9];
        let m = find_linear_match(&buf, 2);
        assert_eq!(m.length, 0);
        assert_eq!(m.literal, 1);
    }

    #[test]
    fn test_linear_overlapping_run() {
        let buf = [7u8; 10];
        let m = find_linear_match(&buf, 1);
        // run continues up to the end of the buffer
        assert_eq!(m.length, 9);
        assert_eq!(m.offset, 1);
    }

    #[test]
    fn test_linear_prefers_longest_then_earliest() {
        let buf = [1u8, 2, 3, 9, 1, 2, 3, 4, 1, 2, 3, 4, 5];
        let m = find_linear_match(&buf, 8);
        assert_eq!(m.length, 4);
        assert_eq!(m.offset, 4);

        let buf = [1u8, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let m = find_linear_match(&buf, 8);
        assert_eq!(m.length, 3);
        assert_eq!(m.offset, 8);
    }

    #[test]
    fn test_linear_caps_at_max_match() {
        let buf = vec![0u8; 600];
        let m = find_linear_match(&buf, 300);
        assert_eq!(m.length, MAX_MATCH);
    }

    #[test]
    fn test_linear_window_limit() {
        let mut buf = vec![0u8; MAX_DISTANCE + 8];
        buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        let pos = MAX_DISTANCE + 2;
        buf[pos..pos + 4].copy_from_slice(&[1, 2, 3, 4]);
        // the source is one byte beyond the window
        assert_eq!(find_linear_match(&buf, pos).length, 0);

        let pos = MAX_DISTANCE;
        buf[pos..pos + 4].copy_from_slice(&[1, 2, 3, 4]);
        let m = find_linear_match(&buf, pos);
        assert_eq!(m.length, 4);
        assert_eq!(m.offset, MAX_DISTANCE);
    }

    #[test]
    fn test_display_first_position_is_literal() {
        let screen = vec![0u8; SCREEN_SIZE];
        let m = find_display_match(&screen, PIXEL_SIZE);
        assert_eq!(m.length, 0);
    }

    #[test]
    fn test_display_blank_screen_offset_is_absolute() {
        let screen = vec![0u8; SCREEN_SIZE];
        // second walk position is pixel row 0 of cell 0
        let m = find_display_match(&screen, 0);
        assert_eq!(m.length, MAX_MATCH);
        assert_eq!(m.offset, PIXEL_SIZE);
    }

    #[test]
    fn test_display_match_stops_at_screen_end() {
        let screen = vec![0x38u8; SCREEN_SIZE];
        let last_cell_attr = SCREEN_SIZE - 1;
        let m = find_display_match(&screen, last_cell_attr);
        // attribute plus its 8 pixel rows remain
        assert_eq!(m.length, 9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_match_bounds(buf in proptest::collection::vec(0u8..3, 1..400)) {
            for pos in 1..buf.len() {
                let m = find_linear_match(&buf, pos);
                prop_assert!(m.length == 0 || (MIN_MATCH..=MAX_MATCH).contains(&m.length));
                if m.length > 0 {
                    prop_assert!(m.offset >= 1 && m.offset <= pos);
                    let src = pos - m.offset;
                    for i in 0..m.length {
                        prop_assert_eq!(buf[src + i], buf[pos + i]);
                    }
                }
            }
        }
    }
}
