//! Buffer walk orders for the compressor
//!
//! A linear buffer is walked byte by byte. The ZX Spectrum screen is walked
//! cell by cell: the attribute byte of a character cell, then its 8 pixel rows,
//! then the attribute of the next cell. Bytes that sit close together in this
//! order tend to repeat, which is what the match finder relies on.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

/// Pixel bitmap size of the Spectrum screen
pub const PIXEL_SIZE: usize = 6144;

/// Pixel bitmap plus attribute area
pub const SCREEN_SIZE: usize = 6912;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Linear,
    Display,
}

impl Layout {
    /// First position of the walk
    pub fn start(self) -> usize {
        match self {
            Layout::Linear => 0,
            Layout::Display => PIXEL_SIZE,
        }
    }

    /// Terminal position: reaching it means the walk is complete
    pub fn end(self, len: usize) -> usize {
        match self {
            Layout::Linear => len,
            Layout::Display => SCREEN_SIZE,
        }
    }

    /// Number of positions visited by a walk over a buffer of `len` bytes
    pub fn token_count(self, len: usize) -> usize {
        match self {
            Layout::Linear => len,
            Layout::Display => SCREEN_SIZE,
        }
    }

    /// Position that follows `pos` in this walk order
    pub fn next(self, pos: usize) -> usize {
        match self {
            Layout::Linear => pos + 1,
            Layout::Display => next_display(pos),
        }
    }

    /// Advance one step, reporting whether the walk has run off its end
    pub fn step(self, pos: usize, len: usize) -> (usize, bool) {
        let next = self.next(pos);
        (next, next >= self.end(len))
    }

    /// Iterate every position of the walk in order
    pub fn walk(self, len: usize) -> Walk {
        Walk {
            layout: self,
            pos: self.start(),
            end: self.end(len),
        }
    }
}

/// Display order successor
///
/// Attribute bytes (high byte 24..=26) jump to pixel row 0 of their cell.
/// Pixel rows step down by one scan line; after row 7 the walk moves to the
/// attribute of the next cell.
fn next_display(pos: usize) -> usize {
    let hi = pos >> 8;
    let lo = pos & 0xFF;

    if hi >= 24 {
        return (((hi & 7) << 3) << 8) | lo;
    }

    let row = hi + 1;
    if row & 7 != 0 {
        return (row << 8) | lo;
    }

    // back to the attribute row of this third, then one cell on
    ((((hi >> 3) & 3) | 24) << 8 | lo) + 1
}

pub struct Walk {
    layout: Layout,
    pos: usize,
    end: usize,
}

impl Iterator for Walk {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.pos >= self.end {
            return None;
        }
        let pos = self.pos;
        self.pos = self.layout.next(pos);
        Some(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_cell_order() {
        let order: Vec<usize> = Layout::Display.walk(SCREEN_SIZE).take(10).collect();
        assert_eq!(
            order,
            vec![6144, 0, 256, 512, 768, 1024, 1280, 1536, 1792, 6145]
        );
    }

    #[test]
    fn test_display_third_boundary() {
        // last cell of the first third is followed by the first cell of the second
        assert_eq!(Layout::Display.next(6144 + 255), 255);
        assert_eq!(Layout::Display.next(255 + 7 * 256), 6144 + 256);
        assert_eq!(Layout::Display.next(6144 + 256), 2048);
    }

    #[test]
    fn test_display_walk_visits_every_byte_once() {
        let mut seen = vec![false; SCREEN_SIZE];
        let mut count = 0;
        for pos in Layout::Display.walk(SCREEN_SIZE) {
            assert!(!seen[pos], "position {} visited twice", pos);
            seen[pos] = true;
            count += 1;
        }
        assert_eq!(count, SCREEN_SIZE);
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_display_walk_ends_at_screen_size() {
        let last = Layout::Display.walk(SCREEN_SIZE).last().unwrap();
        assert_eq!(Layout::Display.step(last, SCREEN_SIZE), (SCREEN_SIZE, true));
    }

    #[test]
    fn test_linear_walk() {
        let order: Vec<usize> = Layout::Linear.walk(4).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(Layout::Linear.step(2, 4), (3, false));
        assert_eq!(Layout::Linear.step(3, 4), (4, true));
    }
}
