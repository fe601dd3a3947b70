//! Free memory finder and stack routine placement
//!
//! Scans the resume-time RAM above the screen for runs of identical bytes.
//! The longest run with room at its start or end clear of the stack routine
//! and the resume address hosts the relocation stub; the stack routine refills it with the
//! original byte before resuming. When no run is long enough, the tail of the
//! attribute area is used instead.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::error::ConvertError;
use crate::zx_layout::{PIXEL_SIZE, SCREEN_SIZE};
use log::{debug, warn};
use std::ops::Range;

/// First address scanned for gaps (just above the attributes)
pub const GAP_SCAN_START: u32 = 0x5B00;

/// Lowest address the stack routine may occupy
pub const RAM_START: u32 = 0x4000;

/// How far the stack routine moves down when the resume address sits inside
/// its normal window
pub const STACK_SHIFT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamRun {
    pub address: u32,
    pub value: u8,
    pub count: usize,
}

/// Memory chosen for the relocation stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub address: u16,
    pub length: usize,
    pub fill: u8,
}

impl Gap {
    pub fn window(&self) -> Range<u32> {
        self.address as u32..self.address as u32 + self.length as u32
    }
}

/// Where the stack routine lives
///
/// The routine's code sits at `code_address`; its last two bytes, the
/// resume address, always end up at `SP - 2` where `ret` finds them. Normally
/// the two are contiguous. When shifted, the code moves down and the word
/// stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPlacement {
    pub code_address: u16,
    pub code_len: usize,
    pub return_slot: u16,
    pub shifted: bool,
}

impl StackPlacement {
    pub fn code_window(&self) -> Range<u32> {
        self.code_address as u32..self.code_address as u32 + self.code_len as u32
    }

    pub fn return_window(&self) -> Range<u32> {
        self.return_slot as u32..self.return_slot as u32 + 2
    }
}

/// Place a stack routine of `code_len` bytes plus its return word below `sp`
pub fn place_stack_routine(sp: u16, pc: u16, code_len: usize) -> Result<StackPlacement, ConvertError> {
    // SP == 0 means the stack starts at the very top of memory
    let top = if sp == 0 { 0x10000 } else { sp as u32 };
    let total = code_len as u32 + 2;
    let pc32 = pc as u32;

    let mut code_address = top.checked_sub(total).filter(|&a| a >= RAM_START);
    let mut shifted = false;

    if let Some(start) = code_address {
        if (start..top).contains(&pc32) {
            let available = top - pc32;
            if available <= 2 {
                return Err(ConvertError::StackProgramCounterCollision { sp, pc });
            }
            code_address = start.checked_sub(STACK_SHIFT).filter(|&a| a >= RAM_START);
            shifted = true;
        }
    }

    // Also reached when the routine would dip below RAM_START with PC elsewhere
    let Some(code_address) = code_address else {
        return Err(ConvertError::StackProgramCounterCollision { sp, pc });
    };

    let placement = StackPlacement {
        code_address: code_address as u16,
        code_len,
        return_slot: (top - 2) as u16,
        shifted,
    };
    debug!("stack routine at {:#06x} (shifted: {}), return word at {:#06x}",
        placement.code_address, shifted, placement.return_slot);

    Ok(placement)
}

pub struct FindGap {
    runs: Vec<RamRun>,
}

impl FindGap {
    /// Scan `main` followed by `aux` for runs of at least `min_len` identical
    /// bytes. `main` starts at `base`; `aux` continues right after it.
    pub fn new(main: &[u8], aux: &[u8], base: u32, min_len: usize) -> Self {
        let mut runs = Vec::new();
        let total = main.len() + aux.len();
        let at = |i: usize| if i < main.len() { main[i] } else { aux[i - main.len()] };

        let mut i = 0;
        while i < total {
            let value = at(i);
            let mut count = 1;
            while i + count < total && at(i + count) == value {
                count += 1;
            }

            if count >= min_len.max(1) {
                runs.push(RamRun {
                    address: base + i as u32,
                    value,
                    count,
                });
            }
            i += count;
        }

        FindGap { runs }
    }

    pub fn runs(&self) -> &[RamRun] {
        &self.runs
    }

    /// Longest run of at least `need` bytes with room for the stub clear of
    /// `reserved`
    ///
    /// The stub sits at the start of the run, or at its end when the start is
    /// blocked. The rest of the run may hold reserved bytes. Ties go to the
    /// lowest fill value, then the lowest address.
    pub fn longest_clear_of(&self, need: usize, reserved: &[Range<u32>]) -> Option<Gap> {
        let mut best: Option<(&RamRun, u32)> = None;

        for value in 0..=255u8 {
            for run in self.runs.iter().filter(|r| r.value == value && r.count >= need) {
                let Some(address) = stub_address(run, need, reserved) else {
                    continue;
                };
                if best.is_none_or(|(b, _)| run.count > b.count) {
                    best = Some((run, address));
                }
            }
        }

        best.map(|(run, address)| Gap {
            address: address as u16,
            length: need,
            fill: run.value,
        })
    }
}

/// First of the run's start and end windows that is clear of `reserved`
fn stub_address(run: &RamRun, need: usize, reserved: &[Range<u32>]) -> Option<u32> {
    let start = run.address;
    let end = run.address + (run.count - need) as u32;
    [start, end].into_iter().find(|&address| {
        let window = address..address + need as u32;
        !reserved.iter().any(|r| overlaps(&window, r))
    })
}

fn overlaps(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Fallback gap at the end of the attribute area, filled with its most
/// frequent byte (lowest value on ties)
pub fn attribute_fallback(screen: &[u8], need: usize) -> Gap {
    let need = need.min(SCREEN_SIZE - PIXEL_SIZE);
    let tail = &screen[SCREEN_SIZE - need..SCREEN_SIZE];

    let mut counts = [0usize; 256];
    for &b in tail {
        counts[b as usize] += 1;
    }
    let mut fill = 0u8;
    for value in 1..=255u8 {
        if counts[value as usize] > counts[fill as usize] {
            fill = value;
        }
    }

    Gap {
        address: (RAM_START as usize + SCREEN_SIZE - need) as u16,
        length: need,
        fill,
    }
}

/// Choose the stub location: the longest clear run, or the attribute tail
///
/// `also_reserved` lists further windows the stub must not touch.
pub fn choose_gap(
    finder: &FindGap,
    screen: &[u8],
    need: usize,
    stack: &StackPlacement,
    pc: u16,
    also_reserved: &[Range<u32>],
) -> Gap {
    let mut reserved = vec![
        stack.code_window(),
        stack.return_window(),
        pc as u32..pc as u32 + 1,
    ];
    reserved.extend_from_slice(also_reserved);

    if let Some(gap) = finder.longest_clear_of(need, &reserved) {
        debug!("gap at {:#06x}, fill {:#04x}", gap.address, gap.fill);
        return gap;
    }

    let gap = attribute_fallback(screen, need);
    if overlaps(&gap.window(), &stack.code_window()) || overlaps(&gap.window(), &stack.return_window()) {
        warn!("attribute gap at {:#06x} overlaps the stack routine", gap.address);
    }
    debug!("no free run of {} bytes, using attributes at {:#06x}", need, gap.address);
    gap
}
