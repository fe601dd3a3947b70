//! Z80 loader chain for the cartridge
//!
//! Boot order on the Spectrum:
//! - `run`: BASIC loader, sets the border and loads everything else
//! - `S`: screen loader, draws the compressed screen
//! - `1`..`5`: 128K only, page unpacker and compressed pages
//! - `M`: compressed main block, loaded against the top of memory
//! - `L`: launcher at 0x4000. Decompresses `M` in place, copies the delta
//!   tail, selects the resume bank and jumps to the relocation stub
//!
//! The relocation stub sits in a gap of otherwise unused memory. It puts back
//! the screen bytes the launcher covered and restores the alternate registers,
//! IX, IY, I and the interrupt mode. It then jumps to the stack routine below
//! SP, which refills the gap, restores the main registers and R, sets SP and
//! returns to the saved PC.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::check_delta::MAX_DELTA;
use crate::find_gap::{Gap, StackPlacement};
use crate::parse_z80::Registers;

/* ======================= BASIC loaders ======================= */

const BORDER_SLOT: usize = 16;
const PAPER_SLOT: usize = 22;

/// BASIC program start
pub const BASIC_START: u16 = 23813;

/// 10 CLEAR 24831: BORDER/PAPER: LOAD S, M, L: RANDOMIZE USR 16384
const BASIC_LOADER_48K: [u8; 98] = [
    0x00, 0x00, 0x5e, 0x00, 0xfd, 0x30, 0x0e, 0x00,
    0x00, 0xff, 0x60, 0x00, 0x3a, 0xe7, 0xb0, 0x22, 0x30, 0x22, 0x3a, 0xda, 0xb0, 0x22, 0x30, 0x22,
    0x3a, 0xfb, 0x3a, 0xf1, 0x64, 0x3d, 0xbe, 0x30, 0x0e, 0x00, 0x00, 0xd6, 0x5c, 0x00, 0x3a, 0xef,
    0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64, 0x3b, 0x22, 0x53, 0x22, 0xaf, 0x3a, 0xf9, 0xc0, 0x30, 0x0e,
    0x00, 0x00, 0x00, 0x62, 0x00, 0x3a, 0xef, 0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64, 0x3b, 0x22, 0x4d,
    0x22, 0xaf, 0x3a, 0xef, 0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64, 0x3b, 0x22, 0x4c, 0x22, 0xaf, 0x3a,
    0xf9, 0xc0, 0x30, 0x0e, 0x00, 0x00, 0x00, 0x40, 0x00, 0x0d,
];

/// As the 48K loader, plus a loop over the five page files and a small USR 0
/// routine in line 9999 that switches to 48 BASIC with paging unlocked
const BASIC_LOADER_128K: [u8; 188] = [
    0x00, 0x00, 0x8e, 0x00, 0xfd, 0x30, 0x0e, 0x00,
    0x00, 0xff, 0x60, 0x00, 0x3a, 0xe7, 0xb0, 0x22, 0x30, 0x22, 0x3a, 0xda, 0xb0, 0x22, 0x30, 0x22,
    0x3a, 0xfb, 0x3a, 0xf9, 0xc0, 0x30, 0x0e, 0x00, 0x00, 0x9c, 0x5d, 0x00, 0x3a, 0xf1, 0x64, 0x3d,
    0xbe, 0x30, 0x0e, 0x00, 0x00, 0xd6, 0x5c, 0x00, 0x3a, 0xef, 0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64,
    0x3b, 0x22, 0x53, 0x22, 0xaf, 0x3a, 0xf9, 0xc0, 0x30, 0x0e, 0x00, 0x00, 0x00, 0x62, 0x00, 0x3a,
    0xeb, 0x69, 0x3d, 0xb0, 0x22, 0x31, 0x22, 0xcc, 0xb0, 0x22, 0x35, 0x22, 0x3a, 0xef, 0x2a, 0x22,
    0x6d, 0x22, 0x3b, 0x64, 0x3b, 0xc1, 0x69, 0xaf, 0x3a, 0xf9, 0xc0, 0x30, 0x0e, 0x00, 0x00, 0xb3,
    0x7d, 0x00, 0x3a, 0xf3, 0x69, 0x3a, 0xef, 0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64, 0x3b, 0x22, 0x4d,
    0x22, 0xaf, 0x3a, 0xef, 0x2a, 0x22, 0x6d, 0x22, 0x3b, 0x64, 0x3b, 0x22, 0x4c, 0x22, 0xaf, 0x3a,
    0xf9, 0xc0, 0x30, 0x0e, 0x00, 0x00, 0x00, 0x40, 0x00, 0x0d, 0x27, 0x0f, 0x26, 0x00, 0xea, 0xf3,
    0x2a, 0x3d, 0x5c, 0x23, 0x36, 0x13, 0x2b, 0x36, 0x03, 0x2b, 0x36, 0x1b, 0x2b, 0x36, 0x76, 0x2b,
    0x36, 0x00, 0x2b, 0x36, 0x51, 0xf9, 0xfd, 0xcb, 0x01, 0xa6, 0x3e, 0x10, 0x01, 0xfd, 0x7f, 0xed,
    0x79, 0xfb, 0xc9, 0x0d,
];

/// BASIC loader `run`; the border colour doubles as paper colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicLoader {
    pub extended: bool,
    pub border: u8,
}

impl BasicLoader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let Self { extended, border } = *self;
        let mut code = if extended {
            BASIC_LOADER_128K.to_vec()
        } else {
            BASIC_LOADER_48K.to_vec()
        };
        let digit = b'0' + (border & 7);
        code[BORDER_SLOT] = digit;
        code[PAPER_SLOT] = digit;
        code
    }
}

/* ======================= Screen loader ======================= */

/// Screen file load address
pub const SCREEN_LOADER_ADDRESS: u16 = 25088;

/// Display-order decompressor, reads its stream from right after itself
const SCREEN_LOADER: [u8; 109] = [
    0x21, 0x6d, 0x62, 0x11, 0x00, 0x58, 0x18, 0x11, 0x7e, 0x12, 0x14, 0x7a, 0xfe, 0x59, 0xd4, 0x5b,
    0x62, 0xe6, 0x07, 0xcc, 0x64, 0x62, 0x23, 0x10, 0xef, 0x7e, 0x23, 0x47, 0x04, 0xc8, 0xfe, 0x20,
    0x38, 0xe6, 0x4f, 0xe6, 0xe0, 0x07, 0x07, 0x07, 0xfe, 0x07, 0x20, 0x02, 0x86, 0x23, 0xc6, 0x02,
    0x47, 0xe5, 0x79, 0xe6, 0x1f, 0xc6, 0x40, 0x6e, 0x67, 0x7e, 0x12, 0x14, 0x7a, 0xfe, 0x59, 0xd4,
    0x5b, 0x62, 0xe6, 0x07, 0xcc, 0x64, 0x62, 0xeb, 0x14, 0x7a, 0xfe, 0x59, 0xd4, 0x5b, 0x62, 0xe6,
    0x07, 0xcc, 0x64, 0x62, 0xeb, 0x10, 0xe2, 0xe1, 0x23, 0x18, 0xbe, 0x3d, 0x07, 0x07, 0x07, 0xee,
    0x82, 0x57, 0x3c, 0xc9, 0xaa, 0x1f, 0x1f, 0x1f, 0xc6, 0x4f, 0x57, 0x13, 0xc9,
];

pub fn screen_file(compressed: &[u8]) -> Vec<u8> {
    let mut file = Vec::with_capacity(SCREEN_LOADER.len() + compressed.len());
    file.extend_from_slice(&SCREEN_LOADER);
    file.extend_from_slice(compressed);
    file
}

/* ======================= 128K pages ======================= */

/// Pages stored as separate files, in file name order '1'..'5'
pub const STORED_PAGES: [u8; 5] = [1, 3, 4, 6, 7];

/// Page byte read by the unpacker, stream follows at 0x7E00
pub const PAGE_BYTE_ADDRESS: u16 = 32255;

/// Selects the page named by the byte at 0x7DFF, decompresses 0x7E00 into
/// 0xC000, then pages 0 back in. The last byte is that page byte.
const PAGE_UNPACKER: [u8; 77] = [
    0xf3, 0x3a, 0xff, 0x7d, 0x01, 0xfd, 0x7f, 0xed, 0x79, 0x21, 0x00, 0x7e, 0x11, 0x00, 0xc0, 0x43,
    0x18, 0x02, 0xed, 0xb0, 0x7e, 0x23, 0x4f, 0x0c, 0x28, 0x29, 0xfe, 0x20, 0x38, 0xf4, 0xf5, 0xe6,
    0xe0, 0x07, 0x07, 0x07, 0xfe, 0x07, 0x20, 0x02, 0x86, 0x23, 0xc6, 0x02, 0x4f, 0x88, 0x91, 0x47,
    0xf1, 0xe5, 0xc5, 0xe6, 0x1f, 0x47, 0x4e, 0x62, 0x6b, 0x37, 0xed, 0x42, 0xc1, 0xed, 0xb0, 0xe1,
    0x23, 0x18, 0xd1, 0x3e, 0x10, 0x01, 0xfd, 0x7f, 0xed, 0x79, 0xfb, 0xc9, 0x11,
];

/// Largest compressed page: from 0x7E00 up to 0xC000
pub const MAX_PAGE_STREAM: usize = 0xC000 - 0x7E00;

/// Load address of a page file; the first one carries the unpacker
pub fn page_load_address(first: bool) -> u16 {
    if first {
        PAGE_BYTE_ADDRESS + 1 - PAGE_UNPACKER.len() as u16
    } else {
        PAGE_BYTE_ADDRESS
    }
}

/// Page file: the page select byte (ROM 48 bit set) and the stream, with the
/// unpacker in front for the first page
pub fn page_file(page: u8, compressed: &[u8], first: bool) -> Vec<u8> {
    let mut file = Vec::with_capacity(PAGE_UNPACKER.len() + compressed.len());
    if first {
        file.extend_from_slice(&PAGE_UNPACKER[..PAGE_UNPACKER.len() - 1]);
    }
    file.push(0x10 | (page & 7));
    file.extend_from_slice(compressed);
    file
}

/* ======================= Launcher ======================= */

pub const LAUNCHER_ADDRESS: u16 = 0x4000;

/// Linear decompressor plus delta copy and bank select
const DECOMPRESSOR: [u8; 77] = [
    0xf3, 0x31, 0x00, 0x00, 0x21, 0x00, 0x00, 0x11, 0x00, 0x5b, 0x43, 0x18, 0x02, 0xed, 0xb0, 0x7e,
    0x23, 0x4f, 0x0c, 0x28, 0x29, 0xfe, 0x20, 0x38, 0xf4, 0xf5, 0xe6, 0xe0, 0x07, 0x07, 0x07, 0xfe,
    0x07, 0x20, 0x02, 0x86, 0x23, 0xc6, 0x02, 0x4f, 0x88, 0x91, 0x47, 0xf1, 0xe5, 0xc5, 0xe6, 0x1f,
    0x47, 0x4e, 0x62, 0x6b, 0x37, 0xed, 0x42, 0xc1, 0xed, 0xb0, 0xe1, 0x23, 0x18, 0xd1,
    0x21, 0x00, 0x00, 0x01, 0x00, 0x00, 0xed, 0xb0,
    0x01, 0xfd, 0x7f, 0x3e, 0x30, 0xed, 0x79,
];

const DECOMPRESSOR_SP: usize = 2;
const DECOMPRESSOR_SOURCE: usize = 5;
const DELTA_SOURCE: usize = 63;
const DELTA_COUNT: usize = 66;
const BANK_OUT: usize = 74;

/// Decompressor, `jp stub` and 4 bytes of stack
pub const LAUNCHER_HEADER_LEN: usize = DECOMPRESSOR.len() + 3 + 4;

/// Largest launcher; the stub saves and restores this many screen bytes
pub const LAUNCHER_MAX: usize = LAUNCHER_HEADER_LEN + MAX_DELTA;

/// Port 0x7FFD value used for a 48K snapshot
pub const DEFAULT_BANK_OUT: u8 = 0x30;

/// Launcher `L` with its patch fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launcher<'a> {
    /// Load address of `M`, where in-place decompression reads from
    pub compressed_address: u16,
    /// Last `delta` bytes of the main block
    pub tail: &'a [u8],
    /// Port 0x7FFD value for the resume
    pub bank_out: u8,
    pub stub_address: u16,
}

impl Launcher<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let Self { compressed_address, tail, bank_out, stub_address } = *self;
        let tail_address = LAUNCHER_ADDRESS + LAUNCHER_HEADER_LEN as u16;

        let mut code = Vec::with_capacity(LAUNCHER_HEADER_LEN + tail.len());
        code.extend_from_slice(&DECOMPRESSOR);
        put_word(&mut code, DECOMPRESSOR_SP, tail_address);
        put_word(&mut code, DECOMPRESSOR_SOURCE, compressed_address);
        put_word(&mut code, DELTA_SOURCE, tail_address);
        put_word(&mut code, DELTA_COUNT, tail.len() as u16);
        code[BANK_OUT] = bank_out;

        code.push(0xC3); // JP stub
        code.extend_from_slice(&stub_address.to_le_bytes());
        code.extend_from_slice(&[0x00; 4]); // stack

        code.extend_from_slice(tail);
        code
    }
}

fn put_word(code: &mut [u8], at: usize, word: u16) {
    code[at..at + 2].copy_from_slice(&word.to_le_bytes());
}

/* ======================= Relocation stub ======================= */

const STUB_CODE_LEN: usize = 45;

/// Stub code, its AF' word and the saved screen bytes
pub const STUB_LEN: usize = STUB_CODE_LEN + LAUNCHER_MAX;

fn im_opcode(mode: u8) -> u8 {
    match mode {
        1 => 0x56,
        2 => 0x5E,
        _ => 0x46,
    }
}

/// Relocation stub hosted in `gap`
#[derive(Debug, Clone, Copy)]
pub struct RelocationStub<'a> {
    pub regs: &'a Registers,
    pub gap: Gap,
    /// Address of the stack routine it hands over to
    pub stack_code: u16,
    /// Resume-time contents of the [`LAUNCHER_MAX`] bytes at 0x4000, which the
    /// launcher overwrites
    pub saved_screen: &'a [u8],
}

impl RelocationStub<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let Self { regs, gap, stack_code, saved_screen } = *self;
        let base = gap.address;
        let af_alt_word = base + STUB_CODE_LEN as u16 - 2;
        let saved = base + STUB_CODE_LEN as u16;

        let mut code = Vec::with_capacity(STUB_LEN);

        code.push(0x21); // LD HL,saved
        code.extend_from_slice(&saved.to_le_bytes());
        code.push(0x11); // LD DE,$4000
        code.extend_from_slice(&LAUNCHER_ADDRESS.to_le_bytes());
        code.push(0x01); // LD BC,len
        code.extend_from_slice(&(LAUNCHER_MAX as u16).to_le_bytes());
        code.extend_from_slice(&[0xED, 0xB0]); // LDIR

        code.push(0x01); // LD BC,BC'
        code.extend_from_slice(&regs.bc_alt.to_le_bytes());
        code.push(0x11); // LD DE,DE'
        code.extend_from_slice(&regs.de_alt.to_le_bytes());
        code.push(0x21); // LD HL,HL'
        code.extend_from_slice(&regs.hl_alt.to_le_bytes());
        code.push(0xD9); // EXX

        code.extend_from_slice(&[0xDD, 0x21]); // LD IX,nn
        code.extend_from_slice(&regs.ix.to_le_bytes());
        code.extend_from_slice(&[0xFD, 0x21]); // LD IY,nn
        code.extend_from_slice(&regs.iy.to_le_bytes());

        code.push(0x31); // LD SP,af'
        code.extend_from_slice(&af_alt_word.to_le_bytes());
        code.push(0xF1); // POP AF
        code.push(0x08); // EX AF,AF'

        code.extend_from_slice(&[0x3E, regs.i]); // LD A,I
        code.extend_from_slice(&[0xED, 0x47]); // LD I,A
        code.extend_from_slice(&[0xED, im_opcode(regs.im)]); // IM n

        code.push(0xC3); // JP stack routine
        code.extend_from_slice(&stack_code.to_le_bytes());

        code.extend_from_slice(&[regs.f_alt, regs.a_alt]);
        code.extend_from_slice(&saved_screen[..LAUNCHER_MAX]);
        code
    }
}

/* ======================= Stack routine ======================= */

/// Stack routine code length, without the return word
pub const STACK_CODE_LEN: usize = 37;

/// M1 cycles between `LD R,A` and the first fetch of the resumed program
const R_CYCLES: u8 = 5;

/// Stack routine below SP
#[derive(Debug, Clone, Copy)]
pub struct StackRoutine<'a> {
    pub regs: &'a Registers,
    pub gap: Gap,
    pub placement: StackPlacement,
}

impl StackRoutine<'_> {
    /// Code for `placement.code_address`
    pub fn to_bytes(&self) -> Vec<u8> {
        let Self { regs, gap, placement } = *self;
        let base = placement.code_address;
        let af_word = base + STACK_CODE_LEN as u16 - 2;
        let r = (regs.r & 0x80) | (regs.r.wrapping_sub(R_CYCLES) & 0x7F);

        let mut code = Vec::with_capacity(STACK_CODE_LEN);

        // refill the gap with its original byte
        code.push(0x21); // LD HL,gap
        code.extend_from_slice(&gap.address.to_le_bytes());
        code.push(0x11); // LD DE,gap+1
        code.extend_from_slice(&gap.address.wrapping_add(1).to_le_bytes());
        code.push(0x01); // LD BC,len-1
        code.extend_from_slice(&(gap.length as u16 - 1).to_le_bytes());
        code.extend_from_slice(&[0x36, gap.fill]); // LD (HL),fill
        code.extend_from_slice(&[0xED, 0xB0]); // LDIR

        code.push(0x01); // LD BC,nn
        code.extend_from_slice(&regs.bc.to_le_bytes());
        code.push(0x11); // LD DE,nn
        code.extend_from_slice(&regs.de.to_le_bytes());
        code.push(0x21); // LD HL,nn
        code.extend_from_slice(&regs.hl.to_le_bytes());

        code.extend_from_slice(&[0x3E, r]); // LD A,r
        code.extend_from_slice(&[0xED, 0x4F]); // LD R,A

        code.push(0x31); // LD SP,af
        code.extend_from_slice(&af_word.to_le_bytes());
        code.push(0xF1); // POP AF
        code.push(0x31); // LD SP,return
        code.extend_from_slice(&placement.return_slot.to_le_bytes());
        code.push(if regs.iff1 { 0xFB } else { 0xF3 }); // EI / DI
        code.push(0xC9); // RET

        code.extend_from_slice(&[regs.f, regs.a]);
        code
    }

    /// Word for `placement.return_slot`: the resume address `ret` pops
    pub fn return_word(&self) -> [u8; 2] {
        self.regs.pc.to_le_bytes()
    }
}
