//! ZX Spectrum .z80 snapshot parser
//!
//! Reads version 1, 2 and 3 snapshots of 48K and 128K machines into the
//! register set and a flat RAM image. Page 5, 2 and 0 come first in the image
//! (the 48K address space from 0x4000); 128K snapshots append pages 1, 3, 4,
//! 6 and 7.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::error::{try_buffer, ConvertError};
use crate::zx_layout::SCREEN_SIZE;
use log::debug;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

/* ======================= Snapshot structures ======================= */

pub const PAGE_SIZE: usize = 16384;

/// RAM from 0x4000 to 0xFFFF
pub const MAIN_SIZE: usize = 3 * PAGE_SIZE;

const EXTENDED_SIZE: usize = 8 * PAGE_SIZE;

#[derive(Debug, Clone)]
pub struct Z80Snapshot {
    pub version: u8,
    pub regs: Registers,
    pub border: u8,
    pub machine: Machine,
    pub ay: AyState,
    pub memory: MemoryImage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub a_alt: u8,
    pub f_alt: u8,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,       // bit 7 included
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Spectrum48,
    Spectrum128 { port_7ffd: u8 },
}

/// Sound chip state; recorded but not restored by the loader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AyState {
    pub select: u8,
    pub registers: [u8; 16],
}

impl Z80Snapshot {
    pub fn is_extended(&self) -> bool {
        matches!(self.machine, Machine::Spectrum128 { .. })
    }

    /// Page mapped at 0xC000 when the program resumes
    pub fn resume_bank(&self) -> u8 {
        match self.machine {
            Machine::Spectrum48 => 0,
            Machine::Spectrum128 { port_7ffd } => port_7ffd & 7,
        }
    }
}

/* ======================= Memory image ======================= */

#[derive(Debug, Clone)]
pub struct MemoryImage {
    ram: Vec<u8>,
    extended: bool,
}

impl MemoryImage {
    pub fn new(extended: bool) -> Result<Self, ConvertError> {
        let size = if extended { EXTENDED_SIZE } else { MAIN_SIZE };
        let mut ram = try_buffer("snapshot memory", size)?;
        ram.resize(size, 0);
        Ok(Self { ram, extended })
    }

    /// Offset of RAM page `page` in the image
    fn page_offset(&self, page: u8) -> Option<usize> {
        let slot = match page {
            5 => 0,
            2 => 1,
            0 => 2,
            1 if self.extended => 3,
            3 if self.extended => 4,
            4 if self.extended => 5,
            6 if self.extended => 6,
            7 if self.extended => 7,
            _ => return None,
        };
        Some(slot * PAGE_SIZE)
    }

    pub fn page(&self, page: u8) -> Option<&[u8]> {
        let at = self.page_offset(page)?;
        Some(&self.ram[at..at + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page: u8) -> Option<&mut [u8]> {
        let at = self.page_offset(page)?;
        Some(&mut self.ram[at..at + PAGE_SIZE])
    }

    /// 0x4000..0xFFFF with page 0 at 0xC000
    pub fn main(&self) -> &[u8] {
        &self.ram[..MAIN_SIZE]
    }

    pub fn screen(&self) -> &[u8] {
        &self.ram[..SCREEN_SIZE]
    }

    /// Image offset of `addr` as seen with `bank` paged in at 0xC000
    fn resume_offset(&self, addr: u16, bank: u8) -> Option<usize> {
        match addr {
            0x0000..=0x3FFF => None,
            0x4000..=0xBFFF => Some(addr as usize - 0x4000),
            _ => Some(self.page_offset(bank)? + addr as usize - 0xC000),
        }
    }

    pub fn read_resume(&self, addr: u16, bank: u8) -> u8 {
        self.resume_offset(addr, bank).map_or(0xFF, |at| self.ram[at])
    }

    /// Write `bytes` from `addr` upwards in the resume-time memory map.
    /// Bytes that land in ROM are dropped.
    pub fn write_resume(&mut self, addr: u16, bytes: &[u8], bank: u8) {
        for (i, &b) in bytes.iter().enumerate() {
            let target = addr.wrapping_add(i as u16);
            if let Some(at) = self.resume_offset(target, bank) {
                self.ram[at] = b;
            }
        }
    }

    /// The 16K visible at 0xC000 with `bank` paged in
    pub fn bank_view(&self, bank: u8) -> &[u8] {
        match self.page_offset(bank) {
            Some(at) => &self.ram[at..at + PAGE_SIZE],
            None => &self.ram[2 * PAGE_SIZE..MAIN_SIZE],
        }
    }
}

/* ======================= Z80 reader ======================= */

pub fn import(path: &Path) -> Result<Z80Snapshot, ConvertError> {
    let raw = fs::read(path)?;
    parse_z80(&raw)
}

pub fn parse_z80(raw: &[u8]) -> Result<Z80Snapshot, ConvertError> {
    let mut cur = Cursor::new(raw);
    let mut regs = Registers::default();

    /* ===== version 1 header ===== */
    regs.a = read_u8(&mut cur)?;
    regs.f = read_u8(&mut cur)?;
    regs.bc = read_u16(&mut cur)?;
    regs.hl = read_u16(&mut cur)?;
    regs.pc = read_u16(&mut cur)?;
    regs.sp = read_u16(&mut cur)?;
    regs.i = read_u8(&mut cur)?;
    let r = read_u8(&mut cur)?;

    let mut flags = read_u8(&mut cur)?;
    if flags == 0xFF {
        flags = 1;
    }
    regs.r = (r & 0x7F) | ((flags & 1) << 7);
    let border = (flags >> 1) & 7;
    let compressed = flags & 0x20 != 0;

    regs.de = read_u16(&mut cur)?;
    regs.bc_alt = read_u16(&mut cur)?;
    regs.de_alt = read_u16(&mut cur)?;
    regs.hl_alt = read_u16(&mut cur)?;
    regs.a_alt = read_u8(&mut cur)?;
    regs.f_alt = read_u8(&mut cur)?;
    regs.iy = read_u16(&mut cur)?;
    regs.ix = read_u16(&mut cur)?;
    regs.iff1 = read_u8(&mut cur)? != 0;
    regs.iff2 = read_u8(&mut cur)? != 0;
    regs.im = match read_u8(&mut cur)? & 3 {
        0 => 0,
        1 => 1,
        _ => 2,
    };

    if regs.pc != 0 {
        let mut memory = MemoryImage::new(false)?;
        let body = &raw[cur.position() as usize..];
        if compressed {
            decode_rle(body, &mut memory.ram)?;
        } else {
            ensure(body.len() >= MAIN_SIZE, "truncated memory image")?;
            memory.ram.copy_from_slice(&body[..MAIN_SIZE]);
        }
        debug!("v1 snapshot, PC {:#06x} SP {:#06x}", regs.pc, regs.sp);

        return Ok(Z80Snapshot {
            version: 1,
            regs,
            border,
            machine: Machine::Spectrum48,
            ay: AyState::default(),
            memory,
        });
    }

    /* ===== version 2/3 additional header ===== */
    let extra_len = read_u16(&mut cur)? as usize;
    let version = match extra_len {
        23 => 2,
        54 | 55 => 3,
        n => return Err(ConvertError::InvalidSnapshot(format!("unknown header length {}", n))),
    };
    let extra = read_fixed(&mut cur, extra_len)?;

    regs.pc = u16::from_le_bytes([extra[0], extra[1]]);
    let hardware = extra[2];
    let extended = machine_is_extended(hardware, version)?;

    let machine = if extended {
        Machine::Spectrum128 { port_7ffd: extra[3] }
    } else {
        Machine::Spectrum48
    };

    let mut ay = AyState {
        select: extra[6],
        ..AyState::default()
    };
    ay.registers.copy_from_slice(&extra[7..23]);

    if extra_len == 55 && extra[54] & 1 != 0 {
        return Err(ConvertError::UnsupportedSnapshotVariant(
            "special paging mode (+2A/+3)".to_string(),
        ));
    }

    /* ===== memory blocks ===== */
    let mut memory = MemoryImage::new(extended)?;
    let mut loaded = [false; 8];

    while (cur.position() as usize) < raw.len() {
        let len = read_u16(&mut cur)?;
        let block = read_u8(&mut cur)?;
        let data = read_fixed(&mut cur, if len == 0xFFFF { PAGE_SIZE } else { len as usize })?;

        let Some(page) = block_page(block, extended) else {
            debug!("skipping block {}", block);
            continue;
        };
        let Some(dst) = memory.page_mut(page) else {
            continue;
        };

        if len == 0xFFFF {
            dst.copy_from_slice(&data);
        } else {
            decode_rle(&data, dst)?;
        }
        loaded[page as usize] = true;
    }

    let required: &[u8] = if extended { &[0, 1, 2, 3, 4, 5, 6, 7] } else { &[5, 2, 0] };
    if let Some(missing) = required.iter().find(|&&p| !loaded[p as usize]) {
        return Err(ConvertError::InvalidSnapshot(format!("page {} missing", missing)));
    }

    debug!("v{} snapshot, hardware {}, PC {:#06x} SP {:#06x}", version, hardware, regs.pc, regs.sp);

    Ok(Z80Snapshot {
        version,
        regs,
        border,
        machine,
        ay,
        memory,
    })
}

/// Hardware mode byte to machine type
fn machine_is_extended(hardware: u8, version: u8) -> Result<bool, ConvertError> {
    if hardware == 2 {
        return Err(ConvertError::UnsupportedSnapshotVariant("SamRam".to_string()));
    }
    Ok(if version == 2 { hardware >= 3 } else { hardware >= 4 })
}

/// Snapshot block number to RAM page
fn block_page(block: u8, extended: bool) -> Option<u8> {
    if extended {
        (3..=10).contains(&block).then(|| block - 3)
    } else {
        match block {
            4 => Some(2),
            5 => Some(0),
            8 => Some(5),
            _ => None,
        }
    }
}

/// Expand the `ED ED count byte` run-length encoding until `out` is full
fn decode_rle(input: &[u8], out: &mut [u8]) -> Result<usize, ConvertError> {
    let mut i = 0;
    let mut o = 0;

    while o < out.len() {
        let Some(&c) = input.get(i) else {
            return Err(ConvertError::InvalidSnapshot("compressed block too short".to_string()));
        };

        if c == 0xED && input.get(i + 1) == Some(&0xED) {
            let (Some(&count), Some(&value)) = (input.get(i + 2), input.get(i + 3)) else {
                return Err(ConvertError::InvalidSnapshot("truncated run".to_string()));
            };
            let count = count as usize;
            ensure(o + count <= out.len(), "run past end of block")?;
            out[o..o + count].fill(value);
            o += count;
            i += 4;
        } else {
            out[o] = c;
            o += 1;
            i += 1;
        }
    }

    Ok(i)
}

/* ======================= Helper functions ======================= */

fn ensure(cond: bool, msg: &str) -> Result<(), ConvertError> {
    if cond {
        Ok(())
    } else {
        Err(ConvertError::InvalidSnapshot(msg.to_string()))
    }
}

fn read_fixed(cur: &mut Cursor<&[u8]>, n: usize) -> Result<Vec<u8>, ConvertError> {
    let mut buf = vec![0u8; n];
    cur.read_exact(&mut buf)
        .map_err(|_| ConvertError::InvalidSnapshot("unexpected end of file".to_string()))?;
    Ok(buf)
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, ConvertError> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b)
        .map_err(|_| ConvertError::InvalidSnapshot("unexpected end of file".to_string()))?;
    Ok(b[0])
}

fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16, ConvertError> {
    let lo = read_u8(cur)? as u16;
    let hi = read_u8(cur)? as u16;
    Ok(lo | (hi << 8))
}
