//! Snapshot converter main API
//!
//! Converts .z80 snapshots to Microdrive cartridge images with a loader chain
//! that restores the machine state.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::check_delta::pack_main_block;
use crate::compress::compress;
use crate::config::Config;
use crate::error::ConvertError;
use crate::find_gap::{choose_gap, place_stack_routine, FindGap, Gap, StackPlacement, GAP_SCAN_START};
use crate::loader::{
    page_file, page_load_address, screen_file, BasicLoader, Launcher, RelocationStub, StackRoutine, BASIC_START, DEFAULT_BANK_OUT, LAUNCHER_ADDRESS, LAUNCHER_MAX, MAX_PAGE_STREAM, SCREEN_LOADER_ADDRESS,
    STACK_CODE_LEN, STORED_PAGES, STUB_LEN,
};
use crate::mdr_builder::{FileKind, MdrBuilder};
use crate::parse_z80::{self, Machine, Z80Snapshot, MAIN_SIZE};
use crate::zx_layout::Layout;
use log::{debug, info};
use std::ops::Range;
use std::path::Path;

/// Offset of the main block (0x5B00) within the 48K image
const MAIN_BLOCK_START: usize = GAP_SCAN_START as usize - 0x4000;

/// Offset of 0xC000 within the 48K image
const TOP_PAGE_START: usize = 0xC000 - 0x4000;

/// What went onto the cartridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub extended: bool,
    pub files: Vec<(String, usize)>,
    pub delta: usize,
    pub free_sectors: usize,
}

/// Restore code locations after injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    pub gap: Gap,
    pub stack: StackPlacement,
}

pub struct ConvertSnapshot {
    config: Config,
}

impl ConvertSnapshot {
    /// Create a new converter with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Convert a .z80 snapshot to an .mdr cartridge image
    ///
    /// # Arguments
    /// * `input_path` - Path to the input .z80 file
    /// * `output_path` - Path to the output .mdr file
    ///
    /// Nothing is written unless every stage succeeds.
    pub fn convert(&self, input_path: &Path, output_path: &Path) -> Result<ConversionReport, ConvertError> {
        if output_path.exists() && !self.config.overwrite {
            return Err(ConvertError::OutputExists(output_path.to_path_buf()));
        }

        let snap = parse_z80::import(input_path)?;
        info!(
            "{}: v{} {} snapshot, PC {:#06x}",
            input_path.display(),
            snap.version,
            if snap.is_extended() { "128k" } else { "48k" },
            snap.regs.pc
        );

        let (mdr, report) = self.build(snap)?;
        mdr.make_mdr(output_path)?;
        Ok(report)
    }

    /// Run the whole pipeline in memory
    pub fn build(&self, mut snap: Z80Snapshot) -> Result<(MdrBuilder, ConversionReport), ConvertError> {
        let extended = snap.is_extended();
        let injection = inject_restore_code(&mut snap)?;
        debug!("stub at {:#06x}, stack routine at {:#06x}", injection.gap.address, injection.stack.code_address);

        let screen = compress(snap.memory.screen(), Layout::Display)?;

        let mut pages = Vec::new();
        if extended {
            for page in STORED_PAGES {
                let Some(data) = snap.memory.page(page) else {
                    return Err(ConvertError::InvalidSnapshot(format!("page {} missing", page)));
                };
                let stream = fit_page_stream(compress(data, Layout::Linear)?)?;
                pages.push((page, stream));
            }
        }

        let main = snap.memory.main();
        let packed = pack_main_block(&main[MAIN_BLOCK_START..])?;
        let compressed_address = (0x10000 - packed.data.len()) as u16;
        let bank_out = match snap.machine {
            Machine::Spectrum48 => DEFAULT_BANK_OUT,
            Machine::Spectrum128 { port_7ffd } => port_7ffd,
        };
        let launch = Launcher {
            compressed_address,
            tail: &main[MAIN_SIZE - packed.delta..],
            bank_out,
            stub_address: injection.gap.address,
        }
        .to_bytes();

        let mut mdr = MdrBuilder::new(self.config.volume_bytes())?;
        let mut files = Vec::new();

        let run = BasicLoader { extended, border: snap.border }.to_bytes();
        mdr.append_file("run", &run, BASIC_START, FileKind::Program, 0)?;
        files.push(("run".to_string(), run.len()));

        let screen_file = screen_file(&screen);
        mdr.append_file("S", &screen_file, SCREEN_LOADER_ADDRESS, FileKind::Code, 0xFFFF)?;
        files.push(("S".to_string(), screen_file.len()));

        for (i, (page, stream)) in pages.iter().enumerate() {
            let first = i == 0;
            let name = ((b'1' + i as u8) as char).to_string();
            let file = page_file(*page, stream, first);
            mdr.append_file(&name, &file, page_load_address(first), FileKind::Code, 0xFFFF)?;
            files.push((name, file.len()));
        }

        mdr.append_file("M", &packed.data, compressed_address, FileKind::Code, 0xFFFF)?;
        files.push(("M".to_string(), packed.data.len()));

        mdr.append_file("L", &launch, LAUNCHER_ADDRESS, FileKind::Code, 0xFFFF)?;
        files.push(("L".to_string(), launch.len()));

        let summary: Vec<String> = files.iter().map(|(n, l)| format!("{}({})", n, l)).collect();
        info!(
            "{} {} delta {}",
            if extended { "128k" } else { "48k" },
            summary.join("+"),
            packed.delta
        );

        let report = ConversionReport {
            extended,
            files,
            delta: packed.delta,
            free_sectors: mdr.blank_sectors(),
        };
        Ok((mdr, report))
    }
}

/// Place the relocation stub and the stack routine and write them into the
/// resume-time memory image
pub fn inject_restore_code(snap: &mut Z80Snapshot) -> Result<Injection, ConvertError> {
    let regs = snap.regs.clone();
    let bank = snap.resume_bank();
    let stack = place_stack_routine(regs.sp, regs.pc, STACK_CODE_LEN)?;

    let also_reserved = aliased_windows(
        bank,
        &[
            LAUNCHER_ADDRESS as u32..LAUNCHER_ADDRESS as u32 + LAUNCHER_MAX as u32,
            stack.code_window(),
            stack.return_window(),
            regs.pc as u32..regs.pc as u32 + 1,
        ],
    );

    let gap = {
        let main = &snap.memory.main()[MAIN_BLOCK_START..TOP_PAGE_START];
        let finder = FindGap::new(main, snap.memory.bank_view(bank), GAP_SCAN_START, STUB_LEN);
        choose_gap(&finder, snap.memory.screen(), STUB_LEN, &stack, regs.pc, &also_reserved)
    };

    let routine = StackRoutine { regs: &regs, gap, placement: stack };
    snap.memory.write_resume(stack.code_address, &routine.to_bytes(), bank);
    snap.memory.write_resume(stack.return_slot, &routine.return_word(), bank);

    let saved: Vec<u8> = (0..LAUNCHER_MAX)
        .map(|i| snap.memory.read_resume(LAUNCHER_ADDRESS + i as u16, bank))
        .collect();
    let stub = RelocationStub {
        regs: &regs,
        gap,
        stack_code: stack.code_address,
        saved_screen: &saved,
    };
    snap.memory.write_resume(gap.address, &stub.to_bytes(), bank);

    Ok(Injection { gap, stack })
}

/// A page stream must load below the top of memory from its load address
fn fit_page_stream(stream: Vec<u8>) -> Result<Vec<u8>, ConvertError> {
    if stream.len() > MAX_PAGE_STREAM {
        return Err(ConvertError::ImageTooLarge {
            what: "128k page",
            size: stream.len(),
            limit: MAX_PAGE_STREAM,
        });
    }
    Ok(stream)
}

/// Second addresses of `windows` when `bank` is also mapped lower down
///
/// Page 5 lives at 0x4000 and page 2 at 0x8000; paged in at 0xC000 as well,
/// each byte there has two addresses and a gap must avoid both.
fn aliased_windows(bank: u8, windows: &[Range<u32>]) -> Vec<Range<u32>> {
    let low = match bank {
        5 => 0x4000u32,
        2 => 0x8000u32,
        _ => return Vec::new(),
    };
    let shift = 0xC000 - low;

    windows
        .iter()
        .filter_map(|w| {
            if w.start >= 0xC000 {
                Some(w.start - shift..w.end - shift)
            } else if w.start >= low && w.start < low + 0x4000 {
                Some(w.start + shift..w.end + shift)
            } else {
                None
            }
        })
        .collect()
}
