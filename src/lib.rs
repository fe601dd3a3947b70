//! Z80 Snapshot to Microdrive Converter Library
//!
//! This library provides the core functionality for converting ZX Spectrum
//! `.z80` snapshot files (48K and 128K) to bootable Microdrive cartridge
//! images (`.mdr`) that restore the captured machine state.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

pub mod check_delta;
pub mod compress;
pub mod config;
pub mod convert_snapshot;
pub mod error;
pub mod find_gap;
pub mod find_match;
pub mod loader;
pub mod mdr_builder;
pub mod parse_z80;
pub mod zx_layout;
