//! Conversion error taxonomy
//!
//! Every failure is fatal for the run: no cartridge is produced. The CLI maps
//! each kind to its own process exit code.
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot allocate {bytes} bytes for the {what}")]
    AllocationFailure { what: &'static str, bytes: usize },

    #[error("unsupported snapshot: {0}")]
    UnsupportedSnapshotVariant(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("main block cannot be decompressed in place (delta {delta} exceeds {max})")]
    CompressionInfeasible { delta: usize, max: usize },

    #[error("{what} is too large: {size} bytes (limit {limit})")]
    ImageTooLarge { what: &'static str, size: usize, limit: usize },

    #[error("{}", stack_message(.sp, .pc))]
    StackProgramCounterCollision { sp: u16, pc: u16 },

    #[error("cartridge full: {needed} sectors needed for \"{file}\", {free} free")]
    CartridgeFull { file: String, needed: usize, free: usize },

    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertError::Io(_) => 2,
            ConvertError::OutputExists(_) => 3,
            ConvertError::UnsupportedSnapshotVariant(_) => 4,
            ConvertError::AllocationFailure { .. } => 6,
            ConvertError::InvalidSnapshot(_) => 7,
            ConvertError::CompressionInfeasible { .. } => 9,
            ConvertError::ImageTooLarge { .. } => 10,
            ConvertError::StackProgramCounterCollision { .. } => 11,
            ConvertError::CartridgeFull { .. } => 12,
        }
    }
}

fn stack_message(sp: &u16, pc: &u16) -> String {
    let top = if *sp == 0 { 0x10000 } else { *sp as u32 };
    if (top.saturating_sub(2)..top).contains(&(*pc as u32)) {
        format!("program counter {pc:#06x} collides with the stack routine below SP {sp:#06x}")
    } else {
        format!("no room for the stack routine between 0x4000 and SP {sp:#06x}")
    }
}

/// Allocate an empty buffer with room for `bytes` elements, reporting failure
/// instead of aborting.
pub fn try_buffer<T>(what: &'static str, bytes: usize) -> Result<Vec<T>, ConvertError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| ConvertError::AllocationFailure { what, bytes })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            ConvertError::Io(std::io::Error::other("x")),
            ConvertError::OutputExists(PathBuf::from("a.mdr")),
            ConvertError::UnsupportedSnapshotVariant("SamRAM".into()),
            ConvertError::AllocationFailure { what: "x", bytes: 1 },
            ConvertError::InvalidSnapshot("x".into()),
            ConvertError::CompressionInfeasible { delta: 129, max: 128 },
            ConvertError::ImageTooLarge { what: "x", size: 2, limit: 1 },
            ConvertError::StackProgramCounterCollision { sp: 0, pc: 0 },
            ConvertError::CartridgeFull { file: "M".into(), needed: 2, free: 1 },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_stack_messages() {
        let pc = ConvertError::StackProgramCounterCollision { sp: 0xFF00, pc: 0xFEFF };
        assert!(pc.to_string().contains("program counter 0xfeff"));
        let low = ConvertError::StackProgramCounterCollision { sp: 0x4010, pc: 0x8000 };
        assert!(low.to_string().starts_with("no room"));
        assert_eq!(low.exit_code(), 11);
    }

    #[test]
    fn test_try_buffer() {
        let buf: Vec<u8> = try_buffer("scratch", 512).unwrap();
        assert!(buf.capacity() >= 512);
        assert!(buf.is_empty());
    }
}
