//! Microdrive cartridge image builder
//!
//! Creates `.mdr` images: 254 sectors of 543 bytes followed by a write
//! protection byte. Sectors are stored from number 254 down to 1. Each holds
//! - a 15 byte sector header: 0x01, sector number, 2 unused, volume name, checksum
//! - a 15 byte record header: flags, sequence, data length, file name, checksum
//! - 512 data bytes and their checksum
//!
//! Checksums are byte sums modulo 255. The first record of a file starts its
//! data with the 9 byte file header (type, length, start, two parameters).
//!
// Copyright (c) 2025 Tommy Olsen
// Licensed under the MIT License.

use crate::config::{pad_name, NAME_LEN};
use crate::error::{try_buffer, ConvertError};
use log::{info, trace};
use std::fs;
use std::path::Path;

pub const SECTOR_COUNT: u8 = 254;
pub const SECTOR_SIZE: usize = 543;
pub const MDR_SIZE: usize = SECTOR_COUNT as usize * SECTOR_SIZE + 1;

pub const DATA_SIZE: usize = 512;
pub const FILE_HEADER_LEN: usize = 9;

const RECORD_OFFSET: usize = 15;
const DATA_OFFSET: usize = 30;
const DATA_CHECKSUM: usize = DATA_OFFSET + DATA_SIZE;

/// Sectors skipped unchecked after each write, so the drive has time to
/// process one sector before the next passes the head
const SECTOR_GAP: usize = 2;

const FLAG_DATA: u8 = 0x04;
const FLAG_LAST: u8 = 0x06;

/// Microdrive file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// BASIC program, parameter is the autostart line
    Program,
    /// Machine code block
    Code,
}

impl FileKind {
    pub fn type_byte(&self) -> u8 {
        match self {
            FileKind::Program => 0x00,
            FileKind::Code => 0x03,
        }
    }
}

/// Builder for Microdrive cartridge images (.mdr)
#[derive(Debug)]
pub struct MdrBuilder {
    volume: [u8; NAME_LEN],
    image: Vec<u8>,
    cursor: u8,
}

impl MdrBuilder {
    /// Create a formatted, empty cartridge
    pub fn new(volume: [u8; NAME_LEN]) -> Result<Self, ConvertError> {
        let mut image = try_buffer("cartridge image", MDR_SIZE)?;
        image.resize(MDR_SIZE, 0);

        let mut builder = Self {
            volume,
            image,
            cursor: SECTOR_COUNT,
        };
        for sector in 1..=SECTOR_COUNT {
            builder.format_sector(sector);
        }
        // write protection tab: writable
        builder.image[MDR_SIZE - 1] = 0x00;

        Ok(builder)
    }

    fn slot(sector: u8) -> usize {
        (SECTOR_COUNT - sector) as usize * SECTOR_SIZE
    }

    fn format_sector(&mut self, sector: u8) {
        let at = Self::slot(sector);
        let slot = &mut self.image[at..at + SECTOR_SIZE];
        slot.fill(0);
        slot[0] = 0x01;
        slot[1] = sector;
        slot[4..4 + NAME_LEN].copy_from_slice(&self.volume);
        slot[14] = checksum(&slot[..14]);
    }

    /// Sectors needed for a payload of `len` bytes
    pub fn sectors_needed(len: usize) -> usize {
        (len + FILE_HEADER_LEN) / DATA_SIZE + 1
    }

    pub fn is_blank(&self, sector: u8) -> bool {
        self.image[Self::slot(sector) + RECORD_OFFSET] == 0
    }

    pub fn blank_sectors(&self) -> usize {
        (1..=SECTOR_COUNT).filter(|&s| self.is_blank(s)).count()
    }

    /// Sector the next file starts on
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    /// Next blank sector after `from`, walking downwards with wrap-around
    fn next_free(&self, from: u8) -> Option<u8> {
        let mut sector = from;
        let mut gap = SECTOR_GAP;
        let mut examined = 0;

        loop {
            sector = if sector == 1 { SECTOR_COUNT } else { sector - 1 };
            if gap > 0 {
                gap -= 1;
                continue;
            }
            if self.is_blank(sector) {
                return Some(sector);
            }
            examined += 1;
            if examined == SECTOR_COUNT as usize {
                return None;
            }
        }
    }

    /// Append a file, returning the updated sector cursor
    ///
    /// # Arguments
    /// * `name` - File name (space padded to 10 characters)
    /// * `payload` - File contents
    /// * `load_address` - Start address stored in the file header
    /// * `kind` - BASIC program or code
    /// * `param` - Autostart line for programs, ignored for code
    pub fn append_file(
        &mut self,
        name: &str,
        payload: &[u8],
        load_address: u16,
        kind: FileKind,
        param: u16,
    ) -> Result<u8, ConvertError> {
        let Ok(len) = u16::try_from(payload.len()) else {
            return Err(ConvertError::ImageTooLarge {
                what: "cartridge file",
                size: payload.len(),
                limit: u16::MAX as usize,
            });
        };

        let needed = Self::sectors_needed(payload.len());
        let free = self.blank_sectors();
        if needed > free || !self.is_blank(self.cursor) {
            return Err(ConvertError::CartridgeFull {
                file: name.trim_end().to_string(),
                needed,
                free,
            });
        }

        let file_name = pad_name(name);
        let mut header = [0u8; FILE_HEADER_LEN];
        header[0] = kind.type_byte();
        header[1..3].copy_from_slice(&len.to_le_bytes());
        header[3..5].copy_from_slice(&load_address.to_le_bytes());
        match kind {
            FileKind::Program => {
                header[5..7].copy_from_slice(&len.to_le_bytes());
                header[7..9].copy_from_slice(&param.to_le_bytes());
            }
            FileKind::Code => header[5..9].fill(0xFF),
        }

        let first = self.cursor;
        let mut remaining = payload;

        for seq in 0..needed {
            let mut data = [0u8; DATA_SIZE];
            let mut used = 0;
            if seq == 0 {
                data[..FILE_HEADER_LEN].copy_from_slice(&header);
                used = FILE_HEADER_LEN;
            }
            let take = remaining.len().min(DATA_SIZE - used);
            data[used..used + take].copy_from_slice(&remaining[..take]);
            used += take;
            remaining = &remaining[take..];

            let last = seq == needed - 1;
            let sector = self.cursor;
            self.write_sector(sector, &file_name, seq as u8, last, &data, used);

            match self.next_free(sector) {
                Some(next) => self.cursor = next,
                // the cartridge may fill up exactly with the last record
                None if last => {}
                None => {
                    return Err(ConvertError::CartridgeFull {
                        file: name.trim_end().to_string(),
                        needed,
                        free,
                    })
                }
            }
        }

        info!("{}: {} bytes, {} sectors from {}", name.trim_end(), payload.len(), needed, first);
        Ok(self.cursor)
    }

    fn write_sector(&mut self, sector: u8, name: &[u8; NAME_LEN], seq: u8, last: bool, data: &[u8; DATA_SIZE], used: usize) {
        let at = Self::slot(sector);
        let slot = &mut self.image[at..at + SECTOR_SIZE];

        let record = &mut slot[RECORD_OFFSET..DATA_OFFSET];
        record[0] = if last { FLAG_LAST } else { FLAG_DATA };
        record[1] = seq;
        record[2..4].copy_from_slice(&(used as u16).to_le_bytes());
        record[4..4 + NAME_LEN].copy_from_slice(name);
        record[14] = checksum(&record[..14]);

        slot[DATA_OFFSET..DATA_CHECKSUM].copy_from_slice(data);
        slot[DATA_CHECKSUM] = checksum(data);
        trace!("sector {}: record {} ({} bytes)", sector, seq, used);
    }

    /// Reassemble a file from its records, without the 9 byte file header
    pub fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        let file_name = pad_name(name);
        let mut records: Vec<(u8, &[u8])> = Vec::new();

        for sector in 1..=SECTOR_COUNT {
            let at = Self::slot(sector);
            let slot = &self.image[at..at + SECTOR_SIZE];
            if self.is_blank(sector) || slot[RECORD_OFFSET + 4..RECORD_OFFSET + 14] != file_name {
                continue;
            }
            let used = u16::from_le_bytes([slot[RECORD_OFFSET + 2], slot[RECORD_OFFSET + 3]]) as usize;
            records.push((slot[RECORD_OFFSET + 1], &slot[DATA_OFFSET..DATA_OFFSET + used]));
        }

        records.sort_by_key(|(seq, _)| *seq);
        let mut data: Vec<u8> = records.iter().flat_map(|(_, d)| d.iter().copied()).collect();
        if data.len() < FILE_HEADER_LEN {
            return None;
        }
        Some(data.split_off(FILE_HEADER_LEN))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.image
    }

    /// Write the image to disk
    pub fn make_mdr(&self, path: &Path) -> Result<(), ConvertError> {
        fs::write(path, &self.image)?;
        info!("wrote {} ({} sectors free)", path.display(), self.blank_sectors());
        Ok(())
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    (bytes.iter().map(|&b| b as u32).sum::<u32>() % 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn builder() -> MdrBuilder {
        MdrBuilder::new(pad_name("TEST")).unwrap()
    }

    fn sector(b: &MdrBuilder, s: u8) -> &[u8] {
        let at = MdrBuilder::slot(s);
        &b.as_bytes()[at..at + SECTOR_SIZE]
    }

    #[test]
    fn test_blank_cartridge() {
        let b = builder();
        assert_eq!(b.as_bytes().len(), MDR_SIZE);
        assert_eq!(b.as_bytes().len(), 137923);
        assert_eq!(b.blank_sectors(), 254);
        assert_eq!(b.cursor(), 254);

        let s = sector(&b, 254);
        assert_eq!(&s[..4], &[0x01, 254, 0, 0]);
        assert_eq!(&s[4..14], b"TEST      ");
        assert_eq!(s[14], checksum(&s[..14]));
        assert!(s[15..].iter().all(|&x| x == 0));

        // sector 1 is stored last
        assert_eq!(b.as_bytes()[253 * SECTOR_SIZE + 1], 1);
        assert_eq!(b.as_bytes()[MDR_SIZE - 1], 0);
    }

    #[test]
    fn test_sectors_needed() {
        assert_eq!(MdrBuilder::sectors_needed(0), 1);
        assert_eq!(MdrBuilder::sectors_needed(502), 1);
        assert_eq!(MdrBuilder::sectors_needed(503), 2);
        assert_eq!(MdrBuilder::sectors_needed(600), 2);
        assert_eq!(MdrBuilder::sectors_needed(1015), 3);
    }

    #[test]
    fn test_single_sector_file() {
        let mut b = builder();
        let payload = [0xAAu8; 100];
        let cursor = b.append_file("S", &payload, 25088, FileKind::Code, 0).unwrap();
        // two sectors skipped, then the next blank one
        assert_eq!(cursor, 251);

        let s = sector(&b, 254);
        let record = &s[15..30];
        assert_eq!(record[0], FLAG_LAST);
        assert_eq!(record[1], 0);
        assert_eq!(u16::from_le_bytes([record[2], record[3]]), 109);
        assert_eq!(&record[4..14], b"S         ");
        assert_eq!(record[14], checksum(&record[..14]));

        let data = &s[30..542];
        assert_eq!(&data[..9], &[0x03, 100, 0, 0x00, 0x62, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(data[9..109].iter().all(|&x| x == 0xAA));
        assert!(data[109..].iter().all(|&x| x == 0));
        assert_eq!(s[542], checksum(data));

        assert_eq!(b.read_file("S").unwrap(), payload.to_vec());
        assert_eq!(b.blank_sectors(), 253);
    }

    #[test]
    fn test_basic_file_header() {
        let mut b = builder();
        b.append_file("run", &[1, 2, 3], 23813, FileKind::Program, 0).unwrap();
        let data = &sector(&b, 254)[30..39];
        assert_eq!(data, &[0x00, 3, 0, 0x05, 0x5D, 3, 0, 0, 0]);
    }

    #[test]
    fn test_multi_sector_file_interleaves() {
        let mut b = builder();
        let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let cursor = b.append_file("M", &payload, 0x8000, FileKind::Code, 0).unwrap();
        assert_eq!(cursor, 248);

        let first = sector(&b, 254);
        assert_eq!(first[15], FLAG_DATA);
        assert_eq!(u16::from_le_bytes([first[17], first[18]]), 512);
        let second = sector(&b, 251);
        assert_eq!(second[15], FLAG_LAST);
        assert_eq!(second[16], 1);
        assert_eq!(u16::from_le_bytes([second[17], second[18]]), 97);

        assert_eq!(b.read_file("M").unwrap(), payload);
    }

    #[test]
    fn test_record_length_at_sector_boundary() {
        let mut b = builder();
        let payload = vec![0x55u8; 505];
        b.append_file("L", &payload, 0x4000, FileKind::Code, 0).unwrap();
        let first = sector(&b, 254);
        assert_eq!(u16::from_le_bytes([first[17], first[18]]), 512);
        let second = sector(&b, 251);
        assert_eq!(u16::from_le_bytes([second[17], second[18]]), 2);
        assert_eq!(b.read_file("L").unwrap(), payload);
    }

    #[test]
    fn test_search_wraps_around() {
        let mut b = builder();
        b.cursor = 2;
        let cursor = b.append_file("X", &[1], 0x8000, FileKind::Code, 0).unwrap();
        // 1 and 254 are skipped
        assert_eq!(cursor, 253);
    }

    #[test]
    fn test_fill_cartridge() {
        let mut b = builder();
        for i in 0..254u32 {
            b.append_file(&format!("F{}", i), &[i as u8], 0x8000, FileKind::Code, 0).unwrap();
        }
        assert_eq!(b.blank_sectors(), 0);

        let before = b.as_bytes().to_vec();
        let err = b.append_file("extra", &[0], 0x8000, FileKind::Code, 0).unwrap_err();
        assert!(matches!(err, ConvertError::CartridgeFull { needed: 1, free: 0, .. }));
        assert_eq!(b.as_bytes(), &before[..]);
    }

    #[test]
    fn test_third_file_does_not_fit_in_five_sectors() {
        let mut b = builder();
        for i in 0..249u32 {
            b.append_file(&format!("F{}", i), &[i as u8], 0x8000, FileKind::Code, 0).unwrap();
        }
        assert_eq!(b.blank_sectors(), 5);

        let two: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        b.append_file("A", &two, 0x8000, FileKind::Code, 0).unwrap();
        b.append_file("B", &two, 0x8000, FileKind::Code, 0).unwrap();
        let err = b.append_file("C", &two, 0x8000, FileKind::Code, 0).unwrap_err();
        assert!(matches!(err, ConvertError::CartridgeFull { needed: 2, free: 1, .. }));

        assert_eq!(b.read_file("A").unwrap(), two);
        assert_eq!(b.read_file("B").unwrap(), two);
        assert_eq!(b.read_file("C"), None);
    }

    #[test]
    fn test_too_big_for_remaining_space() {
        let mut b = builder();
        let big = vec![0u8; 60000];
        b.append_file("A", &big, 0x8000, FileKind::Code, 0).unwrap();
        b.append_file("B", &big, 0x8000, FileKind::Code, 0).unwrap();
        let before = b.blank_sectors();
        assert_eq!(before, 254 - 2 * 118);
        let err = b.append_file("C", &big, 0x8000, FileKind::Code, 0).unwrap_err();
        assert!(matches!(err, ConvertError::CartridgeFull { .. }));
        assert_eq!(b.blank_sectors(), before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sector_accounting(lens in proptest::collection::vec(0usize..3000, 1..6)) {
            let mut b = builder();
            let mut used = 0;
            for (i, len) in lens.iter().enumerate() {
                let payload: Vec<u8> = (0..*len).map(|j| (j * 7 + i) as u8).collect();
                b.append_file(&format!("P{}", i), &payload, 0x8000, FileKind::Code, 0).unwrap();
                used += MdrBuilder::sectors_needed(*len);
                prop_assert_eq!(b.read_file(&format!("P{}", i)), Some(payload));
            }
            prop_assert_eq!(b.blank_sectors(), 254 - used);
        }
    }
}
