//! Cartridge and mapper support
//!
//! This module parses iNES (v1) images and owns the PRG/CHR memory of a
//! cartridge. Address translation is delegated to a [`Mapper`], selected once
//! from the header's mapper id. A mapper only converts bus addresses into
//! offsets; the cartridge performs the actual reads and writes so that every
//! access is bounds-checked in one place.

use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

/// iNES header size
pub const HEADER_SIZE: usize = 16;
/// Size of the optional trainer block that follows the header
pub const TRAINER_SIZE: usize = 512;
/// PRG ROM bank size (16KB)
pub const PRG_BANK_SIZE: usize = 16 * 1024;
/// CHR ROM bank size (8KB)
pub const CHR_BANK_SIZE: usize = 8 * 1024;

const INES_MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

/// Nametable mirroring arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    /// $2000/$2400 share a bank, $2800/$2C00 share the other
    Horizontal,
    /// $2000/$2800 share a bank, $2400/$2C00 share the other
    Vertical,
    /// Every nametable maps to the first bank
    OneScreenLo,
    /// Every nametable maps to the second bank
    OneScreenHi,
}

/// iNES header structure
#[derive(Debug, Clone)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_banks: u8,
    /// CHR ROM size in 8KB units (0 means the board carries CHR RAM)
    pub chr_rom_banks: u8,
    /// Flags 6: mirroring, battery, trainer, mapper low nibble
    pub flags_6: u8,
    /// Flags 7: console type, mapper high nibble
    pub flags_7: u8,
    /// PRG RAM size in 8KB units
    pub prg_ram_size: u8,
    /// TV system
    pub flags_9: u8,
    /// TV system, PRG RAM presence (unofficial)
    pub flags_10: u8,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::TooShort(bytes.len()));
        }
        if bytes[0..4] != INES_MAGIC {
            return Err(CartridgeError::BadMagic);
        }

        Ok(Self {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            flags_6: bytes[6],
            flags_7: bytes[7],
            prg_ram_size: bytes[8],
            flags_9: bytes[9],
            flags_10: bytes[10],
        })
    }

    /// Mapper number, split across the high nibbles of flags 6 and 7
    pub fn mapper_number(&self) -> u8 {
        (self.flags_7 & 0xF0) | (self.flags_6 >> 4)
    }

    /// Check if a 512-byte trainer precedes PRG data
    pub fn has_trainer(&self) -> bool {
        (self.flags_6 & 0x04) != 0
    }

    /// Hard-wired nametable mirroring
    pub fn mirroring(&self) -> Mirroring {
        if (self.flags_6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }
}

/// Address translation capability of a cartridge board.
///
/// Each method maps a bus address to an offset into PRG or CHR memory, or
/// returns `None` to decline the access and let the bus handle it.
pub trait Mapper: fmt::Debug + Send {
    /// iNES mapper id
    fn mapper_id(&self) -> u8;

    /// CPU read in cartridge space, yielding a PRG offset
    fn cpu_map_read(&self, address: u16) -> Option<usize>;

    /// CPU write in cartridge space, yielding a writable PRG offset.
    /// Boards with registers latch `data` here.
    fn cpu_map_write(&mut self, address: u16, data: u8) -> Option<usize>;

    /// PPU read in pattern-table space, yielding a CHR offset
    fn ppu_map_read(&self, address: u16) -> Option<usize>;

    /// PPU write in pattern-table space, yielding a writable CHR offset
    fn ppu_map_write(&mut self, address: u16) -> Option<usize>;

    /// Mirroring chosen at runtime by the board, overriding the header
    fn mirroring(&self) -> Option<Mirroring> {
        None
    }

    /// Return bank registers to their power-on state
    fn reset(&mut self) {}
}

/// Mapper 000 (NROM): fixed PRG, fixed CHR.
#[derive(Debug, Clone)]
pub struct Nrom {
    prg_banks: u8,
    chr_banks: u8,
}

impl Nrom {
    /// Create a new NROM mapper for the given bank counts
    pub fn new(prg_banks: u8, chr_banks: u8) -> Self {
        Self {
            prg_banks,
            chr_banks,
        }
    }

    fn prg_offset(&self, address: u16) -> Option<usize> {
        if address < 0x8000 {
            return None;
        }
        // NROM-128 mirrors its single bank into $C000-$FFFF
        let mask = if self.prg_banks > 1 { 0x7FFF } else { 0x3FFF };
        Some((address & mask) as usize)
    }
}

impl Mapper for Nrom {
    fn mapper_id(&self) -> u8 {
        0
    }

    fn cpu_map_read(&self, address: u16) -> Option<usize> {
        self.prg_offset(address)
    }

    fn cpu_map_write(&mut self, _address: u16, _data: u8) -> Option<usize> {
        // No registers and PRG is ROM
        None
    }

    fn ppu_map_read(&self, address: u16) -> Option<usize> {
        (address < 0x2000).then_some(address as usize)
    }

    fn ppu_map_write(&mut self, address: u16) -> Option<usize> {
        (address < 0x2000 && self.chr_banks == 0).then_some(address as usize)
    }
}

/// Build the mapper for a header's mapper id, if supported
fn select_mapper(id: u8, prg_banks: u8, chr_banks: u8) -> Option<Box<dyn Mapper>> {
    match id {
        0 => Some(Box::new(Nrom::new(prg_banks, chr_banks))),
        _ => None,
    }
}

/// Cartridge structure
#[derive(Debug)]
pub struct Cartridge {
    /// iNES header
    header: InesHeader,
    /// PRG ROM data
    prg: Vec<u8>,
    /// CHR ROM data, or CHR RAM when the header lists no CHR banks
    chr: Vec<u8>,
    /// Address translation; absent when the mapper id is unsupported
    mapper: Option<Box<dyn Mapper>>,
}

impl Cartridge {
    /// Create a new cartridge from iNES ROM data.
    ///
    /// An unsupported mapper id is not a load error: the cartridge is returned
    /// without a mapper and reports `is_valid() == false`.
    pub fn from_rom(rom_data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(rom_data)?;

        let mut offset = HEADER_SIZE;
        if header.has_trainer() {
            offset += TRAINER_SIZE;
        }

        let prg_len = header.prg_rom_banks as usize * PRG_BANK_SIZE;
        let prg = take_section(rom_data, offset, prg_len, "PRG ROM")?.to_vec();
        offset += prg_len;

        let chr = if header.chr_rom_banks == 0 {
            vec![0; CHR_BANK_SIZE]
        } else {
            let chr_len = header.chr_rom_banks as usize * CHR_BANK_SIZE;
            take_section(rom_data, offset, chr_len, "CHR ROM")?.to_vec()
        };

        let mapper_id = header.mapper_number();
        let mapper = select_mapper(mapper_id, header.prg_rom_banks, header.chr_rom_banks);
        if mapper.is_none() {
            warn!(mapper_id, "unsupported mapper, cartridge cannot run");
        }

        debug!(
            mapper_id,
            prg_banks = header.prg_rom_banks,
            chr_banks = header.chr_rom_banks,
            mirroring = ?header.mirroring(),
            trainer = header.has_trainer(),
            "parsed iNES image"
        );

        Ok(Self {
            header,
            prg,
            chr,
            mapper,
        })
    }

    /// Whether a mapper was constructed for this image
    pub fn is_valid(&self) -> bool {
        self.mapper.is_some()
    }

    /// Get the iNES header
    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    /// Mapper id from the header
    pub fn mapper_id(&self) -> u8 {
        self.header.mapper_number()
    }

    /// Get PRG ROM data
    pub fn prg_rom(&self) -> &[u8] {
        &self.prg
    }

    /// Get CHR data
    pub fn chr(&self) -> &[u8] {
        &self.chr
    }

    /// Whether CHR memory is writable
    pub fn has_chr_ram(&self) -> bool {
        self.header.chr_rom_banks == 0
    }

    /// Current nametable mirroring
    pub fn mirroring(&self) -> Mirroring {
        self.mapper
            .as_ref()
            .and_then(|m| m.mirroring())
            .unwrap_or_else(|| self.header.mirroring())
    }

    /// Reset mapper state
    pub fn reset(&mut self) {
        if let Some(mapper) = self.mapper.as_mut() {
            mapper.reset();
        }
    }

    /// CPU read; `None` when the cartridge does not claim the address
    pub fn cpu_read(&self, address: u16) -> Option<u8> {
        let offset = self.mapper.as_ref()?.cpu_map_read(address)?;
        self.prg.get(offset).copied()
    }

    /// CPU write; returns true when the cartridge claimed the address
    pub fn cpu_write(&mut self, address: u16, data: u8) -> bool {
        let Some(offset) = self
            .mapper
            .as_mut()
            .and_then(|m| m.cpu_map_write(address, data))
        else {
            return false;
        };
        match self.prg.get_mut(offset) {
            Some(byte) => {
                *byte = data;
                true
            }
            None => false,
        }
    }

    /// PPU read; `None` when the cartridge does not claim the address
    pub fn ppu_read(&self, address: u16) -> Option<u8> {
        let offset = self.mapper.as_ref()?.ppu_map_read(address)?;
        self.chr.get(offset).copied()
    }

    /// PPU write; returns true when the cartridge claimed the address
    pub fn ppu_write(&mut self, address: u16, data: u8) -> bool {
        let Some(offset) = self.mapper.as_mut().and_then(|m| m.ppu_map_write(address)) else {
            return false;
        };
        match self.chr.get_mut(offset) {
            Some(byte) => {
                *byte = data;
                true
            }
            None => false,
        }
    }
}

fn take_section<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    section: &'static str,
) -> Result<&'a [u8], CartridgeError> {
    data.get(offset..offset + len)
        .ok_or(CartridgeError::Truncated {
            section,
            expected: len,
            available: data.len().saturating_sub(offset),
        })
}

/// Cartridge error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartridgeError {
    #[error("iNES image too short for header: {0} bytes")]
    TooShort(usize),
    #[error("missing iNES signature")]
    BadMagic,
    #[error("{section} truncated: expected {expected} bytes, found {available}")]
    Truncated {
        section: &'static str,
        expected: usize,
        available: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_rom(prg_banks: u8, chr_banks: u8, flags_6: u8, flags_7: u8) -> Vec<u8> {
        let mut rom = Vec::new();
        rom.extend_from_slice(b"NES\x1A");
        rom.push(prg_banks);
        rom.push(chr_banks);
        rom.push(flags_6);
        rom.push(flags_7);
        rom.extend_from_slice(&[0u8; 8]);
        if flags_6 & 0x04 != 0 {
            rom.extend_from_slice(&[0xEEu8; TRAINER_SIZE]);
        }
        for bank in 0..prg_banks {
            rom.extend(std::iter::repeat(bank).take(PRG_BANK_SIZE));
        }
        rom.extend(std::iter::repeat(0x55).take(chr_banks as usize * CHR_BANK_SIZE));
        rom
    }

    #[test]
    fn test_header_parsing() {
        let rom = build_rom(2, 1, 0x31, 0x40);
        let header = InesHeader::parse(&rom).unwrap();
        assert_eq!(header.prg_rom_banks, 2);
        assert_eq!(header.chr_rom_banks, 1);
        assert_eq!(header.mapper_number(), 0x43);
        assert_eq!(header.mirroring(), Mirroring::Vertical);
    }

    #[test]
    fn test_bad_header() {
        assert_eq!(InesHeader::parse(b"NES").unwrap_err(), CartridgeError::TooShort(3));
        let mut rom = build_rom(1, 1, 0, 0);
        rom[3] = 0;
        assert_eq!(Cartridge::from_rom(&rom).unwrap_err(), CartridgeError::BadMagic);
    }

    #[test]
    fn test_truncated_prg() {
        let mut rom = build_rom(2, 0, 0, 0);
        rom.truncate(HEADER_SIZE + PRG_BANK_SIZE);
        assert!(matches!(
            Cartridge::from_rom(&rom),
            Err(CartridgeError::Truncated { section: "PRG ROM", .. })
        ));
    }

    #[test]
    fn test_nrom_128_mirrors_prg() {
        let mut rom = build_rom(1, 1, 0, 0);
        rom[HEADER_SIZE + 0x0123] = 0x42;
        let cart = Cartridge::from_rom(&rom).unwrap();
        assert!(cart.is_valid());
        assert_eq!(cart.cpu_read(0x8123), Some(0x42));
        assert_eq!(cart.cpu_read(0xC123), Some(0x42));
        assert_eq!(cart.cpu_read(0x6000), None);
    }

    #[test]
    fn test_nrom_256_maps_both_banks() {
        let cart = Cartridge::from_rom(&build_rom(2, 1, 0, 0)).unwrap();
        assert_eq!(cart.cpu_read(0x8000), Some(0));
        assert_eq!(cart.cpu_read(0xC000), Some(1));
    }

    #[test]
    fn test_trainer_is_skipped() {
        let cart = Cartridge::from_rom(&build_rom(1, 1, 0x04, 0)).unwrap();
        assert_eq!(cart.cpu_read(0x8000), Some(0));
    }

    #[test]
    fn test_prg_rom_is_read_only() {
        let mut cart = Cartridge::from_rom(&build_rom(1, 1, 0, 0)).unwrap();
        assert!(!cart.cpu_write(0x8000, 0x99));
        assert_eq!(cart.cpu_read(0x8000), Some(0));
    }

    #[test]
    fn test_chr_ram_when_no_chr_banks() {
        let mut cart = Cartridge::from_rom(&build_rom(1, 0, 0, 0)).unwrap();
        assert!(cart.has_chr_ram());
        assert_eq!(cart.chr().len(), CHR_BANK_SIZE);
        assert!(cart.ppu_write(0x1ABC, 0x77));
        assert_eq!(cart.ppu_read(0x1ABC), Some(0x77));
    }

    #[test]
    fn test_chr_rom_rejects_writes() {
        let mut cart = Cartridge::from_rom(&build_rom(1, 1, 0, 0)).unwrap();
        assert!(!cart.ppu_write(0x0000, 0x77));
        assert_eq!(cart.ppu_read(0x0000), Some(0x55));
        assert_eq!(cart.ppu_read(0x2000), None);
    }

    #[test]
    fn test_unsupported_mapper_declines_everything() {
        let mut cart = Cartridge::from_rom(&build_rom(1, 1, 0x10, 0)).unwrap();
        assert!(!cart.is_valid());
        assert_eq!(cart.mapper_id(), 1);
        assert_eq!(cart.cpu_read(0x8000), None);
        assert_eq!(cart.ppu_read(0x0000), None);
        assert!(!cart.ppu_write(0x0000, 1));
    }
}
