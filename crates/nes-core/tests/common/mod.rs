//! iNES images for integration tests.
//!
//! Programs are placed at $8000 of a single 16KB bank (so they also appear at
//! $C000). Reset and IRQ vectors point at $8000.

#![allow(dead_code)]

pub const PRG_SIZE: usize = 16 * 1024;
pub const CHR_SIZE: usize = 8 * 1024;

/// Builder for NROM-128 images
pub struct RomBuilder {
    prg: Vec<u8>,
    chr: Option<Vec<u8>>,
    flags_6: u8,
    nmi: u16,
}

impl RomBuilder {
    /// PRG filled with NOPs
    pub fn new() -> Self {
        Self {
            prg: vec![0xEA; PRG_SIZE],
            chr: Some(vec![0; CHR_SIZE]),
            flags_6: 0,
            nmi: 0x8000,
        }
    }

    pub fn program(mut self, address: u16, code: &[u8]) -> Self {
        let offset = (address as usize - 0x8000) % PRG_SIZE;
        self.prg[offset..offset + code.len()].copy_from_slice(code);
        self
    }

    pub fn nmi(mut self, address: u16) -> Self {
        self.nmi = address;
        self
    }

    pub fn vertical(mut self) -> Self {
        self.flags_6 |= 0x01;
        self
    }

    pub fn mapper(mut self, id: u8) -> Self {
        self.flags_6 = (self.flags_6 & 0x0F) | (id << 4);
        self
    }

    /// Use 8KB of CHR RAM instead of CHR ROM
    pub fn chr_ram(mut self) -> Self {
        self.chr = None;
        self
    }

    /// Write a 16-byte tile into CHR ROM
    pub fn tile(mut self, index: usize, planes: [u8; 16]) -> Self {
        if let Some(chr) = self.chr.as_mut() {
            chr[index * 16..index * 16 + 16].copy_from_slice(&planes);
        }
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.prg[0x3FFA..0x3FFC].copy_from_slice(&self.nmi.to_le_bytes());
        self.prg[0x3FFC..0x3FFE].copy_from_slice(&0x8000u16.to_le_bytes());
        self.prg[0x3FFE..0x4000].copy_from_slice(&0x8000u16.to_le_bytes());

        let chr_banks = if self.chr.is_some() { 1 } else { 0 };
        let mut rom = Vec::with_capacity(16 + PRG_SIZE + CHR_SIZE);
        rom.extend_from_slice(b"NES\x1A");
        rom.extend_from_slice(&[1, chr_banks, self.flags_6, 0]);
        rom.extend_from_slice(&[0u8; 8]);
        rom.extend_from_slice(&self.prg);
        if let Some(chr) = self.chr {
            rom.extend_from_slice(&chr);
        }
        rom
    }
}

impl Default for RomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Image that runs `code` at $8000
pub fn program_rom(code: &[u8]) -> Vec<u8> {
    RomBuilder::new().program(0x8000, code).build()
}
