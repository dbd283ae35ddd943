//! Memory bus and mapping
//!
//! The NES memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU registers (mirrored every $08 bytes)
//! $4014       - OAM DMA
//! $4016-$4017 - Controller ports
//! $4020-$FFFF - Cartridge space
//!
//! The cartridge sees every CPU and PPU access first and may claim it. Any
//! address nobody claims reads as [`OPEN_BUS`] and ignores writes.
//!
//! PPU address space:
//! $0000-$1FFF - Pattern tables (cartridge CHR)
//! $2000-$3EFF - Nametables (2KB VRAM, mirrored per cartridge)
//! $3F00-$3FFF - Palette RAM (32 bytes, mirrored)

use tracing::trace;

use crate::cartridge::{Cartridge, Mirroring};
use crate::controller::StandardController;
use crate::cpu::Bus as CpuBus;
use crate::ppu::{Ppu, PpuBus, OAM_SIZE};

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048; // 2KB

/// Nametable size in bytes
pub const NAMETABLE_SIZE: usize = 1024;

/// Palette RAM size in bytes
pub const PALETTE_SIZE: usize = 32;

/// Value read from an address nothing responds to
pub const OPEN_BUS: u8 = 0x00;

/// OAM DMA register
pub const OAM_DMA: u16 = 0x4014;

/// Nametable and palette storage on the PPU side of the bus
#[derive(Debug, Clone)]
pub struct PpuMemory {
    nametables: [[u8; NAMETABLE_SIZE]; 2],
    palette: [u8; PALETTE_SIZE],
}

impl PpuMemory {
    pub fn new() -> Self {
        Self {
            nametables: [[0; NAMETABLE_SIZE]; 2],
            palette: [0; PALETTE_SIZE],
        }
    }

    /// Physical (table, offset) for a nametable address under `mirroring`
    fn nametable_slot(address: u16, mirroring: Mirroring) -> (usize, usize) {
        let address = address & 0x0FFF;
        let logical = (address / NAMETABLE_SIZE as u16) as usize;
        let offset = (address as usize) & (NAMETABLE_SIZE - 1);
        let table = match mirroring {
            Mirroring::Vertical => logical & 0x01,
            Mirroring::Horizontal => logical >> 1,
            Mirroring::OneScreenLo => 0,
            Mirroring::OneScreenHi => 1,
        };
        (table, offset)
    }

    /// Palette index; $3F10/$14/$18/$1C alias the background entries
    fn palette_index(address: u16) -> usize {
        let mut index = (address & 0x001F) as usize;
        if index & 0x13 == 0x10 {
            index &= !0x10;
        }
        index
    }

    pub fn read_nametable(&self, address: u16, mirroring: Mirroring) -> u8 {
        let (table, offset) = Self::nametable_slot(address, mirroring);
        self.nametables[table][offset]
    }

    pub fn write_nametable(&mut self, address: u16, mirroring: Mirroring, value: u8) {
        let (table, offset) = Self::nametable_slot(address, mirroring);
        self.nametables[table][offset] = value;
    }

    pub fn read_palette(&self, address: u16) -> u8 {
        self.palette[Self::palette_index(address)]
    }

    pub fn write_palette(&mut self, address: u16, value: u8) {
        self.palette[Self::palette_index(address)] = value;
    }
}

impl Default for PpuMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// PPU view of the bus: VRAM plus the cartridge's CHR
pub struct PpuSpace<'a> {
    memory: &'a mut PpuMemory,
    cartridge: Option<&'a mut Cartridge>,
}

impl<'a> PpuSpace<'a> {
    pub fn new(memory: &'a mut PpuMemory, cartridge: Option<&'a mut Cartridge>) -> Self {
        Self { memory, cartridge }
    }

    fn mirroring(&self) -> Mirroring {
        self.cartridge
            .as_ref()
            .map_or(Mirroring::Horizontal, |cart| cart.mirroring())
    }
}

impl PpuBus for PpuSpace<'_> {
    fn ppu_read(&mut self, address: u16) -> u8 {
        let address = address & 0x3FFF;
        if let Some(data) = self.cartridge.as_ref().and_then(|cart| cart.ppu_read(address)) {
            return data;
        }
        match address {
            0x0000..=0x1FFF => OPEN_BUS,
            0x2000..=0x3EFF => self.memory.read_nametable(address, self.mirroring()),
            _ => self.memory.read_palette(address),
        }
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        let address = address & 0x3FFF;
        if let Some(cart) = self.cartridge.as_mut() {
            if cart.ppu_write(address, value) {
                return;
            }
        }
        match address {
            // Pattern tables belong to the cartridge
            0x0000..=0x1FFF => {}
            0x2000..=0x3EFF => {
                let mirroring = self.mirroring();
                self.memory.write_nametable(address, mirroring, value);
            }
            _ => self.memory.write_palette(address, value),
        }
    }
}

/// Memory bus structure
#[derive(Debug)]
pub struct Bus {
    /// 2KB internal RAM (with mirroring)
    ram: [u8; RAM_SIZE],
    ppu: Ppu,
    ppu_memory: PpuMemory,
    /// Cartridge (PRG and CHR memory)
    cartridge: Option<Cartridge>,
    controllers: [StandardController; 2],
    /// Set by a $4014 write until the system charges the CPU for it
    dma_pending: bool,
}

impl Bus {
    /// Create a new bus with no cartridge
    pub fn new() -> Self {
        Self {
            ram: [0; RAM_SIZE],
            ppu: Ppu::new(),
            ppu_memory: PpuMemory::new(),
            cartridge: None,
            controllers: [StandardController::new(), StandardController::new()],
            dma_pending: false,
        }
    }

    /// Set the cartridge for this bus
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) {
        self.cartridge = Some(cartridge);
    }

    /// Get a reference to the cartridge, if present
    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    /// Nametable and palette storage
    pub fn ppu_memory(&self) -> &PpuMemory {
        &self.ppu_memory
    }

    /// Borrow the PPU together with its address space
    pub fn ppu_with_space(&mut self) -> (&mut Ppu, PpuSpace<'_>) {
        let space = PpuSpace::new(&mut self.ppu_memory, self.cartridge.as_mut());
        (&mut self.ppu, space)
    }

    /// Advance the PPU by one cycle
    pub fn clock_ppu(&mut self) {
        let (ppu, mut space) = self.ppu_with_space();
        ppu.clock(&mut space);
    }

    /// Reset PPU, cartridge and controller state; RAM keeps its contents
    pub fn reset(&mut self) {
        self.ppu.reset();
        if let Some(cart) = self.cartridge.as_mut() {
            cart.reset();
        }
        for pad in &mut self.controllers {
            pad.strobe_write(0);
        }
        self.dma_pending = false;
    }

    pub fn controller(&self, index: usize) -> Option<&StandardController> {
        self.controllers.get(index)
    }

    pub fn controller_mut(&mut self, index: usize) -> Option<&mut StandardController> {
        self.controllers.get_mut(index)
    }

    /// True once after each OAM DMA transfer
    pub fn take_dma_pending(&mut self) -> bool {
        std::mem::take(&mut self.dma_pending)
    }

    /// Read without side effects; PPU and controller ports read as open bus
    pub fn peek(&self, address: u16) -> u8 {
        if let Some(data) = self.cartridge.as_ref().and_then(|cart| cart.cpu_read(address)) {
            return data;
        }
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            _ => OPEN_BUS,
        }
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as usize) << 8;
        for i in 0..OAM_SIZE {
            let value = self.ram[(base + i) & (RAM_SIZE - 1)];
            self.ppu.write_oam(i as u8, value);
        }
        self.dma_pending = true;
        trace!(page, "OAM DMA");
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBus for Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8 {
        if let Some(data) = self.cartridge.as_ref().and_then(|cart| cart.cpu_read(address)) {
            return data;
        }
        match address {
            // $0000-$1FFF - Internal RAM and mirrors
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            // $2000-$3FFF - PPU registers and mirrors
            0x2000..=0x3FFF => {
                let (ppu, mut space) = self.ppu_with_space();
                ppu.cpu_read(address & 0x0007, &mut space)
            }
            0x4016 => self.controllers[0].read(),
            0x4017 => self.controllers[1].read(),
            _ => OPEN_BUS,
        }
    }

    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8) {
        if let Some(cart) = self.cartridge.as_mut() {
            if cart.cpu_write(address, value) {
                return;
            }
        }
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => {
                let (ppu, mut space) = self.ppu_with_space();
                ppu.cpu_write(address & 0x0007, value, &mut space);
            }
            OAM_DMA => self.oam_dma(value),
            // One strobe line feeds both ports
            0x4016 => {
                for pad in &mut self.controllers {
                    pad.strobe_write(value);
                }
            }
            // APU registers and unclaimed cartridge space
            _ => {}
        }
    }
}
