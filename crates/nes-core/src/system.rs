//! NES System Integration
//!
//! Drives the CPU, PPU and bus from a single master clock. Every call to
//! [`NesSystem::clock`] is one PPU dot; the CPU runs on every third one.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::cpu::Bus as CpuBus;
use crate::cpu::Cpu;
use crate::ppu::Ppu;

/// OAM DMA halts the CPU for this many cycles, plus one on an odd tick
pub const DMA_STALL_CYCLES: u32 = 513;

/// PPU dots per CPU cycle
const PPU_TICKS_PER_CPU_CYCLE: u64 = 3;

/// NES System - integrates all components
#[derive(Debug)]
pub struct NesSystem {
    cpu: Cpu,
    bus: Bus,
    /// Master clock, in PPU dots since reset
    system_clock: u64,
}

impl NesSystem {
    /// Create a new NES system with no cartridge
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            bus: Bus::new(),
            system_clock: 0,
        }
    }

    /// Load an iNES ROM image into the system
    pub fn load_rom(&mut self, rom_data: &[u8]) -> Result<(), NesError> {
        let cartridge = Cartridge::from_rom(rom_data)?;
        self.insert_cartridge(cartridge)
    }

    /// Insert a parsed cartridge. Cartridges without a supported mapper
    /// are refused and the system keeps whatever it had before.
    pub fn insert_cartridge(&mut self, cartridge: Cartridge) -> Result<(), NesError> {
        if !cartridge.is_valid() {
            return Err(NesError::UnsupportedMapper(cartridge.mapper_id()));
        }
        info!(
            mapper = cartridge.mapper_id(),
            prg_bytes = cartridge.prg_rom().len(),
            chr_bytes = cartridge.chr().len(),
            mirroring = ?cartridge.mirroring(),
            "cartridge inserted"
        );
        self.bus.insert_cartridge(cartridge);
        Ok(())
    }

    fn ensure_cartridge(&self) -> Result<(), NesError> {
        match self.bus.cartridge() {
            Some(_) => Ok(()),
            None => Err(NesError::NoCartridge),
        }
    }

    /// Reset the NES system
    pub fn reset(&mut self) -> Result<(), NesError> {
        self.ensure_cartridge()?;
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
        self.system_clock = 0;
        info!(pc = self.cpu.registers().pc, "system reset");
        Ok(())
    }

    /// Advance the system by one PPU dot
    pub fn clock(&mut self) -> Result<(), NesError> {
        self.ensure_cartridge()?;
        self.tick();
        Ok(())
    }

    fn tick(&mut self) {
        self.bus.clock_ppu();

        if self.system_clock % PPU_TICKS_PER_CPU_CYCLE == 0 {
            self.cpu.clock(&mut self.bus);
            if self.bus.take_dma_pending() {
                let stall = DMA_STALL_CYCLES + (self.system_clock & 1) as u32;
                self.cpu.stall(stall);
            }
        }

        if self.bus.ppu_mut().take_nmi() {
            self.cpu.nmi(&mut self.bus);
        }

        self.system_clock += 1;
    }

    /// Clock until the PPU finishes a frame, then clear the frame flag
    pub fn run_frame(&mut self) -> Result<(), NesError> {
        self.ensure_cartridge()?;
        while !self.bus.ppu().frame_complete() {
            self.tick();
        }
        self.bus.ppu_mut().clear_frame_complete();
        Ok(())
    }

    /// Run for N frames
    pub fn run_frames(&mut self, frames: u64) -> Result<(), NesError> {
        for _ in 0..frames {
            self.run_frame()?;
        }
        debug!(frames, total = self.frame_count(), "frames rendered");
        Ok(())
    }

    /// Clock until the CPU has finished an instruction
    pub fn step_instruction(&mut self) -> Result<(), NesError> {
        self.ensure_cartridge()?;
        loop {
            let cpu_tick = self.system_clock % PPU_TICKS_PER_CPU_CYCLE == 0;
            self.tick();
            if cpu_tick && self.cpu.complete() {
                return Ok(());
            }
        }
    }

    /// Set the button mask for controller port 1 or 2
    pub fn set_controller(&mut self, port: u8, buttons: u8) {
        let index = usize::from(port).wrapping_sub(1);
        match self.bus.controller_mut(index) {
            Some(pad) => pad.set_buttons(buttons),
            None => warn!(port, "no such controller port"),
        }
    }

    /// True once the PPU has completed a frame; cleared by the caller
    pub fn frame_complete(&self) -> bool {
        self.bus.ppu().frame_complete()
    }

    pub fn clear_frame_complete(&mut self) {
        self.bus.ppu_mut().clear_frame_complete();
    }

    /// Current picture, 256x240 pixels in 0xAARRGGBB
    pub fn frame_buffer(&self) -> &[u32] {
        self.bus.ppu().frame_buffer()
    }

    /// Render a 128x128 debug view of a pattern table
    pub fn pattern_table(&mut self, table: u8, palette: u8) -> Vec<u32> {
        let (ppu, mut space) = self.bus.ppu_with_space();
        ppu.pattern_table(&mut space, table, palette)
    }

    /// Get CPU reference
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get mutable CPU reference
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Get PPU reference
    pub fn ppu(&self) -> &Ppu {
        self.bus.ppu()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.bus.cartridge()
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.bus.ppu().frame_count()
    }

    /// PPU dots since reset
    pub fn system_clock(&self) -> u64 {
        self.system_clock
    }

    /// Read a byte from memory via the bus
    pub fn read_memory(&mut self, address: u16) -> u8 {
        self.bus.read(address)
    }

    /// Read a byte without touching PPU or controller state
    pub fn peek_memory(&self, address: u16) -> u8 {
        self.bus.peek(address)
    }

    /// Write a byte to memory via the bus
    pub fn write_memory(&mut self, address: u16, value: u8) {
        self.bus.write(address, value);
    }
}

impl Default for NesSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// System error types
#[derive(Debug, Error)]
pub enum NesError {
    #[error("no cartridge inserted")]
    NoCartridge,
    #[error("mapper {0} is not supported")]
    UnsupportedMapper(u8),
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
}
