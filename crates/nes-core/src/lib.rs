//! NES Core - cycle-stepped NES emulator library
//!
//! This crate provides the core emulation logic for a Nintendo Entertainment System (NES):
//! a 6502 CPU, the 2C02 PPU, the memory bus and iNES cartridges. A frontend drives it
//! through [`system::NesSystem`] and presents the finished frame buffer itself.

#![forbid(unsafe_code)]

/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Memory bus and mapping
pub mod bus;
/// PPU (Picture Processing Unit) implementation
pub mod ppu;
/// Cartridge and mapper support
pub mod cartridge;
/// Standard controller shift registers
pub mod controller;
/// Integration module for complete NES system
pub mod system;
/// Trace-log parsing and CPU replay
pub mod trace;

pub use system::{NesError, NesSystem};
