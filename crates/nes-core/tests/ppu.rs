//! PPU tests for the NES emulator

mod common;

use common::RomBuilder;
use nes_core::bus::{PpuMemory, PpuSpace};
use nes_core::cartridge::Cartridge;
use nes_core::ppu::{Ppu, PpuBus, PpuMask, SCREEN_WIDTH, SYSTEM_PALETTE};
use nes_core::NesSystem;

fn opaque_tile_cartridge() -> Cartridge {
    let rom = RomBuilder::new()
        .tile(1, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0])
        .build();
    Cartridge::from_rom(&rom).unwrap()
}

#[test]
fn test_ppu_reset() {
    let mut ppu = Ppu::new();
    ppu.reset();

    assert_eq!(ppu.scanline(), -1);
    assert_eq!(ppu.cycle(), 0);
    assert!(!ppu.frame_complete());
}

#[test]
fn test_frame_timing() {
    let mut memory = PpuMemory::new();
    let mut space = PpuSpace::new(&mut memory, None);
    let mut ppu = Ppu::new();

    let mut transitions = 0;
    let mut vblank_at = None;
    for tick in 0..341 * 262 {
        let was_vblank = ppu.status().vblank();
        ppu.clock(&mut space);
        if !was_vblank && ppu.status().vblank() {
            vblank_at = Some(tick);
        }
        if ppu.frame_complete() {
            transitions += 1;
            ppu.clear_frame_complete();
        }
    }

    assert_eq!(transitions, 1);
    assert_eq!(ppu.frame_count(), 1);
    // Pre-render line is 341 dots, then 241 lines up to (241, 1)
    assert_eq!(vblank_at, Some(341 * 242 + 1));
    assert_eq!((ppu.scanline(), ppu.cycle()), (-1, 0));
}

#[test]
fn test_palette_through_ppudata() {
    let mut memory = PpuMemory::new();
    let mut space = PpuSpace::new(&mut memory, None);
    let mut ppu = Ppu::new();

    ppu.cpu_write(0x0006, 0x3F, &mut space);
    ppu.cpu_write(0x0006, 0x10, &mut space);
    ppu.cpu_write(0x0007, 0x2A, &mut space);

    ppu.cpu_write(0x0006, 0x3F, &mut space);
    ppu.cpu_write(0x0006, 0x00, &mut space);
    // Palette reads skip the read buffer
    assert_eq!(ppu.cpu_read(0x0007, &mut space), 0x2A);
}

#[test]
fn test_sprite_zero_hit() {
    let mut cartridge = opaque_tile_cartridge();
    let mut memory = PpuMemory::new();
    let mut space = PpuSpace::new(&mut memory, Some(&mut cartridge));
    for address in 0x2000..0x23C0 {
        space.ppu_write(address, 0x01);
    }

    let mut ppu = Ppu::new();
    ppu.write_oam(0, 30);
    ppu.write_oam(1, 0x01);
    ppu.write_oam(2, 0x00);
    ppu.write_oam(3, 50);
    for entry in 1..64u8 {
        ppu.write_oam(entry * 4, 0xF0);
    }
    ppu.cpu_write(0x0001, 0x1E, &mut space);

    while ppu.scanline() != 30 {
        ppu.clock(&mut space);
    }
    assert!(!ppu.status().sprite_zero_hit());

    while ppu.scanline() != 100 {
        ppu.clock(&mut space);
    }
    assert!(ppu.status().sprite_zero_hit());

    while !(ppu.scanline() == -1 && ppu.cycle() == 2) {
        ppu.clock(&mut space);
    }
    assert!(!ppu.status().sprite_zero_hit());
}

#[test]
fn test_no_sprite_zero_hit_without_background() {
    let mut cartridge = opaque_tile_cartridge();
    let mut memory = PpuMemory::new();
    let mut space = PpuSpace::new(&mut memory, Some(&mut cartridge));

    let mut ppu = Ppu::new();
    ppu.write_oam(0, 30);
    ppu.write_oam(1, 0x01);
    ppu.write_oam(3, 50);
    ppu.cpu_write(0x0001, PpuMask::RENDER_SPR | PpuMask::RENDER_SPR_LEFT, &mut space);

    while ppu.scanline() != 100 {
        ppu.clock(&mut space);
    }
    assert!(!ppu.status().sprite_zero_hit());
}

#[test]
fn test_background_frame_from_program() {
    let program = [
        0xAD, 0x02, 0x20, // LDA $2002
        0xA9, 0x3F, 0x8D, 0x06, 0x20, // PPUADDR = $3F00
        0xA9, 0x00, 0x8D, 0x06, 0x20,
        0xA9, 0x0F, 0x8D, 0x07, 0x20, // backdrop $0F
        0xA9, 0x30, 0x8D, 0x07, 0x20, // palette 0 colour 1 = $30
        0xA9, 0x20, 0x8D, 0x06, 0x20, // PPUADDR = $2000
        0xA9, 0x00, 0x8D, 0x06, 0x20,
        0xA9, 0x01, 0x8D, 0x07, 0x20, // top-left tile = 1
        0xA9, 0x00, 0x8D, 0x05, 0x20, // scroll 0,0
        0x8D, 0x05, 0x20,
        0xA9, 0x0A, 0x8D, 0x01, 0x20, // background on, left column shown
        0x4C, 0x33, 0x80, // JMP $8033
    ];
    let rom = RomBuilder::new()
        .program(0x8000, &program)
        .tile(1, [0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
        .build();

    let mut system = NesSystem::new();
    system.load_rom(&rom).unwrap();
    system.reset().unwrap();
    system.run_frames(2).unwrap();

    let frame = system.frame_buffer();
    assert_eq!(frame[0], SYSTEM_PALETTE[0x30]);
    assert_eq!(frame[1], SYSTEM_PALETTE[0x0F]);
    assert_eq!(frame[8], SYSTEM_PALETTE[0x0F]);
    assert_eq!(frame[SCREEN_WIDTH], SYSTEM_PALETTE[0x0F]);
}

#[test]
fn test_pattern_table_view() {
    let rom = RomBuilder::new()
        .tile(0, [0xFF, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0, 0, 0, 0, 0, 0, 0])
        .build();
    let mut system = NesSystem::new();
    system.load_rom(&rom).unwrap();
    system.reset().unwrap();
    system.write_memory(0x2006, 0x3F);
    system.write_memory(0x2006, 0x03);
    system.write_memory(0x2007, 0x16);

    let view = system.pattern_table(0, 0);
    assert_eq!(view.len(), 128 * 128);
    assert_eq!(view[0], SYSTEM_PALETTE[0x16]);
    assert_eq!(view[128], view[8 * 128 + 8]);
}
