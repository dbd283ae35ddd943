//! PPU (Picture Processing Unit) implementation
//!
//! The 2C02 renders one pixel per clock. Timing is tracked as a cycle
//! (0-340) and scanline (-1 pre-render, 0-239 visible, 240 post-render,
//! 241-260 vertical blank) counter pair; a frame is 341 x 262 clocks.
//!
//! The PPU does not own pattern tables, nametables or palette RAM. Every VRAM
//! access goes through a [`PpuBus`], which the system bus implements with
//! cartridge CHR and mirroring.

use tracing::trace;

/// Visible picture width in pixels
pub const SCREEN_WIDTH: usize = 256;
/// Visible picture height in pixels
pub const SCREEN_HEIGHT: usize = 240;
/// Object Attribute Memory size
pub const OAM_SIZE: usize = 256;
/// Maximum sprites on one scanline
pub const MAX_SPRITES_PER_LINE: usize = 8;

const CYCLES_PER_SCANLINE: u16 = 341;
const LAST_SCANLINE: i16 = 260;
const VBLANK_SCANLINE: i16 = 241;

/// 2C02 output colours, 0xAARRGGBB
pub const SYSTEM_PALETTE: [u32; 64] = [
    0xFF7C7C7C, 0xFF0000FC, 0xFF0000BC, 0xFF4428BC, 0xFF940084, 0xFFA80020, 0xFFA81000, 0xFF881400,
    0xFF503000, 0xFF007800, 0xFF006800, 0xFF005800, 0xFF004058, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFFBCBCBC, 0xFF0078F8, 0xFF0058F8, 0xFF6844FC, 0xFFD800CC, 0xFFE40058, 0xFFF83800, 0xFFE45C10,
    0xFFAC7C00, 0xFF00B800, 0xFF00A800, 0xFF00A844, 0xFF008888, 0xFF000000, 0xFF000000, 0xFF000000,
    0xFFF8F8F8, 0xFF3CBCFC, 0xFF6888FC, 0xFF9878F8, 0xFFF878F8, 0xFFF85898, 0xFFF87858, 0xFFFCA044,
    0xFFF8B800, 0xFFB8F818, 0xFF58D854, 0xFF58F898, 0xFF00E8D8, 0xFF787878, 0xFF000000, 0xFF000000,
    0xFFFCFCFC, 0xFFA4E4FC, 0xFFB8B8F8, 0xFFD8B8F8, 0xFFF8B8F8, 0xFFF8A4C0, 0xFFF0D0B0, 0xFFFCE0A0,
    0xFFF8D878, 0xFFD8F878, 0xFFB8F8B8, 0xFFB8F8D8, 0xFF00FCFC, 0xFFF8D8F8, 0xFF000000, 0xFF000000,
];

/// PPU-side address space ($0000-$3FFF)
pub trait PpuBus {
    fn ppu_read(&mut self, address: u16) -> u8;
    fn ppu_write(&mut self, address: u16, value: u8);
}

/// PPU control flags ($2000)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpuCtrl(u8);

impl PpuCtrl {
    pub const NMI_ENABLE: u8 = 0b10000000;
    pub const SPRITE_SIZE: u8 = 0b00100000;
    pub const BG_PATTERN_TABLE: u8 = 0b00010000;
    pub const SPR_PATTERN_TABLE: u8 = 0b00001000;
    pub const VRAM_INC: u8 = 0b00000100;
    pub const NAMETABLE: u8 = 0b00000011;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn nmi_enable(&self) -> bool {
        (self.0 & Self::NMI_ENABLE) != 0
    }

    /// Sprite height in pixels
    pub fn sprite_height(&self) -> i16 {
        if (self.0 & Self::SPRITE_SIZE) != 0 {
            16
        } else {
            8
        }
    }

    pub fn background_table(&self) -> u16 {
        if (self.0 & Self::BG_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    pub fn sprite_table(&self) -> u16 {
        if (self.0 & Self::SPR_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    pub fn vram_increment(&self) -> u16 {
        if (self.0 & Self::VRAM_INC) != 0 {
            32
        } else {
            1
        }
    }

    pub fn nametable(&self) -> u8 {
        self.0 & Self::NAMETABLE
    }
}

/// PPU status flags ($2002)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpuStatus(u8);

impl PpuStatus {
    pub const VBLANK: u8 = 0b10000000;
    pub const SPRITE_ZERO_HIT: u8 = 0b01000000;
    pub const SPRITE_OVERFLOW: u8 = 0b00100000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn vblank(&self) -> bool {
        (self.0 & Self::VBLANK) != 0
    }

    pub fn sprite_zero_hit(&self) -> bool {
        (self.0 & Self::SPRITE_ZERO_HIT) != 0
    }

    pub fn sprite_overflow(&self) -> bool {
        (self.0 & Self::SPRITE_OVERFLOW) != 0
    }

    fn set(&mut self, mask: u8, val: bool) {
        self.0 = if val { self.0 | mask } else { self.0 & !mask };
    }
}

/// PPU render mask flags ($2001)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpuMask(u8);

impl PpuMask {
    pub const GRAYSCALE: u8 = 0b00000001;
    pub const RENDER_BG_LEFT: u8 = 0b00000010;
    pub const RENDER_SPR_LEFT: u8 = 0b00000100;
    pub const RENDER_BG: u8 = 0b00001000;
    pub const RENDER_SPR: u8 = 0b00010000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn grayscale(&self) -> bool {
        (self.0 & Self::GRAYSCALE) != 0
    }

    pub fn render_background(&self) -> bool {
        (self.0 & Self::RENDER_BG) != 0
    }

    pub fn render_sprites(&self) -> bool {
        (self.0 & Self::RENDER_SPR) != 0
    }

    pub fn render_background_left(&self) -> bool {
        (self.0 & Self::RENDER_BG_LEFT) != 0
    }

    pub fn render_sprites_left(&self) -> bool {
        (self.0 & Self::RENDER_SPR_LEFT) != 0
    }

    pub fn rendering(&self) -> bool {
        self.render_background() || self.render_sprites()
    }
}

/// Packed VRAM address ("loopy" register).
///
/// ```text
/// bits 0-4   coarse X
/// bits 5-9   coarse Y
/// bit  10    nametable X
/// bit  11    nametable Y
/// bits 12-14 fine Y
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopyRegister(pub u16);

impl LoopyRegister {
    const COARSE_X: (u16, u16) = (0x001F, 0);
    const COARSE_Y: (u16, u16) = (0x03E0, 5);
    const NAMETABLE_X: (u16, u16) = (0x0400, 10);
    const NAMETABLE_Y: (u16, u16) = (0x0800, 11);
    const FINE_Y: (u16, u16) = (0x7000, 12);

    fn get(&self, (mask, shift): (u16, u16)) -> u16 {
        (self.0 & mask) >> shift
    }

    fn put(&mut self, (mask, shift): (u16, u16), value: u16) {
        self.0 = (self.0 & !mask) | ((value << shift) & mask);
    }

    pub fn coarse_x(&self) -> u16 {
        self.get(Self::COARSE_X)
    }

    pub fn set_coarse_x(&mut self, value: u16) {
        self.put(Self::COARSE_X, value);
    }

    pub fn coarse_y(&self) -> u16 {
        self.get(Self::COARSE_Y)
    }

    pub fn set_coarse_y(&mut self, value: u16) {
        self.put(Self::COARSE_Y, value);
    }

    pub fn nametable_x(&self) -> u16 {
        self.get(Self::NAMETABLE_X)
    }

    pub fn set_nametable_x(&mut self, value: u16) {
        self.put(Self::NAMETABLE_X, value);
    }

    pub fn nametable_y(&self) -> u16 {
        self.get(Self::NAMETABLE_Y)
    }

    pub fn set_nametable_y(&mut self, value: u16) {
        self.put(Self::NAMETABLE_Y, value);
    }

    pub fn fine_y(&self) -> u16 {
        self.get(Self::FINE_Y)
    }

    pub fn set_fine_y(&mut self, value: u16) {
        self.put(Self::FINE_Y, value);
    }
}

/// One OAM entry copied into the scanline list
#[derive(Debug, Clone, Copy, Default)]
struct SpriteEntry {
    y: u8,
    tile: u8,
    attribute: u8,
    /// Pixels left before the sprite starts shifting out
    x: u8,
}

/// PPU internal state
#[derive(Debug, Clone)]
pub struct Ppu {
    /// OAM (256 bytes)
    oam: [u8; OAM_SIZE],
    /// PPU registers
    control: PpuCtrl,
    mask: PpuMask,
    status: PpuStatus,
    oam_addr: u8,
    /// Active VRAM address `v`
    vram_addr: LoopyRegister,
    /// Temporary VRAM address `t`
    tram_addr: LoopyRegister,
    fine_x: u8,
    /// Write toggle for PPUSCROLL and PPUADDR
    write_toggle: bool,
    /// Read buffer (for PPUDATA)
    data_buffer: u8,

    /// Cycle position (0-340)
    cycle: u16,
    /// Scanline position (-1 is pre-render)
    scanline: i16,
    frame_complete: bool,
    frame_count: u64,
    nmi: bool,

    // Background pipeline
    bg_next_tile_id: u8,
    bg_next_tile_attrib: u8,
    bg_next_tile_lsb: u8,
    bg_next_tile_msb: u8,
    bg_shifter_pattern_lo: u16,
    bg_shifter_pattern_hi: u16,
    bg_shifter_attrib_lo: u16,
    bg_shifter_attrib_hi: u16,

    // Sprite pipeline
    sprite_scanline: [SpriteEntry; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    sprite_shifter_lo: [u8; MAX_SPRITES_PER_LINE],
    sprite_shifter_hi: [u8; MAX_SPRITES_PER_LINE],
    sprite_zero_possible: bool,
    sprite_zero_rendering: bool,

    frame_buffer: Vec<u32>,
}

impl Ppu {
    /// Create a new PPU instance
    pub fn new() -> Self {
        Self {
            oam: [0; OAM_SIZE],
            control: PpuCtrl::new(0),
            mask: PpuMask::new(0),
            status: PpuStatus::new(0),
            oam_addr: 0,
            vram_addr: LoopyRegister::default(),
            tram_addr: LoopyRegister::default(),
            fine_x: 0,
            write_toggle: false,
            data_buffer: 0,
            cycle: 0,
            scanline: -1,
            frame_complete: false,
            frame_count: 0,
            nmi: false,
            bg_next_tile_id: 0,
            bg_next_tile_attrib: 0,
            bg_next_tile_lsb: 0,
            bg_next_tile_msb: 0,
            bg_shifter_pattern_lo: 0,
            bg_shifter_pattern_hi: 0,
            bg_shifter_attrib_lo: 0,
            bg_shifter_attrib_hi: 0,
            sprite_scanline: [SpriteEntry::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            sprite_shifter_lo: [0; MAX_SPRITES_PER_LINE],
            sprite_shifter_hi: [0; MAX_SPRITES_PER_LINE],
            sprite_zero_possible: false,
            sprite_zero_rendering: false,
            frame_buffer: vec![SYSTEM_PALETTE[0x0F]; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    /// Reset the PPU to its power-up state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// CPU read of register `$2000 + (register & 7)`
    pub fn cpu_read(&mut self, register: u16, bus: &mut impl PpuBus) -> u8 {
        match register & 0x0007 {
            0x0002 => {
                // Low bits are stale bus contents
                let data = (self.status.0 & 0xE0) | (self.data_buffer & 0x1F);
                self.status.set(PpuStatus::VBLANK, false);
                self.write_toggle = false;
                data
            }
            0x0004 => self.oam[self.oam_addr as usize],
            0x0007 => {
                let address = self.vram_addr.0 & 0x3FFF;
                let mut data = self.data_buffer;
                self.data_buffer = bus.ppu_read(address);
                // Palette reads are not delayed
                if address >= 0x3F00 {
                    data = self.data_buffer;
                }
                self.increment_vram_addr();
                data
            }
            // Write-only registers
            _ => 0x00,
        }
    }

    /// CPU write of register `$2000 + (register & 7)`
    pub fn cpu_write(&mut self, register: u16, data: u8, bus: &mut impl PpuBus) {
        match register & 0x0007 {
            0x0000 => {
                self.control = PpuCtrl::new(data);
                let nametable = self.control.nametable() as u16;
                self.tram_addr.set_nametable_x(nametable & 0x01);
                self.tram_addr.set_nametable_y(nametable >> 1);
            }
            0x0001 => self.mask = PpuMask::new(data),
            0x0003 => self.oam_addr = data,
            0x0004 => {
                self.oam[self.oam_addr as usize] = data;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            0x0005 => {
                if !self.write_toggle {
                    self.fine_x = data & 0x07;
                    self.tram_addr.set_coarse_x((data >> 3) as u16);
                } else {
                    self.tram_addr.set_fine_y((data & 0x07) as u16);
                    self.tram_addr.set_coarse_y((data >> 3) as u16);
                }
                self.write_toggle = !self.write_toggle;
            }
            0x0006 => {
                if !self.write_toggle {
                    self.tram_addr.0 = (((data & 0x3F) as u16) << 8) | (self.tram_addr.0 & 0x00FF);
                } else {
                    self.tram_addr.0 = (self.tram_addr.0 & 0xFF00) | data as u16;
                    self.vram_addr = self.tram_addr;
                }
                self.write_toggle = !self.write_toggle;
            }
            0x0007 => {
                bus.ppu_write(self.vram_addr.0 & 0x3FFF, data);
                self.increment_vram_addr();
            }
            // $2002 is read-only
            _ => {}
        }
    }

    fn increment_vram_addr(&mut self) {
        self.vram_addr.0 = self
            .vram_addr
            .0
            .wrapping_add(self.control.vram_increment())
            & 0x7FFF;
    }

    /// Copy one byte into OAM (used by OAM DMA)
    pub fn write_oam(&mut self, index: u8, value: u8) {
        self.oam[index as usize] = value;
    }

    /// Advance the PPU by one cycle
    pub fn clock(&mut self, bus: &mut impl PpuBus) {
        if self.scanline >= -1 && self.scanline < 240 {
            self.render_step(bus);
        }

        if self.scanline == VBLANK_SCANLINE && self.cycle == 1 {
            self.status.set(PpuStatus::VBLANK, true);
            if self.control.nmi_enable() {
                self.nmi = true;
            }
        }

        self.composite_pixel(bus);

        self.cycle += 1;
        if self.cycle >= CYCLES_PER_SCANLINE {
            self.cycle = 0;
            self.scanline += 1;
            if self.scanline > LAST_SCANLINE {
                self.scanline = -1;
                self.frame_complete = true;
                self.frame_count += 1;
                trace!(frame = self.frame_count, "frame complete");
            }
        }
    }

    /// Background fetches, scroll updates and sprite evaluation for the
    /// pre-render and visible scanlines
    fn render_step(&mut self, bus: &mut impl PpuBus) {
        if (2..258).contains(&self.cycle) || (321..338).contains(&self.cycle) {
            self.update_shifters();

            match (self.cycle - 1) % 8 {
                0 => {
                    self.load_background_shifters();
                    self.bg_next_tile_id = bus.ppu_read(0x2000 | (self.vram_addr.0 & 0x0FFF));
                }
                2 => {
                    let v = self.vram_addr;
                    let address = 0x23C0
                        | (v.nametable_y() << 11)
                        | (v.nametable_x() << 10)
                        | ((v.coarse_y() >> 2) << 3)
                        | (v.coarse_x() >> 2);
                    let mut attrib = bus.ppu_read(address);
                    if v.coarse_y() & 0x02 != 0 {
                        attrib >>= 4;
                    }
                    if v.coarse_x() & 0x02 != 0 {
                        attrib >>= 2;
                    }
                    self.bg_next_tile_attrib = attrib & 0x03;
                }
                4 => {
                    let address = self.background_row_address();
                    self.bg_next_tile_lsb = bus.ppu_read(address);
                }
                6 => {
                    let address = self.background_row_address() + 8;
                    self.bg_next_tile_msb = bus.ppu_read(address);
                }
                7 => self.increment_scroll_x(),
                _ => {}
            }
        }

        if self.cycle == 256 {
            self.increment_scroll_y();
        }

        if self.cycle == 257 {
            self.load_background_shifters();
            self.transfer_address_x();
            self.evaluate_sprites();
            self.load_sprite_shifters(bus);
        }

        if self.scanline == -1 {
            if self.cycle == 1 {
                self.status.set(
                    PpuStatus::VBLANK | PpuStatus::SPRITE_ZERO_HIT | PpuStatus::SPRITE_OVERFLOW,
                    false,
                );
            }
            if (280..305).contains(&self.cycle) {
                self.transfer_address_y();
            }
        }
    }

    fn background_row_address(&self) -> u16 {
        self.control.background_table()
            + ((self.bg_next_tile_id as u16) << 4)
            + self.vram_addr.fine_y()
    }

    fn composite_pixel(&mut self, bus: &mut impl PpuBus) {
        let visible = self.scanline >= 0
            && (self.scanline as usize) < SCREEN_HEIGHT
            && (1..257).contains(&self.cycle);
        if !visible {
            return;
        }

        let (bg_pixel, bg_palette) = self.background_pixel();
        let (fg_pixel, fg_palette, fg_in_front) = self.sprite_pixel();

        let (pixel, palette) = match (bg_pixel, fg_pixel) {
            (0, 0) => (0, 0),
            (0, _) => (fg_pixel, fg_palette),
            (_, 0) => (bg_pixel, bg_palette),
            _ => {
                self.check_sprite_zero_hit();
                if fg_in_front {
                    (fg_pixel, fg_palette)
                } else {
                    (bg_pixel, bg_palette)
                }
            }
        };

        let color = self.palette_color(bus, palette, pixel);
        let index = self.scanline as usize * SCREEN_WIDTH + (self.cycle as usize - 1);
        self.frame_buffer[index] = color;
    }

    fn background_pixel(&self) -> (u8, u8) {
        if !self.mask.render_background() {
            return (0, 0);
        }
        if self.cycle < 9 && !self.mask.render_background_left() {
            return (0, 0);
        }
        let bit_mux = 0x8000u16 >> self.fine_x;
        let p0 = ((self.bg_shifter_pattern_lo & bit_mux) != 0) as u8;
        let p1 = ((self.bg_shifter_pattern_hi & bit_mux) != 0) as u8;
        let a0 = ((self.bg_shifter_attrib_lo & bit_mux) != 0) as u8;
        let a1 = ((self.bg_shifter_attrib_hi & bit_mux) != 0) as u8;
        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    /// Returns (pixel, palette, in front of background)
    fn sprite_pixel(&mut self) -> (u8, u8, bool) {
        self.sprite_zero_rendering = false;
        if !self.mask.render_sprites() {
            return (0, 0, false);
        }
        if self.cycle < 9 && !self.mask.render_sprites_left() {
            return (0, 0, false);
        }

        for i in 0..self.sprite_count {
            let sprite = self.sprite_scanline[i];
            if sprite.x != 0 {
                continue;
            }
            let lo = ((self.sprite_shifter_lo[i] & 0x80) != 0) as u8;
            let hi = ((self.sprite_shifter_hi[i] & 0x80) != 0) as u8;
            let pixel = (hi << 1) | lo;
            if pixel != 0 {
                self.sprite_zero_rendering = i == 0;
                let palette = (sprite.attribute & 0x03) + 0x04;
                let in_front = (sprite.attribute & 0x20) == 0;
                return (pixel, palette, in_front);
            }
        }
        (0, 0, false)
    }

    fn check_sprite_zero_hit(&mut self) {
        if !(self.sprite_zero_possible && self.sprite_zero_rendering) {
            return;
        }
        if !(self.mask.render_background() && self.mask.render_sprites()) {
            return;
        }
        let first_cycle = if self.mask.render_background_left() && self.mask.render_sprites_left() {
            1
        } else {
            9
        };
        if (first_cycle..258).contains(&self.cycle) {
            self.status.set(PpuStatus::SPRITE_ZERO_HIT, true);
        }
    }

    fn palette_color(&self, bus: &mut impl PpuBus, palette: u8, pixel: u8) -> u32 {
        let address = if pixel == 0 {
            0x3F00
        } else {
            0x3F00 + ((palette as u16) << 2) + pixel as u16
        };
        let mut index = bus.ppu_read(address) & 0x3F;
        if self.mask.grayscale() {
            index &= 0x30;
        }
        SYSTEM_PALETTE[index as usize]
    }

    fn increment_scroll_x(&mut self) {
        if !self.mask.rendering() {
            return;
        }
        if self.vram_addr.coarse_x() == 31 {
            self.vram_addr.set_coarse_x(0);
            self.vram_addr.set_nametable_x(self.vram_addr.nametable_x() ^ 1);
        } else {
            self.vram_addr.set_coarse_x(self.vram_addr.coarse_x() + 1);
        }
    }

    fn increment_scroll_y(&mut self) {
        if !self.mask.rendering() {
            return;
        }
        let v = &mut self.vram_addr;
        if v.fine_y() < 7 {
            v.set_fine_y(v.fine_y() + 1);
            return;
        }
        v.set_fine_y(0);
        match v.coarse_y() {
            29 => {
                v.set_coarse_y(0);
                v.set_nametable_y(v.nametable_y() ^ 1);
            }
            // Attribute rows: wrap without switching nametable
            31 => v.set_coarse_y(0),
            y => v.set_coarse_y(y + 1),
        }
    }

    fn transfer_address_x(&mut self) {
        if self.mask.rendering() {
            self.vram_addr.set_nametable_x(self.tram_addr.nametable_x());
            self.vram_addr.set_coarse_x(self.tram_addr.coarse_x());
        }
    }

    fn transfer_address_y(&mut self) {
        if self.mask.rendering() {
            self.vram_addr.set_fine_y(self.tram_addr.fine_y());
            self.vram_addr.set_nametable_y(self.tram_addr.nametable_y());
            self.vram_addr.set_coarse_y(self.tram_addr.coarse_y());
        }
    }

    fn load_background_shifters(&mut self) {
        let expand = |bit: bool| if bit { 0x00FF } else { 0x0000 };
        self.bg_shifter_pattern_lo = (self.bg_shifter_pattern_lo & 0xFF00) | self.bg_next_tile_lsb as u16;
        self.bg_shifter_pattern_hi = (self.bg_shifter_pattern_hi & 0xFF00) | self.bg_next_tile_msb as u16;
        self.bg_shifter_attrib_lo =
            (self.bg_shifter_attrib_lo & 0xFF00) | expand(self.bg_next_tile_attrib & 0x01 != 0);
        self.bg_shifter_attrib_hi =
            (self.bg_shifter_attrib_hi & 0xFF00) | expand(self.bg_next_tile_attrib & 0x02 != 0);
    }

    fn update_shifters(&mut self) {
        if self.mask.render_background() {
            self.bg_shifter_pattern_lo <<= 1;
            self.bg_shifter_pattern_hi <<= 1;
            self.bg_shifter_attrib_lo <<= 1;
            self.bg_shifter_attrib_hi <<= 1;
        }

        if self.mask.render_sprites() && (1..258).contains(&self.cycle) {
            for i in 0..self.sprite_count {
                let sprite = &mut self.sprite_scanline[i];
                if sprite.x > 0 {
                    sprite.x -= 1;
                } else {
                    self.sprite_shifter_lo[i] <<= 1;
                    self.sprite_shifter_hi[i] <<= 1;
                }
            }
        }
    }

    /// Collect up to eight sprites that intersect the current scanline
    fn evaluate_sprites(&mut self) {
        self.sprite_count = 0;
        self.sprite_zero_possible = false;
        self.sprite_shifter_lo = [0; MAX_SPRITES_PER_LINE];
        self.sprite_shifter_hi = [0; MAX_SPRITES_PER_LINE];

        let height = self.control.sprite_height();
        for (index, entry) in self.oam.chunks_exact(4).enumerate() {
            let diff = self.scanline - entry[0] as i16;
            if !(0..height).contains(&diff) {
                continue;
            }
            if self.sprite_count == MAX_SPRITES_PER_LINE {
                self.status.set(PpuStatus::SPRITE_OVERFLOW, true);
                break;
            }
            if index == 0 {
                self.sprite_zero_possible = true;
            }
            self.sprite_scanline[self.sprite_count] = SpriteEntry {
                y: entry[0],
                tile: entry[1],
                attribute: entry[2],
                x: entry[3],
            };
            self.sprite_count += 1;
        }
    }

    fn load_sprite_shifters(&mut self, bus: &mut impl PpuBus) {
        for i in 0..self.sprite_count {
            let sprite = self.sprite_scanline[i];
            let address = self.sprite_row_address(&sprite);

            let mut lo = bus.ppu_read(address);
            let mut hi = bus.ppu_read(address + 8);
            if sprite.attribute & 0x40 != 0 {
                lo = lo.reverse_bits();
                hi = hi.reverse_bits();
            }
            self.sprite_shifter_lo[i] = lo;
            self.sprite_shifter_hi[i] = hi;
        }
    }

    /// Pattern address of the row of `sprite` on the current scanline
    fn sprite_row_address(&self, sprite: &SpriteEntry) -> u16 {
        let row = (self.scanline - sprite.y as i16) as u16;
        let flip_v = sprite.attribute & 0x80 != 0;

        if self.control.sprite_height() == 8 {
            let fine = if flip_v { 7 - row } else { row };
            return self.control.sprite_table() | ((sprite.tile as u16) << 4) | fine;
        }

        // 8x16: bit 0 picks the table, the tile pair starts at an even id
        let table = ((sprite.tile & 0x01) as u16) << 12;
        let top = (sprite.tile & 0xFE) as u16;
        let top_half = row < 8;
        let tile = if top_half != flip_v { top } else { top + 1 };
        let fine = if flip_v { 7 - (row & 0x07) } else { row & 0x07 };
        table | (tile << 4) | fine
    }

    /// Render a 128x128 view of pattern table `table` (0 or 1) using `palette`
    pub fn pattern_table(&self, bus: &mut impl PpuBus, table: u8, palette: u8) -> Vec<u32> {
        let mut image = vec![0u32; 128 * 128];
        let base = ((table & 0x01) as u16) * 0x1000;
        for tile_y in 0..16u16 {
            for tile_x in 0..16u16 {
                let offset = tile_y * 256 + tile_x * 16;
                for row in 0..8u16 {
                    let lo = bus.ppu_read(base + offset + row);
                    let hi = bus.ppu_read(base + offset + row + 8);
                    for col in 0..8u16 {
                        let shift = 7 - col;
                        let pixel = ((lo >> shift) & 0x01) | (((hi >> shift) & 0x01) << 1);
                        let x = (tile_x * 8 + col) as usize;
                        let y = (tile_y * 8 + row) as usize;
                        image[y * 128 + x] = self.palette_color(bus, palette, pixel);
                    }
                }
            }
        }
        image
    }

    /// Take the pending NMI request, if any
    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi)
    }

    /// True once a full frame has been produced since the last clear
    pub fn frame_complete(&self) -> bool {
        self.frame_complete
    }

    pub fn clear_frame_complete(&mut self) {
        self.frame_complete = false;
    }

    /// Frames completed since power-up
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 256x240 frame buffer, row-major
    pub fn frame_buffer(&self) -> &[u32] {
        &self.frame_buffer
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    pub fn scanline(&self) -> i16 {
        self.scanline
    }

    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    pub fn status(&self) -> PpuStatus {
        self.status
    }

    pub fn control(&self) -> PpuCtrl {
        self.control
    }

    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    /// Active VRAM address
    pub fn vram_addr(&self) -> LoopyRegister {
        self.vram_addr
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 16KB PPU address space
    struct Vram(Vec<u8>);

    impl Vram {
        fn new() -> Self {
            Self(vec![0; 0x4000])
        }
    }

    impl PpuBus for Vram {
        fn ppu_read(&mut self, address: u16) -> u8 {
            self.0[(address & 0x3FFF) as usize]
        }

        fn ppu_write(&mut self, address: u16, value: u8) {
            self.0[(address & 0x3FFF) as usize] = value;
        }
    }

    fn run_to(ppu: &mut Ppu, vram: &mut Vram, scanline: i16, cycle: u16) {
        while !(ppu.scanline() == scanline && ppu.cycle() == cycle) {
            ppu.clock(vram);
        }
    }

    #[test]
    fn test_ppu_reset() {
        let mut ppu = Ppu::new();
        ppu.reset();
        assert_eq!(ppu.scanline(), -1);
        assert_eq!(ppu.cycle(), 0);
        assert_eq!(ppu.frame_buffer().len(), SCREEN_WIDTH * SCREEN_HEIGHT);
    }

    #[test]
    fn test_loopy_fields() {
        let mut v = LoopyRegister::default();
        v.set_coarse_x(31);
        v.set_coarse_y(29);
        v.set_nametable_x(1);
        v.set_nametable_y(1);
        v.set_fine_y(7);
        assert_eq!(v.0, 0x7FBF);
        v.set_coarse_x(32);
        assert_eq!(v.coarse_x(), 0);
        assert_eq!(v.coarse_y(), 29);
    }

    #[test]
    fn test_status_read_clears_vblank_and_toggle() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        ppu.status = PpuStatus::new(PpuStatus::VBLANK);
        ppu.cpu_write(0x0005, 0x10, &mut vram);
        assert!(ppu.write_toggle);

        assert_eq!(ppu.cpu_read(0x0002, &mut vram) & 0x80, 0x80);
        assert!(!ppu.status().vblank());
        assert!(!ppu.write_toggle);
    }

    #[test]
    fn test_scroll_and_addr_writes() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        ppu.cpu_write(0x0000, 0x03, &mut vram);
        ppu.cpu_write(0x0005, 0x7D, &mut vram); // coarse X 15, fine X 5
        ppu.cpu_write(0x0005, 0x5E, &mut vram); // coarse Y 11, fine Y 6
        assert_eq!(ppu.fine_x, 5);
        assert_eq!(ppu.tram_addr.coarse_x(), 15);
        assert_eq!(ppu.tram_addr.coarse_y(), 11);
        assert_eq!(ppu.tram_addr.fine_y(), 6);
        assert_eq!(ppu.tram_addr.nametable_x(), 1);
        assert_eq!(ppu.tram_addr.nametable_y(), 1);

        ppu.cpu_write(0x0006, 0xFF, &mut vram);
        ppu.cpu_write(0x0006, 0x10, &mut vram);
        assert_eq!(ppu.vram_addr().0, 0x3F10);
    }

    #[test]
    fn test_ppudata_read_is_buffered() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        vram.0[0x2400] = 0xAB;
        vram.0[0x2401] = 0xCD;
        ppu.cpu_write(0x0006, 0x24, &mut vram);
        ppu.cpu_write(0x0006, 0x00, &mut vram);

        assert_eq!(ppu.cpu_read(0x0007, &mut vram), 0x00);
        assert_eq!(ppu.cpu_read(0x0007, &mut vram), 0xAB);
        assert_eq!(ppu.cpu_read(0x0007, &mut vram), 0xCD);
    }

    #[test]
    fn test_ppudata_increment_32() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        ppu.cpu_write(0x0000, PpuCtrl::VRAM_INC, &mut vram);
        ppu.cpu_write(0x0006, 0x20, &mut vram);
        ppu.cpu_write(0x0006, 0x00, &mut vram);
        ppu.cpu_write(0x0007, 0x11, &mut vram);
        ppu.cpu_write(0x0007, 0x22, &mut vram);
        assert_eq!(vram.0[0x2000], 0x11);
        assert_eq!(vram.0[0x2020], 0x22);
    }

    #[test]
    fn test_oamdata_write_increments() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        ppu.cpu_write(0x0003, 0xFF, &mut vram);
        ppu.cpu_write(0x0004, 0x12, &mut vram);
        ppu.cpu_write(0x0004, 0x34, &mut vram);
        assert_eq!(ppu.oam()[0xFF], 0x12);
        assert_eq!(ppu.oam()[0x00], 0x34);
        ppu.cpu_write(0x0003, 0xFF, &mut vram);
        assert_eq!(ppu.cpu_read(0x0004, &mut vram), 0x12);
    }

    #[test]
    fn test_vblank_nmi_request() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        ppu.cpu_write(0x0000, PpuCtrl::NMI_ENABLE, &mut vram);
        run_to(&mut ppu, &mut vram, 241, 1);
        assert!(!ppu.status().vblank());
        ppu.clock(&mut vram);
        assert!(ppu.status().vblank());
        assert!(ppu.take_nmi());
        assert!(!ppu.take_nmi());

        run_to(&mut ppu, &mut vram, -1, 2);
        assert!(!ppu.status().vblank());
    }

    #[test]
    fn test_sprite_overflow_on_ninth_sprite() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        for i in 0..9u8 {
            ppu.write_oam(i * 4, 10);
            ppu.write_oam(i * 4 + 3, i * 8);
        }
        for i in 9..64u8 {
            ppu.write_oam(i * 4, 0xF0);
        }
        run_to(&mut ppu, &mut vram, 10, 258);
        assert_eq!(ppu.sprite_count, 8);
        assert!(ppu.status().sprite_overflow());
        assert!(ppu.sprite_zero_possible);
    }

    #[test]
    fn test_eight_sprites_do_not_overflow() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        for i in 8..64u8 {
            ppu.write_oam(i * 4, 0xF0);
        }
        run_to(&mut ppu, &mut vram, 0, 258);
        assert_eq!(ppu.sprite_count, 8);
        assert!(!ppu.status().sprite_overflow());
    }

    #[test]
    fn test_sprite_row_address_16px() {
        let mut ppu = Ppu::new();
        ppu.control = PpuCtrl::new(PpuCtrl::SPRITE_SIZE);
        ppu.scanline = 20;
        let sprite = SpriteEntry {
            y: 10,
            tile: 0x05,
            attribute: 0,
            x: 0,
        };
        // Row 10 is in the bottom tile (0x05) of table 1
        assert_eq!(ppu.sprite_row_address(&sprite), 0x1000 | (0x05 << 4) | 2);

        let flipped = SpriteEntry {
            attribute: 0x80,
            ..sprite
        };
        assert_eq!(ppu.sprite_row_address(&flipped), 0x1000 | (0x04 << 4) | 5);
    }

    #[test]
    fn test_background_pixel_reaches_frame_buffer() {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        // Tile 1, row 0 fully set in the low plane
        for row in 0..8 {
            vram.0[0x0010 + row] = 0xFF;
        }
        vram.0[0x2000..0x23C0].fill(0x01);
        vram.0[0x3F00] = 0x0F;
        vram.0[0x3F01] = 0x30;
        ppu.cpu_write(0x0001, PpuMask::RENDER_BG | PpuMask::RENDER_BG_LEFT, &mut vram);

        run_to(&mut ppu, &mut vram, 1, 0);
        let row = &ppu.frame_buffer()[..SCREEN_WIDTH];
        assert!(row.iter().all(|&c| c == SYSTEM_PALETTE[0x30]));
    }

    #[test]
    fn test_coarse_y_wraps_at_29_and_31() {
        let mut ppu = Ppu::new();
        ppu.mask = PpuMask::new(PpuMask::RENDER_BG);

        ppu.vram_addr.set_coarse_y(29);
        ppu.vram_addr.set_fine_y(7);
        ppu.increment_scroll_y();
        assert_eq!(ppu.vram_addr.coarse_y(), 0);
        assert_eq!(ppu.vram_addr.fine_y(), 0);
        assert_eq!(ppu.vram_addr.nametable_y(), 1);

        // Rows 30 and 31 hold attributes; leaving them keeps the nametable
        ppu.vram_addr.set_coarse_y(31);
        ppu.vram_addr.set_fine_y(7);
        ppu.increment_scroll_y();
        assert_eq!(ppu.vram_addr.coarse_y(), 0);
        assert_eq!(ppu.vram_addr.nametable_y(), 1);

        ppu.vram_addr.set_coarse_y(12);
        ppu.vram_addr.set_fine_y(7);
        ppu.increment_scroll_y();
        assert_eq!(ppu.vram_addr.coarse_y(), 13);
        assert_eq!(ppu.vram_addr.nametable_y(), 1);
    }

    #[test]
    fn test_scroll_y_frozen_when_not_rendering() {
        let mut ppu = Ppu::new();
        ppu.vram_addr.set_coarse_y(29);
        ppu.vram_addr.set_fine_y(7);
        ppu.increment_scroll_y();
        assert_eq!(ppu.vram_addr.coarse_y(), 29);
        assert_eq!(ppu.vram_addr.fine_y(), 7);
    }

    const SPRITE_COLOR: u8 = 0x16;
    const BACKGROUND_COLOR: u8 = 0x30;

    /// Opaque background everywhere plus sprite 0 at (x, 10). Tile 2 has
    /// only its leftmost column set, tile 3 is solid.
    fn sprite_scene(tile: u8, attribute: u8, x: u8, mask: u8) -> (Ppu, Vram) {
        let mut ppu = Ppu::new();
        let mut vram = Vram::new();
        for row in 0..8 {
            vram.0[0x0010 + row] = 0xFF;
            vram.0[0x0020 + row] = 0x80;
            vram.0[0x0030 + row] = 0xFF;
        }
        vram.0[0x2000..0x23C0].fill(0x01);
        vram.0[0x3F00] = 0x0F;
        vram.0[0x3F01] = BACKGROUND_COLOR;
        vram.0[0x3F11] = SPRITE_COLOR;

        for i in 1..64u8 {
            ppu.write_oam(i * 4, 0xF0);
        }
        ppu.write_oam(0, 10);
        ppu.write_oam(1, tile);
        ppu.write_oam(2, attribute);
        ppu.write_oam(3, x);
        ppu.cpu_write(0x0001, mask, &mut vram);
        (ppu, vram)
    }

    const SHOW_ALL: u8 = PpuMask::RENDER_BG
        | PpuMask::RENDER_SPR
        | PpuMask::RENDER_BG_LEFT
        | PpuMask::RENDER_SPR_LEFT;

    /// Columns of scanline 11 drawn in the sprite color
    fn sprite_columns(tile: u8, attribute: u8, x: u8) -> Vec<usize> {
        let (mut ppu, mut vram) = sprite_scene(tile, attribute, x, SHOW_ALL);
        run_to(&mut ppu, &mut vram, 12, 0);
        let row = &ppu.frame_buffer()[11 * SCREEN_WIDTH..12 * SCREEN_WIDTH];
        row.iter()
            .enumerate()
            .filter(|&(_, &c)| c == SYSTEM_PALETTE[SPRITE_COLOR as usize])
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_sprite_in_front_of_background() {
        assert_eq!(sprite_columns(2, 0x00, 16), vec![16]);
    }

    #[test]
    fn test_sprite_behind_background() {
        assert!(sprite_columns(2, 0x20, 16).is_empty());
        assert_eq!(sprite_columns(3, 0x00, 16), (16..24).collect::<Vec<_>>());
        assert!(sprite_columns(3, 0x20, 16).is_empty());
    }

    #[test]
    fn test_sprite_horizontal_flip() {
        assert_eq!(sprite_columns(2, 0x40, 16), vec![23]);
    }

    #[test]
    fn test_sprite_zero_hit_hidden_in_left_column() {
        let mask = PpuMask::RENDER_BG | PpuMask::RENDER_SPR | PpuMask::RENDER_BG_LEFT;
        let (mut ppu, mut vram) = sprite_scene(3, 0x00, 0, mask);
        run_to(&mut ppu, &mut vram, 20, 0);
        assert!(!ppu.status().sprite_zero_hit());

        let (mut ppu, mut vram) = sprite_scene(3, 0x00, 0, SHOW_ALL);
        run_to(&mut ppu, &mut vram, 20, 0);
        assert!(ppu.status().sprite_zero_hit());
    }

    #[test]
    fn test_sprite_zero_hit_past_left_column() {
        let mask = PpuMask::RENDER_BG | PpuMask::RENDER_SPR;
        let (mut ppu, mut vram) = sprite_scene(3, 0x00, 8, mask);
        run_to(&mut ppu, &mut vram, 20, 0);
        assert!(ppu.status().sprite_zero_hit());
    }
}
