//! Controller input handling
//!
//! A standard pad is an 8-bit parallel-in, serial-out shift register. The
//! frontend supplies the live button mask; a strobe write to $4016 latches it
//! and each read of $4016/$4017 shifts one button out, A first.

/// Button masks, in the order the pad reports them
pub const BUTTON_A: u8 = 0x01;
pub const BUTTON_B: u8 = 0x02;
pub const BUTTON_SELECT: u8 = 0x04;
pub const BUTTON_START: u8 = 0x08;
pub const BUTTON_UP: u8 = 0x10;
pub const BUTTON_DOWN: u8 = 0x20;
pub const BUTTON_LEFT: u8 = 0x40;
pub const BUTTON_RIGHT: u8 = 0x80;

/// Upper bits of a port read come from the open data bus
pub const OPEN_BUS_BITS: u8 = 0x40;

/// Standard NES controller
#[derive(Debug, Clone, Default)]
pub struct StandardController {
    /// Live button mask supplied by the frontend
    buttons: u8,
    /// Serial shift register
    shift: u8,
    /// Strobe line; while high the register keeps reloading
    strobe: bool,
}

impl StandardController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live button mask
    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    pub fn strobe_write(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        self.shift = self.buttons;
    }

    pub fn read(&mut self) -> u8 {
        if self.strobe {
            self.shift = self.buttons;
        }
        let bit = self.shift & 0x01;
        if !self.strobe {
            // Pads report 1 once all eight buttons have been read
            self.shift = (self.shift >> 1) | 0x80;
        }
        bit | OPEN_BUS_BITS
    }
}
