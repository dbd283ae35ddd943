//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode. Execution is
//! table-driven: on the first cycle of an instruction the whole instruction
//! runs, and the remaining cycles are counted down on later clocks.

mod table;

use std::fmt;

use tracing::{trace, warn};

pub use table::{lookup, InstructionInfo, Operation};

/// Stack page base address
pub const STACK_BASE: u16 = 0x0100;
/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

const RESET_CYCLES: u32 = 8;
const IRQ_CYCLES: u32 = 7;
const NMI_CYCLES: u32 = 8;

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,    // Accumulator
    pub x: u8,    // X index register
    pub y: u8,    // Y index register
    pub p: u8,    // Processor status
    pub sp: u8,   // Stack pointer
    pub pc: u16,  // Program counter
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: StatusFlags::UNUSED,
            sp: 0xFD, // Stack starts at $01FD
            pc: 0,    // Will be set by reset vector
        }
    }
}

/// CPU status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const CARRY: u8 = 0b00000001;
    pub const ZERO: u8 = 0b00000010;
    pub const INTERRUPT: u8 = 0b00000100;
    pub const DECIMAL: u8 = 0b00001000;
    pub const BREAK: u8 = 0b00010000;
    pub const UNUSED: u8 = 0b00100000;
    pub const OVERFLOW: u8 = 0b01000000;
    pub const NEGATIVE: u8 = 0b10000000;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn carry(&self) -> bool {
        (self.0 & Self::CARRY) != 0
    }

    pub fn zero(&self) -> bool {
        (self.0 & Self::ZERO) != 0
    }

    pub fn interrupt(&self) -> bool {
        (self.0 & Self::INTERRUPT) != 0
    }

    pub fn decimal(&self) -> bool {
        (self.0 & Self::DECIMAL) != 0
    }

    pub fn overflow(&self) -> bool {
        (self.0 & Self::OVERFLOW) != 0
    }

    pub fn negative(&self) -> bool {
        (self.0 & Self::NEGATIVE) != 0
    }

    pub fn set(&mut self, mask: u8, val: bool) {
        self.0 = if val { self.0 | mask } else { self.0 & !mask };
    }

    pub fn set_carry(&mut self, val: bool) {
        self.set(Self::CARRY, val);
    }

    pub fn set_overflow(&mut self, val: bool) {
        self.set(Self::OVERFLOW, val);
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [char; 8] = ['C', 'Z', 'I', 'D', 'B', 'U', 'V', 'N'];
        for bit in (0..8).rev() {
            let name = NAMES[bit];
            if self.0 & (1 << bit) != 0 {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}", name.to_ascii_lowercase())?;
            }
        }
        Ok(())
    }
}

/// Operand addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// No operand, or the accumulator
    Implied,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    /// Signed 8-bit branch offset
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// JMP only; the pointer's high byte never leaves its page
    Indirect,
    IndirectX,
    IndirectY,
}

/// Bus trait for memory and I/O access
pub trait Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8;
    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8);
}

/// 2A03 CPU
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: CpuRegisters,
    /// Cycles left before the next fetch
    remaining_cycles: u32,
    total_cycles: u64,

    // Scratch state, valid for the in-flight instruction only
    opcode: u8,
    mode: AddressingMode,
    addr_abs: u16,
    addr_rel: u16,
    fetched: u8,
}

impl Cpu {
    /// Create a new CPU in its pre-reset state
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters::default(),
            remaining_cycles: 0,
            total_cycles: 0,
            opcode: 0,
            mode: AddressingMode::Implied,
            addr_abs: 0,
            addr_rel: 0,
            fetched: 0,
        }
    }

    /// Reset the CPU: load PC from $FFFC/$FFFD and clear registers
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers = CpuRegisters {
            pc: read_word(bus, RESET_VECTOR),
            ..CpuRegisters::default()
        };
        self.opcode = 0;
        self.mode = AddressingMode::Implied;
        self.addr_abs = 0;
        self.addr_rel = 0;
        self.fetched = 0;
        self.remaining_cycles = RESET_CYCLES;
    }

    /// Maskable interrupt; ignored while the interrupt-disable flag is set
    pub fn irq(&mut self, bus: &mut impl Bus) {
        if self.flag(StatusFlags::INTERRUPT) {
            return;
        }
        self.interrupt(bus, IRQ_VECTOR);
        self.remaining_cycles += IRQ_CYCLES;
    }

    /// Non-maskable interrupt
    pub fn nmi(&mut self, bus: &mut impl Bus) {
        self.interrupt(bus, NMI_VECTOR);
        self.remaining_cycles += NMI_CYCLES;
    }

    fn interrupt(&mut self, bus: &mut impl Bus, vector: u16) {
        self.push_word(bus, self.registers.pc);
        let status = (self.registers.p & !StatusFlags::BREAK) | StatusFlags::UNUSED;
        self.push(bus, status);
        self.set_flag(StatusFlags::INTERRUPT, true);
        self.registers.pc = read_word(bus, vector);
    }

    /// Advance one CPU cycle. A new instruction executes when the previous
    /// one has finished counting down.
    pub fn clock(&mut self, bus: &mut impl Bus) {
        if self.remaining_cycles == 0 {
            self.opcode = bus.read(self.registers.pc);
            self.registers.pc = self.registers.pc.wrapping_add(1);
            self.registers.p |= StatusFlags::UNUSED;

            let info = lookup(self.opcode);
            self.remaining_cycles = info.cycles as u32;
            self.mode = info.mode;

            let address_extra = self.resolve_address(bus);
            let operation_extra = self.execute(info.operation, bus);
            // Both must agree: e.g. STA abs,X never gains the page-cross cycle
            self.remaining_cycles += (address_extra & operation_extra) as u32;

            self.registers.p |= StatusFlags::UNUSED;
        }

        self.remaining_cycles -= 1;
        self.total_cycles += 1;
    }

    /// Finish the in-flight instruction, or run the next one when idle.
    /// Returns the number of cycles consumed.
    pub fn step(&mut self, bus: &mut impl Bus) -> u32 {
        let mut cycles = 0;
        loop {
            self.clock(bus);
            cycles += 1;
            if self.complete() {
                return cycles;
            }
        }
    }

    /// True when the next clock fetches a new instruction
    pub fn complete(&self) -> bool {
        self.remaining_cycles == 0
    }

    /// Suspend the CPU for extra cycles (OAM DMA)
    pub fn stall(&mut self, cycles: u32) {
        self.remaining_cycles += cycles;
    }

    /// Get CPU registers
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    /// Get mutable CPU registers
    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    /// Get status flags
    pub fn status(&self) -> StatusFlags {
        StatusFlags(self.registers.p)
    }

    /// Cycles left on the in-flight instruction
    pub fn remaining_cycles(&self) -> u32 {
        self.remaining_cycles
    }

    /// Get total cycle count
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    fn flag(&self, mask: u8) -> bool {
        (self.registers.p & mask) != 0
    }

    fn set_flag(&mut self, mask: u8, val: bool) {
        let mut status = StatusFlags(self.registers.p);
        status.set(mask, val);
        self.registers.p = status.0 | StatusFlags::UNUSED;
    }

    fn set_zn(&mut self, value: u8) {
        self.set_flag(StatusFlags::ZERO, value == 0);
        self.set_flag(StatusFlags::NEGATIVE, value & 0x80 != 0);
    }

    fn read_pc(&mut self, bus: &mut impl Bus) -> u8 {
        let value = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn read_pc_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.read_pc(bus) as u16;
        let hi = self.read_pc(bus) as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(STACK_BASE | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pop(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(STACK_BASE | self.registers.sp as u16)
    }

    fn push_word(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pop_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pop(bus) as u16;
        let hi = self.pop(bus) as u16;
        (hi << 8) | lo
    }

    /// Resolve the effective address for the current mode.
    /// Returns 1 when an indexed access crossed a page.
    fn resolve_address(&mut self, bus: &mut impl Bus) -> u8 {
        let regs = self.registers;
        match self.mode {
            AddressingMode::Implied => {
                self.fetched = regs.a;
                0
            }
            AddressingMode::Immediate => {
                self.addr_abs = regs.pc;
                self.registers.pc = regs.pc.wrapping_add(1);
                0
            }
            AddressingMode::ZeroPage => {
                self.addr_abs = self.read_pc(bus) as u16;
                0
            }
            AddressingMode::ZeroPageX => {
                self.addr_abs = self.read_pc(bus).wrapping_add(regs.x) as u16;
                0
            }
            AddressingMode::ZeroPageY => {
                self.addr_abs = self.read_pc(bus).wrapping_add(regs.y) as u16;
                0
            }
            AddressingMode::Relative => {
                self.addr_rel = self.read_pc(bus) as i8 as u16;
                0
            }
            AddressingMode::Absolute => {
                self.addr_abs = self.read_pc_word(bus);
                0
            }
            AddressingMode::AbsoluteX => {
                let base = self.read_pc_word(bus);
                self.addr_abs = base.wrapping_add(regs.x as u16);
                page_crossed(base, self.addr_abs)
            }
            AddressingMode::AbsoluteY => {
                let base = self.read_pc_word(bus);
                self.addr_abs = base.wrapping_add(regs.y as u16);
                page_crossed(base, self.addr_abs)
            }
            AddressingMode::Indirect => {
                let ptr = self.read_pc_word(bus);
                // Hardware bug: the high byte is fetched from the same page
                let hi_addr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let lo = bus.read(ptr) as u16;
                let hi = bus.read(hi_addr) as u16;
                self.addr_abs = (hi << 8) | lo;
                0
            }
            AddressingMode::IndirectX => {
                let zp = self.read_pc(bus).wrapping_add(regs.x);
                let lo = bus.read(zp as u16) as u16;
                let hi = bus.read(zp.wrapping_add(1) as u16) as u16;
                self.addr_abs = (hi << 8) | lo;
                0
            }
            AddressingMode::IndirectY => {
                let zp = self.read_pc(bus);
                let lo = bus.read(zp as u16) as u16;
                let hi = bus.read(zp.wrapping_add(1) as u16) as u16;
                let base = (hi << 8) | lo;
                self.addr_abs = base.wrapping_add(regs.y as u16);
                page_crossed(base, self.addr_abs)
            }
        }
    }

    /// Load the operand; implied mode already latched the accumulator
    fn fetch(&mut self, bus: &mut impl Bus) -> u8 {
        if self.mode != AddressingMode::Implied {
            self.fetched = bus.read(self.addr_abs);
        }
        self.fetched
    }

    /// Write a read-modify-write result back to its source
    fn write_back(&mut self, bus: &mut impl Bus, value: u8) {
        if self.mode == AddressingMode::Implied {
            self.registers.a = value;
        } else {
            bus.write(self.addr_abs, value);
        }
    }

    fn branch(&mut self, condition: bool) {
        if !condition {
            return;
        }
        self.remaining_cycles += 1;
        let target = self.registers.pc.wrapping_add(self.addr_rel);
        if page_crossed(self.registers.pc, target) == 1 {
            self.remaining_cycles += 1;
        }
        self.registers.pc = target;
    }

    fn add_with_carry(&mut self, value: u8) {
        let a = self.registers.a as u16;
        let sum = a + value as u16 + self.flag(StatusFlags::CARRY) as u16;
        let result = sum as u8;
        self.set_flag(StatusFlags::CARRY, sum > 0xFF);
        self.set_flag(
            StatusFlags::OVERFLOW,
            (!(self.registers.a ^ value) & (self.registers.a ^ result)) & 0x80 != 0,
        );
        self.set_zn(result);
        self.registers.a = result;
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.set_flag(StatusFlags::CARRY, register >= value);
        self.set_zn(register.wrapping_sub(value));
    }

    fn shift_left(&mut self, value: u8) -> u8 {
        self.set_flag(StatusFlags::CARRY, value & 0x80 != 0);
        let result = value << 1;
        self.set_zn(result);
        result
    }

    fn shift_right(&mut self, value: u8) -> u8 {
        self.set_flag(StatusFlags::CARRY, value & 0x01 != 0);
        let result = value >> 1;
        self.set_zn(result);
        result
    }

    fn rotate_left(&mut self, value: u8) -> u8 {
        let carry_in = self.flag(StatusFlags::CARRY) as u8;
        self.set_flag(StatusFlags::CARRY, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.set_zn(result);
        result
    }

    fn rotate_right(&mut self, value: u8) -> u8 {
        let carry_in = (self.flag(StatusFlags::CARRY) as u8) << 7;
        self.set_flag(StatusFlags::CARRY, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.set_zn(result);
        result
    }

    /// Perform an operation. Returns 1 when the instruction can take the
    /// page-crossing penalty.
    fn execute(&mut self, operation: Operation, bus: &mut impl Bus) -> u8 {
        use Operation::*;

        match operation {
            ADC => {
                let value = self.fetch(bus);
                self.add_with_carry(value);
                1
            }
            SBC => {
                let value = self.fetch(bus);
                self.add_with_carry(!value);
                1
            }
            AND => {
                let value = self.fetch(bus);
                self.registers.a &= value;
                self.set_zn(self.registers.a);
                1
            }
            ORA => {
                let value = self.fetch(bus);
                self.registers.a |= value;
                self.set_zn(self.registers.a);
                1
            }
            EOR => {
                let value = self.fetch(bus);
                self.registers.a ^= value;
                self.set_zn(self.registers.a);
                1
            }
            ASL => {
                let value = self.fetch(bus);
                let result = self.shift_left(value);
                self.write_back(bus, result);
                0
            }
            LSR => {
                let value = self.fetch(bus);
                let result = self.shift_right(value);
                self.write_back(bus, result);
                0
            }
            ROL => {
                let value = self.fetch(bus);
                let result = self.rotate_left(value);
                self.write_back(bus, result);
                0
            }
            ROR => {
                let value = self.fetch(bus);
                let result = self.rotate_right(value);
                self.write_back(bus, result);
                0
            }
            BCC => {
                self.branch(!self.flag(StatusFlags::CARRY));
                0
            }
            BCS => {
                self.branch(self.flag(StatusFlags::CARRY));
                0
            }
            BEQ => {
                self.branch(self.flag(StatusFlags::ZERO));
                0
            }
            BNE => {
                self.branch(!self.flag(StatusFlags::ZERO));
                0
            }
            BMI => {
                self.branch(self.flag(StatusFlags::NEGATIVE));
                0
            }
            BPL => {
                self.branch(!self.flag(StatusFlags::NEGATIVE));
                0
            }
            BVC => {
                self.branch(!self.flag(StatusFlags::OVERFLOW));
                0
            }
            BVS => {
                self.branch(self.flag(StatusFlags::OVERFLOW));
                0
            }
            BIT => {
                let value = self.fetch(bus);
                self.set_flag(StatusFlags::ZERO, self.registers.a & value == 0);
                self.set_flag(StatusFlags::NEGATIVE, value & 0x80 != 0);
                self.set_flag(StatusFlags::OVERFLOW, value & 0x40 != 0);
                0
            }
            BRK => {
                // Immediate mode has already stepped over the padding byte
                self.push_word(bus, self.registers.pc);
                self.push(bus, self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED);
                self.set_flag(StatusFlags::INTERRUPT, true);
                self.registers.pc = read_word(bus, IRQ_VECTOR);
                0
            }
            CLC => {
                self.set_flag(StatusFlags::CARRY, false);
                0
            }
            CLD => {
                self.set_flag(StatusFlags::DECIMAL, false);
                0
            }
            CLI => {
                self.set_flag(StatusFlags::INTERRUPT, false);
                0
            }
            CLV => {
                self.set_flag(StatusFlags::OVERFLOW, false);
                0
            }
            SEC => {
                self.set_flag(StatusFlags::CARRY, true);
                0
            }
            SED => {
                self.set_flag(StatusFlags::DECIMAL, true);
                0
            }
            SEI => {
                self.set_flag(StatusFlags::INTERRUPT, true);
                0
            }
            CMP => {
                let value = self.fetch(bus);
                self.compare(self.registers.a, value);
                1
            }
            CPX => {
                let value = self.fetch(bus);
                self.compare(self.registers.x, value);
                0
            }
            CPY => {
                let value = self.fetch(bus);
                self.compare(self.registers.y, value);
                0
            }
            DEC => {
                let result = self.fetch(bus).wrapping_sub(1);
                bus.write(self.addr_abs, result);
                self.set_zn(result);
                0
            }
            INC => {
                let result = self.fetch(bus).wrapping_add(1);
                bus.write(self.addr_abs, result);
                self.set_zn(result);
                0
            }
            DEX => {
                self.registers.x = self.registers.x.wrapping_sub(1);
                self.set_zn(self.registers.x);
                0
            }
            DEY => {
                self.registers.y = self.registers.y.wrapping_sub(1);
                self.set_zn(self.registers.y);
                0
            }
            INX => {
                self.registers.x = self.registers.x.wrapping_add(1);
                self.set_zn(self.registers.x);
                0
            }
            INY => {
                self.registers.y = self.registers.y.wrapping_add(1);
                self.set_zn(self.registers.y);
                0
            }
            JMP => {
                self.registers.pc = self.addr_abs;
                0
            }
            JSR => {
                let return_addr = self.registers.pc.wrapping_sub(1);
                self.push_word(bus, return_addr);
                self.registers.pc = self.addr_abs;
                0
            }
            RTS => {
                self.registers.pc = self.pop_word(bus).wrapping_add(1);
                0
            }
            RTI => {
                let status = self.pop(bus);
                self.registers.p = (status & !StatusFlags::BREAK) | StatusFlags::UNUSED;
                self.registers.pc = self.pop_word(bus);
                0
            }
            LDA => {
                self.registers.a = self.fetch(bus);
                self.set_zn(self.registers.a);
                1
            }
            LDX => {
                self.registers.x = self.fetch(bus);
                self.set_zn(self.registers.x);
                1
            }
            LDY => {
                self.registers.y = self.fetch(bus);
                self.set_zn(self.registers.y);
                1
            }
            STA => {
                bus.write(self.addr_abs, self.registers.a);
                0
            }
            STX => {
                bus.write(self.addr_abs, self.registers.x);
                0
            }
            STY => {
                bus.write(self.addr_abs, self.registers.y);
                0
            }
            PHA => {
                self.push(bus, self.registers.a);
                0
            }
            PHP => {
                self.push(bus, self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED);
                0
            }
            PLA => {
                self.registers.a = self.pop(bus);
                self.set_zn(self.registers.a);
                0
            }
            PLP => {
                let status = self.pop(bus);
                self.registers.p = (status & !StatusFlags::BREAK) | StatusFlags::UNUSED;
                0
            }
            TAX => {
                self.registers.x = self.registers.a;
                self.set_zn(self.registers.x);
                0
            }
            TAY => {
                self.registers.y = self.registers.a;
                self.set_zn(self.registers.y);
                0
            }
            TSX => {
                self.registers.x = self.registers.sp;
                self.set_zn(self.registers.x);
                0
            }
            TXA => {
                self.registers.a = self.registers.x;
                self.set_zn(self.registers.a);
                0
            }
            TXS => {
                self.registers.sp = self.registers.x;
                0
            }
            TYA => {
                self.registers.a = self.registers.y;
                self.set_zn(self.registers.a);
                0
            }
            NOP => {
                // Operand read still happens for the multi-byte forms
                if self.mode != AddressingMode::Implied {
                    self.fetch(bus);
                }
                1
            }
            LAX => {
                let value = self.fetch(bus);
                self.registers.a = value;
                self.registers.x = value;
                self.set_zn(value);
                1
            }
            SAX => {
                bus.write(self.addr_abs, self.registers.a & self.registers.x);
                0
            }
            DCP => {
                let result = self.fetch(bus).wrapping_sub(1);
                bus.write(self.addr_abs, result);
                self.compare(self.registers.a, result);
                0
            }
            ISB => {
                let result = self.fetch(bus).wrapping_add(1);
                bus.write(self.addr_abs, result);
                self.add_with_carry(!result);
                0
            }
            SLO => {
                let value = self.fetch(bus);
                let result = self.shift_left(value);
                bus.write(self.addr_abs, result);
                self.registers.a |= result;
                self.set_zn(self.registers.a);
                0
            }
            RLA => {
                let value = self.fetch(bus);
                let result = self.rotate_left(value);
                bus.write(self.addr_abs, result);
                self.registers.a &= result;
                self.set_zn(self.registers.a);
                0
            }
            SRE => {
                let value = self.fetch(bus);
                let result = self.shift_right(value);
                bus.write(self.addr_abs, result);
                self.registers.a ^= result;
                self.set_zn(self.registers.a);
                0
            }
            RRA => {
                let value = self.fetch(bus);
                let result = self.rotate_right(value);
                bus.write(self.addr_abs, result);
                self.add_with_carry(result);
                0
            }
            XXX => {
                warn!(
                    opcode = self.opcode,
                    pc = self.registers.pc.wrapping_sub(1),
                    "undefined opcode executed as NOP"
                );
                0
            }
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

fn read_word(bus: &mut impl Bus, address: u16) -> u16 {
    let lo = bus.read(address) as u16;
    let hi = bus.read(address.wrapping_add(1)) as u16;
    trace!(address, value = (hi << 8) | lo, "vector read");
    (hi << 8) | lo
}

fn page_crossed(from: u16, to: u16) -> u8 {
    ((from & 0xFF00) != (to & 0xFF00)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ram(Vec<u8>);

    impl Ram {
        /// 64KB of RAM with `program` at $8000 and the reset vector pointing at it
        fn with_program(program: &[u8]) -> Self {
            let mut mem = vec![0u8; 0x10000];
            mem[0x8000..0x8000 + program.len()].copy_from_slice(program);
            mem[0xFFFC] = 0x00;
            mem[0xFFFD] = 0x80;
            Self(mem)
        }
    }

    impl Bus for Ram {
        fn read(&mut self, address: u16) -> u8 {
            self.0[address as usize]
        }

        fn write(&mut self, address: u16, value: u8) {
            self.0[address as usize] = value;
        }
    }

    fn boot(program: &[u8]) -> (Cpu, Ram) {
        let mut ram = Ram::with_program(program);
        let mut cpu = Cpu::new();
        cpu.reset(&mut ram);
        cpu.step(&mut ram);
        (cpu, ram)
    }

    #[test]
    fn test_cpu_reset() {
        let mut ram = Ram::with_program(&[]);
        ram.0[0xFFFC] = 0x34;
        ram.0[0xFFFD] = 0x12;
        let mut cpu = Cpu::new();
        cpu.reset(&mut ram);

        assert_eq!(cpu.registers().pc, 0x1234);
        assert_eq!(cpu.registers().sp, 0xFD);
        assert_eq!(cpu.registers().p, StatusFlags::UNUSED);
        assert_eq!(cpu.remaining_cycles(), 8);
        assert_eq!(cpu.step(&mut ram), 8);
    }

    #[test]
    fn test_status_flags() {
        let mut flags = StatusFlags::new(0xFF);
        assert!(flags.carry());
        assert!(flags.zero());
        assert!(flags.interrupt());
        assert!(flags.overflow());
        assert!(flags.negative());

        flags.set_carry(false);
        assert!(!flags.carry());
        assert_eq!(flags.to_string(), "NVUBDIZc");
    }

    #[test]
    fn test_lda_immediate_sets_flags() {
        let (mut cpu, mut ram) = boot(&[0xA9, 0x00, 0xA9, 0x80]);
        assert_eq!(cpu.step(&mut ram), 2);
        assert!(cpu.status().zero());
        cpu.step(&mut ram);
        assert_eq!(cpu.registers().a, 0x80);
        assert!(cpu.status().negative());
        assert!(!cpu.status().zero());
    }

    #[test]
    fn test_page_cross_penalty_needs_both_sides() {
        // LDX #$01; LDA $80FF,X; STA $80FF,X
        let (mut cpu, mut ram) = boot(&[0xA2, 0x01, 0xBD, 0xFF, 0x80, 0x9D, 0xFF, 0x80]);
        cpu.step(&mut ram);
        assert_eq!(cpu.step(&mut ram), 5);
        assert_eq!(cpu.step(&mut ram), 5);
    }

    #[test]
    fn test_branch_cycles() {
        // SEC; BCS +2 (taken, same page); BCC +0 (not taken)
        let (mut cpu, mut ram) = boot(&[0x38, 0xB0, 0x02, 0xEA, 0xEA, 0x90, 0x00]);
        cpu.step(&mut ram);
        assert_eq!(cpu.step(&mut ram), 3);
        assert_eq!(cpu.registers().pc, 0x8005);
        assert_eq!(cpu.step(&mut ram), 2);
    }

    #[test]
    fn test_branch_backwards_across_page() {
        // At $8000: BNE -3 lands on $7FFF
        let (mut cpu, mut ram) = boot(&[0xD0, 0xFD]);
        assert_eq!(cpu.step(&mut ram), 4);
        assert_eq!(cpu.registers().pc, 0x7FFF);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $8010 ... $8010: RTS
        let mut program = vec![0x20, 0x10, 0x80];
        program.resize(0x10, 0xEA);
        program.push(0x60);
        let (mut cpu, mut ram) = boot(&program);

        assert_eq!(cpu.step(&mut ram), 6);
        assert_eq!(cpu.registers().pc, 0x8010);
        assert_eq!(cpu.registers().sp, 0xFB);
        assert_eq!(ram.0[0x01FD], 0x80);
        assert_eq!(ram.0[0x01FC], 0x02);

        cpu.step(&mut ram);
        assert_eq!(cpu.registers().pc, 0x8003);
        assert_eq!(cpu.registers().sp, 0xFD);
    }

    #[test]
    fn test_php_plp_break_bits() {
        // PHP; PLP
        let (mut cpu, mut ram) = boot(&[0x08, 0x28]);
        cpu.step(&mut ram);
        assert_eq!(ram.0[0x01FD], StatusFlags::UNUSED | StatusFlags::BREAK);
        cpu.step(&mut ram);
        assert_eq!(cpu.registers().p, StatusFlags::UNUSED);
    }

    #[test]
    fn test_brk_and_rti() {
        let mut ram = Ram::with_program(&[0x00, 0xFF, 0xEA]);
        ram.0[0xFFFE] = 0x00;
        ram.0[0xFFFF] = 0x90;
        ram.0[0x9000] = 0x40; // RTI
        let mut cpu = Cpu::new();
        cpu.reset(&mut ram);
        cpu.step(&mut ram);

        assert_eq!(cpu.step(&mut ram), 7);
        assert_eq!(cpu.registers().pc, 0x9000);
        assert!(cpu.status().interrupt());
        assert_eq!(ram.0[0x01FD], 0x80);
        assert_eq!(ram.0[0x01FC], 0x02);
        assert_eq!(ram.0[0x01FB], StatusFlags::UNUSED | StatusFlags::BREAK);

        cpu.step(&mut ram);
        assert_eq!(cpu.registers().pc, 0x8002);
        assert!(!cpu.status().interrupt());
    }

    #[test]
    fn test_irq_masked_and_nmi_unmasked() {
        let mut ram = Ram::with_program(&[0x78]); // SEI
        ram.0[0xFFFA] = 0x00;
        ram.0[0xFFFB] = 0xA0;
        ram.0[0xFFFE] = 0x00;
        ram.0[0xFFFF] = 0xB0;
        let mut cpu = Cpu::new();
        cpu.reset(&mut ram);
        cpu.step(&mut ram);
        cpu.step(&mut ram);

        cpu.irq(&mut ram);
        assert_eq!(cpu.registers().pc, 0x8001);
        assert!(cpu.complete());

        cpu.nmi(&mut ram);
        assert_eq!(cpu.registers().pc, 0xA000);
        assert_eq!(cpu.remaining_cycles(), 8);
        // Pushed status keeps I from before the interrupt, with B clear
        assert_eq!(ram.0[0x01FB], StatusFlags::UNUSED | StatusFlags::INTERRUPT);
    }

    #[test]
    fn test_stack_pointer_wraps_within_page() {
        // LDA #$42; LDX #$00; TXS; PHA
        let (mut cpu, mut ram) = boot(&[0xA9, 0x42, 0xA2, 0x00, 0x9A, 0x48]);
        for _ in 0..4 {
            cpu.step(&mut ram);
        }
        assert_eq!(cpu.registers().sp, 0xFF);
        assert_eq!(ram.0[0x0100], 0x42);
    }

    #[test]
    fn test_rotate_through_carry() {
        // SEC; LDA #$80; ROL A; ROR A
        let (mut cpu, mut ram) = boot(&[0x38, 0xA9, 0x80, 0x2A, 0x6A]);
        cpu.step(&mut ram);
        cpu.step(&mut ram);
        cpu.step(&mut ram);
        assert_eq!(cpu.registers().a, 0x01);
        assert!(cpu.status().carry());
        cpu.step(&mut ram);
        assert_eq!(cpu.registers().a, 0x80);
        assert!(cpu.status().carry());
    }

    #[test]
    fn test_compare_discards_result() {
        // LDA #$40; CMP #$41
        let (mut cpu, mut ram) = boot(&[0xA9, 0x40, 0xC9, 0x41]);
        cpu.step(&mut ram);
        cpu.step(&mut ram);
        assert_eq!(cpu.registers().a, 0x40);
        assert!(!cpu.status().carry());
        assert!(cpu.status().negative());
        assert!(!cpu.status().zero());
    }

    #[test]
    fn test_undefined_opcode_is_two_cycle_nop() {
        let (mut cpu, mut ram) = boot(&[0x02, 0xEA]);
        assert_eq!(cpu.step(&mut ram), 2);
        assert_eq!(cpu.registers().pc, 0x8001);
    }
}
