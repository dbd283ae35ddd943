//! Opcode lookup table
//!
//! One record per opcode byte. Undefined opcodes decode to [`Operation::XXX`],
//! which executes as a two-cycle no-op.

use super::AddressingMode;

/// Operation performed by an instruction, independent of addressing mode
#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS, CLC,
    CLD, CLI, CLV, CMP, CPX, CPY, DEC, DEX, DEY, EOR, INC, INX, INY, JMP,
    JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA, PLP, ROL, ROR, RTI,
    RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
    // Unofficial combinations
    LAX, SAX, DCP, ISB, SLO, RLA, SRE, RRA,
    /// Undefined opcode
    XXX,
}

/// Decoded instruction record
#[derive(Debug, Clone, Copy)]
pub struct InstructionInfo {
    pub mnemonic: &'static str,
    pub operation: Operation,
    pub mode: AddressingMode,
    /// Base cycle count before the page-crossing/branch adjustments
    pub cycles: u8,
    /// False for the unofficial opcodes
    pub official: bool,
}

/// Look up the record for an opcode byte
pub fn lookup(opcode: u8) -> &'static InstructionInfo {
    &INSTRUCTIONS[opcode as usize]
}

macro_rules! ins {
    ($op:ident, $mode:ident, $cycles:expr) => {
        InstructionInfo {
            mnemonic: stringify!($op),
            operation: Operation::$op,
            mode: AddressingMode::$mode,
            cycles: $cycles,
            official: true,
        }
    };
    ($op:ident, $mode:ident, $cycles:expr, unofficial) => {
        InstructionInfo {
            official: false,
            ..ins!($op, $mode, $cycles)
        }
    };
}

const UNDEFINED: InstructionInfo = InstructionInfo {
    mnemonic: "???",
    operation: Operation::XXX,
    mode: AddressingMode::Implied,
    cycles: 2,
    official: false,
};

static INSTRUCTIONS: [InstructionInfo; 256] = build_table();

const fn build_table() -> [InstructionInfo; 256] {
    let mut t = [UNDEFINED; 256];

    t[0x00] = ins!(BRK, Immediate, 7);
    t[0x01] = ins!(ORA, IndirectX, 6);
    t[0x05] = ins!(ORA, ZeroPage, 3);
    t[0x06] = ins!(ASL, ZeroPage, 5);
    t[0x08] = ins!(PHP, Implied, 3);
    t[0x09] = ins!(ORA, Immediate, 2);
    t[0x0A] = ins!(ASL, Implied, 2);
    t[0x0D] = ins!(ORA, Absolute, 4);
    t[0x0E] = ins!(ASL, Absolute, 6);
    t[0x10] = ins!(BPL, Relative, 2);
    t[0x11] = ins!(ORA, IndirectY, 5);
    t[0x15] = ins!(ORA, ZeroPageX, 4);
    t[0x16] = ins!(ASL, ZeroPageX, 6);
    t[0x18] = ins!(CLC, Implied, 2);
    t[0x19] = ins!(ORA, AbsoluteY, 4);
    t[0x1D] = ins!(ORA, AbsoluteX, 4);
    t[0x1E] = ins!(ASL, AbsoluteX, 7);
    t[0x20] = ins!(JSR, Absolute, 6);
    t[0x21] = ins!(AND, IndirectX, 6);
    t[0x24] = ins!(BIT, ZeroPage, 3);
    t[0x25] = ins!(AND, ZeroPage, 3);
    t[0x26] = ins!(ROL, ZeroPage, 5);
    t[0x28] = ins!(PLP, Implied, 4);
    t[0x29] = ins!(AND, Immediate, 2);
    t[0x2A] = ins!(ROL, Implied, 2);
    t[0x2C] = ins!(BIT, Absolute, 4);
    t[0x2D] = ins!(AND, Absolute, 4);
    t[0x2E] = ins!(ROL, Absolute, 6);
    t[0x30] = ins!(BMI, Relative, 2);
    t[0x31] = ins!(AND, IndirectY, 5);
    t[0x35] = ins!(AND, ZeroPageX, 4);
    t[0x36] = ins!(ROL, ZeroPageX, 6);
    t[0x38] = ins!(SEC, Implied, 2);
    t[0x39] = ins!(AND, AbsoluteY, 4);
    t[0x3D] = ins!(AND, AbsoluteX, 4);
    t[0x3E] = ins!(ROL, AbsoluteX, 7);
    t[0x40] = ins!(RTI, Implied, 6);
    t[0x41] = ins!(EOR, IndirectX, 6);
    t[0x45] = ins!(EOR, ZeroPage, 3);
    t[0x46] = ins!(LSR, ZeroPage, 5);
    t[0x48] = ins!(PHA, Implied, 3);
    t[0x49] = ins!(EOR, Immediate, 2);
    t[0x4A] = ins!(LSR, Implied, 2);
    t[0x4C] = ins!(JMP, Absolute, 3);
    t[0x4D] = ins!(EOR, Absolute, 4);
    t[0x4E] = ins!(LSR, Absolute, 6);
    t[0x50] = ins!(BVC, Relative, 2);
    t[0x51] = ins!(EOR, IndirectY, 5);
    t[0x55] = ins!(EOR, ZeroPageX, 4);
    t[0x56] = ins!(LSR, ZeroPageX, 6);
    t[0x58] = ins!(CLI, Implied, 2);
    t[0x59] = ins!(EOR, AbsoluteY, 4);
    t[0x5D] = ins!(EOR, AbsoluteX, 4);
    t[0x5E] = ins!(LSR, AbsoluteX, 7);
    t[0x60] = ins!(RTS, Implied, 6);
    t[0x61] = ins!(ADC, IndirectX, 6);
    t[0x65] = ins!(ADC, ZeroPage, 3);
    t[0x66] = ins!(ROR, ZeroPage, 5);
    t[0x68] = ins!(PLA, Implied, 4);
    t[0x69] = ins!(ADC, Immediate, 2);
    t[0x6A] = ins!(ROR, Implied, 2);
    t[0x6C] = ins!(JMP, Indirect, 5);
    t[0x6D] = ins!(ADC, Absolute, 4);
    t[0x6E] = ins!(ROR, Absolute, 6);
    t[0x70] = ins!(BVS, Relative, 2);
    t[0x71] = ins!(ADC, IndirectY, 5);
    t[0x75] = ins!(ADC, ZeroPageX, 4);
    t[0x76] = ins!(ROR, ZeroPageX, 6);
    t[0x78] = ins!(SEI, Implied, 2);
    t[0x79] = ins!(ADC, AbsoluteY, 4);
    t[0x7D] = ins!(ADC, AbsoluteX, 4);
    t[0x7E] = ins!(ROR, AbsoluteX, 7);
    t[0x81] = ins!(STA, IndirectX, 6);
    t[0x84] = ins!(STY, ZeroPage, 3);
    t[0x85] = ins!(STA, ZeroPage, 3);
    t[0x86] = ins!(STX, ZeroPage, 3);
    t[0x88] = ins!(DEY, Implied, 2);
    t[0x8A] = ins!(TXA, Implied, 2);
    t[0x8C] = ins!(STY, Absolute, 4);
    t[0x8D] = ins!(STA, Absolute, 4);
    t[0x8E] = ins!(STX, Absolute, 4);
    t[0x90] = ins!(BCC, Relative, 2);
    t[0x91] = ins!(STA, IndirectY, 6);
    t[0x94] = ins!(STY, ZeroPageX, 4);
    t[0x95] = ins!(STA, ZeroPageX, 4);
    t[0x96] = ins!(STX, ZeroPageY, 4);
    t[0x98] = ins!(TYA, Implied, 2);
    t[0x99] = ins!(STA, AbsoluteY, 5);
    t[0x9A] = ins!(TXS, Implied, 2);
    t[0x9D] = ins!(STA, AbsoluteX, 5);
    t[0xA0] = ins!(LDY, Immediate, 2);
    t[0xA1] = ins!(LDA, IndirectX, 6);
    t[0xA2] = ins!(LDX, Immediate, 2);
    t[0xA4] = ins!(LDY, ZeroPage, 3);
    t[0xA5] = ins!(LDA, ZeroPage, 3);
    t[0xA6] = ins!(LDX, ZeroPage, 3);
    t[0xA8] = ins!(TAY, Implied, 2);
    t[0xA9] = ins!(LDA, Immediate, 2);
    t[0xAA] = ins!(TAX, Implied, 2);
    t[0xAC] = ins!(LDY, Absolute, 4);
    t[0xAD] = ins!(LDA, Absolute, 4);
    t[0xAE] = ins!(LDX, Absolute, 4);
    t[0xB0] = ins!(BCS, Relative, 2);
    t[0xB1] = ins!(LDA, IndirectY, 5);
    t[0xB4] = ins!(LDY, ZeroPageX, 4);
    t[0xB5] = ins!(LDA, ZeroPageX, 4);
    t[0xB6] = ins!(LDX, ZeroPageY, 4);
    t[0xB8] = ins!(CLV, Implied, 2);
    t[0xB9] = ins!(LDA, AbsoluteY, 4);
    t[0xBA] = ins!(TSX, Implied, 2);
    t[0xBC] = ins!(LDY, AbsoluteX, 4);
    t[0xBD] = ins!(LDA, AbsoluteX, 4);
    t[0xBE] = ins!(LDX, AbsoluteY, 4);
    t[0xC0] = ins!(CPY, Immediate, 2);
    t[0xC1] = ins!(CMP, IndirectX, 6);
    t[0xC4] = ins!(CPY, ZeroPage, 3);
    t[0xC5] = ins!(CMP, ZeroPage, 3);
    t[0xC6] = ins!(DEC, ZeroPage, 5);
    t[0xC8] = ins!(INY, Implied, 2);
    t[0xC9] = ins!(CMP, Immediate, 2);
    t[0xCA] = ins!(DEX, Implied, 2);
    t[0xCC] = ins!(CPY, Absolute, 4);
    t[0xCD] = ins!(CMP, Absolute, 4);
    t[0xCE] = ins!(DEC, Absolute, 6);
    t[0xD0] = ins!(BNE, Relative, 2);
    t[0xD1] = ins!(CMP, IndirectY, 5);
    t[0xD5] = ins!(CMP, ZeroPageX, 4);
    t[0xD6] = ins!(DEC, ZeroPageX, 6);
    t[0xD8] = ins!(CLD, Implied, 2);
    t[0xD9] = ins!(CMP, AbsoluteY, 4);
    t[0xDD] = ins!(CMP, AbsoluteX, 4);
    t[0xDE] = ins!(DEC, AbsoluteX, 7);
    t[0xE0] = ins!(CPX, Immediate, 2);
    t[0xE1] = ins!(SBC, IndirectX, 6);
    t[0xE4] = ins!(CPX, ZeroPage, 3);
    t[0xE5] = ins!(SBC, ZeroPage, 3);
    t[0xE6] = ins!(INC, ZeroPage, 5);
    t[0xE8] = ins!(INX, Implied, 2);
    t[0xE9] = ins!(SBC, Immediate, 2);
    t[0xEA] = ins!(NOP, Implied, 2);
    t[0xEC] = ins!(CPX, Absolute, 4);
    t[0xED] = ins!(SBC, Absolute, 4);
    t[0xEE] = ins!(INC, Absolute, 6);
    t[0xF0] = ins!(BEQ, Relative, 2);
    t[0xF1] = ins!(SBC, IndirectY, 5);
    t[0xF5] = ins!(SBC, ZeroPageX, 4);
    t[0xF6] = ins!(INC, ZeroPageX, 6);
    t[0xF8] = ins!(SED, Implied, 2);
    t[0xF9] = ins!(SBC, AbsoluteY, 4);
    t[0xFD] = ins!(SBC, AbsoluteX, 4);
    t[0xFE] = ins!(INC, AbsoluteX, 7);

    // Unofficial NOPs with operands
    t[0x1A] = ins!(NOP, Implied, 2, unofficial);
    t[0x3A] = ins!(NOP, Implied, 2, unofficial);
    t[0x5A] = ins!(NOP, Implied, 2, unofficial);
    t[0x7A] = ins!(NOP, Implied, 2, unofficial);
    t[0xDA] = ins!(NOP, Implied, 2, unofficial);
    t[0xFA] = ins!(NOP, Implied, 2, unofficial);
    t[0x80] = ins!(NOP, Immediate, 2, unofficial);
    t[0x82] = ins!(NOP, Immediate, 2, unofficial);
    t[0x89] = ins!(NOP, Immediate, 2, unofficial);
    t[0xC2] = ins!(NOP, Immediate, 2, unofficial);
    t[0xE2] = ins!(NOP, Immediate, 2, unofficial);
    t[0x04] = ins!(NOP, ZeroPage, 3, unofficial);
    t[0x44] = ins!(NOP, ZeroPage, 3, unofficial);
    t[0x64] = ins!(NOP, ZeroPage, 3, unofficial);
    t[0x14] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0x34] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0x54] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0x74] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0xD4] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0xF4] = ins!(NOP, ZeroPageX, 4, unofficial);
    t[0x0C] = ins!(NOP, Absolute, 4, unofficial);
    t[0x1C] = ins!(NOP, AbsoluteX, 4, unofficial);
    t[0x3C] = ins!(NOP, AbsoluteX, 4, unofficial);
    t[0x5C] = ins!(NOP, AbsoluteX, 4, unofficial);
    t[0x7C] = ins!(NOP, AbsoluteX, 4, unofficial);
    t[0xDC] = ins!(NOP, AbsoluteX, 4, unofficial);
    t[0xFC] = ins!(NOP, AbsoluteX, 4, unofficial);

    t[0xA3] = ins!(LAX, IndirectX, 6, unofficial);
    t[0xA7] = ins!(LAX, ZeroPage, 3, unofficial);
    t[0xAF] = ins!(LAX, Absolute, 4, unofficial);
    t[0xB3] = ins!(LAX, IndirectY, 5, unofficial);
    t[0xB7] = ins!(LAX, ZeroPageY, 4, unofficial);
    t[0xBF] = ins!(LAX, AbsoluteY, 4, unofficial);

    t[0x83] = ins!(SAX, IndirectX, 6, unofficial);
    t[0x87] = ins!(SAX, ZeroPage, 3, unofficial);
    t[0x8F] = ins!(SAX, Absolute, 4, unofficial);
    t[0x97] = ins!(SAX, ZeroPageY, 4, unofficial);

    t[0xEB] = ins!(SBC, Immediate, 2, unofficial);

    t[0xC3] = ins!(DCP, IndirectX, 8, unofficial);
    t[0xC7] = ins!(DCP, ZeroPage, 5, unofficial);
    t[0xCF] = ins!(DCP, Absolute, 6, unofficial);
    t[0xD3] = ins!(DCP, IndirectY, 8, unofficial);
    t[0xD7] = ins!(DCP, ZeroPageX, 6, unofficial);
    t[0xDB] = ins!(DCP, AbsoluteY, 7, unofficial);
    t[0xDF] = ins!(DCP, AbsoluteX, 7, unofficial);

    t[0xE3] = ins!(ISB, IndirectX, 8, unofficial);
    t[0xE7] = ins!(ISB, ZeroPage, 5, unofficial);
    t[0xEF] = ins!(ISB, Absolute, 6, unofficial);
    t[0xF3] = ins!(ISB, IndirectY, 8, unofficial);
    t[0xF7] = ins!(ISB, ZeroPageX, 6, unofficial);
    t[0xFB] = ins!(ISB, AbsoluteY, 7, unofficial);
    t[0xFF] = ins!(ISB, AbsoluteX, 7, unofficial);

    t[0x03] = ins!(SLO, IndirectX, 8, unofficial);
    t[0x07] = ins!(SLO, ZeroPage, 5, unofficial);
    t[0x0F] = ins!(SLO, Absolute, 6, unofficial);
    t[0x13] = ins!(SLO, IndirectY, 8, unofficial);
    t[0x17] = ins!(SLO, ZeroPageX, 6, unofficial);
    t[0x1B] = ins!(SLO, AbsoluteY, 7, unofficial);
    t[0x1F] = ins!(SLO, AbsoluteX, 7, unofficial);

    t[0x23] = ins!(RLA, IndirectX, 8, unofficial);
    t[0x27] = ins!(RLA, ZeroPage, 5, unofficial);
    t[0x2F] = ins!(RLA, Absolute, 6, unofficial);
    t[0x33] = ins!(RLA, IndirectY, 8, unofficial);
    t[0x37] = ins!(RLA, ZeroPageX, 6, unofficial);
    t[0x3B] = ins!(RLA, AbsoluteY, 7, unofficial);
    t[0x3F] = ins!(RLA, AbsoluteX, 7, unofficial);

    t[0x43] = ins!(SRE, IndirectX, 8, unofficial);
    t[0x47] = ins!(SRE, ZeroPage, 5, unofficial);
    t[0x4F] = ins!(SRE, Absolute, 6, unofficial);
    t[0x53] = ins!(SRE, IndirectY, 8, unofficial);
    t[0x57] = ins!(SRE, ZeroPageX, 6, unofficial);
    t[0x5B] = ins!(SRE, AbsoluteY, 7, unofficial);
    t[0x5F] = ins!(SRE, AbsoluteX, 7, unofficial);

    t[0x63] = ins!(RRA, IndirectX, 8, unofficial);
    t[0x67] = ins!(RRA, ZeroPage, 5, unofficial);
    t[0x6F] = ins!(RRA, Absolute, 6, unofficial);
    t[0x73] = ins!(RRA, IndirectY, 8, unofficial);
    t[0x77] = ins!(RRA, ZeroPageX, 6, unofficial);
    t[0x7B] = ins!(RRA, AbsoluteY, 7, unofficial);
    t[0x7F] = ins!(RRA, AbsoluteX, 7, unofficial);

    t
}
