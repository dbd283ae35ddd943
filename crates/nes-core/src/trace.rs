//! Execution-log replay
//!
//! Parses nestest-style trace lines and steps a CPU against them, stopping
//! at the first register or cycle disagreement:
//!
//! ```text
//! C000  4C F5 C5  JMP $C5F5                       A:00 X:00 Y:00 P:24 SP:FD PPU:  0, 21 CYC:7
//! ```

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, trace};

use crate::cartridge::PRG_BANK_SIZE;
use crate::cpu::{Bus, Cpu, StatusFlags};

/// Status bits compared during replay; B only exists on the stack
pub const STATUS_COMPARE_MASK: u8 = !StatusFlags::BREAK;

/// Where nestest's automated mode starts
pub const NESTEST_START: u16 = 0xC000;

/// One parsed trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub pc: u16,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    /// Marked with `*` in the log
    pub unofficial: bool,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub cycles: Option<u64>,
}

impl LogEntry {
    /// Parse a trace line; `None` when the line is not a CPU state record
    pub fn parse(line: &str) -> Option<Self> {
        let pc = u16::from_str_radix(line.get(0..4)?, 16).ok()?;
        let registers_at = line.find(" A:")? + 1;
        let disassembly = line.get(4..registers_at)?;
        let registers = line.get(registers_at..)?;

        let mut tokens = disassembly.split_whitespace().peekable();
        let mut bytes = Vec::with_capacity(3);
        while let Some(token) = tokens.peek() {
            if bytes.len() == 3 || token.len() != 2 {
                break;
            }
            bytes.push(u8::from_str_radix(token, 16).ok()?);
            tokens.next();
        }
        if bytes.is_empty() {
            return None;
        }

        let raw = tokens.next()?;
        let unofficial = raw.starts_with('*');
        let mnemonic = raw.trim_start_matches('*').to_string();

        let cycles = registers
            .find("CYC:")
            .and_then(|at| registers.get(at + 4..))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse().ok());

        Some(Self {
            pc,
            bytes,
            mnemonic,
            unofficial,
            a: register(registers, "A:")?,
            x: register(registers, " X:")?,
            y: register(registers, " Y:")?,
            p: register(registers, " P:")?,
            sp: register(registers, " SP:")?,
            cycles,
        })
    }
}

fn register(registers: &str, key: &str) -> Option<u8> {
    let start = registers.find(key)? + key.len();
    u8::from_str_radix(registers.get(start..start + 2)?, 16).ok()
}

/// CPU registers and cycle counter at an instruction boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub cycles: u64,
}

impl CpuSnapshot {
    pub fn capture(cpu: &Cpu) -> Self {
        let registers = cpu.registers();
        Self {
            pc: registers.pc,
            a: registers.a,
            x: registers.x,
            y: registers.y,
            p: registers.p,
            sp: registers.sp,
            cycles: cpu.total_cycles(),
        }
    }
}

impl fmt::Display for CpuSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC:{:04X} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
            self.pc, self.a, self.x, self.y, self.p, self.sp, self.cycles
        )
    }
}

/// First disagreement between the CPU and the log
#[derive(Debug, Clone)]
pub struct Mismatch {
    /// 1-based line number in the log
    pub line: usize,
    pub field: &'static str,
    pub expected: LogEntry,
    pub actual: CpuSnapshot,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let e = &self.expected;
        write!(
            f,
            "line {}: {} differs at {:04X} {}: expected A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X}, got {}",
            self.line, self.field, e.pc, e.mnemonic, e.a, e.x, e.y, e.p, e.sp, self.actual
        )
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Log lines that matched
    pub checked: usize,
    /// Non-empty lines that did not parse
    pub skipped: usize,
    pub mismatch: Option<Mismatch>,
    /// Distinct mnemonics executed
    pub mnemonics: BTreeSet<String>,
}

impl ReplayReport {
    pub fn passed(&self) -> bool {
        self.checked > 0 && self.mismatch.is_none()
    }
}

/// Put the CPU in the state nestest's log starts from
pub fn seed_registers(cpu: &mut Cpu, pc: u16) {
    let registers = cpu.registers_mut();
    registers.a = 0;
    registers.x = 0;
    registers.y = 0;
    registers.sp = 0xFD;
    registers.p = StatusFlags::INTERRUPT | StatusFlags::UNUSED;
    registers.pc = pc;
}

/// Step `cpu` through `log`, comparing state before every instruction.
/// Cycle counts are compared relative to the first line that carries one.
pub fn replay(cpu: &mut Cpu, bus: &mut impl Bus, log: &str) -> ReplayReport {
    let mut report = ReplayReport::default();

    // Finish any reset or stall still counting down
    while !cpu.complete() {
        cpu.clock(bus);
    }

    let mut cycle_base: Option<(u64, u64)> = None;
    for (index, line) in log.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(entry) = LogEntry::parse(line) else {
            trace!(line = index + 1, "skipping unparsable trace line");
            report.skipped += 1;
            continue;
        };

        let actual = CpuSnapshot::capture(cpu);
        if let Some(field) = first_difference(&entry, &actual, &mut cycle_base) {
            debug!(line = index + 1, field, "trace mismatch");
            report.mismatch = Some(Mismatch {
                line: index + 1,
                field,
                expected: entry,
                actual,
            });
            break;
        }

        report.checked += 1;
        report.mnemonics.insert(entry.mnemonic);
        cpu.step(bus);
    }

    report
}

fn first_difference(
    entry: &LogEntry,
    actual: &CpuSnapshot,
    cycle_base: &mut Option<(u64, u64)>,
) -> Option<&'static str> {
    if entry.pc != actual.pc {
        return Some("PC");
    }
    if entry.a != actual.a {
        return Some("A");
    }
    if entry.x != actual.x {
        return Some("X");
    }
    if entry.y != actual.y {
        return Some("Y");
    }
    if entry.p & STATUS_COMPARE_MASK != actual.p & STATUS_COMPARE_MASK {
        return Some("P");
    }
    if entry.sp != actual.sp {
        return Some("SP");
    }
    if let Some(expected) = entry.cycles {
        match *cycle_base {
            None => *cycle_base = Some((expected, actual.cycles)),
            Some((log_base, cpu_base)) => {
                if expected.wrapping_sub(log_base) != actual.cycles.wrapping_sub(cpu_base) {
                    return Some("CYC");
                }
            }
        }
    }
    None
}

/// Flat 64KB address space for running CPU tests without a PPU
#[derive(Debug, Clone)]
pub struct FlatMemory {
    memory: Vec<u8>,
}

impl FlatMemory {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x10000],
        }
    }

    /// Map PRG ROM at $8000; a single 16KB bank also appears at $C000
    pub fn load_prg(&mut self, prg: &[u8]) {
        let len = prg.len().min(2 * PRG_BANK_SIZE);
        self.memory[0x8000..0x8000 + len].copy_from_slice(&prg[..len]);
        if len <= PRG_BANK_SIZE {
            self.memory[0xC000..0xC000 + len].copy_from_slice(&prg[..len]);
        }
    }

    pub fn load(&mut self, address: u16, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            let target = address.wrapping_add(offset as u16);
            self.memory[target as usize] = *byte;
        }
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatMemory {
    fn read(&mut self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }
}
