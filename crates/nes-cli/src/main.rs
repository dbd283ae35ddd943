//! NES CLI - Command line interface for NES emulator
//!
//! Runs a ROM headless for a number of frames, or replays a nestest-style
//! trace log against its PRG ROM.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use nes_core::cartridge::Cartridge;
use nes_core::cpu::Cpu;
use nes_core::system::NesSystem;
use nes_core::trace::{replay, seed_registers, FlatMemory};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// NES Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "nes-cli")]
#[command(about = "A NES emulator CLI", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,

    /// Replay this trace log against the ROM instead of running frames
    #[arg(short = 't', long)]
    trace_log: Option<PathBuf>,

    /// Program counter the trace replay starts from (hex)
    #[arg(long, default_value = "C000", value_parser = parse_hex_u16)]
    start_pc: u16,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value.trim_start_matches("0x").trim_start_matches('$');
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid address {value}: {e}"))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let rom_data = fs::read(&args.rom)
        .with_context(|| format!("failed to read ROM file {}", args.rom.display()))?;

    match &args.trace_log {
        Some(log_path) => run_trace(&args, &rom_data, log_path),
        None => run_frames(&args, &rom_data),
    }
}

fn run_frames(args: &Args, rom_data: &[u8]) -> Result<()> {
    let mut system = NesSystem::new();
    system.load_rom(rom_data).context("failed to load ROM")?;
    system.reset()?;

    if let Some(cartridge) = system.cartridge() {
        println!("Loaded cartridge:");
        println!("  PRG ROM: {} bytes", cartridge.prg_rom().len());
        let chr_kind = if cartridge.has_chr_ram() { "RAM" } else { "ROM" };
        println!("  CHR {}: {} bytes", chr_kind, cartridge.chr().len());
        println!("  Mapper:  {}", cartridge.mapper_id());
        println!("  Mirroring: {:?}", cartridge.mirroring());
    }

    info!(frames = args.frames, "running");
    system.run_frames(args.frames)?;
    println!("Completed {} frames.", system.frame_count());

    if args.dump_cpu {
        dump_cpu_state(&system);
    }

    if args.dump_ppu {
        dump_ppu_state(&system);
    }
    Ok(())
}

fn run_trace(args: &Args, rom_data: &[u8], log_path: &Path) -> Result<()> {
    let log = fs::read_to_string(log_path)
        .with_context(|| format!("failed to read trace log {}", log_path.display()))?;
    let cartridge = Cartridge::from_rom(rom_data).context("failed to parse ROM")?;

    let mut memory = FlatMemory::new();
    memory.load_prg(cartridge.prg_rom());
    let mut cpu = Cpu::new();
    seed_registers(&mut cpu, args.start_pc);

    let report = replay(&mut cpu, &mut memory, &log);
    println!("Matched {} lines ({} skipped)", report.checked, report.skipped);
    println!(
        "Mnemonics covered ({}): {}",
        report.mnemonics.len(),
        report.mnemonics.iter().cloned().collect::<Vec<_>>().join(" ")
    );

    if let Some(mismatch) = report.mismatch {
        bail!("trace diverged: {mismatch}");
    }
    Ok(())
}

fn dump_cpu_state(system: &NesSystem) {
    let cpu = system.cpu();
    let regs = cpu.registers();
    let status = cpu.status();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({})", status.bits(), status);
    println!("  Cycles: {}", cpu.total_cycles());
}

fn dump_ppu_state(system: &NesSystem) {
    let ppu = system.ppu();

    println!("\nPPU State:");
    println!("  Scanline: {}", ppu.scanline());
    println!("  Cycle:    {}", ppu.cycle());
    println!("  CTRL:     ${:02X}", ppu.control().bits());
    println!("  MASK:     ${:02X}", ppu.mask().bits());
    println!("  STATUS:   ${:02X}", ppu.status().bits());
    println!("  VRAM:     ${:04X}", ppu.vram_addr().0);
    println!("  VBLANK:   {}", ppu.status().vblank());
    println!("  Frames:   {}", ppu.frame_count());
}
