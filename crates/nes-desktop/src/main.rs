//! NES Desktop - Desktop NES emulator with minifb rendering
//!
//! Keyboard layout for controller 1:
//! X = A, Z = B, Right Shift = Select, Enter = Start, arrow keys = D-pad.
//! Escape quits.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use minifb::{Key, Window, WindowOptions};
use nes_core::controller::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP,
};
use nes_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use nes_core::system::NesSystem;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Host keys and the pad buttons they drive
const KEY_MAP: [(Key, u8); 8] = [
    (Key::X, BUTTON_A),
    (Key::Z, BUTTON_B),
    (Key::RightShift, BUTTON_SELECT),
    (Key::Enter, BUTTON_START),
    (Key::Up, BUTTON_UP),
    (Key::Down, BUTTON_DOWN),
    (Key::Left, BUTTON_LEFT),
    (Key::Right, BUTTON_RIGHT),
];

/// NES Emulator Desktop App
#[derive(Parser, Debug)]
#[command(name = "nes-desktop")]
#[command(about = "A NES emulator desktop app", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Screen scale factor (1-4)
    #[arg(short, long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=4))]
    scale: u8,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
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

    let mut system = NesSystem::new();
    system.load_rom(&rom_data).context("failed to load ROM")?;
    system.reset()?;

    let scale = args.scale as usize;
    let window_width = SCREEN_WIDTH * scale;
    let window_height = SCREEN_HEIGHT * scale;

    let mut window = Window::new(
        "NES Emulator",
        window_width,
        window_height,
        WindowOptions {
            resize: false,
            ..WindowOptions::default()
        },
    )
    .context("failed to create window")?;
    window.set_target_fps(60);

    let mut scaled = vec![0u32; window_width * window_height];

    info!(rom = %args.rom.display(), scale, "starting emulation");
    println!("Press ESC or close the window to exit.");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        system.set_controller(1, read_pad(&window));
        system.run_frame()?;

        upscale(system.frame_buffer(), &mut scaled, scale);
        window
            .update_with_buffer(&scaled, window_width, window_height)
            .context("failed to present frame")?;
    }

    info!(frames = system.frame_count(), "emulator closed");
    Ok(())
}

fn read_pad(window: &Window) -> u8 {
    KEY_MAP
        .iter()
        .filter(|(key, _)| window.is_key_down(*key))
        .fold(0, |mask, (_, button)| mask | button)
}

/// Nearest-neighbour scale of a 256x240 frame
fn upscale(frame: &[u32], out: &mut [u32], scale: usize) {
    let out_width = SCREEN_WIDTH * scale;
    for (y, row) in frame.chunks_exact(SCREEN_WIDTH).enumerate() {
        for dy in 0..scale {
            let start = (y * scale + dy) * out_width;
            let line = &mut out[start..start + out_width];
            for (x, &pixel) in row.iter().enumerate() {
                line[x * scale..(x + 1) * scale].fill(pixel);
            }
        }
    }
}
