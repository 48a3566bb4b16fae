//! TOY16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `toy16-emu run <program>` - Run an image or ASM file
//! - `toy16-emu debug <program>` - Interactive debugger
//! - `toy16-emu asm <source>` - Assemble to an image
//! - `toy16-emu disasm <image>` - Disassemble an image

use clap::{Parser, Subcommand};
use toy16::cpu::{Console, Cpu, CpuConfig, StdoutConsole};
use toy16::asm::image::save_image_at;
use toy16::{load_image, Assembler, ImageFile};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toy16-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator and assembler for the TOY16 16-bit teaching machine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// Load address (decimal or 0x hex)
        #[arg(short, long, value_parser = parse_addr)]
        start: Option<u16>,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Show trace output
        #[arg(short, long)]
        trace: bool,
        /// JSON file with emulator settings
        #[arg(short, long)]
        config: Option<String>,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the image or ASM file to debug
        program: String,
        /// Load address (decimal or 0x hex)
        #[arg(short, long, value_parser = parse_addr)]
        start: Option<u16>,
    },
    /// Assemble source to an image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
        /// Address the first instruction is placed at
        #[arg(short, long, value_parser = parse_addr, default_value = "0")]
        start: u16,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image file
        image: String,
        /// Address the image is loaded at
        #[arg(short, long, value_parser = parse_addr, default_value = "0")]
        start: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, start, max_cycles, trace, config, json }) => {
            let mut config = load_config(config.as_deref());
            if let Some(start) = start {
                config.program_start = start;
            }
            config.trace |= trace;
            init_logging(config.trace);
            run_program(&program, config, max_cycles, json);
        }
        Some(Commands::Debug { program, start }) => {
            init_logging(false);
            debug_program(&program, start.unwrap_or(0));
        }
        Some(Commands::Asm { source, output, start }) => {
            init_logging(false);
            assemble_file(&source, output, start);
        }
        Some(Commands::Disasm { image, start }) => {
            init_logging(false);
            disassemble_file(&image, start);
        }
        None => {
            println!("TOY16 Emulator v0.1.0");
            println!("A 16-bit teaching machine and assembler");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over the defaults.
fn init_logging(trace: bool) {
    let default = if trace { "warn,toy16::trace=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse a decimal or `0x`-prefixed address.
fn parse_addr(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}

fn load_config(path: Option<&str>) -> CpuConfig {
    let Some(path) = path else {
        return CpuConfig::default();
    };

    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read config: {}", e);
            std::process::exit(1);
        }
    };

    match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid config {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

/// Load a program: `.asm` files are assembled for `start`, anything else is
/// read as an image.
fn load_words(path: &str, start: u16) -> Vec<u16> {
    let words = if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match Assembler::with_origin(start).assemble(&source) {
            Ok(program) => program.words,
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => image.words,
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    };

    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    words
}

fn run_program(path: &str, config: CpuConfig, max_cycles: u64, json: bool) {
    let words = load_words(path, config.program_start);

    if json {
        // Capture program output so stdout stays valid JSON.
        let mut cpu = Cpu::with_console(config, Vec::new());
        execute(&mut cpu, &words, max_cycles);
        cpu.mem.flush_output();

        let report = serde_json::json!({
            "snapshot": cpu.snapshot(),
            "output": cpu.mem.console(),
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to serialize state: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        let mut cpu = Cpu::with_console(config, StdoutConsole);
        execute(&mut cpu, &words, max_cycles);
        cpu.mem.flush_output();
        print_state(&cpu);
    }
}

fn execute<C: Console>(cpu: &mut Cpu<C>, words: &[u16], max_cycles: u64) {
    if let Err(e) = cpu.load_program(words) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    cpu.run_limited(max_cycles);

    if cpu.is_running() {
        eprintln!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

fn print_state<C: Console>(cpu: &Cpu<C>) {
    let flags = cpu.flags();

    println!();
    println!("━━━ Result ━━━");
    println!("Cycles: {}", cpu.cycles);
    println!("State:  {:?}", cpu.state);
    println!("PC: {:#06x}   SP: {:#06x}", cpu.pc(), cpu.sp());
    for r in 0..8u8 {
        println!("R{}: {:>6} ({:#06x})", r, cpu.register(r), cpu.register(r) as u16);
    }
    println!(
        "Flags: Z={} N={} C={} V={}",
        flags.zero as u8, flags.negative as u8, flags.carry as u8, flags.overflow as u8
    );
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, start: u16) {
    let words = load_words(path, start);
    let config = CpuConfig { program_start: start, ..CpuConfig::default() };

    if let Err(e) = toy16::run_debugger(words, config) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _start: u16) {
    eprintln!("❌ This build has no debugger (enable the `tui` feature)");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>, start: u16) {
    let out_path = output.unwrap_or_else(|| match source_path.strip_suffix(".asm") {
        Some(stem) => format!("{}.hex", stem),
        None => format!("{}.hex", source_path),
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let program = match Assembler::with_origin(start).assemble(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} instructions", program.len());
    for (label, addr) in &program.labels {
        println!("  {:<16} {:#06x}", label, addr);
    }

    if let Err(e) = save_image_at(&out_path, &ImageFile::new(program.words), start) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str, start: u16) {
    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", toy16::disassemble(&image.words, start));
}
