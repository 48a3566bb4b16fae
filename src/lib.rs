//! # TOY16 Emulator
//!
//! An emulator and assembler for TOY16, a small 16-bit load/store machine
//! with eight signed registers, 64 KiB of byte-addressable memory and a
//! line-buffered character output port.
//!
//! ```
//! use toy16::{assemble, Cpu, CpuConfig};
//!
//! let program = assemble("LDI R0, #5\nLDI R1, #3\nADD R2, R0, R1\nHLT").unwrap();
//! let mut cpu = Cpu::new(CpuConfig::default());
//! cpu.load_program(&program.words).unwrap();
//! cpu.run();
//! assert_eq!(cpu.register(2), 8);
//! ```

pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Console, Cpu, CpuConfig, CpuError, CpuState, Flags, Instruction, Memory, Opcode, Registers, Snapshot};
pub use asm::{assemble, disassemble, Assembler, AssemblerError, ImageFile, Program, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
