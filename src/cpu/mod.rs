//! CPU emulation for the TOY16 machine.
//!
//! - 64 KiB byte-addressable memory, little-endian words, I/O page at `0xFF00`
//! - 8 signed 16-bit registers plus PC, SP and four flags (Z, N, C, V)
//! - 16 fixed-width 16-bit instructions

pub mod alu;
pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use alu::AluResult;
pub use memory::{Console, Memory, MemoryError, StdoutConsole};
pub use registers::{Flags, Registers};
pub use decode::{decode, encode, Immediate, Instruction, Opcode, Operand, OperandKind};
pub use execute::{Cpu, CpuConfig, CpuError, CpuState, Snapshot};
