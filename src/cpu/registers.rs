//! Register file.
//!
//! - R0..R7: 16-bit signed general-purpose registers
//! - PC: 16-bit program counter, advancing by one 2-byte word per instruction
//! - SP: 16-bit stack pointer (no opcode reads or writes it)
//! - Flags: Z, N, C, V

use serde::{Serialize, Deserialize};
use super::alu::AluResult;

/// Number of general-purpose registers.
pub const NUM_REGISTERS: usize = 8;

/// Size of one instruction in bytes.
pub const INSTRUCTION_SIZE: u16 = 2;

/// Reset value of SP: the top of memory.
pub const SP_RESET: u16 = 0xFFFF;

/// Status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags {
    /// Z: last result was zero
    pub zero: bool,
    /// N: last result was negative
    pub negative: bool,
    /// C: last result left the signed 16-bit range, or last bit shifted out
    pub carry: bool,
    /// V: signed overflow
    pub overflow: bool,
}

impl Flags {
    pub const Z: u8 = 0x01;
    pub const N: u8 = 0x02;
    pub const C: u8 = 0x04;
    pub const V: u8 = 0x08;

    /// Pack into a byte (Z = bit 0, N = bit 1, C = bit 2, V = bit 3).
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.zero { byte |= Self::Z; }
        if self.negative { byte |= Self::N; }
        if self.carry { byte |= Self::C; }
        if self.overflow { byte |= Self::V; }
        byte
    }

    /// Unpack from a byte. Bits above 3 are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            zero: byte & Self::Z != 0,
            negative: byte & Self::N != 0,
            carry: byte & Self::C != 0,
            overflow: byte & Self::V != 0,
        }
    }

    /// Copy all four flags from an ALU result.
    pub fn set_all(&mut self, r: &AluResult) {
        self.zero = r.zero;
        self.negative = r.negative;
        self.carry = r.carry;
        self.overflow = r.overflow;
    }

    /// Copy Z, N and C, leaving V alone.
    pub fn set_znc(&mut self, r: &AluResult) {
        self.zero = r.zero;
        self.negative = r.negative;
        self.carry = r.carry;
    }

    /// Set Z and N from a value, leaving C and V alone.
    pub fn set_zn(&mut self, value: i16) {
        self.zero = value == 0;
        self.negative = value < 0;
    }
}

/// The register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0..R7
    pub gpr: [i16; NUM_REGISTERS],
    /// Program counter
    pub pc: u16,
    /// Stack pointer
    pub sp: u16,
    /// Status flags
    pub flags: Flags,
}

impl Registers {
    /// Create a register file with every register zeroed and SP at the top
    /// of memory.
    pub fn new() -> Self {
        Self {
            gpr: [0; NUM_REGISTERS],
            pc: 0,
            sp: SP_RESET,
            flags: Flags::default(),
        }
    }

    /// Reset everything, placing PC at `pc`.
    pub fn reset(&mut self, pc: u16) {
        *self = Self::new();
        self.pc = pc;
    }

    /// Read a general-purpose register. Only the low three bits of `index`
    /// are used.
    #[inline]
    pub fn get(&self, index: u8) -> i16 {
        self.gpr[(index & 0x7) as usize]
    }

    /// Write a general-purpose register. Only the low three bits of `index`
    /// are used.
    #[inline]
    pub fn set(&mut self, index: u8, value: i16) {
        self.gpr[(index & 0x7) as usize] = value;
    }

    /// Move PC to the next instruction. Returns the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(INSTRUCTION_SIZE);
        old
    }

    /// Set PC to an absolute address.
    #[inline]
    pub fn jump(&mut self, addr: u16) {
        self.pc = addr;
    }

    /// Base address for a branch through `rs1`.
    ///
    /// A zero in the register means "relative to the next instruction", so
    /// a register holding zero can never serve as an absolute base.
    pub fn branch_base(&self, rs1: u8) -> u16 {
        match self.get(rs1) {
            0 => self.pc.wrapping_add(INSTRUCTION_SIZE),
            base => base as u16,
        }
    }

    /// Effective address `rs1 + offset`, wrapping within 64 KiB.
    pub fn effective_address(&self, rs1: u8, offset: i16) -> u16 {
        (self.get(rs1) as u16).wrapping_add(offset as u16)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
