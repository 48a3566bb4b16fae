//! Instruction codec.
//!
//! Every instruction is one 16-bit word. Bit 15 is on the left:
//!
//! ```text
//! register form   [opcode:4][rd:3][rs1:3][rs2:3][---:3]
//! immediate form  [opcode:4][rd:3][rs1:3][imm:6]
//! branch form     [opcode:4][off 8..6:3][rs1:3][off 5..0:6]
//! ```
//!
//! The operand form of a word is a property of its opcode alone; there is no
//! mode bit. JMP/JZ/JNZ borrow the rd field for the top three bits of their
//! 9-bit offset, so rd always decodes as 0 on those opcodes.

use std::fmt;
use serde::{Serialize, Deserialize};

const OPCODE_SHIFT: u16 = 12;
const RD_SHIFT: u16 = 9;
const RS1_SHIFT: u16 = 6;
const RS2_SHIFT: u16 = 3;
const REG_MASK: u16 = 0x7;
const IMM6_MASK: u16 = 0x3F;

/// The sixteen operations of the ISA, numbered by their 4-bit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// No operation
    Nop = 0x0,
    /// rd := rs1 + rs2/imm
    Add = 0x1,
    /// rd := rs1 - rs2/imm
    Sub = 0x2,
    /// rd := rs1 & rs2/imm
    And = 0x3,
    /// rd := rs1 | rs2/imm
    Or = 0x4,
    /// rd := rs1 ^ rs2/imm
    Xor = 0x5,
    /// rd := !rs1
    Not = 0x6,
    /// rd := rs1 << imm
    Shl = 0x7,
    /// rd := rs1 >> imm (arithmetic)
    Shr = 0x8,
    /// rd := mem[rs1 + imm]
    Ld = 0x9,
    /// mem[rs1 + imm] := rd
    St = 0xA,
    /// rd := imm (sign-extended)
    Ldi = 0xB,
    /// Unconditional jump
    Jmp = 0xC,
    /// Jump if Z is set
    Jz = 0xD,
    /// Jump if Z is clear
    Jnz = 0xE,
    /// Halt execution
    Hlt = 0xF,
}

impl Opcode {
    /// All opcodes in encoding order.
    pub const ALL: [Opcode; 16] = [
        Opcode::Nop, Opcode::Add, Opcode::Sub, Opcode::And,
        Opcode::Or, Opcode::Xor, Opcode::Not, Opcode::Shl,
        Opcode::Shr, Opcode::Ld, Opcode::St, Opcode::Ldi,
        Opcode::Jmp, Opcode::Jz, Opcode::Jnz, Opcode::Hlt,
    ];

    /// Opcode for the low four bits of `bits`. Every 4-bit value is defined.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[(bits & 0x0F) as usize]
    }

    /// The 4-bit encoding.
    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Assembler mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Not => "NOT",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Ldi => "LDI",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Hlt => "HLT",
        }
    }

    /// Look up a mnemonic, ignoring case.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }

    /// JMP, JZ and JNZ.
    #[inline]
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jz | Opcode::Jnz)
    }

    /// ADD, SUB, AND, OR and XOR: the opcodes that take a register or an
    /// immediate third operand.
    #[inline]
    pub fn is_alu(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor)
    }

    /// The operand form the decoder assumes for this opcode.
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => OperandKind::Branch9,
            Opcode::Ldi | Opcode::Ld | Opcode::St | Opcode::Shl | Opcode::Shr => OperandKind::Generic6,
            _ => OperandKind::Register,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Decode-time operand form of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    /// rs2 in bits 5..3.
    Register,
    /// 6-bit signed immediate in bits 5..0.
    Generic6,
    /// 9-bit signed offset split across the rd field and bits 5..0.
    Branch9,
}

/// An immediate operand in one of its two encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Immediate {
    /// Range -32..=31.
    Generic6(i8),
    /// Range -256..=255, JMP/JZ/JNZ only.
    Branch9(i16),
}

impl Immediate {
    pub const GENERIC_MIN: i16 = -32;
    pub const GENERIC_MAX: i16 = 31;
    pub const BRANCH_MIN: i16 = -256;
    pub const BRANCH_MAX: i16 = 255;

    /// The signed value, whatever the encoding.
    #[inline]
    pub fn value(self) -> i16 {
        match self {
            Immediate::Generic6(v) => v as i16,
            Immediate::Branch9(v) => v,
        }
    }
}

/// Third operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Register index rs2.
    Register(u8),
    Immediate(Immediate),
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Destination register. Not encodable on branch opcodes.
    pub rd: u8,
    pub rs1: u8,
    pub operand: Operand,
}

impl Instruction {
    /// Register-form instruction.
    pub fn register(opcode: Opcode, rd: u8, rs1: u8, rs2: u8) -> Self {
        Self { opcode, rd, rs1, operand: Operand::Register(rs2) }
    }

    /// Instruction with a 6-bit immediate.
    pub fn immediate(opcode: Opcode, rd: u8, rs1: u8, imm: i8) -> Self {
        Self { opcode, rd, rs1, operand: Operand::Immediate(Immediate::Generic6(imm)) }
    }

    /// Branch relative to `rs1` (or to the next instruction when `rs1`
    /// holds zero at run time).
    pub fn branch(opcode: Opcode, rs1: u8, offset: i16) -> Self {
        Self { opcode, rd: 0, rs1, operand: Operand::Immediate(Immediate::Branch9(offset)) }
    }

    /// Operand-less instruction such as NOP or HLT.
    pub fn bare(opcode: Opcode) -> Self {
        Self::register(opcode, 0, 0, 0)
    }

    /// True when the third operand is an immediate.
    #[inline]
    pub fn is_immediate(&self) -> bool {
        matches!(self.operand, Operand::Immediate(_))
    }

    /// The immediate value, if any.
    #[inline]
    pub fn imm(&self) -> Option<i16> {
        match self.operand {
            Operand::Immediate(imm) => Some(imm.value()),
            Operand::Register(_) => None,
        }
    }

    /// The rs2 register, if any.
    #[inline]
    pub fn rs2(&self) -> Option<u8> {
        match self.operand {
            Operand::Register(r) => Some(r),
            Operand::Immediate(_) => None,
        }
    }
}

impl fmt::Display for Instruction {
    /// Formats in assembler syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode;
        let third = match self.operand {
            Operand::Register(r) => format!("R{}", r),
            Operand::Immediate(imm) => format!("#{}", imm.value()),
        };
        match op {
            Opcode::Nop | Opcode::Hlt => write!(f, "{}", op),
            Opcode::Not => write!(f, "{} R{}, R{}", op, self.rd, self.rs1),
            Opcode::Ldi => write!(f, "{} R{}, {}", op, self.rd, third),
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => write!(f, "{} R{}, {}", op, self.rs1, third),
            _ => write!(f, "{} R{}, R{}, {}", op, self.rd, self.rs1, third),
        }
    }
}

/// Sign-extend the low `bits` bits of `raw`.
#[inline]
fn sign_extend(raw: u16, bits: u16) -> i16 {
    let shift = 16 - bits;
    ((raw << shift) as i16) >> shift
}

/// Encode an instruction into its 16-bit word.
///
/// Fields are masked to their widths; nothing is range-checked here.
pub fn encode(instr: &Instruction) -> u16 {
    let mut word = (instr.opcode.bits() as u16 & 0x0F) << OPCODE_SHIFT;
    word |= (instr.rd as u16 & REG_MASK) << RD_SHIFT;
    word |= (instr.rs1 as u16 & REG_MASK) << RS1_SHIFT;

    match instr.operand {
        Operand::Register(rs2) => {
            word |= (rs2 as u16 & REG_MASK) << RS2_SHIFT;
        }
        Operand::Immediate(imm) if instr.opcode.is_branch() => {
            let raw = imm.value() as u16;
            // The high offset bits replace rd.
            word &= !(REG_MASK << RD_SHIFT);
            word |= ((raw >> 6) & REG_MASK) << RD_SHIFT;
            word |= raw & IMM6_MASK;
        }
        Operand::Immediate(imm) => {
            word |= imm.value() as u16 & IMM6_MASK;
        }
    }

    word
}

/// Decode a 16-bit word. Every word decodes.
pub fn decode(word: u16) -> Instruction {
    let opcode = Opcode::from_bits((word >> OPCODE_SHIFT) as u8);
    let rd = ((word >> RD_SHIFT) & REG_MASK) as u8;
    let rs1 = ((word >> RS1_SHIFT) & REG_MASK) as u8;

    match opcode.operand_kind() {
        OperandKind::Register => {
            let rs2 = ((word >> RS2_SHIFT) & REG_MASK) as u8;
            Instruction::register(opcode, rd, rs1, rs2)
        }
        OperandKind::Generic6 => {
            let imm = sign_extend(word & IMM6_MASK, 6);
            Instruction::immediate(opcode, rd, rs1, imm as i8)
        }
        OperandKind::Branch9 => {
            let raw = (((word >> RD_SHIFT) & REG_MASK) << 6) | (word & IMM6_MASK);
            Instruction::branch(opcode, rs1, sign_extend(raw, 9))
        }
    }
}
