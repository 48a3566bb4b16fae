//! Two-pass assembler.
//!
//! Syntax:
//! ```text
//! ; Comment
//! START:              ; Define a label
//!     LDI R0, #5      ; rd, imm
//!     ADD R2, R0, R1  ; rd, rs1, rs2
//!     ADD R2, R2, #8  ; encodes imm, but runs as ADD R2, R2, R1
//!     LD  R3, R1, #0  ; rd, rs1, imm
//!     NOT R4, R3      ; rd, rs1
//! LOOP: JNZ R0, LOOP  ; label and instruction on one line
//!     HLT
//! ```
//!
//! Pass 1 assigns every instruction line an address (two bytes each) and
//! records labels. Pass 2 encodes. Operands are separated by whitespace
//! and/or commas; a leading `#` on an immediate or branch target is
//! optional, and is an error on a register. Numbers are
//! decimal or `0x`-prefixed hex. Mnemonics and register names are
//! case-insensitive, labels are not.
//!
//! ALU opcodes (ADD, SUB, AND, OR, XOR) always execute in register form. An
//! immediate third operand is stored in bits 5..0, and bits 5..3 of it then
//! select rs2 at run time.
//!
//! A label operand resolves to an offset from the instruction's own address,
//! except on JMP/JZ/JNZ where the offset is taken from the following
//! instruction.

use crate::cpu::decode::{encode, Immediate, Instruction, Opcode};
use crate::cpu::registers::INSTRUCTION_SIZE;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Assemble source code with labels starting at address 0.
pub fn assemble(source: &str) -> Result<Program, AssemblerError> {
    Assembler::new().assemble(source)
}

/// Output of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Address the first word is meant to be loaded at.
    pub origin: u16,
    /// Encoded instructions, in source order.
    pub words: Vec<u16>,
    /// Label name -> absolute address.
    pub labels: BTreeMap<String, u16>,
}

impl Program {
    /// Number of instruction words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True if the source had no instructions.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// An instruction line kept by pass 1.
#[derive(Debug, Clone)]
struct SourceLine {
    /// 1-based line number in the source.
    line: usize,
    /// Address assigned to the instruction.
    addr: u16,
    text: String,
}

/// The assembler state.
#[derive(Debug, Clone)]
pub struct Assembler {
    /// Address of the first instruction.
    origin: u16,
    /// Upper-case mnemonic -> opcode.
    opcodes: HashMap<&'static str, Opcode>,
    /// Symbol table (label -> address), rebuilt on every call.
    labels: BTreeMap<String, u16>,
    /// Instruction lines collected by pass 1.
    lines: Vec<SourceLine>,
}

impl Assembler {
    /// Create an assembler that places the first instruction at address 0.
    pub fn new() -> Self {
        Self::with_origin(0)
    }

    /// Create an assembler that places the first instruction at `origin`.
    pub fn with_origin(origin: u16) -> Self {
        Self {
            origin,
            opcodes: Opcode::ALL.iter().map(|op| (op.mnemonic(), *op)).collect(),
            labels: BTreeMap::new(),
            lines: Vec::new(),
        }
    }

    /// Labels collected by the most recent call to [`Assembler::assemble`].
    pub fn labels(&self) -> &BTreeMap<String, u16> {
        &self.labels
    }

    /// Translate `source` into encoded words.
    ///
    /// Fails on the first error without producing any output.
    pub fn assemble(&mut self, source: &str) -> Result<Program, AssemblerError> {
        self.labels.clear();
        self.lines.clear();

        self.collect_labels(source);
        debug!(
            instructions = self.lines.len(),
            labels = self.labels.len(),
            "pass 1 complete"
        );

        let words = self
            .lines
            .iter()
            .map(|src| self.encode_line(src).map(|instr| encode(&instr)))
            .collect::<Result<Vec<u16>, _>>()?;
        debug!(words = words.len(), origin = self.origin, "pass 2 complete");

        Ok(Program {
            origin: self.origin,
            words,
            labels: self.labels.clone(),
        })
    }

    /// Pass 1: record labels and assign addresses.
    fn collect_labels(&mut self, source: &str) {
        let mut addr = self.origin;

        for (index, raw) in source.lines().enumerate() {
            let line = match raw.find(';') {
                Some(idx) => &raw[..idx],
                None => raw,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            let text = match line.find(':') {
                Some(colon) => {
                    let label = line[..colon].trim();
                    if !label.is_empty() {
                        self.labels.insert(label.to_string(), addr);
                    }
                    line[colon + 1..].trim()
                }
                None => line,
            };

            if text.is_empty() {
                continue;
            }

            self.lines.push(SourceLine {
                line: index + 1,
                addr,
                text: text.to_string(),
            });
            addr = addr.wrapping_add(INSTRUCTION_SIZE);
        }
    }

    /// Pass 2: turn one instruction line into an instruction.
    fn encode_line(&self, src: &SourceLine) -> Result<Instruction, AssemblerError> {
        let line = src.line;
        let tokens = tokenize(&src.text);
        let Some((&mnemonic, ops)) = tokens.split_first() else {
            return Err(AssemblerError::UnknownMnemonic { line, mnemonic: src.text.clone() });
        };

        let opcode = *self
            .opcodes
            .get(mnemonic.to_ascii_uppercase().as_str())
            .ok_or_else(|| AssemblerError::UnknownMnemonic {
                line,
                mnemonic: mnemonic.to_string(),
            })?;

        let expect = |count: usize| {
            if ops.len() == count {
                Ok(())
            } else {
                Err(AssemblerError::OperandCount {
                    line,
                    mnemonic: opcode.mnemonic(),
                    expected: count,
                    found: ops.len(),
                })
            }
        };

        let instr = match opcode {
            Opcode::Nop | Opcode::Hlt => {
                expect(0)?;
                Instruction::bare(opcode)
            }

            Opcode::Not => {
                expect(2)?;
                let rd = parse_register(ops[0], line)?;
                let rs1 = parse_register(ops[1], line)?;
                Instruction::register(opcode, rd, rs1, 0)
            }

            Opcode::Ldi => {
                expect(2)?;
                let rd = parse_register(ops[0], line)?;
                let imm = self.generic_immediate(ops[1], src)?;
                Instruction::immediate(opcode, rd, 0, imm)
            }

            Opcode::Shl | Opcode::Shr | Opcode::Ld | Opcode::St => {
                expect(3)?;
                let rd = parse_register(ops[0], line)?;
                let rs1 = parse_register(ops[1], line)?;
                let imm = self.generic_immediate(ops[2], src)?;
                Instruction::immediate(opcode, rd, rs1, imm)
            }

            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => {
                expect(2)?;
                let rs1 = parse_register(ops[0], line)?;
                let next = src.addr.wrapping_add(INSTRUCTION_SIZE);
                let offset = self.resolve(ops[1], line, next)?;
                if !(Immediate::BRANCH_MIN as i32..=Immediate::BRANCH_MAX as i32).contains(&offset) {
                    return Err(AssemblerError::BranchOutOfRange { line, offset });
                }
                Instruction::branch(opcode, rs1, offset as i16)
            }

            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
                expect(3)?;
                let rd = parse_register(ops[0], line)?;
                let rs1 = parse_register(ops[1], line)?;
                if ops[2].starts_with(|c: char| c == 'R' || c == 'r') {
                    let rs2 = parse_register(ops[2], line)?;
                    Instruction::register(opcode, rd, rs1, rs2)
                } else {
                    let imm = self.generic_immediate(ops[2], src)?;
                    Instruction::immediate(opcode, rd, rs1, imm)
                }
            }
        };

        Ok(instr)
    }

    /// Resolve a 6-bit immediate. Labels become offsets from the
    /// instruction's own address.
    fn generic_immediate(&self, token: &str, src: &SourceLine) -> Result<i8, AssemblerError> {
        let value = self.resolve(token, src.line, src.addr)?;
        if !(Immediate::GENERIC_MIN as i32..=Immediate::GENERIC_MAX as i32).contains(&value) {
            return Err(AssemblerError::ValueOutOfRange {
                line: src.line,
                value,
                min: Immediate::GENERIC_MIN,
                max: Immediate::GENERIC_MAX,
            });
        }
        Ok(value as i8)
    }

    /// A label (as an offset from `base`) or a numeric literal, with an
    /// optional leading `#`.
    fn resolve(&self, token: &str, line: usize, base: u16) -> Result<i32, AssemblerError> {
        let token = token.strip_prefix('#').unwrap_or(token);
        if let Some(&target) = self.labels.get(token) {
            return Ok(target as i32 - base as i32);
        }
        if let Some(value) = parse_number(token) {
            return Ok(value);
        }
        if is_identifier(token) {
            Err(AssemblerError::UndefinedLabel { line, label: token.to_string() })
        } else {
            Err(AssemblerError::InvalidNumber { line, token: token.to_string() })
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an instruction line into mnemonic and operands. Never empty for a
/// non-blank line.
fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Parse `R0`..`R7`, either case.
fn parse_register(token: &str, line: usize) -> Result<u8, AssemblerError> {
    match token.as_bytes() {
        [b'R' | b'r', digit @ b'0'..=b'7'] => Ok(digit - b'0'),
        _ => Err(AssemblerError::InvalidRegister { line, token: token.to_string() }),
    }
}

/// Parse a decimal or `0x` hex literal with an optional sign.
fn parse_number(token: &str) -> Option<i32> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };

    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            i32::from_str_radix(hex, 16).ok()?
        }
        Some(_) => return None,
        None if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            digits.parse::<i32>().ok()?
        }
        None => return None,
    };

    Some(if negative { -magnitude } else { magnitude })
}

/// Could `token` name a label?
fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("invalid register on line {line}: {token} (expected R0-R7)")]
    InvalidRegister { line: usize, token: String },

    #[error("invalid number on line {line}: {token}")]
    InvalidNumber { line: usize, token: String },

    #[error("value out of range on line {line}: {value} (expected {min} to {max})")]
    ValueOutOfRange { line: usize, value: i32, min: i16, max: i16 },

    #[error("{mnemonic} on line {line} takes {expected} operand(s), found {found}")]
    OperandCount { line: usize, mnemonic: &'static str, expected: usize, found: usize },

    #[error("branch offset out of range on line {line}: {offset} (expected -256 to 255)")]
    BranchOutOfRange { line: usize, offset: i32 },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },
}

impl AssemblerError {
    /// 1-based source line the error was found on.
    pub fn line(&self) -> usize {
        match self {
            AssemblerError::UnknownMnemonic { line, .. }
            | AssemblerError::InvalidRegister { line, .. }
            | AssemblerError::InvalidNumber { line, .. }
            | AssemblerError::ValueOutOfRange { line, .. }
            | AssemblerError::OperandCount { line, .. }
            | AssemblerError::BranchOutOfRange { line, .. }
            | AssemblerError::UndefinedLabel { line, .. } => *line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{decode, Operand};

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Simple test program
            LDI R0, #5
            LDI R1, #3
            ADD R2, R0, R1
            HLT
        "#;

        let program = assemble(source).unwrap();
        assert_eq!(program.words, vec![0xB005, 0xB203, 0x1408, 0xF000]);
    }

    #[test]
    fn test_compact_operands() {
        let program = assemble("LDI R0,#5\nLDI R1,#3\nADD R2,R0,R1\nHLT").unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(program.words[2], 0x1408);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        START:
            JMP R0, END
            NOP
            NOP ; padding
        END:
            HLT
        "#;

        let program = assemble(source).unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(program.labels["START"], 0);
        assert_eq!(program.labels["END"], 6);

        // END - (JMP + 2)
        let jmp = decode(program.words[0]);
        assert_eq!(jmp.opcode, Opcode::Jmp);
        assert_eq!(jmp.imm(), Some(4));
    }

    #[test]
    fn test_backward_branch() {
        let program = assemble("TOP: NOP\nNOP\nJZ R1, TOP").unwrap();
        let jz = decode(program.words[2]);
        assert_eq!(jz.rs1, 1);
        // 0 - (4 + 2)
        assert_eq!(jz.imm(), Some(-6));
    }

    #[test]
    fn test_label_with_instruction_on_same_line() {
        let program = assemble("A: LDI R1, #1 ; set\nB:\n  C: HLT").unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.labels["A"], 0);
        assert_eq!(program.labels["B"], 2);
        assert_eq!(program.labels["C"], 2);
    }

    #[test]
    fn test_alu_label_offset_has_no_pc_correction() {
        let program = assemble("NOP\nADD R1, R0, DATA\nDATA: HLT").unwrap();
        let add = decode(program.words[1]);
        // The immediate is DATA - 2 = 2, which decodes as rs2 bits.
        assert_eq!(program.words[1] & 0x3F, 2);
        assert_eq!(add.operand, Operand::Register(0));
    }

    #[test]
    fn test_mnemonics_and_registers_ignore_case() {
        let upper = assemble("LDI R3, #-4\nSHL R3, R3, #2").unwrap();
        let lower = assemble("ldi r3, -4\nshl r3, r3, 2").unwrap();
        assert_eq!(upper.words, lower.words);
    }

    #[test]
    fn test_hex_and_negative_literals() {
        let program = assemble("LDI R0, 0x1F\nLDI R1, #-0x20\nJMP R0, 0XFF").unwrap();
        assert_eq!(decode(program.words[0]).imm(), Some(31));
        assert_eq!(decode(program.words[1]).imm(), Some(-32));
        assert_eq!(decode(program.words[2]).imm(), Some(255));
    }

    #[test]
    fn test_origin_offsets_labels() {
        let program = Assembler::with_origin(0x100)
            .assemble("JMP R0, END\nEND: HLT")
            .unwrap();
        assert_eq!(program.origin, 0x100);
        assert_eq!(program.labels["END"], 0x102);
        assert_eq!(decode(program.words[0]).imm(), Some(0));
    }

    #[test]
    fn test_branch_out_of_range_label() {
        // FAR lands at 2 + 150 * 2 = 302, so the offset is 302 - 2 = 300.
        let source = format!("JMP R0, FAR\n{}FAR: HLT\n", "NOP\n".repeat(150));
        let err = assemble(&source).unwrap_err();
        assert_eq!(err, AssemblerError::BranchOutOfRange { line: 1, offset: 300 });
    }

    #[test]
    fn test_branch_out_of_range_literal() {
        assert!(matches!(
            assemble("JNZ R1, 256"),
            Err(AssemblerError::BranchOutOfRange { offset: 256, .. })
        ));
        assert!(assemble("JNZ R1, -256").is_ok());
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("NOP\nMOV R1, R2").unwrap_err();
        assert_eq!(err, AssemblerError::UnknownMnemonic { line: 2, mnemonic: "MOV".into() });
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn test_invalid_register() {
        for bad in ["R8", "R", "X1", "R01", "r-1"] {
            let err = assemble(&format!("NOT R1, {}", bad)).unwrap_err();
            assert!(matches!(err, AssemblerError::InvalidRegister { .. }), "{}", bad);
        }
        // A third ALU operand starting with R is always a register.
        assert!(matches!(
            assemble("ADD R1, R2, RESULT\nRESULT: HLT"),
            Err(AssemblerError::InvalidRegister { .. })
        ));
    }

    #[test]
    fn test_hash_only_on_immediates() {
        for source in ["NOT #R1, R2", "JMP #R0, END\nEND: HLT", "LD R1, #R2, #0"] {
            assert!(
                matches!(assemble(source), Err(AssemblerError::InvalidRegister { .. })),
                "{}",
                source
            );
        }
        assert!(assemble("JMP R0, #END\nEND: HLT").is_ok());
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(assemble("LDI R1, 0xZZ"), Err(AssemblerError::InvalidNumber { .. })));
        assert!(matches!(assemble("LDI R1, 12abc"), Err(AssemblerError::InvalidNumber { .. })));
    }

    #[test]
    fn test_value_out_of_range() {
        let err = assemble("LDI R1, #32").unwrap_err();
        assert_eq!(
            err,
            AssemblerError::ValueOutOfRange { line: 1, value: 32, min: -32, max: 31 }
        );
    }

    #[test]
    fn test_operand_count() {
        let err = assemble("ADD R1, R2").unwrap_err();
        assert_eq!(
            err,
            AssemblerError::OperandCount { line: 1, mnemonic: "ADD", expected: 3, found: 2 }
        );
        assert!(matches!(assemble("HLT R0"), Err(AssemblerError::OperandCount { .. })));
    }

    #[test]
    fn test_undefined_label() {
        let err = assemble("JMP R0, NOWHERE").unwrap_err();
        assert_eq!(err, AssemblerError::UndefinedLabel { line: 1, label: "NOWHERE".into() });
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        assert!(matches!(
            assemble("Loop: JMP R0, loop"),
            Err(AssemblerError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn test_label_table_rebuilt_per_call() {
        let mut asm = Assembler::new();
        asm.assemble("FIRST: HLT").unwrap();
        assert!(asm.labels().contains_key("FIRST"));

        let err = asm.assemble("JMP R0, FIRST").unwrap_err();
        assert!(matches!(err, AssemblerError::UndefinedLabel { .. }));
        assert!(asm.labels().is_empty());
    }

    #[test]
    fn test_comment_and_blank_lines_take_no_space() {
        let program = assemble("\n; header\n\n   ; indented\nA: ; nothing here\nHLT").unwrap();
        assert_eq!(program.len(), 1);
        assert_eq!(program.labels["A"], 0);
    }
}
