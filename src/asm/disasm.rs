//! Disassembler for TOY16 programs.
//!
//! Converts encoded words back to assembler syntax. Every word decodes, so
//! disassembly never fails.

use crate::cpu::decode::decode;
use crate::cpu::registers::INSTRUCTION_SIZE;

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(word: u16) -> String {
    decode(word).to_string()
}

/// Disassemble a slice of words loaded at `start`.
///
/// Each line shows the address, the instruction and the raw word.
pub fn disassemble(words: &[u16], start: u16) -> String {
    let mut output = String::new();
    output.push_str("; TOY16 Disassembly\n");
    output.push_str("; -----------------\n\n");

    let mut addr = start;
    for word in words {
        let line = disassemble_instruction(*word);
        output.push_str(&format!("{:04X}: {:<20} ; {:#06x}\n", addr, line, word));
        addr = addr.wrapping_add(INSTRUCTION_SIZE);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    #[test]
    fn test_disassemble_hlt() {
        assert_eq!(disassemble_instruction(0xF000), "HLT");
    }

    #[test]
    fn test_disassemble_register_form() {
        assert_eq!(disassemble_instruction(0x1408), "ADD R2, R0, R1");
        assert_eq!(disassemble_instruction(0xB005), "LDI R0, #5");
        assert_eq!(disassemble_instruction(0x92BF), "LD R1, R2, #-1");
    }

    #[test]
    fn test_disassembly_reassembles() {
        let source = "LDI R0, #5\nST R0, R1, #2\nSHR R3, R3, #1\nJNZ R0, #-4\nNOT R1, R2\nHLT";
        let program = assemble(source).unwrap();
        let text: Vec<String> = program.words.iter().map(|w| disassemble_instruction(*w)).collect();
        let again = assemble(&text.join("\n")).unwrap();
        assert_eq!(program.words, again.words);
    }

    #[test]
    fn test_listing_addresses() {
        let listing = disassemble(&[0xB005, 0xF000], 0x100);
        assert!(listing.contains("0100: LDI R0, #5"));
        assert!(listing.contains("0102: HLT"));
        assert!(listing.contains("0xf000"));
    }
}
