//! Assembler and disassembler for TOY16 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → encoded words)
//! - A disassembler (words → readable text)
//! - A plain-text hex image format

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, Assembler, AssemblerError, Program};
pub use disasm::{disassemble, disassemble_instruction};
pub use image::{load_image, parse_image, save_image, save_image_at, ImageError, ImageFile};
