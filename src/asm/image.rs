//! Text image format for assembled programs.
//!
//! - One word per line, written as `0xHHHH` (bare hex is also accepted)
//! - Anything after `;` is a comment
//! - Blank lines are ignored
//!
//! Saved images carry the disassembly of each word as a trailing comment.

use crate::asm::disasm::disassemble_instruction;
use crate::cpu::registers::INSTRUCTION_SIZE;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

/// A loaded program image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFile {
    /// The program words.
    pub words: Vec<u16>,
}

impl ImageFile {
    /// Wrap a list of words.
    pub fn new(words: Vec<u16>) -> Self {
        Self { words }
    }

    /// Get the number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Render in image format, annotating words as if loaded at `start`.
    pub fn to_text(&self, start: u16) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; TOY16 image");
        let _ = writeln!(out, "; {} words", self.len());
        out.push('\n');

        let mut addr = start;
        for word in &self.words {
            let _ = writeln!(out, "{:#06x} ; {:04X}: {}", word, addr, disassemble_instruction(*word));
            addr = addr.wrapping_add(INSTRUCTION_SIZE);
        }
        out
    }
}

/// Parse image text.
pub fn parse_image(text: &str) -> Result<ImageFile, ImageError> {
    let mut image = ImageFile::default();

    for (line_num, line) in text.lines().enumerate() {
        let trimmed = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        }
        .trim();

        if trimmed.is_empty() {
            continue;
        }

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let word = u16::from_str_radix(digits, 16).map_err(|e| ImageError::Parse {
            line: line_num + 1,
            message: format!("invalid word {:?}: {}", trimmed, e),
        })?;

        image.words.push(word);
    }

    Ok(image)
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageFile, ImageError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let image = parse_image(&text)?;
    tracing::debug!(path = %path.as_ref().display(), words = image.len(), "image loaded");
    Ok(image)
}

/// Save an image file to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ImageFile) -> Result<(), ImageError> {
    save_image_at(path, image, 0)
}

/// Save an image file whose annotations assume it is loaded at `start`.
pub fn save_image_at<P: AsRef<Path>>(path: P, image: &ImageFile, start: u16) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), image.to_text(start))?;
    Ok(())
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image() {
        let text = "; header\n\n0xB005\nb203 ; bare hex\n  0X1408  \n0xf000 ; HLT\n";
        let image = parse_image(text).unwrap();
        assert_eq!(image.words, vec![0xB005, 0xB203, 0x1408, 0xF000]);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_image("0x0000\n0xZZZZ\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));

        let err = parse_image("0x10000").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_text_is_reparsed() {
        let image = ImageFile::new(vec![0xB005, 0x1408, 0xF000]);
        let text = image.to_text(0);
        assert!(text.contains("0xb005 ; 0000: LDI R0, #5"));
        assert_eq!(parse_image(&text).unwrap(), image);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("toy16-image-{}.hex", std::process::id()));
        let image = ImageFile::new(vec![0x0000, 0xF000]);

        save_image(&path, &image).unwrap();
        let loaded = load_image(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, image);
    }

    #[test]
    fn test_missing_file() {
        let err = load_image("/nonexistent/toy16/image.hex").unwrap_err();
        assert!(matches!(err, ImageError::Io(_)));
    }
}
