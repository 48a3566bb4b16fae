//! Memory subsystem.
//!
//! 64 KiB of byte-addressable storage with little-endian word access.
//! The top page holds three memory-mapped ports:
//!
//! | Address  | Port                                               |
//! |----------|----------------------------------------------------|
//! | `0xFF00` | character output (line-buffered to the [`Console`]) |
//! | `0xFF01` | character input (always reads 0)                   |
//! | `0xFF02` | status byte (1 after reset)                        |
//!
//! Accesses never fault. A word access whose second byte would fall past
//! `0xFFFF` reads 0 and writes nothing.

use thiserror::Error;

/// Size of the address space in bytes.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Start of the memory-mapped I/O page.
pub const IO_BASE: u16 = 0xFF00;
/// Character output port.
pub const IO_STDOUT: u16 = 0xFF00;
/// Character input port.
pub const IO_STDIN: u16 = 0xFF01;
/// Status port.
pub const IO_STATUS: u16 = 0xFF02;

/// Receives completed lines written to the output port.
pub trait Console {
    fn write_line(&mut self, line: &str);
}

/// Prints each line to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// Captures lines in memory.
impl Console for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Main memory plus the output port's line buffer.
pub struct Memory<C: Console = StdoutConsole> {
    bytes: Vec<u8>,
    line_buffer: String,
    console: C,
}

impl Memory {
    /// Create a zeroed memory that prints to standard output.
    pub fn new() -> Self {
        Self::with_console(StdoutConsole)
    }
}

impl<C: Console> Memory<C> {
    /// Create a zeroed memory that hands output lines to `console`.
    pub fn with_console(console: C) -> Self {
        let mut mem = Self {
            bytes: vec![0; MEMORY_SIZE],
            line_buffer: String::new(),
            console,
        };
        mem.bytes[IO_STATUS as usize] = 0x01;
        mem
    }

    /// Read a byte.
    #[inline]
    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            IO_STDIN => 0,
            _ => self.bytes[addr as usize],
        }
    }

    /// Write a byte. Writes to the output port go to the line buffer.
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        if addr == IO_STDOUT {
            self.put_char(value);
            return;
        }
        self.bytes[addr as usize] = value;
    }

    /// Read a little-endian word. Returns 0 at `0xFFFF`.
    pub fn read_word(&self, addr: u16) -> u16 {
        if addr == u16::MAX {
            return 0;
        }
        u16::from_le_bytes([self.read_byte(addr), self.read_byte(addr + 1)])
    }

    /// Write a little-endian word. Ignored at `0xFFFF`.
    pub fn write_word(&mut self, addr: u16, value: u16) {
        if addr == u16::MAX {
            return;
        }
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr + 1, hi);
    }

    /// Copy `len` bytes starting at `start`, stopping at the end of memory.
    /// Port reads behave as in [`Memory::read_byte`].
    pub fn read_range(&self, start: u16, len: usize) -> Vec<u8> {
        let end = (start as usize).saturating_add(len).min(MEMORY_SIZE);
        (start as usize..end)
            .map(|addr| self.read_byte(addr as u16))
            .collect()
    }

    /// Store program words contiguously from `start`.
    pub fn load_program(&mut self, start: u16, program: &[u16]) -> Result<(), MemoryError> {
        let size = program.len() * 2;
        if start as usize + size > MEMORY_SIZE {
            return Err(MemoryError::ProgramTooLarge { start, size });
        }

        for (i, word) in program.iter().enumerate() {
            let addr = start as usize + i * 2;
            self.bytes[addr..addr + 2].copy_from_slice(&word.to_le_bytes());
        }
        tracing::debug!(start, words = program.len(), "program loaded");

        Ok(())
    }

    /// Hand any partial output line to the console.
    pub fn flush_output(&mut self) {
        if !self.line_buffer.is_empty() {
            self.console.write_line(&self.line_buffer);
            self.line_buffer.clear();
        }
    }

    /// Text written to the output port since the last newline.
    pub fn pending_output(&self) -> &str {
        &self.line_buffer
    }

    /// The console collaborator.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Mutable access to the console collaborator.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Zero all memory, discard buffered output and restore the status port.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
        self.bytes[IO_STATUS as usize] = 0x01;
        self.line_buffer.clear();
    }

    fn put_char(&mut self, value: u8) {
        match value {
            b'\n' => {
                self.console.write_line(&self.line_buffer);
                self.line_buffer.clear();
            }
            32..=126 => self.line_buffer.push(value as char),
            _ => {}
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Console> std::fmt::Debug for Memory<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.bytes.iter().filter(|b| **b != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_bytes", &non_zero)
            .field("total_bytes", &MEMORY_SIZE)
            .field("pending_output", &self.line_buffer)
            .finish()
    }
}

/// Errors raised while loading a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("program of {size} bytes at {start:#06x} runs past the end of memory")]
    ProgramTooLarge { start: u16, size: usize },
}
