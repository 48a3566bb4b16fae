//! WebAssembly bindings for the TOY16 emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::{Cpu, CpuConfig};
use crate::asm::assembler::Assembler;
use crate::asm::disasm::disassemble_instruction;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper. Output lines are kept for the page to
/// fetch with [`WasmCpu::output`].
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu<Vec<String>>,
    program: Vec<u16>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::with_console(CpuConfig::default(), Vec::new()),
            program: Vec::new(),
        }
    }

    /// Assemble `source` for address `start` and load it. Returns the word
    /// count.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str, start: u16) -> Result<usize, JsError> {
        let program = Assembler::with_origin(start)
            .assemble(source)
            .map_err(|e| JsError::new(&e.to_string()))?;

        let config = CpuConfig { program_start: start, ..CpuConfig::default() };
        self.cpu = Cpu::with_console(config, Vec::new());
        self.cpu.load_program(&program.words)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.program = program.words;

        Ok(self.program.len())
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        let instr = self.cpu.step()
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(instr.to_string())
    }

    /// Run until halt or max cycles. Returns the total cycle count.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        self.cpu.run_limited(max_cycles as u64);
        self.cpu.cycles
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.mem.console_mut().clear();
        if !self.program.is_empty() {
            let _ = self.cpu.load_program(&self.program);
        }
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    /// Get a general-purpose register.
    #[wasm_bindgen]
    pub fn register(&self, index: u8) -> i16 {
        self.cpu.register(index)
    }

    /// Get R0..R7.
    #[wasm_bindgen]
    pub fn registers(&self) -> Vec<i16> {
        self.cpu.regs.gpr.to_vec()
    }

    /// Get flags packed as Z=1, N=2, C=4, V=8.
    #[wasm_bindgen]
    pub fn flags(&self) -> u8 {
        self.cpu.flags().to_byte()
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get a range of memory as a byte array.
    #[wasm_bindgen]
    pub fn memory(&self, start: u16, len: usize) -> js_sys::Uint8Array {
        js_sys::Uint8Array::from(self.cpu.mem.read_range(start, len).as_slice())
    }

    /// Get the disassembly of the word at `addr`.
    #[wasm_bindgen]
    pub fn disassemble_at(&self, addr: u16) -> String {
        disassemble_instruction(self.cpu.mem.read_word(addr))
    }

    /// Get completed output lines joined with newlines.
    #[wasm_bindgen]
    pub fn output(&self) -> String {
        self.cpu.mem.console().join("\n")
    }

    /// Get registers, flags and state as JSON.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.snapshot())
            .map_err(|e| JsError::new(&e.to_string()))
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the word count.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let program = crate::assemble(source)
        .map_err(|e| JsError::new(&e.to_string()))?;
    Ok(program.len())
}

/// Disassemble a single instruction word.
#[wasm_bindgen]
pub fn wasm_disassemble(word: u16) -> String {
    disassemble_instruction(word)
}
