//! Control unit.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::cpu::alu;
use crate::cpu::decode::{self, Instruction, Opcode, Operand};
use crate::cpu::memory::{Console, Memory, MemoryError, StdoutConsole};
use crate::cpu::registers::{Flags, Registers, NUM_REGISTERS};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

/// Target of the per-stage execution trace events.
pub const TRACE_TARGET: &str = "toy16::trace";

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has executed HLT.
    Halted,
}

/// Emulation session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Address the program is loaded at and PC is reset to.
    pub program_start: u16,
    /// Emit a trace event for every stage of every cycle.
    pub trace: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            program_start: 0x0000,
            trace: false,
        }
    }
}

/// Read-only view of the CPU for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub pc: u16,
    pub sp: u16,
    pub registers: [i16; NUM_REGISTERS],
    pub flags: Flags,
    pub cycles: u64,
    pub state: CpuState,
}

/// The CPU: registers, memory and the control unit's own state.
pub struct Cpu<C: Console = StdoutConsole> {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory<C>,
    /// Current execution state.
    pub state: CpuState,
    /// Cycles executed since the last reset.
    pub cycles: u64,
    config: CpuConfig,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU whose output port prints to standard output.
    pub fn new(config: CpuConfig) -> Self {
        Self::with_console(config, StdoutConsole)
    }
}

impl<C: Console> Cpu<C> {
    /// Create a CPU whose output port feeds `console`.
    pub fn with_console(config: CpuConfig, console: C) -> Self {
        let mut regs = Registers::new();
        regs.pc = config.program_start;
        Self {
            regs,
            mem: Memory::with_console(console),
            state: CpuState::Running,
            cycles: 0,
            config,
            last_instr: None,
        }
    }

    /// Zero registers, flags and memory, and put PC back at the program
    /// start.
    pub fn reset(&mut self) {
        self.regs.reset(self.config.program_start);
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load a program at the configured start address and point PC at it.
    pub fn load_program(&mut self, program: &[u16]) -> Result<(), CpuError> {
        self.load_program_at(self.config.program_start, program)
    }

    /// Load a program at `start`, making `start` the new program start.
    pub fn load_program_at(&mut self, start: u16, program: &[u16]) -> Result<(), CpuError> {
        self.mem.load_program(start, program)?;
        self.config.program_start = start;
        self.regs.pc = start;
        Ok(())
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        self.cycles += 1;
        let trace = self.config.trace;
        let pc = self.regs.pc;

        // Fetch
        let word = self.mem.read_word(pc);
        if trace {
            info!(target: TRACE_TARGET, cycle = self.cycles, "[FETCH] pc={:#06x} word={:#06x}", pc, word);
        }

        // Decode
        let instr = decode::decode(word);
        if trace {
            info!(target: TRACE_TARGET, "[DECODE] {}", instr);
        }

        // Execute
        let redirected = self.execute(&instr);

        if self.state == CpuState::Running {
            if !redirected {
                self.regs.advance_pc();
            }
            if trace {
                info!(target: TRACE_TARGET, "[STORE] pc={:#06x}", self.regs.pc);
            }
        }

        self.last_instr = Some(instr);
        Ok(instr)
    }

    /// Run until HLT.
    ///
    /// Returns the number of instructions executed. A program that never
    /// halts never returns; use [`Cpu::run_limited`] for untrusted input.
    pub fn run(&mut self) -> u64 {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.cycle();
        }

        self.cycles - start_cycles
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> u64 {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.cycle();
        }

        self.cycles - start_cycles
    }

    /// One cycle of a driving loop that has already checked the state.
    fn cycle(&mut self) {
        if let Err(e) = self.step() {
            tracing::warn!("step refused: {}", e);
        }
    }

    /// Execute a decoded instruction. Returns true if PC was redirected.
    fn execute(&mut self, instr: &Instruction) -> bool {
        let trace = self.config.trace;
        let Instruction { opcode, rd, rs1, operand } = *instr;

        match opcode {
            Opcode::Nop => {}

            Opcode::Add | Opcode::Sub | Opcode::And | Opcode::Or | Opcode::Xor => {
                let a = self.regs.get(rs1);
                let b = match operand {
                    Operand::Register(rs2) => self.regs.get(rs2),
                    Operand::Immediate(imm) => imm.value(),
                };
                let result = match opcode {
                    Opcode::Add => alu::add(a, b),
                    Opcode::Sub => alu::subtract(a, b),
                    Opcode::And => alu::and_op(a, b),
                    Opcode::Or => alu::or_op(a, b),
                    _ => alu::xor_op(a, b),
                };
                self.regs.set(rd, result.output);
                self.regs.flags.set_all(&result);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] R{} = {} {} {} = {}", rd, a, opcode, b, result.output);
                }
            }

            Opcode::Not => {
                let value = !self.regs.get(rs1);
                self.regs.set(rd, value);
                self.regs.flags.set_zn(value);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] R{} = !R{} = {}", rd, rs1, value);
                }
            }

            Opcode::Shl | Opcode::Shr => {
                let value = self.regs.get(rs1);
                let shift = instr.imm().unwrap_or(0);
                let result = if opcode == Opcode::Shl {
                    alu::shift_left(value, shift)
                } else {
                    alu::shift_right(value, shift)
                };
                self.regs.set(rd, result.output);
                self.regs.flags.set_znc(&result);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] R{} = R{} {} {} = {}", rd, rs1, opcode, shift, result.output);
                }
            }

            Opcode::Ldi => {
                let value = instr.imm().unwrap_or(0);
                self.regs.set(rd, value);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] R{} = {}", rd, value);
                }
            }

            Opcode::Ld => {
                let addr = self.regs.effective_address(rs1, instr.imm().unwrap_or(0));
                let value = self.mem.read_word(addr) as i16;
                self.regs.set(rd, value);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] R{} = mem[{:#06x}] = {}", rd, addr, value);
                }
            }

            Opcode::St => {
                let addr = self.regs.effective_address(rs1, instr.imm().unwrap_or(0));
                let value = self.regs.get(rd);
                self.mem.write_word(addr, value as u16);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] mem[{:#06x}] = R{} = {}", addr, rd, value);
                }
            }

            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => {
                let taken = match opcode {
                    Opcode::Jz => self.regs.flags.zero,
                    Opcode::Jnz => !self.regs.flags.zero,
                    _ => true,
                };
                if !taken {
                    if trace {
                        info!(target: TRACE_TARGET, "[EXECUTE] {} not taken (Z={})", opcode, self.regs.flags.zero as u8);
                    }
                    return false;
                }

                let base = self.regs.branch_base(rs1);
                let target = base.wrapping_add(instr.imm().unwrap_or(0) as u16);
                self.regs.jump(target);
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] {} to {:#06x}", opcode, target);
                }
                return true;
            }

            Opcode::Hlt => {
                self.state = CpuState::Halted;
                self.mem.flush_output();
                if trace {
                    info!(target: TRACE_TARGET, "[EXECUTE] HALT");
                }
            }
        }

        false
    }

    /// Read a general-purpose register.
    #[inline]
    pub fn register(&self, index: u8) -> i16 {
        self.regs.get(index)
    }

    /// Current flags.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.regs.flags
    }

    /// Current program counter.
    #[inline]
    pub fn pc(&self) -> u16 {
        self.regs.pc
    }

    /// Current stack pointer.
    #[inline]
    pub fn sp(&self) -> u16 {
        self.regs.sp
    }

    /// Session settings.
    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Turn the execution trace on or off.
    pub fn set_trace(&mut self, enable: bool) {
        self.config.trace = enable;
    }

    /// Copy of the architectural state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.regs.pc,
            sp: self.regs.sp,
            registers: self.regs.gpr,
            flags: self.regs.flags,
            cycles: self.cycles,
            state: self.state,
        }
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(CpuConfig::default())
    }
}

impl<C: Console> std::fmt::Debug for Cpu<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur while driving the CPU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::cpu::decode::encode;
    use crate::cpu::memory::IO_STDOUT;

    type TestCpu = Cpu<Vec<String>>;

    fn cpu() -> TestCpu {
        Cpu::with_console(CpuConfig::default(), Vec::new())
    }

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(encode).collect()
    }

    fn run_source(source: &str) -> TestCpu {
        let program = assemble(source).unwrap();
        let mut cpu = cpu();
        cpu.load_program(&program.words).unwrap();
        cpu.run();
        cpu
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = cpu();
        cpu.load_program(&make_program(&[Instruction::bare(Opcode::Hlt)])).unwrap();

        assert_eq!(cpu.run(), 1);
        assert!(cpu.is_halted());
        // HLT leaves PC on itself.
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_cpu_nop_then_halt() {
        let mut cpu = cpu();
        let program = make_program(&[
            Instruction::bare(Opcode::Nop),
            Instruction::bare(Opcode::Nop),
            Instruction::bare(Opcode::Hlt),
        ]);
        cpu.load_program(&program).unwrap();

        assert_eq!(cpu.run(), 3);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_add_program() {
        let cpu = run_source(
            "LDI R0, #5\n\
             LDI R1, #3\n\
             ADD R2, R0, R1\n\
             HLT\n",
        );
        assert_eq!(cpu.register(2), 8);
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 4);
    }

    #[test]
    fn test_store_then_load() {
        let program = assemble("LDI R0, #7\nST R0, R1, #0\nLD R2, R1, #0\nHLT").unwrap();
        let mut cpu = cpu();
        cpu.load_program_at(0x100, &program.words).unwrap();
        cpu.regs.set(1, 0);
        cpu.run();
        assert_eq!(cpu.register(2), 7);
        assert_eq!(cpu.mem.read_word(0), 7);
    }

    #[test]
    fn test_flags_from_subtract() {
        let cpu = run_source("LDI R0, #3\nLDI R1, #3\nSUB R2, R0, R1\nHLT");
        assert!(cpu.flags().zero);
        assert!(!cpu.flags().negative);

        let cpu = run_source("LDI R0, #2\nLDI R1, #3\nSUB R2, R0, R1\nHLT");
        assert_eq!(cpu.register(2), -1);
        assert!(cpu.flags().negative);
    }

    #[test]
    fn test_not_keeps_carry_and_overflow() {
        let mut cpu = cpu();
        cpu.regs.flags.carry = true;
        cpu.regs.flags.overflow = true;
        cpu.regs.set(1, -1);
        cpu.load_program(&make_program(&[
            Instruction::register(Opcode::Not, 0, 1, 0),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.run();

        assert_eq!(cpu.register(0), 0);
        assert_eq!(cpu.flags(), Flags { zero: true, negative: false, carry: true, overflow: true });
    }

    #[test]
    fn test_shift_keeps_overflow() {
        let mut cpu = cpu();
        cpu.regs.flags.overflow = true;
        cpu.regs.set(1, 0x4001);
        cpu.load_program(&make_program(&[
            Instruction::immediate(Opcode::Shl, 2, 1, 1),
            Instruction::immediate(Opcode::Shr, 3, 2, 1),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.run();

        assert_eq!(cpu.register(2), 0x8002u16 as i16);
        assert_eq!(cpu.register(3), 0xC001u16 as i16);
        let flags = cpu.flags();
        assert!(flags.negative);
        assert!(!flags.carry);
        assert!(flags.overflow);
    }

    #[test]
    fn test_ldi_leaves_flags() {
        let mut cpu = cpu();
        cpu.regs.flags = Flags::from_byte(0x0F);
        cpu.load_program(&make_program(&[
            Instruction::immediate(Opcode::Ldi, 4, 0, -32),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.run();
        assert_eq!(cpu.register(4), -32);
        assert_eq!(cpu.flags().to_byte(), 0x0F);
    }

    #[test]
    fn test_alu_immediate_runs_as_register_read() {
        // #-1 is 0b111111 in bits 5..0, so bits 5..3 select R7.
        let cpu = run_source("LDI R2, #5\nLDI R7, #20\nADD R2, R2, #-1\nHLT");
        assert_eq!(cpu.register(2), 25);

        // #8 selects R1.
        let cpu = run_source("LDI R1, #3\nLDI R2, #10\nSUB R2, R2, #8\nHLT");
        assert_eq!(cpu.register(2), 7);
    }

        #[test]
    fn test_forward_jump() {
        let cpu = run_source(
            "    JMP R0, END\n\
                 LDI R1, #1\n\
                 LDI R1, #2\n\
             END:\n\
                 HLT\n",
        );
        assert!(cpu.is_halted());
        assert_eq!(cpu.register(1), 0);
        assert_eq!(cpu.cycles, 2);
        assert_eq!(cpu.pc(), 6);
    }

    #[test]
    fn test_countdown_loop() {
        // JNZ back to LOOP until R0 reaches zero.
        let cpu = run_source(
            "        LDI R0, #5\n\
                     LDI R1, #0\n\
                     LDI R2, #1\n\
             LOOP:   ADD R1, R1, R2\n\
                     SUB R0, R0, R2\n\
                     JNZ R3, LOOP\n\
                     HLT\n",
        );
        assert_eq!(cpu.register(0), 0);
        assert_eq!(cpu.register(1), 5);
        assert!(cpu.flags().zero);
        // 3 setup + 5 * 3 loop body + HLT
        assert_eq!(cpu.cycles, 19);
    }

    #[test]
    fn test_conditional_jump_not_taken() {
        let mut cpu = cpu();
        cpu.regs.flags.zero = false;
        cpu.load_program(&make_program(&[
            Instruction::branch(Opcode::Jz, 0, 2),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_jump_through_register_base() {
        let mut cpu = cpu();
        cpu.regs.set(3, 0x40);
        cpu.mem.write_word(0x44, encode(&Instruction::bare(Opcode::Hlt)));
        cpu.load_program(&make_program(&[Instruction::branch(Opcode::Jmp, 3, 4)])).unwrap();
        cpu.run();
        assert!(cpu.is_halted());
        assert_eq!(cpu.pc(), 0x44);
    }

    #[test]
    fn test_zero_register_means_pc_relative() {
        // R5 holds zero, so JMP R5 jumps relative to the next instruction
        // instead of to absolute address 2.
        let mut cpu = cpu();
        cpu.load_program(&make_program(&[
            Instruction::branch(Opcode::Jmp, 5, 2),
            Instruction::bare(Opcode::Hlt),
            Instruction::immediate(Opcode::Ldi, 1, 0, 9),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.run();
        assert_eq!(cpu.register(1), 9);
        assert_eq!(cpu.pc(), 6);
    }

    #[test]
    fn test_output_port() {
        let mut cpu = cpu();
        let mut program = Vec::new();
        // R7 = 0xFF00 built from -1 << 8.
        program.push(Instruction::immediate(Opcode::Ldi, 7, 0, -1));
        program.push(Instruction::immediate(Opcode::Shl, 7, 7, 8));
        for ch in [b'O', b'K', b'\n', b'!'] {
            // Characters do not fit a 6-bit immediate; build them from halves.
            program.push(Instruction::immediate(Opcode::Ldi, 1, 0, (ch >> 3) as i8));
            program.push(Instruction::immediate(Opcode::Shl, 1, 1, 3));
            program.push(Instruction::immediate(Opcode::Ldi, 2, 0, (ch & 0x7) as i8));
            program.push(Instruction::register(Opcode::Or, 0, 1, 2));
            program.push(Instruction::immediate(Opcode::St, 0, 7, 0));
        }
        program.push(Instruction::bare(Opcode::Hlt));
        cpu.load_program(&make_program(&program)).unwrap();
        cpu.run();

        assert_eq!(cpu.register(7), IO_STDOUT as i16);
        // The newline flushed "OK"; HLT flushed the trailing "!".
        assert_eq!(cpu.mem.console(), &vec!["OK".to_string(), "!".to_string()]);
    }

    #[test]
    fn test_run_limited_stops_infinite_loop() {
        let mut cpu = cpu();
        cpu.load_program(&make_program(&[Instruction::branch(Opcode::Jmp, 0, -2)])).unwrap();
        assert_eq!(cpu.run_limited(100), 100);
        assert!(cpu.is_running());
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_trace_does_not_change_state() {
        let source = "LDI R0, #5\nLDI R1, #-3\nADD R2, R0, R1\nST R2, R3, #4\nHLT";
        let program = assemble(source).unwrap();

        let mut quiet = cpu();
        quiet.load_program(&program.words).unwrap();
        quiet.run();

        let mut traced = Cpu::with_console(CpuConfig { trace: true, ..CpuConfig::default() }, Vec::new());
        traced.load_program(&program.words).unwrap();
        traced.run();

        assert_eq!(quiet.snapshot(), traced.snapshot());
        assert_eq!(quiet.mem.read_range(0, 16), traced.mem.read_range(0, 16));
    }

    #[test]
    fn test_reset() {
        let mut cpu = Cpu::with_console(CpuConfig { program_start: 0x20, trace: false }, Vec::new());
        cpu.load_program(&make_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 0, 3),
            Instruction::bare(Opcode::Hlt),
        ])).unwrap();
        cpu.run();
        assert!(cpu.is_halted());

        cpu.reset();
        assert!(cpu.is_running());
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.pc(), 0x20);
        assert_eq!(cpu.register(1), 0);
        assert_eq!(cpu.mem.read_word(0x20), 0);
        assert_eq!(cpu.last_instruction(), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let cpu = run_source("LDI R3, #-2\nHLT");
        let snap = cpu.snapshot();
        assert_eq!(snap.registers[3], -2);
        assert_eq!(snap.state, CpuState::Halted);

        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_config_from_json() {
        let cfg: CpuConfig = serde_json::from_str(r#"{"program_start": 256}"#).unwrap();
        assert_eq!(cfg, CpuConfig { program_start: 0x100, trace: false });
    }
}
