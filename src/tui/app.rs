//! Debugger application state and logic.

use crate::asm::disasm::disassemble_instruction;
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::INSTRUCTION_SIZE;
use crate::{Cpu, CpuConfig};
use std::collections::HashSet;

/// Bytes shown per row of the memory view.
pub const MEM_ROW_BYTES: usize = 8;

const MEM_ROWS: usize = MEMORY_SIZE / MEM_ROW_BYTES;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged. Output lines are collected for the console pane.
    pub cpu: Cpu<Vec<String>>,
    /// Program words, reloaded on reset.
    pub program: Vec<u16>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a program loaded at `config.program_start`.
    pub fn new(program: Vec<u16>, config: CpuConfig) -> Self {
        let mut cpu = Cpu::with_console(config, Vec::new());
        let status = match cpu.load_program(&program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".to_string(),
            Err(e) => format!("Load failed: {}", e),
        };
        let mem_scroll = config.program_start as usize / MEM_ROW_BYTES;

        Self {
            cpu,
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status,
            mem_scroll,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU halted after {} cycles", self.cpu.cycles);
            self.running = false;
            return;
        }

        let pc = self.cpu.pc();
        match self.cpu.step() {
            Ok(instr) => {
                self.status = format!("PC={:04X}: {}", pc, instr);
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt or breakpoint.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Halted after {} cycles", self.cpu.cycles);
            return;
        }

        let pc = self.cpu.pc();
        if self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at PC={:04X}", pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.pc();
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:04X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:04X}", pc);
        }
    }

    /// Reset CPU to initial state and reload the program.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.mem.console_mut().clear();
        self.status = match self.cpu.load_program(&self.program) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reload failed: {}", e),
        };
        self.running = false;
    }

    /// Scroll the memory view by `delta` rows.
    pub fn scroll_memory(&mut self, delta: isize) {
        let row = self.mem_scroll as isize + delta;
        self.mem_scroll = row.clamp(0, MEM_ROWS as isize - 1) as usize;
    }

    /// Scroll the memory view to the row holding PC.
    pub fn follow_pc(&mut self) {
        self.mem_scroll = self.cpu.pc() as usize / MEM_ROW_BYTES;
    }

    /// Get disassembly around current PC as (address, text, is_current).
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.cpu.pc();
        let back = (lines / 2) as u16 * INSTRUCTION_SIZE;
        let start = pc.saturating_sub(back);

        (0..lines)
            .map(|i| start as usize + i * INSTRUCTION_SIZE as usize)
            .take_while(|addr| *addr < MEMORY_SIZE)
            .map(|addr| {
                let addr = addr as u16;
                let text = disassemble_instruction(self.cpu.mem.read_word(addr));
                (addr, text, addr == pc)
            })
            .collect()
    }

    /// Memory rows starting at the scroll offset as (address, bytes).
    pub fn get_memory_rows(&self, rows: usize) -> Vec<(u16, Vec<u8>)> {
        (self.mem_scroll..MEM_ROWS.min(self.mem_scroll + rows))
            .map(|row| {
                let addr = (row * MEM_ROW_BYTES) as u16;
                (addr, self.cpu.mem.read_range(addr, MEM_ROW_BYTES))
            })
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u16>, config: CpuConfig) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program, config);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Char('g') => app.follow_pc(),
                        KeyCode::Up => app.scroll_memory(-1),
                        KeyCode::Down => app.scroll_memory(1),
                        KeyCode::PageUp => app.scroll_memory(-16),
                        KeyCode::PageDown => app.scroll_memory(16),
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
