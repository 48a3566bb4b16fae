//! TUI debugger for the TOY16 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag view
//! - Hex memory view
//! - Step/run/breakpoint controls
//! - Disassembly view
//! - Console output pane

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
