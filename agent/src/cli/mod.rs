//! CLI module
//!
//! This module provides:
//! - CLI argument definitions (args)
//! - The interactive chat loop (repl)
//! - Terminal rendering of agent events (render)

pub mod args;
pub mod render;
pub mod repl;

pub use args::{Cli, Commands};
pub use render::EventPrinter;
pub use repl::{Repl, ReplCommand};
