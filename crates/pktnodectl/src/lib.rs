//! pktnodectl - operator CLI for the PKT WinNode orchestration core.

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Commands};
pub use commands::App;
