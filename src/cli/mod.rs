//! Terminal front end
//!
//! Argument parsing, the interactive consultation loop and its rendering.

pub mod args;
pub mod commands;
pub mod display;
pub mod input;
pub mod repl;

pub use args::{Args, Commands, KindArg, Verbosity};
pub use input::InputHandler;
pub use repl::ConsultationRepl;
