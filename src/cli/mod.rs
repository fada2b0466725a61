//! Command-line front-end for the `pack` binary

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, LogFormat};
