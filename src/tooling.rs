//! Tooling & Integration Layer
//!
//! Command-line front end over the tracker, the walker and the local disk
//! backend.

pub mod cli;

pub use cli::{Cli, CliContext, Commands, OutputFormat};
