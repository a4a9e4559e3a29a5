pub mod cli;
pub mod common;

pub use cli::{Cli, Commands, RunOverrides};
pub use common::OutputFormat;
