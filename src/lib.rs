//! An interactive shell with job control: process groups, pipelines,
//! foreground/background jobs and terminal ownership.

pub mod config;
pub mod error;
mod helper;
pub mod shell;

pub use config::Config;
pub use error::{Error, Result};
pub use shell::Shell;
