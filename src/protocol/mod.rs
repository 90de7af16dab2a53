//! Line protocol
//!
//! Command parsing, dispatch and reply formatting.

pub mod commands;
pub mod handlers;
pub mod responses;
pub mod translators;

pub use commands::{Command, CommandResult, CommandStatus, parse_command};
pub use handlers::{handle_auth_command, handle_command};
