//! Module `commands`
//!
//! Defines the commands of the line protocol, their parsing, and the result
//! structure returned by handlers.

use std::fmt;

/// A command parsed from one client line.
///
/// Arguments may carry passwords or proofs, so `Debug` prints the verb only.
#[derive(PartialEq)]
pub enum Command {
    SIGNUP(String),       // JSON sign-up body
    AUTH(String),         // JSON login body
    SASLSTART(String),    // <mechanism> <base64 client-first>
    SASLCONTINUE(String), // <base64 client-final>
    PASSWD(String),       // JSON password change body
    CHECK(String),        // bearer token
    REFRESH(String),      // bearer token to rotate
    DELETE(String),       // JSON {"password"} confirming self-deletion
    WHOAMI,
    LOGOUT,
    NOOP,
    QUIT,
    UNKNOWN, // Unknown command or missing argument
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::SIGNUP(_) => "SIGNUP",
            Command::AUTH(_) => "AUTH",
            Command::SASLSTART(_) => "SASLSTART",
            Command::SASLCONTINUE(_) => "SASLCONTINUE",
            Command::PASSWD(_) => "PASSWD",
            Command::CHECK(_) => "CHECK",
            Command::REFRESH(_) => "REFRESH",
            Command::DELETE(_) => "DELETE",
            Command::WHOAMI => "WHOAMI",
            Command::LOGOUT => "LOGOUT",
            Command::NOOP => "NOOP",
            Command::QUIT => "QUIT",
            Command::UNKNOWN => "UNKNOWN",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Represents the outcome status of executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub message: Option<String>,
}

/// Parses a raw line into a `Command`.
///
/// Known commands missing their required argument become `UNKNOWN`.
pub fn parse_command(raw: &str) -> Command {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim();

    match cmd.as_str() {
        "SIGNUP" if !arg.is_empty() => Command::SIGNUP(arg.to_string()),
        "AUTH" if !arg.is_empty() => Command::AUTH(arg.to_string()),
        "SASLSTART" if !arg.is_empty() => Command::SASLSTART(arg.to_string()),
        "SASLCONTINUE" if !arg.is_empty() => Command::SASLCONTINUE(arg.to_string()),
        "PASSWD" if !arg.is_empty() => Command::PASSWD(arg.to_string()),
        "CHECK" if !arg.is_empty() => Command::CHECK(arg.to_string()),
        "REFRESH" if !arg.is_empty() => Command::REFRESH(arg.to_string()),
        "DELETE" if !arg.is_empty() => Command::DELETE(arg.to_string()),
        "WHOAMI" => Command::WHOAMI,
        "LOGOUT" => Command::LOGOUT,
        "NOOP" => Command::NOOP,
        "QUIT" | "Q" => Command::QUIT,
        _ => Command::UNKNOWN,
    }
}
