//! Protocol responses
//!
//! Success reply codes and line formatting. Error codes come from
//! `error::ErrorKind`.

pub const OK: u16 = 200;
pub const CREATED: u16 = 201;
pub const READY: u16 = 220;
pub const GOODBYE: u16 = 221;
pub const LOGIN_SUCCESS: u16 = 230;
pub const SASL_SUCCESS: u16 = 235;
pub const SASL_CONTINUE: u16 = 334;

pub const GREETING: &str = "ns-auth ready";

/// Format a reply line
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}
