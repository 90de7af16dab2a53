//! Protocol translators
//!
//! Turns API results and errors into reply lines.

use log::error;
use serde::Serialize;

use super::commands::{CommandResult, CommandStatus};
use super::responses::format_response;
use crate::error::{ApiError, ErrorKind};

pub fn success(code: u16, message: &str) -> CommandResult {
    CommandResult {
        status: CommandStatus::Success,
        message: Some(format_response(code, message)),
    }
}

/// Success reply carrying a JSON body.
pub fn json_success<T: Serialize>(code: u16, body: &T) -> CommandResult {
    match serde_json::to_string(body) {
        Ok(json) => success(code, &json),
        Err(e) => {
            error!("Failed to encode reply body: {}", e);
            failure(ApiError::new(ErrorKind::System, "internal error"))
        }
    }
}

pub fn failure(err: ApiError) -> CommandResult {
    CommandResult {
        message: Some(error_reply(&err)),
        status: CommandStatus::Failure(err.message),
    }
}

/// `<code> {"code":"NS-...","message":...}`
pub fn error_reply(err: &ApiError) -> String {
    let body = serde_json::to_string(err)
        .unwrap_or_else(|_| format!(r#"{{"code":"{}","message":"internal error"}}"#, err.code));
    format_response(err.kind.reply_code(), &body)
}
