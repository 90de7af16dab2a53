//! Command handlers
//!
//! Dispatches parsed commands for one connection. Commands open to everyone
//! are handled first; the rest depend on the connection's authentication state.

use log::info;
use serde::de::DeserializeOwned;

use super::commands::{Command, CommandResult, CommandStatus};
use super::responses::{
    CREATED, GOODBYE, LOGIN_SUCCESS, OK, SASL_CONTINUE, SASL_SUCCESS, format_response,
};
use super::translators::{failure, json_success, success};
use crate::api::{AuthResponse, Authenticated};
use crate::client::Client;
use crate::error::{ApiError, AuthError, ErrorKind};
use crate::server::ServerContext;

/// Dispatches a received command to its handler.
pub fn handle_command(client: &mut Client, command: &Command, ctx: &ServerContext) -> CommandResult {
    match command {
        Command::QUIT => handle_cmd_quit(client, ctx),
        Command::NOOP => success(OK, "OK"),
        Command::SIGNUP(body) => handle_cmd_signup(body, ctx),
        Command::CHECK(token) => handle_cmd_check(token, ctx),
        Command::REFRESH(token) => handle_cmd_refresh(client, token, ctx),
        Command::UNKNOWN => failure(ApiError::new(
            ErrorKind::UnknownCommand,
            "unknown command or missing argument",
        )),
        _ if client.is_authenticated() => handle_session_command(client, command, ctx),
        _ => handle_auth_command(client, command, ctx),
    }
}

/// Commands available before authentication.
pub fn handle_auth_command(client: &mut Client, command: &Command, ctx: &ServerContext) -> CommandResult {
    match command {
        Command::AUTH(body) => handle_cmd_auth(client, body, ctx),
        Command::SASLSTART(argument) => handle_cmd_saslstart(client, argument, ctx),
        Command::SASLCONTINUE(payload) => handle_cmd_saslcontinue(client, payload, ctx),
        _ => failure(AuthError::NotAuthenticated.into()),
    }
}

/// Commands for an authenticated connection. The session is checked on every
/// command, so revocation and expiry take effect immediately.
fn handle_session_command(client: &mut Client, command: &Command, ctx: &ServerContext) -> CommandResult {
    let Some(session) = client.session().cloned() else {
        return failure(AuthError::NotAuthenticated.into());
    };
    if let Err(e) = ctx.api.check(&session.token) {
        client.logout();
        return failure(e);
    }

    match command {
        Command::WHOAMI => {
            let roles = session.result.role_names().join(",");
            success(OK, &format!("{} {}", session.result.identity, roles))
        }
        Command::PASSWD(body) => handle_cmd_passwd(client, &session, body, ctx),
        Command::DELETE(body) => handle_cmd_delete(client, &session, body, ctx),
        Command::LOGOUT => {
            ctx.api.logout(&session.token);
            client.logout();
            success(GOODBYE, "Logout successful")
        }
        // Re-authentication replaces the current session.
        Command::AUTH(_) | Command::SASLSTART(_) | Command::SASLCONTINUE(_) => {
            handle_auth_command(client, command, ctx)
        }
        _ => failure(ApiError::new(ErrorKind::UnknownCommand, "unknown command")),
    }
}

/// Handles QUIT: ends any session and signals connection close.
fn handle_cmd_quit(client: &mut Client, ctx: &ServerContext) -> CommandResult {
    if let Some(token) = client.logout() {
        ctx.api.logout(&token);
    }
    CommandResult {
        status: CommandStatus::CloseConnection,
        message: Some(format_response(GOODBYE, "Goodbye")),
    }
}

fn handle_cmd_signup(body: &str, ctx: &ServerContext) -> CommandResult {
    let result = parse_body(body).and_then(|request| ctx.api.sign_up(request));
    match result {
        Ok(created) => json_success(CREATED, &created),
        Err(e) => failure(e),
    }
}

fn handle_cmd_check(token: &str, ctx: &ServerContext) -> CommandResult {
    match ctx.api.check(token) {
        Ok(result) => json_success(OK, &AuthResponse::from_result(&result, None)),
        Err(e) => failure(e),
    }
}

/// Rotates a token. If this connection holds it, the connection moves to the
/// new token.
fn handle_cmd_refresh(client: &mut Client, token: &str, ctx: &ServerContext) -> CommandResult {
    match ctx.api.refresh(token) {
        Ok(session) => {
            let response = session.response();
            if client.session().is_some_and(|s| s.token == token) {
                client.set_authenticated(session);
            }
            json_success(OK, &response)
        }
        Err(e) => failure(e),
    }
}

fn handle_cmd_auth(client: &mut Client, body: &str, ctx: &ServerContext) -> CommandResult {
    if let Some(limited) = check_rate_limit(client, ctx) {
        return limited;
    }
    match parse_body(body).and_then(|request| ctx.api.auth(request)) {
        Ok(session) => {
            let response = session.response();
            accept(client, session, ctx);
            json_success(LOGIN_SUCCESS, &response)
        }
        Err(e) => reject(client, e, ctx),
    }
}

fn handle_cmd_saslstart(client: &mut Client, argument: &str, ctx: &ServerContext) -> CommandResult {
    if let Some(limited) = check_rate_limit(client, ctx) {
        return limited;
    }
    match ctx.api.sasl_start(argument) {
        Ok((challenge, server_first)) => {
            if let Some(token) = client.set_challenge(challenge) {
                ctx.api.logout(&token);
            }
            success(SASL_CONTINUE, &server_first)
        }
        Err(e) => reject(client, e, ctx),
    }
}

fn handle_cmd_saslcontinue(client: &mut Client, payload: &str, ctx: &ServerContext) -> CommandResult {
    let Some(challenge) = client.take_challenge() else {
        return failure(ApiError::new(ErrorKind::BadSequence, "SASLSTART required first"));
    };
    match ctx.api.sasl_continue(&challenge, payload) {
        Ok((session, server_final)) => {
            accept(client, session, ctx);
            success(SASL_SUCCESS, &server_final)
        }
        Err(e) => reject(client, e, ctx),
    }
}

fn handle_cmd_passwd(
    client: &mut Client,
    session: &Authenticated,
    body: &str,
    ctx: &ServerContext,
) -> CommandResult {
    if let Some(limited) = check_rate_limit(client, ctx) {
        return limited;
    }
    match parse_body(body).and_then(|request| ctx.api.change_password(&session.result, request)) {
        Ok(()) => success(OK, "Password changed"),
        Err(e) => {
            if e.kind == ErrorKind::InvalidCredentials {
                ctx.limiter.lock().record_failure(&client.rate_limit_key());
            }
            failure(e)
        }
    }
}

fn handle_cmd_delete(
    client: &mut Client,
    session: &Authenticated,
    body: &str,
    ctx: &ServerContext,
) -> CommandResult {
    if let Some(limited) = check_rate_limit(client, ctx) {
        return limited;
    }
    match parse_body(body).and_then(|request| ctx.api.delete_account(&session.result, request)) {
        Ok(()) => {
            info!("Identity {} deleted itself", session.result.identity);
            client.logout();
            success(OK, "Account deleted")
        }
        Err(e) => {
            if e.kind == ErrorKind::InvalidCredentials {
                ctx.limiter.lock().record_failure(&client.rate_limit_key());
            }
            failure(e)
        }
    }
}

fn check_rate_limit(client: &Client, ctx: &ServerContext) -> Option<CommandResult> {
    if ctx.limiter.lock().is_allowed(&client.rate_limit_key()) {
        None
    } else {
        Some(failure(ApiError::new(
            ErrorKind::Unavailable,
            "too many failed attempts, try again later",
        )))
    }
}

fn accept(client: &mut Client, session: Authenticated, ctx: &ServerContext) {
    ctx.limiter.lock().reset(&client.rate_limit_key());
    info!("Client authenticated as {}", session.result.identity);
    if let Some(previous) = client.set_authenticated(session) {
        ctx.api.logout(&previous);
    }
}

fn reject(client: &mut Client, err: ApiError, ctx: &ServerContext) -> CommandResult {
    if err.kind == ErrorKind::InvalidCredentials {
        ctx.limiter.lock().record_failure(&client.rate_limit_key());
        if let Some(previous) = client.set_rejected() {
            ctx.api.logout(&previous);
        }
    }
    failure(err)
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    // The serde message can quote field values, so only the position is reported.
    serde_json::from_str(body).map_err(|e| {
        ApiError::bad_request(format!(
            "invalid request body at line {} column {}",
            e.line(),
            e.column()
        ))
    })
}
