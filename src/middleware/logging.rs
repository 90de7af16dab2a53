//! Logging middleware
//!
//! Connection and command logging. Only command verbs are logged; arguments
//! can hold passwords, proofs or tokens.

use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::protocol::{Command, CommandStatus};

pub fn log_connection(client_addr: &SocketAddr) {
    info!("Client connected: {}", client_addr);
}

pub fn log_disconnect(client_addr: &SocketAddr) {
    info!("Client {} disconnected", client_addr);
}

pub fn log_command(client_addr: &SocketAddr, command: &Command) {
    debug!("Client {} sent {}", client_addr, command.verb());
}

pub fn log_outcome(client_addr: &SocketAddr, command: &Command, status: &CommandStatus) {
    if let CommandStatus::Failure(reason) = status {
        warn!("Client {} {} failed: {}", client_addr, command.verb(), reason);
    }
}
