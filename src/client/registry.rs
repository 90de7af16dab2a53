//! Client registry
//!
//! Tracks connected clients for the connection limit. The per-connection
//! `Client` state stays with its connection task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connected_at: Instant,
    /// `name@scope` once authenticated
    pub identity: Option<String>,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<SocketAddr, ConnectionInfo>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` unless `max_clients` connections are already present.
    pub fn try_register(&mut self, addr: SocketAddr, max_clients: usize) -> bool {
        if self.clients.len() >= max_clients {
            return false;
        }
        self.clients.insert(
            addr,
            ConnectionInfo {
                connected_at: Instant::now(),
                identity: None,
            },
        );
        true
    }

    pub fn set_identity(&mut self, addr: &SocketAddr, identity: Option<String>) {
        if let Some(info) = self.clients.get_mut(addr) {
            info.identity = identity;
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<ConnectionInfo> {
        self.clients.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&ConnectionInfo> {
        self.clients.get(addr)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
