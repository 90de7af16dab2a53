use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::client::{ClientRegistry, handle_client};
use crate::error::{ApiError, ErrorKind, ServerError};
use crate::middleware::logging::{log_connection, log_disconnect};
use crate::protocol::responses::{GREETING, READY, format_response};
use crate::protocol::translators::error_reply;
use crate::server::ServerContext;

pub struct Server {
    client_registry: Arc<Mutex<ClientRegistry>>,
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Binds the control socket named by the startup configuration.
    pub async fn bind(ctx: Arc<ServerContext>) -> Result<Self, ServerError> {
        let socket = ctx.config.control_socket();
        let listener = TcpListener::bind(&socket).await.map_err(|e| {
            error!("Failed to bind to {}: {}", socket, e);
            ServerError::NetworkError(format!("failed to bind {socket}: {e}"))
        })?;
        info!("Server bound to {}", listener.local_addr()?);

        Ok(Self {
            client_registry: Arc::new(Mutex::new(ClientRegistry::new())),
            listener,
            ctx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accepts connections until the task is dropped.
    pub async fn start(&self) {
        let max_clients = self.ctx.runtime.read().await.max_clients;
        info!(
            "Starting ns-auth server on {} (max {} clients)",
            self.ctx.config.control_socket(),
            max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let client_registry = Arc::clone(&self.client_registry);
                    let ctx = Arc::clone(&self.ctx);

                    // Spawn a task for each client so accept loop doesn't block
                    tokio::spawn(async move {
                        if let Err(e) = handle_new_client(stream, addr, client_registry, ctx).await {
                            warn!("Failed to handle client {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Registers a new client, greets it and runs its command loop.
async fn handle_new_client(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    client_registry: Arc<Mutex<ClientRegistry>>,
    ctx: Arc<ServerContext>,
) -> Result<(), std::io::Error> {
    let max_clients = ctx.runtime.read().await.max_clients;
    let registered = client_registry.lock().try_register(client_addr, max_clients);
    if !registered {
        warn!("Rejecting {}: {} clients connected", client_addr, max_clients);
        let reply = error_reply(&ApiError::new(
            ErrorKind::Unavailable,
            "too many connections, try again later",
        ));
        stream.write_all(reply.as_bytes()).await?;
        return Ok(());
    }
    log_connection(&client_addr);

    let greeted = async {
        stream
            .write_all(format_response(READY, GREETING).as_bytes())
            .await?;
        stream.flush().await
    }
    .await;

    let result = match greeted {
        Ok(()) => handle_client(stream, client_addr, Arc::clone(&client_registry), ctx).await,
        Err(e) => Err(e),
    };

    client_registry.lock().remove(&client_addr);
    log_disconnect(&client_addr);
    result
}
