use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::client::{Client, ClientRegistry};
use crate::error::{ApiError, ErrorKind};
use crate::middleware::logging::{log_command, log_outcome};
use crate::protocol::translators::error_reply;
use crate::protocol::{CommandStatus, handle_command, parse_command};
use crate::server::ServerContext;

/// Runs the command loop of one connection until QUIT, EOF or an I/O error.
///
/// - Reads at most `max_command_length` bytes per line, not counting the line ending.
/// - Dispatches commands using `handle_command` on the blocking pool.
/// - Mirrors the authenticated identity into the shared `registry`.
pub async fn handle_client(
    stream: TcpStream,
    client_addr: SocketAddr,
    registry: Arc<Mutex<ClientRegistry>>,
    ctx: Arc<ServerContext>,
) -> Result<(), std::io::Error> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let mut client = Client::new(client_addr);
    let limit = ctx.config.max_command_length;

    loop {
        buf.clear();
        let n = match (&mut reader)
            .take(limit as u64 + 2)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to read from {}: {}", client_addr, e);
                break;
            }
        };
        if n == 0 {
            info!("Connection closed by client {}", client_addr);
            break;
        }

        let command = match classify_line(&buf, limit) {
            Line::Command(text) => parse_command(text),
            Line::TooLong => {
                if !buf.ends_with(b"\n") {
                    skip_line(&mut reader).await?;
                }
                let reply = error_reply(&ApiError::new(ErrorKind::BadRequest, "command too long"));
                write_half.write_all(reply.as_bytes()).await?;
                continue;
            }
            Line::NotUtf8 => {
                let reply = error_reply(&ApiError::new(ErrorKind::BadRequest, "command is not valid UTF-8"));
                write_half.write_all(reply.as_bytes()).await?;
                continue;
            }
        };
        log_command(&client_addr, &command);

        // Key derivation is CPU-bound; keep it off the async workers.
        let task_ctx = Arc::clone(&ctx);
        let (returned, command, result) = tokio::task::spawn_blocking(move || {
            let mut client = client;
            let result = handle_command(&mut client, &command, &task_ctx);
            (client, command, result)
        })
        .await
        .map_err(std::io::Error::other)?;
        client = returned;
        log_outcome(&client_addr, &command, &result.status);

        registry.lock().set_identity(
            &client_addr,
            client.session().map(|s| s.result.identity.to_string()),
        );

        if let Some(msg) = &result.message {
            write_half.write_all(msg.as_bytes()).await?;
        }
        if result.status == CommandStatus::CloseConnection {
            info!("Client {} requested to quit", client_addr);
            break;
        }
    }

    if let Some(session) = client.session() {
        info!(
            "Client {} left with an active session for {}",
            client_addr, session.result.identity
        );
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Line<'a> {
    Command(&'a str),
    TooLong,
    NotUtf8,
}

/// Checks the length before decoding, so a multibyte character cut at the
/// read limit still counts as too long.
fn classify_line(buf: &[u8], limit: usize) -> Line<'_> {
    let content = match buf.strip_suffix(b"\n") {
        Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
        None => buf,
    };
    if content.len() > limit {
        return Line::TooLong;
    }
    match std::str::from_utf8(content) {
        Ok(text) => Line::Command(text),
        Err(_) => Line::NotUtf8,
    }
}

/// Discards input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(), std::io::Error> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}
