use anyhow::Result;
use bridge_shared::LineDecoder;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_ADDR: &str = "0.0.0.0:9000";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("[SIM] Serial device listening on {}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = serve(socket, peer).await {
                warn!("[SIM] {} dropped: {}", peer, e);
            }
        });
    }
}

/// Answer one client: `PING` gets `PONG`, anything else is echoed
async fn serve(mut socket: TcpStream, peer: SocketAddr) -> Result<()> {
    info!("[SIM] Client connected: {}", peer);
    socket.set_nodelay(true)?;

    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; 1024];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            info!("[SIM] Client disconnected: {}", peer);
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(line) = decoder.decode_next()? {
            debug!("[SIM] <- {:?}", line);
            let reply = respond(&line);
            socket.write_all(reply.as_bytes()).await?;
        }
    }
}

fn respond(line: &str) -> String {
    if line.trim() == "PING" {
        "PONG\r\n".to_string()
    } else {
        format!("{}\r\n", line)
    }
}
