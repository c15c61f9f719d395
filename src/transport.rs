use log::{debug, info};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};

/// WebSocket connection to the room server
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket to the configured server, bounded by the connect timeout
pub async fn connect(config: &ClientConfig) -> Result<WsStream> {
    info!("📡 Connecting to chat server at {}", config.server_url);

    let (stream, response) =
        tokio::time::timeout(config.connect_timeout, connect_async(config.server_url.as_str()))
            .await
            .map_err(|_| ChatError::ConnectTimeout {
                url: config.server_url.to_string(),
                timeout_ms: config.connect_timeout.as_millis(),
            })??;

    debug!("WebSocket handshake completed ({})", response.status());
    info!("✅ Connected to chat server");

    Ok(stream)
}
