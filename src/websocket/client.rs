//! WebSocket client for Binance combined streams
//!
//! Handles connection, subscription, and message reception.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{DepthError, Result};
use crate::symbol::MarketSymbol;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Combined-stream URL subscribing to depth diffs and aggregated trades
pub fn stream_url(endpoint: &str, symbols: &[MarketSymbol]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|s| {
            let s_lower = s.name.to_lowercase();
            [format!("{}@depth@100ms", s_lower), format!("{}@aggTrade", s_lower)]
        })
        .collect();

    format!("{}/stream?streams={}", endpoint.trim_end_matches('/'), streams.join("/"))
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str, symbols: &[MarketSymbol]) -> Self {
        Self {
            stream: None,
            url: stream_url(endpoint, symbols),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to Binance WebSocket");

        let (ws_stream, response) = connect_async(&self.url)
            .await
            .map_err(|e| DepthError::WebSocketConnection(format!("Failed to connect: {}", e)))?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Receive the next data message; `None` for control frames
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DepthError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => Ok(Some(String::from_utf8_lossy(&data).to_string())),
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                let _ = stream.send(Message::Pong(data)).await;
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Err(DepthError::WebSocketConnection("Connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(DepthError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(DepthError::WebSocketConnection("Stream ended".to_string()))
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| DepthError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
