//! WebSocket connection manager
//!
//! One manager per segment. Depth diffs go to the ingest queue, aggregated
//! trades to the volume tracker. Reconnects forever with capped exponential
//! backoff; replicas notice the missed updates through their sequence checks.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{error, info, trace, warn};

use super::WebSocketClient;
use crate::error::{DepthError, Result};
use crate::metrics;
use crate::orderbook::VolumeTracker;
use crate::parser::ParsedMessage;
use crate::replica::IngestSender;
use crate::symbol::{MarketSymbol, Segment};

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;

/// Delay before reconnect attempt number `attempts`
pub fn backoff_delay(base_delay_ms: u64, attempts: u32) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.pow(attempts.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

/// Manages one segment's WebSocket connection with automatic reconnection
pub struct WebSocketManager {
    segment: Segment,
    client: WebSocketClient,
    ingest: IngestSender,
    volumes: Arc<Mutex<VolumeTracker>>,
    reconnect_delay_ms: u64,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    pub fn new(
        segment: Segment,
        endpoint: &str,
        symbols: &[MarketSymbol],
        reconnect_delay_ms: u64,
        ingest: IngestSender,
        volumes: Arc<Mutex<VolumeTracker>>,
    ) -> Self {
        Self {
            segment,
            client: WebSocketClient::new(endpoint, symbols),
            ingest,
            volumes,
            reconnect_delay_ms,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run the WebSocket manager - runs indefinitely with automatic reconnection
    pub async fn run(&mut self) -> Result<()> {
        info!(segment = %self.segment, "Starting WebSocket manager with infinite retry");

        loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        segment = %self.segment,
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!(
                        segment = %self.segment,
                        "WebSocket processing completed normally, reconnecting..."
                    );
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(segment = %self.segment, error = %e, "WebSocket error");
                    self.client.close().await;
                    self.reconnect_attempts += 1;

                    let delay = backoff_delay(self.reconnect_delay_ms, self.reconnect_attempts);
                    warn!(
                        segment = %self.segment,
                        attempt = self.reconnect_attempts,
                        delay_secs = delay.as_secs(),
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect and process messages
    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;
        info!(
            segment = %self.segment,
            "WebSocket connected successfully, resetting reconnect counter"
        );

        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(30);
        let recv_timeout = Duration::from_secs(45);

        loop {
            // Use timeout to detect stale connections
            match timeout(recv_timeout, self.client.recv()).await {
                Ok(Ok(Some(text))) => {
                    last_message = Instant::now();
                    if let Err(e) = self.process_message(&text).await {
                        warn!(segment = %self.segment, error = %e, "Failed to process message");
                    }
                }
                Ok(Ok(None)) => {
                    if last_message.elapsed() > keepalive_timeout {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping");
                        }
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        segment = %self.segment,
                        last_message_secs = last_message.elapsed().as_secs(),
                        "No message received within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                        return Err(DepthError::ConnectionTimeout);
                    }
                }
            }
        }
    }

    /// Process a single WebSocket message
    async fn process_message(&self, raw: &str) -> Result<()> {
        let message = ParsedMessage::parse(raw).map_err(|e| {
            metrics::record_drop("malformed");
            e
        })?;

        match message {
            ParsedMessage::DepthUpdate(update) => {
                self.ingest.offer(update.into_event(self.segment));
            }
            ParsedMessage::AggTrade(trade) => {
                let symbol = MarketSymbol::new(&trade.symbol, self.segment);
                self.volumes.lock().await.record(&symbol, trade.notional());
            }
            ParsedMessage::Unknown(msg) => {
                trace!(msg = %msg, "Unknown message type");
            }
        }

        Ok(())
    }
}
