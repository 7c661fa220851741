//! WebSocket module for Binance connection management

mod client;
mod manager;

pub use client::{stream_url, WebSocketClient};
pub use manager::{backoff_delay, WebSocketManager};
