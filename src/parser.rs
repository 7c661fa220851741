//! Parser module for Binance WebSocket and REST payloads
//!
//! Handles deserialization of depth updates, aggregated trades and REST
//! snapshots, and normalizes depth updates into segment-tagged events.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use crate::symbol::{MarketSymbol, Segment};

/// Binance depth update message (spot and USD-M futures)
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Final update ID of the previous event (futures only)
    #[serde(rename = "pu", default)]
    pub prev_final_update_id: Option<u64>,

    /// Bids to update
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

impl DepthUpdate {
    /// Tag the update with the segment of the stream it arrived on.
    pub fn into_event(self, segment: Segment) -> DepthEvent {
        DepthEvent {
            symbol: MarketSymbol::new(&self.symbol, segment),
            event_time: self.event_time,
            first_update_id: self.first_update_id,
            final_update_id: self.final_update_id,
            prev_final_update_id: self.prev_final_update_id,
            bids: self.bids,
            asks: self.asks,
        }
    }
}

/// Normalized depth diff, immutable once built by the transport
#[derive(Debug, Clone)]
pub struct DepthEvent {
    pub symbol: MarketSymbol,
    pub event_time: u64,
    /// `U`
    pub first_update_id: u64,
    /// `u`
    pub final_update_id: u64,
    /// `pu`, futures only
    pub prev_final_update_id: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Binance aggregated trade message
#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Aggregate trade ID
    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,

    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// Is buyer maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl AggTrade {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Price level (price, quantity pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Order book snapshot from REST API
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Bids, best first
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks, best first
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    DepthUpdate(DepthUpdate),
    AggTrade(AggTrade),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        // Combined streams wrap the payload
        if let Ok(stream_msg) = serde_json::from_str::<StreamMessage>(raw) {
            return Self::parse_stream_data(&stream_msg.stream, &stream_msg.data);
        }

        if let Ok(depth) = serde_json::from_str::<DepthUpdate>(raw) {
            if depth.event_type == "depthUpdate" {
                return Ok(ParsedMessage::DepthUpdate(depth));
            }
        }

        if let Ok(trade) = serde_json::from_str::<AggTrade>(raw) {
            if trade.event_type == "aggTrade" {
                return Ok(ParsedMessage::AggTrade(trade));
            }
        }

        Ok(ParsedMessage::Unknown(raw.to_string()))
    }

    fn parse_stream_data(
        stream: &str,
        data: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        if stream.contains("@depth") {
            let depth: DepthUpdate = serde_json::from_value(data.clone())?;
            Ok(ParsedMessage::DepthUpdate(depth))
        } else if stream.contains("@aggTrade") {
            let trade: AggTrade = serde_json::from_value(data.clone())?;
            Ok(ParsedMessage::AggTrade(trade))
        } else {
            Ok(ParsedMessage::Unknown(data.to_string()))
        }
    }
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    // Owned: payloads from combined streams arrive via `serde_json::Value`
    let s = String::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from array of string pairs
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?,
                quantity: Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_spot_depth_update() {
        let raw = r#"{
            "e": "depthUpdate",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "U": 100,
            "u": 105,
            "b": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "a": [["50001.00", "1.0"], ["50002.00", "0"]]
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::DepthUpdate(depth) = msg {
            assert_eq!(depth.symbol, "BTCUSDT");
            assert_eq!(depth.prev_final_update_id, None);
            assert_eq!(depth.bids.len(), 2);
            assert_eq!(depth.asks[1].quantity, Decimal::ZERO);
            assert_eq!(depth.bids[0].price, dec!(50000.00));
        } else {
            panic!("Expected DepthUpdate");
        }
    }

    #[test]
    fn test_parse_futures_combined_stream() {
        let raw = r#"{
            "stream": "btcusdt@depth@100ms",
            "data": {
                "e": "depthUpdate",
                "E": 1672531200000,
                "T": 1672531199990,
                "s": "BTCUSDT",
                "U": 201,
                "u": 210,
                "pu": 200,
                "b": [["50000.0", "3.000"]],
                "a": []
            }
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        let ParsedMessage::DepthUpdate(depth) = msg else {
            panic!("Expected DepthUpdate");
        };
        let event = depth.into_event(Segment::Futures);
        assert_eq!(event.symbol, MarketSymbol::futures("BTCUSDT"));
        assert_eq!(event.prev_final_update_id, Some(200));
        assert_eq!(event.final_update_id, 210);
    }

    #[test]
    fn test_parse_agg_trade() {
        let raw = r#"{
            "e": "aggTrade",
            "E": 1672531200000,
            "s": "ETHUSDT",
            "a": 12345,
            "p": "2000.50",
            "q": "2",
            "f": 100,
            "l": 105,
            "T": 1672531200000,
            "m": true
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::AggTrade(trade) = msg {
            assert_eq!(trade.symbol, "ETHUSDT");
            assert_eq!(trade.notional(), dec!(4001.00));
            assert!(trade.is_buyer_maker);
        } else {
            panic!("Expected AggTrade");
        }
    }

    #[test]
    fn test_parse_snapshot() {
        let raw = r#"{"lastUpdateId": 1027024, "bids": [["4.00000000", "431.00000000"]], "asks": [["4.00000200", "12.00000000"]]}"#;
        let snapshot: OrderBookSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.last_update_id, 1027024);
        assert_eq!(snapshot.asks[0].price, dec!(4.000002));
    }

    #[test]
    fn test_subscription_ack_is_unknown() {
        let msg = ParsedMessage::parse(r#"{"result":null,"id":1}"#).unwrap();
        assert!(matches!(msg, ParsedMessage::Unknown(_)));
    }
}
