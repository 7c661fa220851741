//! Configuration module for the depth replication service
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`MARKET_DEPTH_CONFIG`, or `market-depth.toml` in the working directory),
//! then `DEPTH__`-prefixed environment variables such as
//! `DEPTH__INGEST__CAPACITY=50000`. Symbol lists come from `SYMBOLS` and
//! `FUTURES_SYMBOLS`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;

use crate::error::{DepthError, Result};
use crate::orderbook::{AggregatorLimits, ClassifierConfig};
use crate::symbol::{MarketSymbol, Segment};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spot symbols to replicate (e.g., ["BTCUSDT", "ETHUSDT"])
    pub symbols: Vec<String>,

    /// USD-M futures symbols to replicate
    pub futures_symbols: Vec<String>,

    /// WebSocket endpoints per segment
    pub spot_ws_endpoint: String,
    pub futures_ws_endpoint: String,

    /// REST API endpoints for snapshots
    pub spot_rest_endpoint: String,
    pub futures_rest_endpoint: String,

    /// IPC socket path for publishing cups
    pub ipc_socket_path: String,

    /// Port of the health/metrics server
    pub health_port: u16,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,

    /// Status log interval in seconds
    pub health_check_interval_secs: u64,

    pub replica: ReplicaConfig,
    pub ingest: IngestConfig,
    pub snapshot: SnapshotConfig,
    pub rate_limit: RateLimitConfig,
    pub classifier: ClassifierConfig,
    pub volumes: VolumeConfig,
}

/// Per-replica bounds and views
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    pub limits: AggregatorLimits,
    /// One top-N view per profile
    pub profiles: Vec<ViewProfile>,
    /// Forced full resync period; 0 disables it
    pub resync_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewProfile {
    pub key: String,
    pub cup_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum queued events before new ones are dropped
    pub capacity: usize,
    pub drain_interval_ms: u64,
    /// Resync backlog above which events of out-of-sync replicas are dropped
    pub schedule_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// `limit` parameter of `GET depth`
    pub limit: u32,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub spot_weight_per_minute: u32,
    pub futures_weight_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub top_n: usize,
    pub window_secs: u64,
}

impl Config {
    /// Load configuration from defaults, optional file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = env::var("MARKET_DEPTH_CONFIG").ok();
        let mut config = Self::layered(file.as_deref().map(Path::new))?;

        if let Ok(list) = env::var("SYMBOLS") {
            config.symbols = parse_symbol_list(&list);
        }
        if let Ok(list) = env::var("FUTURES_SYMBOLS") {
            config.futures_symbols = parse_symbol_list(&list);
        }

        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `file` (or `market-depth.toml` when present)
    /// and `DEPTH__*` environment variables.
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        // Missing keys fall back to `Default` through `#[serde(default)]`
        let builder = ::config::Config::builder();
        let builder = match file {
            Some(path) => builder.add_source(::config::File::from(path)),
            None => builder.add_source(::config::File::with_name("market-depth").required(false)),
        };

        let config: Config = builder
            .add_source(::config::Environment::with_prefix("DEPTH").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let limits = &self.replica.limits;
        if limits.max_distance_pct <= rust_decimal::Decimal::ZERO {
            return Err(DepthError::ConfigError("max distance must be positive".into()));
        }
        if limits.low_water > limits.high_water {
            return Err(DepthError::ConfigError(format!(
                "truncate low-water mark {} above high-water mark {}",
                limits.low_water, limits.high_water
            )));
        }
        if limits.batch == 0 || limits.window < limits.batch {
            return Err(DepthError::ConfigError(
                "truncate batch must be positive and no larger than the window".into(),
            ));
        }

        if self.replica.profiles.is_empty() {
            return Err(DepthError::ConfigError("at least one view profile is required".into()));
        }
        let mut keys = HashSet::new();
        for profile in &self.replica.profiles {
            if profile.cup_size == 0 {
                return Err(DepthError::ConfigError(format!(
                    "profile {} has cup size 0",
                    profile.key
                )));
            }
            if !keys.insert(profile.key.as_str()) {
                return Err(DepthError::ConfigError(format!("duplicate profile {}", profile.key)));
            }
        }

        if self.ingest.capacity == 0 {
            return Err(DepthError::ConfigError("ingest capacity must be positive".into()));
        }
        if self.snapshot.max_attempts == 0 {
            return Err(DepthError::ConfigError("snapshot attempts must be positive".into()));
        }

        self.classifier.validate()
    }

    /// All configured symbols across both segments
    pub fn market_symbols(&self) -> Vec<MarketSymbol> {
        self.symbols
            .iter()
            .map(|s| MarketSymbol::new(s, Segment::Spot))
            .chain(
                self.futures_symbols
                    .iter()
                    .map(|s| MarketSymbol::new(s, Segment::Futures)),
            )
            .collect()
    }

    pub fn ws_endpoint(&self, segment: Segment) -> &str {
        match segment {
            Segment::Spot => &self.spot_ws_endpoint,
            Segment::Futures => &self.futures_ws_endpoint,
        }
    }
}

fn parse_symbol_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            futures_symbols: vec!["BTCUSDT".to_string()],
            spot_ws_endpoint: "wss://stream.binance.com:9443".to_string(),
            futures_ws_endpoint: "wss://fstream.binance.com".to_string(),
            spot_rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            futures_rest_endpoint: "https://fapi.binance.com/fapi/v1".to_string(),
            ipc_socket_path: "/tmp/market-depth.sock".to_string(),
            health_port: 9090,
            reconnect_delay_ms: 1000,
            health_check_interval_secs: 30,
            replica: ReplicaConfig::default(),
            ingest: IngestConfig::default(),
            snapshot: SnapshotConfig::default(),
            rate_limit: RateLimitConfig::default(),
            classifier: ClassifierConfig::default(),
            volumes: VolumeConfig::default(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            limits: AggregatorLimits::default(),
            profiles: vec![ViewProfile {
                key: "default".to_string(),
                cup_size: 5,
            }],
            resync_interval_secs: 3600,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            capacity: 30_000,
            drain_interval_ms: 250,
            schedule_threshold: 115,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            limit: 1000,
            max_attempts: 20,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            spot_weight_per_minute: 6000,
            futures_weight_per_minute: 2400,
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            window_secs: 60,
        }
    }
}
