//! REST order book snapshots
//!
//! `fetch_fresh_snapshot` keeps asking the fetcher until the snapshot is
//! recent enough to join the diff that triggered the resync.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RateLimiter;
use crate::config::{Config, SnapshotConfig};
use crate::error::{DepthError, Result};
use crate::metrics;
use crate::parser::OrderBookSnapshot;
use crate::symbol::{MarketSymbol, Segment};

const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

/// Source of full order book snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &MarketSymbol) -> Result<OrderBookSnapshot>;
}

/// Fetch snapshots until one can be joined with a diff starting at
/// `first_update_id`, i.e. until `lastUpdateId + 1 >= first_update_id`.
///
/// Transient errors are logged and retried; the number of attempts is
/// bounded so a single symbol cannot hold its segment's worker forever.
pub async fn fetch_fresh_snapshot(
    fetcher: &dyn SnapshotFetcher,
    symbol: &MarketSymbol,
    first_update_id: u64,
    config: &SnapshotConfig,
) -> Result<OrderBookSnapshot> {
    let retry_delay = Duration::from_millis(config.retry_delay_ms);

    for attempt in 1..=config.max_attempts {
        match fetcher.fetch_snapshot(symbol).await {
            Ok(snapshot) if snapshot.last_update_id + 1 >= first_update_id => {
                debug!(
                    symbol = %symbol,
                    attempt,
                    last_update_id = snapshot.last_update_id,
                    "Snapshot fetched"
                );
                return Ok(snapshot);
            }
            Ok(snapshot) => {
                debug!(
                    symbol = %symbol,
                    attempt,
                    last_update_id = snapshot.last_update_id,
                    first_update_id,
                    "Snapshot older than buffered event, refetching"
                );
            }
            Err(DepthError::RateLimited { retry_after_secs }) => {
                info!(symbol = %symbol, retry_after_secs, "Snapshot request rate limited");
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                continue;
            }
            Err(e) => {
                warn!(symbol = %symbol, attempt, error = %e, "Snapshot fetch failed");
            }
        }
        tokio::time::sleep(retry_delay).await;
    }

    Err(DepthError::SnapshotExhausted {
        symbol: symbol.to_string(),
        attempts: config.max_attempts,
    })
}

/// Request weight of `GET depth` for the given limit
pub fn depth_request_weight(segment: Segment, limit: u32) -> u32 {
    match segment {
        Segment::Spot => match limit {
            0..=100 => 5,
            101..=500 => 25,
            501..=1000 => 50,
            _ => 250,
        },
        Segment::Futures => match limit {
            0..=50 => 2,
            51..=100 => 5,
            101..=500 => 10,
            _ => 20,
        },
    }
}

/// Binance REST client for spot and USD-M futures depth snapshots
pub struct RestSnapshotClient {
    client: reqwest::Client,
    spot_endpoint: String,
    futures_endpoint: String,
    limit: u32,
    spot_limiter: Arc<RateLimiter>,
    futures_limiter: Arc<RateLimiter>,
}

impl RestSnapshotClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("market-depth/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            spot_endpoint: config.spot_rest_endpoint.clone(),
            futures_endpoint: config.futures_rest_endpoint.clone(),
            limit: config.snapshot.limit,
            spot_limiter: Arc::new(RateLimiter::new(
                Segment::Spot,
                config.rate_limit.spot_weight_per_minute,
            )),
            futures_limiter: Arc::new(RateLimiter::new(
                Segment::Futures,
                config.rate_limit.futures_weight_per_minute,
            )),
        })
    }

    pub fn limiter(&self, segment: Segment) -> &Arc<RateLimiter> {
        match segment {
            Segment::Spot => &self.spot_limiter,
            Segment::Futures => &self.futures_limiter,
        }
    }

    fn endpoint(&self, segment: Segment) -> &str {
        match segment {
            Segment::Spot => &self.spot_endpoint,
            Segment::Futures => &self.futures_endpoint,
        }
    }
}

#[async_trait]
impl SnapshotFetcher for RestSnapshotClient {
    async fn fetch_snapshot(&self, symbol: &MarketSymbol) -> Result<OrderBookSnapshot> {
        let limiter = self.limiter(symbol.segment);
        limiter.acquire(depth_request_weight(symbol.segment, self.limit)).await;

        let url = format!(
            "{}/depth?symbol={}&limit={}",
            self.endpoint(symbol.segment),
            symbol.name,
            self.limit
        );
        info!(symbol = %symbol, url = %url, "Fetching order book snapshot");
        if let Some(m) = metrics::get() {
            m.snapshot_requests.with_label_values(&[symbol.segment.as_str()]).inc();
        }

        let response = self.client.get(&url).send().await?;

        let used_weight = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok());
        if let Some(used) = used_weight {
            limiter.observe_used_weight(used, chrono::Utc::now().timestamp_millis());
        }

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DepthError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DepthError::RestApiError(format!("{status}: {body}")));
        }

        Ok(response.json::<OrderBookSnapshot>().await?)
    }
}
