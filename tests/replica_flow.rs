//! End-to-end flow: raw stream messages through the ingest queue, resync and
//! replica, out to the distributor.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use market_depth::config::IngestConfig;
use market_depth::orderbook::{CupSnapshot, GVolume};
use market_depth::parser::{OrderBookSnapshot, ParsedMessage, PriceLevel};
use market_depth::publisher::Distributor;
use market_depth::replica::{ingest_channel, ReplicaRegistry, ResyncScheduler, SyncState};
use market_depth::rest::SnapshotFetcher;
use market_depth::{Config, DepthError, MarketSymbol, Segment};

#[derive(Default)]
struct RecordingDistributor {
    cups: Mutex<Vec<(String, i32, CupSnapshot)>>,
}

impl Distributor for RecordingDistributor {
    fn distribute(&self, profile_key: &str, tier: i32, cup: CupSnapshot) {
        self.cups.lock().unwrap().push((profile_key.to_string(), tier, cup));
    }

    fn distribute_volumes(&self, _volumes: &[GVolume]) {}
}

struct FixedSnapshot {
    last_update_id: u64,
}

#[async_trait]
impl SnapshotFetcher for FixedSnapshot {
    async fn fetch_snapshot(&self, symbol: &MarketSymbol) -> Result<OrderBookSnapshot, DepthError> {
        assert_eq!(symbol.segment, Segment::Futures);
        Ok(OrderBookSnapshot {
            last_update_id: self.last_update_id,
            bids: vec![
                PriceLevel::new(dec("2000"), dec("1")),
                PriceLevel::new(dec("1999"), dec("2")),
            ],
            asks: vec![
                PriceLevel::new(dec("2001"), dec("1")),
                PriceLevel::new(dec("2002"), dec("2")),
            ],
        })
    }
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn depth_message(first: u64, last: u64, prev: u64, bids: &str) -> String {
    format!(
        r#"{{"stream":"solusdt@depth@100ms","data":{{"e":"depthUpdate","E":1700000000000,"T":1700000000000,"s":"SOLUSDT","U":{first},"u":{last},"pu":{prev},"b":{bids},"a":[]}}}}"#
    )
}

fn parse(raw: &str) -> market_depth::DepthEvent {
    match ParsedMessage::parse(raw).unwrap() {
        ParsedMessage::DepthUpdate(update) => update.into_event(Segment::Futures),
        other => panic!("unexpected message {:?}", other),
    }
}

async fn wait_for_state(registry: &ReplicaRegistry, symbol: &MarketSymbol, state: SyncState) {
    let engine = registry.get(symbol).await.unwrap();
    for _ in 0..400 {
        if engine.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} stuck in {:?}", symbol, engine.state());
}

#[tokio::test]
async fn futures_replica_syncs_and_publishes() {
    let mut config = Config::default();
    config.futures_symbols = vec!["SOLUSDT".to_string()];
    config.symbols = vec![];

    let distributor = Arc::new(RecordingDistributor::default());
    let registry = ReplicaRegistry::from_config(&config, distributor.clone()).unwrap();
    registry.sync_symbols(&config.market_symbols()).await;

    let scheduler = ResyncScheduler::start(Arc::new(FixedSnapshot { last_update_id: 500 }));
    let (sender, mut queue) = ingest_channel(&IngestConfig {
        capacity: 64,
        drain_interval_ms: 10,
        schedule_threshold: 115,
    });
    let symbol = MarketSymbol::futures("SOLUSDT");

    // bridges snapshot 500
    sender.offer(parse(&depth_message(495, 505, 494, r#"[["2000.5","3"]]"#)));
    // 2000.8 * 30 = 60,024 notional: tier 1 near mid
    sender.offer(parse(&depth_message(506, 510, 505, r#"[["2000.8","30"]]"#)));

    let stats = queue.drain(&registry, &scheduler).await;
    assert_eq!(stats.resyncs_scheduled, 1);
    assert_eq!(stats.held, 1);

    wait_for_state(&registry, &symbol, SyncState::Synced).await;
    let stats = queue.drain(&registry, &scheduler).await;
    assert_eq!(stats.applied, 1);

    let book = registry.get_order_book(&symbol).await.unwrap();
    assert_eq!(book.last_update_id, 510);
    assert_eq!(book.bids[0].price, dec("2000.8"));
    assert_eq!(book.bids.len(), 4);

    {
        let cups = distributor.cups.lock().unwrap();
        let (profile, tier, cup) = cups.last().expect("tier 1 cup published");
        assert_eq!(profile, "default");
        assert_eq!(*tier, 1);
        assert_eq!(cup.segment, Segment::Futures);
        assert_eq!(cup.bids[0].price, dec("2000.8"));
    }

    // broken pu chain
    sender.offer(parse(&depth_message(512, 515, 511, "[]")));
    let stats = queue.drain(&registry, &scheduler).await;
    assert_eq!(stats.gaps, 1);
    assert!(registry.get_order_book(&symbol).await.is_none());

    // the tier-1 cup is withdrawn
    let cups = distributor.cups.lock().unwrap();
    let (_, tier, cup) = cups.last().unwrap();
    assert!(*tier < 1);
    assert!(cup.bids.is_empty());
}
