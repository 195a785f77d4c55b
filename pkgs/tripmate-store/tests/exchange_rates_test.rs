// Copyright 2025 TripMate Team.
//
// Tests for ExchangeRateService

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tripmate_store::{
    ChatContext, ChatError, ExchangeRateService, RateOrigin, RateSource, StoreConfig,
};

struct FakeRateSource {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeRateSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RateSource for FakeRateSource {
    async fn fetch_rates(&self, base: &str) -> tripmate_store::Result<BTreeMap<String, f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::RateSource("service unavailable".into()));
        }
        assert_eq!(base, "TWD");
        Ok(BTreeMap::from([
            ("USD".to_string(), 0.03),
            ("JPY".to_string(), 5.0),
        ]))
    }
}

async fn context(dir: &std::path::Path, ttl_seconds: u64) -> Arc<ChatContext> {
    let config = StoreConfig {
        exchange_rate_ttl_seconds: ttl_seconds,
        ..common::test_config(dir)
    };
    Arc::new(ChatContext::open(config).await.expect("Failed to open context"))
}

#[tokio::test]
async fn test_live_rates_are_cached() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeRateSource::new();
    let service = ExchangeRateService::new(context(dir.path(), 3600).await, source.clone());

    let live = service.rates("twd").await.expect("Failed to load rates");
    assert_eq!(live.origin, RateOrigin::Live);
    assert_eq!(live.base, "TWD");
    assert_eq!(live.rate("TWD"), Some(1.0));
    assert_eq!(live.rate("USD"), Some(0.03));

    let cached = service.rates("TWD").await.unwrap();
    assert_eq!(cached.origin, RateOrigin::Cached);
    assert_eq!(cached.rates, live.rates);
    assert_eq!(cached.fetched_at, live.fetched_at);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_expired_cache_is_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeRateSource::new();
    let service = ExchangeRateService::new(context(dir.path(), 0).await, source.clone());

    assert_eq!(service.rates("TWD").await.unwrap().origin, RateOrigin::Live);
    assert_eq!(service.rates("TWD").await.unwrap().origin, RateOrigin::Live);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_stale_cache_survives_outage() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeRateSource::new();
    let service = ExchangeRateService::new(context(dir.path(), 0).await, source.clone());

    let live = service.rates("TWD").await.unwrap();
    source.set_failing(true);

    let stale = service.rates("TWD").await.unwrap();
    assert_eq!(stale.origin, RateOrigin::Cached);
    assert_eq!(stale.rates, live.rates);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_fallback_without_cache() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeRateSource::new();
    source.set_failing(true);
    let service = ExchangeRateService::new(context(dir.path(), 3600).await, source.clone());

    let table = service.rates("TWD").await.unwrap();
    assert_eq!(table.origin, RateOrigin::Fallback);
    assert_eq!(table.rates, tripmate_store::fallback_rates());

    let usd = service.rates("USD").await.unwrap();
    assert_eq!(usd.origin, RateOrigin::Fallback);
    assert!((usd.rate("USD").unwrap() - 1.0).abs() < 1e-12);

    let result = service.rates("XYZ").await;
    assert!(matches!(result, Err(ChatError::UnsupportedCurrency(_))));
}

#[tokio::test]
async fn test_offline_service_never_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let service = ExchangeRateService::offline(context(dir.path(), 3600).await);

    let table = service.rates("TWD").await.unwrap();
    assert_eq!(table.origin, RateOrigin::Fallback);
    assert_eq!(table.base, tripmate_store::BASE_CURRENCY);
}

#[tokio::test]
async fn test_convert() {
    let dir = tempfile::tempdir().unwrap();
    let source = FakeRateSource::new();
    let service = ExchangeRateService::new(context(dir.path(), 3600).await, source);

    let usd = service.convert(1000.0, "TWD", "usd").await.unwrap();
    assert!((usd - 30.0).abs() < 1e-9);

    let same = service.convert(250.0, "TWD", "TWD").await.unwrap();
    assert!((same - 250.0).abs() < 1e-9);

    let result = service.convert(10.0, "TWD", "EUR").await;
    assert!(matches!(result, Err(ChatError::UnsupportedCurrency(code)) if code == "EUR"));
}
