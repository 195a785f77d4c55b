//! Currency conversion backed by a cached rate table
//!
//! Rates are looked up per base currency. A cached table younger than the
//! configured TTL is served as-is; otherwise the rate source is asked for a
//! fresh table, which replaces the cache. When the source is unreachable the
//! stale cache is served, and without any cache the built-in table is used.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::from_millis;
use crate::context::ChatContext;
use crate::entities::exchange_rates;
use crate::error::{ChatError, Result};

/// Home currency of the built-in table
pub const BASE_CURRENCY: &str = "TWD";

/// Built-in rates: units of each currency per one TWD
pub fn fallback_rates() -> BTreeMap<String, f64> {
    [
        ("TWD", 1.0),
        ("USD", 0.031),
        ("EUR", 0.029),
        ("JPY", 4.75),
        ("KRW", 42.5),
        ("CNY", 0.22),
        ("HKD", 0.24),
        ("GBP", 0.025),
        ("THB", 1.12),
        ("SGD", 0.042),
        ("AUD", 0.048),
        ("VND", 780.0),
        ("MYR", 0.146),
        ("PHP", 1.76),
    ]
    .into_iter()
    .map(|(code, rate)| (code.to_string(), rate))
    .collect()
}

/// Where a rate table came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateOrigin {
    Live,
    Cached,
    Fallback,
}

/// Units of each currency per one unit of `base`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    pub base: String,
    pub rates: BTreeMap<String, f64>,
    pub fetched_at: DateTime<Utc>,
    pub origin: RateOrigin,
}

impl RateTable {
    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }
}

/// Provider of live exchange rates
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self, base: &str) -> Result<BTreeMap<String, f64>>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: BTreeMap<String, f64>,
}

/// Rate source speaking the `{"rates": {...}}` JSON shape over HTTP
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRateSource {
    /// `endpoint` may contain `{base}`, replaced by the requested base currency
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChatError::RateSource(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url_for(&self, base: &str) -> String {
        self.endpoint.replace("{base}", base)
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_rates(&self, base: &str) -> Result<BTreeMap<String, f64>> {
        let url = self.url_for(base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::RateSource(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ChatError::RateSource(format!(
                "rate request failed with status {}: {url}",
                response.status()
            )));
        }

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| ChatError::RateSource(format!("failed to parse rates from {url}: {e}")))?;
        if body.rates.is_empty() {
            return Err(ChatError::RateSource(format!("no rates returned by {url}")));
        }
        Ok(body.rates)
    }
}

/// Cached exchange-rate lookups and conversions
#[derive(Clone)]
pub struct ExchangeRateService {
    ctx: Arc<ChatContext>,
    source: Option<Arc<dyn RateSource>>,
}

impl ExchangeRateService {
    pub fn new(ctx: Arc<ChatContext>, source: Arc<dyn RateSource>) -> Self {
        Self {
            ctx,
            source: Some(source),
        }
    }

    /// Service that only serves the cache and the built-in table
    pub fn offline(ctx: Arc<ChatContext>) -> Self {
        Self { ctx, source: None }
    }

    fn ttl_millis(&self) -> i64 {
        let seconds = self.ctx.config().exchange_rate_ttl_seconds;
        i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub async fn rates(&self, base: &str) -> Result<RateTable> {
        let base = normalize_code(base)?;
        let cached = self.load_cached(&base).await?;
        let now = self.ctx.now_millis();

        if let Some(table) = &cached {
            let age = now - table.fetched_at.timestamp_millis();
            if age < self.ttl_millis() {
                debug!("Serving cached {} rates ({} ms old)", base, age);
                return Ok(table.clone());
            }
        }

        if let Some(source) = &self.source {
            match source.fetch_rates(&base).await {
                Ok(mut rates) => {
                    rates.insert(base.clone(), 1.0);
                    self.store(&base, &rates, now).await?;
                    info!("Fetched {} live rates for {}", rates.len(), base);
                    return Ok(RateTable {
                        base,
                        rates,
                        fetched_at: from_millis(now),
                        origin: RateOrigin::Live,
                    });
                }
                Err(e) => warn!("Could not refresh {} rates: {}", base, e),
            }
        }

        if let Some(table) = cached {
            debug!("Serving stale cached {} rates", base);
            return Ok(table);
        }

        debug!("Serving built-in {} rates", base);
        let rates = derive_table(&fallback_rates(), &base)
            .ok_or_else(|| ChatError::UnsupportedCurrency(base.clone()))?;
        Ok(RateTable {
            base,
            rates,
            fetched_at: from_millis(now),
            origin: RateOrigin::Fallback,
        })
    }

    /// Convert `amount` of `from` into `to`
    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64> {
        let to = normalize_code(to)?;
        let table = self.rates(from).await?;
        let rate = table
            .rate(&to)
            .ok_or_else(|| ChatError::UnsupportedCurrency(to.clone()))?;
        Ok(amount * rate)
    }

    async fn load_cached(&self, base: &str) -> Result<Option<RateTable>> {
        let Some(row) = exchange_rates::Entity::find_by_id(base.to_string())
            .one(self.ctx.db())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(RateTable {
            base: row.base,
            rates: serde_json::from_str(&row.rates_json)?,
            fetched_at: from_millis(row.fetched_at),
            origin: RateOrigin::Cached,
        }))
    }

    async fn store(&self, base: &str, rates: &BTreeMap<String, f64>, fetched_at: i64) -> Result<()> {
        let row = exchange_rates::ActiveModel {
            base: Set(base.to_string()),
            rates_json: Set(serde_json::to_string(rates)?),
            fetched_at: Set(fetched_at),
        };
        exchange_rates::Entity::insert(row)
            .on_conflict(
                OnConflict::column(exchange_rates::Column::Base)
                    .update_columns([
                        exchange_rates::Column::RatesJson,
                        exchange_rates::Column::FetchedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.ctx.db())
            .await?;
        Ok(())
    }
}

/// Upper-case ISO code; rejects anything that is not three ASCII letters
fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ChatError::UnsupportedCurrency(code));
    }
    Ok(code)
}

/// Re-express a table quoted against one base against `base` instead
fn derive_table(table: &BTreeMap<String, f64>, base: &str) -> Option<BTreeMap<String, f64>> {
    let pivot = *table.get(base)?;
    if pivot <= 0.0 {
        return None;
    }
    Some(
        table
            .iter()
            .map(|(code, rate)| (code.clone(), rate / pivot))
            .collect(),
    )
}
