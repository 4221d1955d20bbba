//! Upstream indicator source.
//!
//! The regime engine is fed from an external indicator service. Fetch
//! failures degrade to neutral defaults instead of propagating: a missing
//! upstream must never take the serving path down.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{now_ts, Config};

/// One raw observation of the macro indicator set.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IndicatorObservation {
    pub momentum: f64,
    pub volatility: f64,
    pub funding: f64,
    pub breadth: f64,
    pub stress: f64,
    pub price: f64,
    pub atr: f64,
    #[serde(default)]
    pub ts: u64,
}

impl IndicatorObservation {
    /// Neutral placeholder used when the upstream is unreachable.
    pub fn neutral(ts: u64) -> Self {
        Self {
            momentum: 0.0,
            volatility: 0.0,
            funding: 0.0,
            breadth: 0.5,
            stress: 0.0,
            price: 0.0,
            atr: 0.0,
            ts,
        }
    }
}

#[async_trait]
pub trait IndicatorSource: Send + Sync {
    async fn fetch(&self) -> Result<IndicatorObservation>;
}

pub struct HttpIndicatorSource {
    client: Client,
    base: String,
}

impl HttpIndicatorSource {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.indicator_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: cfg.indicator_base.clone(),
        }
    }
}

#[async_trait]
impl IndicatorSource for HttpIndicatorSource {
    async fn fetch(&self) -> Result<IndicatorObservation> {
        let url = format!("{}/api/v10/indicators/latest", self.base);
        let mut obs: IndicatorObservation =
            self.client.get(&url).send().await?.error_for_status()?.json().await?;
        if obs.ts == 0 {
            obs.ts = now_ts();
        }
        Ok(obs)
    }
}

/// Stub source for tests and runs without an upstream.
pub struct NullIndicatorSource;

#[async_trait]
impl IndicatorSource for NullIndicatorSource {
    async fn fetch(&self) -> Result<IndicatorObservation> {
        Ok(IndicatorObservation::neutral(now_ts()))
    }
}

/// Fetch one observation, degrading to neutral on failure. The bool is
/// true when the neutral fallback was used.
pub async fn fetch_or_neutral(source: &dyn IndicatorSource) -> (IndicatorObservation, bool) {
    match source.fetch().await {
        Ok(obs) => (obs, false),
        Err(_) => (IndicatorObservation::neutral(now_ts()), true),
    }
}
