//! BTC-USD price feed.
//!
//! Refreshes the rate on a fixed timer. A failed fetch keeps the last
//! known rate and flags it stale; consumers treat the rate as best effort
//! and fall back to sats-only display when none is available. Nothing
//! here ever blocks invoice creation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::provider::PriceSource;

/// Latest known rate and its freshness.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceState {
    pub btc_usd: Option<f64>,
    /// Set when the most recent fetch failed.
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    /// How often to refresh the rate.
    ///
    /// Default: 60 seconds
    pub refresh_interval: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Periodically fetched BTC-USD rate. Cloning shares the same state.
pub struct PriceFeed {
    state: Arc<Mutex<PriceState>>,
    source: Arc<dyn PriceSource>,
    config: PriceConfig,
}

impl Clone for PriceFeed {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            source: Arc::clone(&self.source),
            config: self.config.clone(),
        }
    }
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, config: PriceConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(PriceState::default())),
            source,
            config,
        }
    }

    /// Starts the refresh loop as a background task. The first fetch
    /// happens immediately, then once per interval. Abort the handle to
    /// stop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(feed.config.refresh_interval);
            loop {
                interval.tick().await;
                feed.refresh_once().await;
            }
        })
    }

    /// Fetches the rate once. Failures retain the last known rate.
    pub async fn refresh_once(&self) {
        match self.source.btc_usd().await {
            Ok(rate) => {
                let mut state = self.state.lock().unwrap();
                state.btc_usd = Some(rate);
                state.stale = false;
                debug!("BTC-USD rate refreshed: {}", rate);
            }
            Err(e) => {
                self.state.lock().unwrap().stale = true;
                warn!("BTC-USD rate fetch failed: {:#}", e);
            }
        }
    }

    /// Latest known rate, possibly stale. `None` until the first
    /// successful fetch.
    pub fn rate(&self) -> Option<f64> {
        self.state.lock().unwrap().btc_usd
    }

    pub fn state(&self) -> PriceState {
        *self.state.lock().unwrap()
    }
}
