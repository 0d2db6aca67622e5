//! BTC-USD rate from the CoinGecko simple-price endpoint. Unauthenticated
//! and rate limited; callers treat it as best effort.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::provider::PriceSource;

const SIMPLE_PRICE_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd";

#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    bitcoin: UsdQuote,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

pub struct CoingeckoSource {
    http: reqwest::Client,
    url: String,
}

impl CoingeckoSource {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            url: SIMPLE_PRICE_URL.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for CoingeckoSource {
    async fn btc_usd(&self) -> Result<f64> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("price request failed")?
            .error_for_status()
            .context("price API returned an error status")?;
        let parsed: SimplePriceResponse = response
            .json()
            .await
            .context("parsing price response")?;
        Ok(parsed.bitcoin.usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let parsed: SimplePriceResponse =
            serde_json::from_str(r#"{"bitcoin":{"usd":97123.45}}"#).unwrap();
        assert_eq!(parsed.bitcoin.usd, 97_123.45);
    }
}
