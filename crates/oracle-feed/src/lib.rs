#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! External price feed collaborator: an HTTP-backed ETH/USD ticker, plus a
//! mock implementation for local runs and tests.
//!
//! Mirrors `internal/infra/eth/coingecko.go` and `mock_ticker.go`: both are
//! hidden behind the same narrow `PriceTicker` contract so the Publisher
//! loop never has to know which one it's talking to (`price_ticker.mock`
//! in configuration selects the implementation).

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to fetch price: {0}")]
    FetchFailed(String),

    #[error("failed to fetch price: unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("failed to fetch price: could not decode response: {0}")]
    DecodeFailed(String),
}

/// A source of the current ETH/USD price, expressed as a decimal string to
/// avoid floating-point precision loss in transit.
#[async_trait]
pub trait PriceTicker: Send + Sync {
    async fn fetch_price(&self) -> Result<String, FeedError>;
}

#[derive(Debug, Deserialize)]
struct CoingeckoResponse {
    ethereum: EthereumPrice,
}

#[derive(Debug, Deserialize)]
struct EthereumPrice {
    // Deserialized as `serde_json::Number` (not f64) specifically to avoid
    // floating-point precision loss when re-printing the value as a string.
    usd: serde_json::Number,
}

/// Fetches the ETH/USD price from a CoinGecko-shaped HTTP endpoint.
pub struct HttpPriceTicker {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceTicker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PriceTicker for HttpPriceTicker {
    async fn fetch_price(&self) -> Result<String, FeedError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::FetchFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FeedError::UnexpectedStatus(resp.status().as_u16()));
        }

        let decoded: CoingeckoResponse = resp
            .json()
            .await
            .map_err(|e| FeedError::DecodeFailed(e.to_string()))?;

        Ok(decoded.ethereum.usd.to_string())
    }
}

/// Returns a uniformly random price in `[0, 4000)`, formatted to two decimal
/// places. Substituted for [`HttpPriceTicker`] when `price_ticker.mock` is set.
pub struct MockPriceTicker;

#[async_trait]
impl PriceTicker for MockPriceTicker {
    async fn fetch_price(&self) -> Result<String, FeedError> {
        let price: f64 = rand::random::<f64>() * 4000.0;
        Ok(format!("{price:.2}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_a_well_formed_coingecko_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"ethereum":{"usd":3123.45}}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let ticker = HttpPriceTicker::new(format!("{}/price", server.uri()));
        let price = ticker.fetch_price().await.unwrap();
        assert_eq!(price, "3123.45");
    }

    #[tokio::test]
    async fn non_200_status_is_a_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ticker = HttpPriceTicker::new(format!("{}/price", server.uri()));
        assert!(matches!(
            ticker.fetch_price().await,
            Err(FeedError::UnexpectedStatus(503))
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/price"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
            .mount(&server)
            .await;

        let ticker = HttpPriceTicker::new(format!("{}/price", server.uri()));
        assert!(matches!(
            ticker.fetch_price().await,
            Err(FeedError::DecodeFailed(_))
        ));
    }

    #[tokio::test]
    async fn mock_ticker_returns_price_in_range() {
        let ticker = MockPriceTicker;
        for _ in 0..20 {
            let price: f64 = ticker.fetch_price().await.unwrap().parse().unwrap();
            assert!((0.0..4000.0).contains(&price));
        }
    }
}
