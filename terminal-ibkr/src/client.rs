//! IBKR bridge REST client
//!
//! Fetches historical bars from the bridge's `/api/history` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use terminal_core::{HistorySource, RawBar, TerminalError, Timeframe};
use tracing::{debug, instrument};

use crate::types::{HistoryRequest, HistoryResponse, DEFAULT_API_BASE};

/// IBKR bridge API client
#[derive(Clone, Debug)]
pub struct IbkrClient {
    client: Client,
    base_url: String,
}

impl IbkrClient {
    /// Create a client for the bridge at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request historical bars
    #[instrument(skip(self), fields(symbol = %request.symbol, bar_size = %request.bar_size))]
    pub async fn get_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<HistoryResponse, TerminalError> {
        let url = format!("{}/api/history", self.base_url);

        debug!("Fetching history from: {}", url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TerminalError::network(format!("Failed to fetch history: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TerminalError::api(format!(
                "IBKR bridge error ({}): {}",
                status, body
            )));
        }

        let history: HistoryResponse = response
            .json()
            .await
            .map_err(|e| TerminalError::parse(format!("Failed to parse history response: {}", e)))?;

        debug!("Received {} bars for {}", history.bars.len(), request.symbol);

        Ok(history)
    }
}

impl Default for IbkrClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

#[async_trait]
impl HistorySource for IbkrClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<RawBar>, TerminalError> {
        let request = HistoryRequest::for_timeframe(symbol, timeframe).ok_or_else(|| {
            TerminalError::config(format!("No native bar size for timeframe {}", timeframe))
        })?;

        Ok(self.get_history(&request).await?.bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = IbkrClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_unmapped_timeframe_never_hits_network() {
        // Nothing listens on this port; a request would surface as a network error
        let client = IbkrClient::new("http://127.0.0.1:9");
        let err = client
            .fetch_bars("AAPL", Timeframe::TwelveHours)
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::Config(_)));
    }
}
