use async_trait::async_trait;
use serde_json::Value;
use signal_core::{Market, SectorSource, SignalError};

/// Stand-in sector source for deployments without a sector data feed
/// wired in. Every fetch fails, which the pipeline degrades to empty
/// sector context.
pub struct DisabledSectorSource;

#[async_trait]
impl SectorSource for DisabledSectorSource {
    async fn scrape(
        &self,
        _symbol: &str,
        _sector: Option<&str>,
        _market: Market,
    ) -> Result<Value, SignalError> {
        Err(SignalError::ApiError(
            "no sector source configured".to_string(),
        ))
    }
}
