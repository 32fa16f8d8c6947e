//! Insider-trade source backed by the Financial Modeling Prep API.
//!
//! One source covers both markets: FMP indexes UK filings under bare
//! symbols, so LSE suffixes are stripped before querying. Requests go
//! through the shared scrape layer, so they are domain rate limited and
//! the response bodies land in the durable URL cache.

use std::sync::Arc;

use async_trait::async_trait;
use scrape_client::ScrapeClient;
use serde_json::{json, Value};
use signal_core::{InsiderSource, SignalError};

const FMP_BASE_URL: &str = "https://financialmodelingprep.com/api/v4";

pub struct FmpInsiderSource {
    client: Arc<ScrapeClient>,
    api_key: String,
}

impl FmpInsiderSource {
    /// `api_key` comes from `FMP_API_KEY`; an empty key makes every fetch
    /// fail fast, which the pipeline degrades to an empty trade list.
    pub fn new(client: Arc<ScrapeClient>, api_key: String) -> Self {
        Self { client, api_key }
    }

    pub fn available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl InsiderSource for FmpInsiderSource {
    async fn scrape(&self, symbol: &str) -> Result<Value, SignalError> {
        if !self.available() {
            return Err(SignalError::ApiError(
                "FMP_API_KEY not set, insider trades unavailable".to_string(),
            ));
        }

        let bare = symbol.replace(".L", "");
        let url = format!(
            "{FMP_BASE_URL}/insider-trading?symbol={bare}&page=0&apikey={}",
            self.api_key
        );
        let body = self.client.fetch(&url).await?;
        let data: Value = serde_json::from_str(&body)
            .map_err(|e| SignalError::ApiError(format!("FMP response for {bare}: {e}")))?;

        Ok(json!({ "insider_trades": map_trades(&data, &bare) }))
    }
}

/// Map the FMP response array into the trade shape the insider prompt is
/// written against. Non-array responses (error payloads) yield no trades.
fn map_trades(data: &Value, bare_symbol: &str) -> Vec<Value> {
    let Some(items) = data.as_array() else {
        tracing::warn!("Unexpected FMP insider payload for {}", bare_symbol);
        return Vec::new();
    };

    items
        .iter()
        .map(|item| {
            let field = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            json!({
                "filing_date": field("filingDate"),
                "trade_date": field("transactionDate"),
                "ticker": item.get("symbol").and_then(Value::as_str).unwrap_or(bare_symbol),
                "insider_name": field("reportingName"),
                "title": field("typeOfOwner"),
                "trade_type": map_transaction_type(&field("transactionType")),
                "price": number_string(item.get("price")),
                "qty": number_string(item.get("securitiesTransacted")),
                "owned": number_string(item.get("securitiesOwned")),
                "change_pct": "",
                "value": trade_value(item),
            })
        })
        .collect()
}

fn number_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Trade value = price × quantity, tolerating absent or bad data.
fn trade_value(item: &Value) -> String {
    let as_number = |key: &str| {
        item.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    };
    match (as_number("price"), as_number("securitiesTransacted")) {
        (Some(price), Some(qty)) if price != 0.0 && qty != 0.0 => {
            format!("{:.0}", price * qty)
        }
        _ => String::new(),
    }
}

fn map_transaction_type(fmp_type: &str) -> String {
    match fmp_type {
        "P-Purchase" => "Purchase",
        "S-Sale" => "Sale",
        "A-Award" => "Award",
        "M-Exempt" => "Exercise",
        other => other,
    }
    .to_string()
}
