//! Market data source backed by Yahoo Finance's public JSON endpoints.
//!
//! Covers the four primary fetches (fundamentals, technicals, analyst,
//! news), hybrid US/UK symbol resolution, current and historical prices
//! for recommendation capture and backtesting. Fetched chart/summary data
//! is memoized per symbol for the duration of one pipeline run; the
//! orchestrator calls [`reset_session`](signal_core::MarketDataSource::reset_session)
//! before each run.

pub mod indicators;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use signal_core::{DataMap, Market, MarketDataSource, NewsSource, SignalError};

use crate::indicators::{atr, bollinger_bands, perf, rsi, sma};

const BASE_URL: &str = "https://query1.finance.yahoo.com";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// Common LSE suffix patterns, tried in order. Some UK stocks carry no
// suffix at all, and a few use a bare trailing dot.
const UK_SUFFIX_PATTERNS: [&str; 4] = [".L", "", ".LN", "."];

// Exception mapping for the edge cases where the symbol root itself
// changes between exchanges.
const UK_EXCEPTION_MAPPINGS: [(&str, &str); 12] = [
    ("HSBC", "HSBA.L"),
    ("BP", "BP."),
    ("RELX", "REL.L"),
    ("LLOYDS", "LLOY.L"),
    ("SHEL", "SHEL.L"),
    ("ULVR", "ULVR.L"),
    ("BT", "BT.A.L"),
    ("TUI", "TUI.L"),
    ("RR", "RR.L"),
    ("BAE", "BAES.L"),
    ("ITV", "ITV.L"),
    ("WTW", "WTW.L"),
];

// ---------------------------------------------------------------------------
// Chart endpoint response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
    #[serde(default)]
    fifty_two_week_high: Option<f64>,
    #[serde(default)]
    fifty_two_week_low: Option<f64>,
    #[serde(default)]
    regular_market_volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    high: Option<Vec<Option<f64>>>,
    #[serde(default)]
    low: Option<Vec<Option<f64>>>,
    #[serde(default)]
    close: Option<Vec<Option<f64>>>,
}

/// Daily OHLCV series with null rows dropped.
#[derive(Debug, Default)]
struct PriceHistory {
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
}

fn build_price_history(quote: &ChartQuote) -> PriceHistory {
    let closes = quote.close.as_deref().unwrap_or_default();
    let highs = quote.high.as_deref().unwrap_or_default();
    let lows = quote.low.as_deref().unwrap_or_default();

    let mut history = PriceHistory::default();
    for (i, close) in closes.iter().enumerate() {
        let (Some(close), Some(high), Some(low)) = (
            *close,
            highs.get(i).copied().flatten(),
            lows.get(i).copied().flatten(),
        ) else {
            continue;
        };
        history.close.push(close);
        history.high.push(high);
        history.low.push(low);
    }
    history
}

/// Per-symbol data fetched once per pipeline run.
struct SymbolSession {
    meta: ChartMeta,
    history: PriceHistory,
    summary: Value,
    news: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Display coercion — values are rendered the way a screener page would
// show them, which is what the analysis prompts are written against.
// ---------------------------------------------------------------------------

fn fmt_number(value: f64) -> String {
    // Ratios coming from the summary endpoint are 0–1 floats.
    if value > -1.0 && value < 1.0 && value != 0.0 {
        format!("{:.2}%", value * 100.0)
    } else {
        format!("{value:.2}")
    }
}

fn fmt_pct(value: f64) -> String {
    format!("{value:.2}%")
}

/// Field mappings from quoteSummary modules to display labels.
const FUNDAMENTAL_FIELDS: [(&str, &str, &str); 20] = [
    ("summaryDetail", "trailingPE", "P/E"),
    ("summaryDetail", "forwardPE", "Forward P/E"),
    ("summaryDetail", "priceToSalesTrailing12Months", "P/S"),
    ("summaryDetail", "dividendYield", "Dividend Est."),
    ("summaryDetail", "payoutRatio", "Payout"),
    ("summaryDetail", "marketCap", "Market Cap"),
    ("defaultKeyStatistics", "trailingEps", "EPS (ttm)"),
    ("defaultKeyStatistics", "forwardEps", "EPS next Y"),
    ("defaultKeyStatistics", "priceToBook", "P/B"),
    ("defaultKeyStatistics", "enterpriseToEbitda", "EV/EBITDA"),
    ("defaultKeyStatistics", "pegRatio", "PEG"),
    ("defaultKeyStatistics", "bookValue", "Book/sh"),
    ("financialData", "totalRevenue", "Sales"),
    ("financialData", "revenueGrowth", "Sales Q/Q"),
    ("financialData", "grossMargins", "Gross Margin"),
    ("financialData", "operatingMargins", "Oper. Margin"),
    ("financialData", "profitMargins", "Profit Margin"),
    ("financialData", "returnOnAssets", "ROA"),
    ("financialData", "returnOnEquity", "ROE"),
    ("financialData", "debtToEquity", "Debt/Eq"),
];

const ANALYST_FIELDS: [(&str, &str, &str); 9] = [
    ("financialData", "targetMeanPrice", "Target Price"),
    ("financialData", "targetHighPrice", "Target High"),
    ("financialData", "targetLowPrice", "Target Low"),
    ("financialData", "recommendationMean", "Recom"),
    ("financialData", "currentPrice", "Price"),
    ("financialData", "numberOfAnalystOpinions", "Analyst Count"),
    ("defaultKeyStatistics", "heldPercentInsiders", "Insider Own"),
    ("defaultKeyStatistics", "heldPercentInstitutions", "Inst Own"),
    ("defaultKeyStatistics", "shortPercentOfFloat", "Short Float"),
];

fn raw_field(summary: &Value, module: &str, key: &str) -> Option<f64> {
    summary
        .pointer(&format!("/quoteSummary/result/0/{module}/{key}/raw"))
        .and_then(Value::as_f64)
}

fn map_summary_fields(summary: &Value, fields: &[(&str, &str, &str)]) -> DataMap {
    let mut out = DataMap::new();
    for (module, key, label) in fields {
        if let Some(value) = raw_field(summary, module, key) {
            out.insert(label.to_string(), Value::String(fmt_number(value)));
        }
    }
    out
}

fn build_technicals(meta: &ChartMeta, history: &PriceHistory) -> DataMap {
    let mut out = DataMap::new();
    let closes = &history.close;

    let price = meta.regular_market_price.or(closes.last().copied());
    if let Some(price) = price {
        out.insert("Price".to_string(), Value::String(format!("{price:.2}")));
    }
    if let Some(prev) = meta.chart_previous_close {
        out.insert("Prev Close".to_string(), Value::String(format!("{prev:.2}")));
        if let Some(price) = price {
            if prev != 0.0 {
                let change = (price - prev) / prev * 100.0;
                out.insert("Change".to_string(), Value::String(fmt_pct(change)));
            }
        }
    }
    if let Some(volume) = meta.regular_market_volume {
        out.insert("Volume".to_string(), Value::String(format!("{volume:.0}")));
    }

    let high52 = meta
        .fifty_two_week_high
        .or_else(|| history.high.iter().copied().reduce(f64::max));
    let low52 = meta
        .fifty_two_week_low
        .or_else(|| history.low.iter().copied().reduce(f64::min));
    if let Some(high) = high52 {
        out.insert("52W High".to_string(), Value::String(format!("{high:.2}")));
    }
    if let Some(low) = low52 {
        out.insert("52W Low".to_string(), Value::String(format!("{low:.2}")));
    }

    // Moving averages rendered as distance from price, screener-style.
    for (label, period) in [("SMA20", 20), ("SMA50", 50), ("SMA200", 200)] {
        if let Some(value) = sma(closes, period) {
            let rendered = match price {
                Some(price) if value != 0.0 => fmt_pct((price - value) / value * 100.0),
                _ => format!("{value:.2}"),
            };
            out.insert(label.to_string(), Value::String(rendered));
        }
    }

    if let Some(value) = rsi(closes, 14) {
        out.insert("RSI (14)".to_string(), Value::String(format!("{value:.2}")));
    }
    if let Some(value) = atr(&history.high, &history.low, closes, 14) {
        out.insert("ATR (14)".to_string(), Value::String(format!("{value:.2}")));
    }

    for (label, days) in [
        ("Perf Week", 5),
        ("Perf Month", 21),
        ("Perf Quarter", 63),
        ("Perf Half Y", 126),
        ("Perf Year", 252),
    ] {
        if let Some(value) = perf(closes, days) {
            out.insert(label.to_string(), Value::String(fmt_pct(value)));
        }
    }

    if let Some((upper, middle, lower)) = bollinger_bands(closes, 20, 2.0) {
        if middle != 0.0 {
            let bandwidth = (upper - lower) / middle * 100.0;
            out.insert("Volatility".to_string(), Value::String(fmt_pct(bandwidth)));
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooClient {
    client: reqwest::Client,
    /// Per-symbol memo, valid for one pipeline run.
    session: DashMap<String, Arc<SymbolSession>>,
    /// Resolved symbol → market mapping. Resolution results are durable
    /// (also persisted on the ticker row), so this survives resets.
    resolved: DashMap<String, (String, Market)>,
}

impl YahooClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            session: DashMap::new(),
            resolved: DashMap::new(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, SignalError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| SignalError::ApiError(e.to_string()))?
            .error_for_status()
            .map_err(|e| SignalError::ApiError(e.to_string()))?
            .json()
            .await
            .map_err(|e| SignalError::ApiError(e.to_string()))
    }

    async fn fetch_chart(&self, symbol: &str, query: &str) -> Result<ChartResult, SignalError> {
        let url = format!("{BASE_URL}/v8/finance/chart/{symbol}?{query}");
        let body = self.get_json(&url).await?;
        let response: ChartResponse = serde_json::from_value(body)
            .map_err(|e| SignalError::ApiError(format!("chart response for {symbol}: {e}")))?;
        response
            .chart
            .result
            .and_then(|mut results| (!results.is_empty()).then(|| results.remove(0)))
            .ok_or_else(|| SignalError::ApiError(format!("no chart data for {symbol}")))
    }

    async fn fetch_quote_summary(&self, symbol: &str) -> Result<Value, SignalError> {
        let url = format!(
            "{BASE_URL}/v10/finance/quoteSummary/{symbol}\
             ?modules=summaryDetail,financialData,defaultKeyStatistics"
        );
        self.get_json(&url).await
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<Value>, SignalError> {
        let url = format!("{BASE_URL}/v1/finance/search?q={symbol}&newsCount=10&quotesCount=0");
        let body = self.get_json(&url).await?;
        let items = body
            .get("news")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .iter()
            .map(|article| {
                json!({
                    "timestamp": article.get("providerPublishTime").cloned().unwrap_or_default(),
                    "title": article.get("title").cloned().unwrap_or_default(),
                    "url": article.get("link").cloned().unwrap_or_default(),
                    "publisher": article.get("publisher").cloned().unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Fetch-and-memoize everything needed for one symbol. The chart is
    /// required; summary and news degrade independently.
    async fn ensure_session(&self, symbol: &str) -> Result<Arc<SymbolSession>, SignalError> {
        if let Some(session) = self.session.get(symbol) {
            return Ok(session.clone());
        }

        let chart = self.fetch_chart(symbol, "range=1y&interval=1d").await?;
        let summary = match self.fetch_quote_summary(symbol).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Quote summary fetch failed for {}: {}", symbol, e);
                Value::Null
            }
        };
        let news = match self.fetch_news(symbol).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("News fetch failed for {}: {}", symbol, e);
                Vec::new()
            }
        };

        let history = chart
            .indicators
            .quote
            .first()
            .map(build_price_history)
            .unwrap_or_default();

        let session = Arc::new(SymbolSession {
            meta: chart.meta,
            history,
            summary,
            news,
        });
        self.session.insert(symbol.to_string(), session.clone());
        Ok(session)
    }

    /// Probe whether a candidate symbol trades anywhere Yahoo knows about.
    async fn probe_symbol(&self, symbol: &str) -> Option<ChartMeta> {
        let chart = self.fetch_chart(symbol, "range=5d&interval=1d").await.ok()?;
        chart.meta.regular_market_price.is_some().then_some(chart.meta)
    }

    async fn try_uk_patterns(&self, normalized: &str) -> Option<String> {
        if let Some((_, mapped)) = UK_EXCEPTION_MAPPINGS
            .iter()
            .find(|(root, _)| *root == normalized)
        {
            if self.probe_symbol(mapped).await.is_some() {
                tracing::debug!("Found UK symbol via exception mapping: {} -> {}", normalized, mapped);
                return Some(mapped.to_string());
            }
        }

        for suffix in UK_SUFFIX_PATTERNS {
            let candidate = format!("{normalized}{suffix}");
            if self.probe_symbol(&candidate).await.is_some() {
                tracing::debug!("Found UK symbol via pattern: {} -> {}", normalized, candidate);
                return Some(candidate);
            }
        }

        None
    }
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    async fn get_fundamentals(&self, symbol: &str) -> Result<DataMap, SignalError> {
        let session = self.ensure_session(symbol).await?;
        Ok(map_summary_fields(&session.summary, &FUNDAMENTAL_FIELDS))
    }

    async fn get_technicals(&self, symbol: &str) -> Result<DataMap, SignalError> {
        let session = self.ensure_session(symbol).await?;
        Ok(build_technicals(&session.meta, &session.history))
    }

    async fn get_analyst_data(&self, symbol: &str) -> Result<DataMap, SignalError> {
        let session = self.ensure_session(symbol).await?;
        let mut out = map_summary_fields(&session.summary, &ANALYST_FIELDS);
        if let Some(key) = session
            .summary
            .pointer("/quoteSummary/result/0/financialData/recommendationKey")
            .and_then(Value::as_str)
        {
            out.insert(
                "Recommendation Key".to_string(),
                Value::String(key.to_string()),
            );
        }
        Ok(out)
    }

    async fn get_news(&self, symbol: &str) -> Result<Vec<Value>, SignalError> {
        let session = self.ensure_session(symbol).await?;
        Ok(session.news.clone())
    }

    fn supports_resolution(&self) -> bool {
        true
    }

    async fn resolve_symbol(
        &self,
        raw_symbol: &str,
        preferred_market: Market,
    ) -> Result<(String, Market), SignalError> {
        if let Some(hit) = self.resolved.get(raw_symbol) {
            return Ok(hit.clone());
        }

        let normalized = raw_symbol.trim_end_matches('.').to_uppercase();

        if preferred_market == Market::Uk {
            if let Some(uk_symbol) = self.try_uk_patterns(&normalized).await {
                self.resolved
                    .insert(raw_symbol.to_string(), (uk_symbol.clone(), Market::Uk));
                return Ok((uk_symbol, Market::Uk));
            }
        }

        // Try as-is; covers US tickers and already-qualified symbols.
        if self.probe_symbol(raw_symbol).await.is_some() {
            let market = if raw_symbol.ends_with(".L")
                || raw_symbol.ends_with(".LN")
                || raw_symbol.ends_with('.')
            {
                Market::Uk
            } else {
                Market::Us
            };
            self.resolved
                .insert(raw_symbol.to_string(), (raw_symbol.to_string(), market));
            return Ok((raw_symbol.to_string(), market));
        }

        if preferred_market != Market::Uk {
            if let Some(uk_symbol) = self.try_uk_patterns(&normalized).await {
                self.resolved
                    .insert(raw_symbol.to_string(), (uk_symbol.clone(), Market::Uk));
                return Ok((uk_symbol, Market::Uk));
            }
        }

        Err(SignalError::SymbolNotFound(format!(
            "Ticker '{raw_symbol}' not found on US or UK exchanges"
        )))
    }

    async fn get_historical_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, SignalError> {
        let Some(start) = date.and_hms_opt(0, 0, 0) else {
            return Ok(None);
        };
        let period1 = start.and_utc().timestamp();
        let period2 = period1 + 7 * 24 * 3600;

        let query = format!("period1={period1}&period2={period2}&interval=1d");
        match self.fetch_chart(symbol, &query).await {
            Ok(chart) => {
                let close = chart
                    .indicators
                    .quote
                    .first()
                    .and_then(|q| q.close.as_ref())
                    .and_then(|closes| closes.iter().flatten().next().copied());
                Ok(close)
            }
            Err(e) => {
                tracing::warn!("Historical price lookup failed for {} @ {}: {}", symbol, date, e);
                Ok(None)
            }
        }
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Option<f64>, SignalError> {
        let session = self.ensure_session(symbol).await?;
        Ok(session
            .meta
            .regular_market_price
            .or(session.history.close.last().copied()))
    }

    fn reset_session(&self) {
        self.session.clear();
    }
}

/// The auxiliary news feed is the same memoized search-endpoint data,
/// wrapped in the single-shape result auxiliary sources produce.
#[async_trait]
impl NewsSource for YahooClient {
    async fn scrape(&self, symbol: &str) -> Result<Value, SignalError> {
        let articles = MarketDataSource::get_news(self, symbol).await?;
        Ok(json!({ "news_articles": articles }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_number_renders_ratios_as_percent() {
        assert_eq!(fmt_number(0.1234), "12.34%");
        assert_eq!(fmt_number(-0.05), "-5.00%");
        assert_eq!(fmt_number(29.9), "29.90");
        assert_eq!(fmt_number(0.0), "0.00");
    }

    #[test]
    fn price_history_drops_null_rows() {
        let quote = ChartQuote {
            high: Some(vec![Some(102.0), None, Some(104.0)]),
            low: Some(vec![Some(99.0), Some(100.0), Some(101.0)]),
            close: Some(vec![Some(101.0), Some(102.0), Some(103.0)]),
        };
        let history = build_price_history(&quote);
        assert_eq!(history.close, vec![101.0, 103.0]);
        assert_eq!(history.high, vec![102.0, 104.0]);
    }

    #[test]
    fn technicals_include_price_and_momentum() {
        let meta = ChartMeta {
            regular_market_price: Some(110.0),
            chart_previous_close: Some(108.0),
            regular_market_volume: Some(2_000_000.0),
            ..Default::default()
        };
        let n = 260;
        let history = PriceHistory {
            high: (0..n).map(|i| 101.0 + i as f64 * 0.1).collect(),
            low: (0..n).map(|i| 99.0 + i as f64 * 0.1).collect(),
            close: (0..n).map(|i| 100.0 + i as f64 * 0.1).collect(),
        };

        let technicals = build_technicals(&meta, &history);
        assert_eq!(technicals["Price"], "110.00");
        assert!(technicals.contains_key("Change"));
        assert!(technicals.contains_key("SMA20"));
        assert!(technicals.contains_key("SMA200"));
        assert!(technicals.contains_key("RSI (14)"));
        assert!(technicals.contains_key("ATR (14)"));
        assert!(technicals.contains_key("Perf Year"));
        assert!(technicals.contains_key("Volatility"));
        // Rising series: weekly performance cannot be negative.
        let week = technicals["Perf Week"].as_str().unwrap();
        assert!(!week.starts_with('-'));
    }

    #[test]
    fn technicals_on_empty_history_use_meta_only() {
        let meta = ChartMeta {
            regular_market_price: Some(50.0),
            fifty_two_week_high: Some(60.0),
            fifty_two_week_low: Some(40.0),
            ..Default::default()
        };
        let technicals = build_technicals(&meta, &PriceHistory::default());
        assert_eq!(technicals["Price"], "50.00");
        assert_eq!(technicals["52W High"], "60.00");
        assert!(!technicals.contains_key("RSI (14)"));
    }

    #[test]
    fn summary_field_mapping() {
        let summary = json!({
            "quoteSummary": { "result": [{
                "summaryDetail": { "trailingPE": { "raw": 29.9, "fmt": "29.90" } },
                "financialData": { "profitMargins": { "raw": 0.25, "fmt": "25%" } }
            }]}
        });
        let mapped = map_summary_fields(&summary, &FUNDAMENTAL_FIELDS);
        assert_eq!(mapped["P/E"], "29.90");
        assert_eq!(mapped["Profit Margin"], "25.00%");
        assert!(!mapped.contains_key("ROE"));
    }

    #[test]
    fn uk_exception_mapping_contains_edge_cases() {
        assert!(UK_EXCEPTION_MAPPINGS.iter().any(|(r, m)| *r == "HSBC" && *m == "HSBA.L"));
        assert!(UK_EXCEPTION_MAPPINGS.iter().any(|(r, m)| *r == "BP" && *m == "BP."));
    }
}
