use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::{DataMap, Market, SignalError};

/// A reasoning engine that accepts a text prompt and returns a
/// loosely-structured result.
///
/// Implementations never return `Err`: subprocess failures, missing
/// binaries, and unparseable output are folded into the result object as
/// an `error` key (or `narrative` + `parse_error`), which downstream
/// validation tolerates. The orchestrator depends only on this trait.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn analyze(&self, prompt: &str) -> Value;
}

/// Primary market data source: fundamentals, technicals, analyst data and
/// provider-native news for a resolved symbol, plus historical prices for
/// backtesting. Each fetch is independently failable.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_fundamentals(&self, symbol: &str) -> Result<DataMap, SignalError>;

    async fn get_technicals(&self, symbol: &str) -> Result<DataMap, SignalError>;

    async fn get_analyst_data(&self, symbol: &str) -> Result<DataMap, SignalError>;

    async fn get_news(&self, symbol: &str) -> Result<Vec<Value>, SignalError>;

    /// Whether this source can resolve bare tickers into
    /// exchange-qualified symbols.
    fn supports_resolution(&self) -> bool {
        false
    }

    /// Resolve a bare ticker into `(resolved_symbol, market)`.
    /// Returns `SignalError::SymbolNotFound` when no match exists on any
    /// known exchange.
    async fn resolve_symbol(
        &self,
        raw_symbol: &str,
        _preferred_market: Market,
    ) -> Result<(String, Market), SignalError> {
        Err(SignalError::InvalidData(format!(
            "symbol resolution not supported (asked for '{raw_symbol}')"
        )))
    }

    /// Closing price on (or nearest after) the given date. `None` means the
    /// source has no data for that symbol/date, which callers treat as an
    /// eligible-but-unknown outcome rather than an error.
    async fn get_historical_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, SignalError>;

    /// Most recent trade price, if the source has one.
    async fn get_current_price(&self, symbol: &str) -> Result<Option<f64>, SignalError>;

    /// Drop any per-run memoized data. The orchestrator calls this at the
    /// top of every pipeline run so nothing is served across tickers or
    /// calendar days.
    fn reset_session(&self) {}
}

/// Insider-trading activity source. The result object carries an
/// `insider_trades` list.
#[async_trait]
pub trait InsiderSource: Send + Sync {
    async fn scrape(&self, symbol: &str) -> Result<Value, SignalError>;
}

/// Supplementary news source. The result object carries a `news_articles`
/// list.
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn scrape(&self, symbol: &str) -> Result<Value, SignalError>;
}

/// Sector-context source, parameterized by the ticker's sector and market.
/// The result object carries `sector_performance` and `sector_news` lists.
#[async_trait]
pub trait SectorSource: Send + Sync {
    async fn scrape(
        &self,
        symbol: &str,
        sector: Option<&str>,
        market: Market,
    ) -> Result<Value, SignalError>;
}
