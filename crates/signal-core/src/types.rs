use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loosely-typed payload exchanged with data sources and the reasoning
/// provider. Object key order is BTreeMap-sorted by serde_json, which keeps
/// serialized forms (and therefore content hashes) deterministic.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// The seven analytical dimensions scored independently before synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Fundamentals,
    AnalystConsensus,
    InsiderActivity,
    Technicals,
    Sentiment,
    SectorContext,
    RiskAssessment,
}

impl SignalCategory {
    /// All seven categories, in weight-table order.
    pub const ALL: [SignalCategory; 7] = [
        SignalCategory::Fundamentals,
        SignalCategory::AnalystConsensus,
        SignalCategory::InsiderActivity,
        SignalCategory::Technicals,
        SignalCategory::Sentiment,
        SignalCategory::SectorContext,
        SignalCategory::RiskAssessment,
    ];

    /// The five categories scored directly from their own data slice,
    /// in pipeline order. Sector context and risk assessment follow with
    /// their own keying rules.
    pub const PRIMARY: [SignalCategory; 5] = [
        SignalCategory::Fundamentals,
        SignalCategory::AnalystConsensus,
        SignalCategory::InsiderActivity,
        SignalCategory::Technicals,
        SignalCategory::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Fundamentals => "fundamentals",
            SignalCategory::AnalystConsensus => "analyst_consensus",
            SignalCategory::InsiderActivity => "insider_activity",
            SignalCategory::Technicals => "technicals",
            SignalCategory::Sentiment => "sentiment",
            SignalCategory::SectorContext => "sector_context",
            SignalCategory::RiskAssessment => "risk_assessment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence level reported by the reasoning provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory recommendation label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Buy => "buy",
            Recommendation::Hold => "hold",
            Recommendation::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing market for a ticker. UK tickers route to UK-specific sources
/// and carry LSE-style resolved symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "UK")]
    Uk,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Us => "US",
            Market::Uk => "UK",
        }
    }

    /// Parse a stored market string; anything unrecognized falls back to US.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("UK") {
            Market::Uk
        } else {
            Market::Us
        }
    }
}

impl Default for Market {
    fn default() -> Self {
        Market::Us
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub market: Market,
    /// Exchange-qualified symbol (e.g. `VOD.L`), filled lazily on first
    /// successful resolution.
    pub resolved_symbol: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
}

/// One LLM-scored category result, append-only. Doubles as the auditable
/// history and the content-addressed cache lookup target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub symbol: String,
    pub category: SignalCategory,
    pub score: f64,
    pub confidence: Confidence,
    pub narrative: String,
    pub raw_data: Option<String>,
    pub input_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The final recommendation for a ticker at one point in time, append-only.
/// The recommendation string is persisted exactly as the reasoning provider
/// returned it (only the fallback path is enum-derived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub id: i64,
    pub symbol: String,
    pub overall_score: f64,
    pub recommendation: String,
    pub narrative: String,
    /// Serialized category → score snapshot.
    pub signal_scores: String,
    pub created_at: DateTime<Utc>,
}

/// Lightweight historical record consumed by the backtester. A null
/// `price_at_rec` marks the row as not backtestable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: i64,
    pub symbol: String,
    pub recommendation: String,
    pub overall_score: f64,
    pub price_at_rec: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Progress event streamed by the orchestrator. This is the sole output
/// contract of a pipeline run; the wire shape is consumed as-is by UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub symbol: String,
    pub step: String,
    pub category: Option<SignalCategory>,
    #[serde(default)]
    pub done: bool,
}

impl ProgressEvent {
    pub fn stage(symbol: &str, step: impl Into<String>, category: Option<SignalCategory>) -> Self {
        Self {
            symbol: symbol.to_string(),
            step: step.into(),
            category,
            done: false,
        }
    }

    pub fn terminal(symbol: &str, step: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            step: step.into(),
            category: None,
            done: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for cat in SignalCategory::ALL {
            assert_eq!(SignalCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(SignalCategory::parse("unknown"), None);
    }

    #[test]
    fn category_serde_uses_snake_case() {
        let json = serde_json::to_string(&SignalCategory::AnalystConsensus).unwrap();
        assert_eq!(json, "\"analyst_consensus\"");
    }

    #[test]
    fn progress_event_wire_shape() {
        let event = ProgressEvent::stage("AAPL", "Analyzing fundamentals...", Some(SignalCategory::Fundamentals));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["category"], "fundamentals");
        assert_eq!(value["done"], false);

        let terminal = ProgressEvent::terminal("AAPL", "Complete");
        let value = serde_json::to_value(&terminal).unwrap();
        assert!(value["category"].is_null());
        assert_eq!(value["done"], true);
    }

    #[test]
    fn market_parse_defaults_to_us() {
        assert_eq!(Market::parse("UK"), Market::Uk);
        assert_eq!(Market::parse("uk"), Market::Uk);
        assert_eq!(Market::parse("US"), Market::Us);
        assert_eq!(Market::parse(""), Market::Us);
    }
}
