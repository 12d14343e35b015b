use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::risk::RiskBand;

/// Indicator classes the engine can evaluate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IocType {
    Ip,
    Domain,
    Url,
    Hash,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Ip => "ip",
            IocType::Domain => "domain",
            IocType::Url => "url",
            IocType::Hash => "hash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ip" => Some(IocType::Ip),
            "domain" => Some(IocType::Domain),
            "url" => Some(IocType::Url),
            "hash" => Some(IocType::Hash),
            _ => None,
        }
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable query input. The value is never mutated; lowercasing happens
/// only when building cache keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IocQuery {
    pub ioc_type: IocType,
    pub ioc_value: String,
}

impl IocQuery {
    pub fn new(ioc_type: IocType, ioc_value: impl Into<String>) -> Self {
        Self {
            ioc_type,
            ioc_value: ioc_value.into(),
        }
    }
}

/// Outcome class for one (query, source) attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Error,
    NotSupported,
    Skipped,
}

/// One provider's verdict for one query. Produced exactly once per attempt,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub status: SourceStatus,
    /// Normalized to [0, 1] by the owning source client.
    pub risk_score: Option<f64>,
    pub description: String,
    /// Provider payload, validated by the client that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl SourceResult {
    pub fn error(source: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Error,
            risk_score: None,
            description: description.into(),
            raw: None,
        }
    }

    pub fn skipped(source: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Skipped,
            risk_score: None,
            description: description.into(),
            raw: None,
        }
    }

    pub fn not_supported(source: impl Into<String>, ioc_type: IocType) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::NotSupported,
            risk_score: None,
            description: format!("ioc type '{ioc_type}' not supported"),
            raw: None,
        }
    }
}

/// Full provenance of one aggregation: every enabled source appears exactly
/// once, whatever its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub ioc_type: IocType,
    pub ioc_value: String,
    pub overall_risk: RiskBand,
    pub sources: Vec<SourceResult>,
    pub queried_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub check_interval_minutes: i64,
    pub notification_enabled: bool,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Watchlist {
    /// Due when active and the interval has elapsed since the last completed
    /// run. A watchlist that has never been checked is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_checked_at {
            None => true,
            Some(last) => (now - last).num_minutes() >= self.check_interval_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistAsset {
    pub id: String,
    pub watchlist_id: String,
    pub ioc_type: IocType,
    pub ioc_value: String,
    /// `None` means the asset never alerts from checks (still checkable).
    pub risk_threshold: Option<RiskBand>,
    pub is_active: bool,
}

/// Append-only audit row, one per completed check attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCheckHistory {
    pub id: String,
    pub asset_id: String,
    pub check_date: DateTime<Utc>,
    pub risk_band: RiskBand,
    pub sources_checked: Vec<String>,
    pub alert_triggered: bool,
    /// Projection of the aggregation that produced this row.
    pub intel: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub watchlist_id: Option<String>,
    pub asset_id: Option<String>,
    pub severity: RiskBand,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
