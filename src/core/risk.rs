use serde::{Deserialize, Serialize};

/// Risk band derived from a normalized 0..=1 score. `Unknown` covers queries
/// where no source produced a score; it never satisfies an alert threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Clean,
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Clean => "clean",
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
            RiskBand::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "clean" => Some(RiskBand::Clean),
            "low" => Some(RiskBand::Low),
            "medium" => Some(RiskBand::Medium),
            "high" => Some(RiskBand::High),
            "unknown" => Some(RiskBand::Unknown),
            _ => None,
        }
    }

    /// Ordinal position for threshold comparison; `Unknown` has none.
    fn ordinal(&self) -> Option<u8> {
        match self {
            RiskBand::Clean => Some(0),
            RiskBand::Low => Some(1),
            RiskBand::Medium => Some(2),
            RiskBand::High => Some(3),
            RiskBand::Unknown => None,
        }
    }

    /// Whether this band meets or exceeds `threshold`. `Unknown` on either
    /// side never matches.
    pub fn meets(&self, threshold: RiskBand) -> bool {
        match (self.ordinal(), threshold.ordinal()) {
            (Some(band), Some(floor)) => band >= floor,
            _ => false,
        }
    }
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed banding thresholds, provider agnostic. Source clients normalize to
/// the 0..=1 scale before this runs.
pub fn band(score: Option<f64>) -> RiskBand {
    match score {
        None => RiskBand::Unknown,
        Some(s) if s >= 0.8 => RiskBand::High,
        Some(s) if s >= 0.5 => RiskBand::Medium,
        Some(s) if s >= 0.2 => RiskBand::Low,
        Some(_) => RiskBand::Clean,
    }
}
