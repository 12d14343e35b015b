use serde::Deserialize;

use crate::config::SourceConfig;
use crate::core::error::SentryError;
use crate::core::types::{IocQuery, SourceResult};

pub mod abuseipdb;
pub mod otx;
pub mod virustotal;

/// Wire format a configured source speaks. Each kind owns its endpoint
/// layout, auth header, and raw-to-score mapping in its own module.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    VirusTotal,
    AbuseIpDb,
    Otx,
}

/// Uniform wrapper over one external provider. `query` never fails: every
/// failure mode is folded into a `SourceResult`. Timeouts are the engine's
/// concern, not ours.
pub struct SourceClient {
    config: SourceConfig,
}

impl SourceClient {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    pub async fn query(&self, http: &reqwest::Client, query: &IocQuery) -> SourceResult {
        if !self.config.supports(query.ioc_type) {
            return SourceResult::not_supported(&self.config.name, query.ioc_type);
        }
        let outcome = match self.config.kind {
            ProviderKind::VirusTotal => virustotal::query(http, &self.config, query).await,
            ProviderKind::AbuseIpDb => abuseipdb::query(http, &self.config, query).await,
            ProviderKind::Otx => otx::query(http, &self.config, query).await,
        };
        match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("source {} error: {}", self.config.name, err);
                SourceResult::error(&self.config.name, err.to_string())
            }
        }
    }
}

pub(crate) fn require_api_key(config: &SourceConfig) -> Result<&str, SentryError> {
    config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| SentryError::Source(format!("{}: api key required", config.name)))
}
