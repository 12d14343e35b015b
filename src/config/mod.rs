use std::{fs, path::Path};

use serde::Deserialize;

use crate::core::error::SentryError;
use crate::core::types::IocType;
use crate::sources::ProviderKind;

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    3_600
}

fn default_quota_window() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    /// Whether scheduled watchlist runs may spend this source's quota.
    /// Manual queries ignore the flag.
    #[serde(default = "default_true")]
    pub auto: bool,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub supported_types: Vec<IocType>,
    #[serde(default = "default_ttl")]
    pub cache_ttl_seconds: u64,
    pub quota_max_requests: u32,
    #[serde(default = "default_quota_window")]
    pub quota_window_seconds: u64,
}

impl SourceConfig {
    pub fn supports(&self, ioc_type: IocType) -> bool {
        self.supported_types.contains(&ioc_type)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Per-source call timeout, enforced by the engine.
    pub per_source_timeout_ms: u64,
    /// Upper bound on one whole aggregation.
    pub total_deadline_ms: u64,
    pub max_concurrent_requests: usize,
    pub user_agent: String,
    /// Scheduler wake-up cadence; each watchlist still honors its own
    /// check interval.
    pub scheduler_tick_seconds: u64,
    pub db_path: String,
    pub sources: Vec<SourceConfig>,
}

pub fn load_config(path: Option<&str>) -> Result<AppConfig, SentryError> {
    let default_path = Path::new("config/threat-sentry.toml");
    let path = path.map(Path::new).unwrap_or(default_path);

    if !path.exists() {
        return Ok(default_config());
    }

    let content = fs::read_to_string(path).map_err(|e| SentryError::Config(e.to_string()))?;
    let cfg: AppConfig =
        toml::from_str(&content).map_err(|e| SentryError::Config(e.to_string()))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &AppConfig) -> Result<(), SentryError> {
    if cfg.sources.is_empty() {
        return Err(SentryError::Config("no sources configured".into()));
    }
    for source in &cfg.sources {
        if source.supported_types.is_empty() {
            return Err(SentryError::Config(format!(
                "source '{}' supports no ioc types",
                source.name
            )));
        }
        if source.quota_max_requests == 0 {
            return Err(SentryError::Config(format!(
                "source '{}' has a zero quota",
                source.name
            )));
        }
    }
    Ok(())
}

/// Restrict the fan-out to named sources (case-insensitive). `None` keeps
/// the config as-is.
pub fn apply_source_filter(cfg: AppConfig, names: Option<&[String]>) -> AppConfig {
    if let Some(list) = names {
        let mut cfg = cfg;
        let lowered: Vec<String> = list.iter().map(|s| s.to_lowercase()).collect();
        for s in cfg.sources.iter_mut() {
            s.enabled = lowered.iter().any(|n| n == &s.name.to_lowercase());
        }
        return cfg;
    }
    cfg
}

fn default_config() -> AppConfig {
    AppConfig {
        per_source_timeout_ms: 10_000,
        total_deadline_ms: 25_000,
        max_concurrent_requests: 8,
        user_agent: "threat-sentry/1.0".to_string(),
        scheduler_tick_seconds: 60,
        db_path: "data/sentry.db".to_string(),
        sources: vec![
            SourceConfig {
                name: "virustotal".to_string(),
                kind: ProviderKind::VirusTotal,
                enabled: true,
                auto: true,
                base_url: "https://www.virustotal.com/api/v3".to_string(),
                api_key: None,
                supported_types: vec![IocType::Ip, IocType::Domain, IocType::Hash],
                cache_ttl_seconds: 3_600,
                // free tier: 4 requests/minute
                quota_max_requests: 4,
                quota_window_seconds: 60,
            },
            SourceConfig {
                name: "abuseipdb".to_string(),
                kind: ProviderKind::AbuseIpDb,
                enabled: true,
                auto: true,
                base_url: "https://api.abuseipdb.com/api/v2".to_string(),
                api_key: None,
                supported_types: vec![IocType::Ip],
                cache_ttl_seconds: 3_600,
                quota_max_requests: 1_000,
                quota_window_seconds: 86_400,
            },
            SourceConfig {
                name: "otx".to_string(),
                kind: ProviderKind::Otx,
                enabled: true,
                auto: true,
                base_url: "https://otx.alienvault.com/api/v1".to_string(),
                api_key: None,
                supported_types: vec![IocType::Ip, IocType::Domain, IocType::Url, IocType::Hash],
                cache_ttl_seconds: 3_600,
                quota_max_requests: 600,
                quota_window_seconds: 3_600,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some("config/does-not-exist.toml")).unwrap();
        assert_eq!(cfg.sources.len(), 3);
        assert!(cfg.sources.iter().all(|s| s.enabled));
    }

    #[test]
    fn source_filter_disables_unlisted_sources() {
        let cfg = default_config();
        let cfg = apply_source_filter(cfg, Some(&["OTX".to_string()]));
        let enabled: Vec<&str> = cfg
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(enabled, vec!["otx"]);
    }
}
