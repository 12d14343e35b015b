//! VirusTotal v3 lookups. Score mapping: malicious-hit ratio over all
//! engines that produced a verdict, with suspicious verdicts counted at half
//! weight. 0 engines reporting yields a clean 0.0.

use crate::config::SourceConfig;
use crate::core::error::SentryError;
use crate::core::types::{IocQuery, IocType, SourceResult, SourceStatus};
use crate::sources::require_api_key;

pub async fn query(
    http: &reqwest::Client,
    config: &SourceConfig,
    query: &IocQuery,
) -> Result<SourceResult, SentryError> {
    let api_key = require_api_key(config)?;
    let path = match query.ioc_type {
        IocType::Ip => "ip_addresses",
        IocType::Domain => "domains",
        IocType::Hash => "files",
        // URL lookups need the VT url-id scheme; not wired up.
        IocType::Url => {
            return Ok(SourceResult::not_supported(&config.name, query.ioc_type));
        }
    };
    let url = format!(
        "{}/{}/{}",
        config.base_url.trim_end_matches('/'),
        path,
        query.ioc_value
    );

    let response = http.get(&url).header("x-apikey", api_key).send().await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(SourceResult {
            source: config.name.clone(),
            status: SourceStatus::Success,
            risk_score: Some(0.0),
            description: "not present in VirusTotal".to_string(),
            raw: None,
        });
    }
    let response = response.error_for_status()?;
    let body: serde_json::Value = response.json().await?;

    let stats = &body["data"]["attributes"]["last_analysis_stats"];
    let malicious = stats["malicious"].as_f64().unwrap_or(0.0);
    let suspicious = stats["suspicious"].as_f64().unwrap_or(0.0);
    let harmless = stats["harmless"].as_f64().unwrap_or(0.0);
    let undetected = stats["undetected"].as_f64().unwrap_or(0.0);
    let total = malicious + suspicious + harmless + undetected;

    let risk_score = if total > 0.0 {
        ((malicious + suspicious * 0.5) / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(SourceResult {
        source: config.name.clone(),
        status: SourceStatus::Success,
        risk_score: Some(risk_score),
        description: format!(
            "{malicious:.0}/{total:.0} engines flagged malicious, {suspicious:.0} suspicious"
        ),
        raw: Some(body),
    })
}
