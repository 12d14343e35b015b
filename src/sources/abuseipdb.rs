//! AbuseIPDB check endpoint, IP indicators only. Score mapping:
//! abuseConfidenceScore (0..=100) divided by 100.

use crate::config::SourceConfig;
use crate::core::error::SentryError;
use crate::core::types::{IocQuery, SourceResult, SourceStatus};
use crate::sources::require_api_key;

pub async fn query(
    http: &reqwest::Client,
    config: &SourceConfig,
    query: &IocQuery,
) -> Result<SourceResult, SentryError> {
    let api_key = require_api_key(config)?;
    let url = format!("{}/check", config.base_url.trim_end_matches('/'));

    let response = http
        .get(&url)
        .header("Key", api_key)
        .header("Accept", "application/json")
        .query(&[
            ("ipAddress", query.ioc_value.as_str()),
            ("maxAgeInDays", "90"),
        ])
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;

    let data = &body["data"];
    let confidence = data["abuseConfidenceScore"].as_f64().unwrap_or(0.0);
    let reports = data["totalReports"].as_i64().unwrap_or(0);
    let country = data["countryCode"].as_str().unwrap_or("??");

    Ok(SourceResult {
        source: config.name.clone(),
        status: SourceStatus::Success,
        risk_score: Some((confidence / 100.0).clamp(0.0, 1.0)),
        description: format!(
            "abuse confidence {confidence:.0}%, {reports} reports, country {country}"
        ),
        raw: Some(body),
    })
}
