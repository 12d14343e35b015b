//! AlienVault OTX general indicator lookups. Score mapping: pulse count,
//! 0 pulses -> 0.1 (seen but unreported), then 0.3 + 0.1 per pulse capped
//! at 0.9. Pulse membership is community-curated, so a single pulse is
//! already a meaningful signal.

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
    let section = match query.ioc_type {
        IocType::Ip => "IPv4",
        IocType::Domain => "domain",
        IocType::Url => "url",
        IocType::Hash => "file",
    };
    let url = format!(
        "{}/indicators/{}/{}/general",
        config.base_url.trim_end_matches('/'),
        section,
        query.ioc_value
    );

    let response = http
        .get(&url)
        .header("X-OTX-API-KEY", api_key)
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;

    let pulses = body["pulse_info"]["count"].as_i64().unwrap_or(0);
    let risk_score = if pulses == 0 {
        0.1
    } else {
        (0.3 + 0.1 * pulses as f64).min(0.9)
    };

    Ok(SourceResult {
        source: config.name.clone(),
        status: SourceStatus::Success,
        risk_score: Some(risk_score),
        description: if pulses == 0 {
            "no OTX pulses reference this indicator".to_string()
        } else {
            format!("{pulses} OTX pulses reference this indicator")
        },
        raw: Some(body),
    })
}
