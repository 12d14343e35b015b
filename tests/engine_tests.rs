use std::time::Duration;

use httpmock::prelude::*;
use threat_sentry::config::{AppConfig, SourceConfig};
use threat_sentry::core::engine::{Engine, QueryOpts};
use threat_sentry::core::risk::RiskBand;
use threat_sentry::core::types::{IocQuery, IocType, SourceStatus};
use threat_sentry::sources::ProviderKind;

fn test_config(sources: Vec<SourceConfig>) -> AppConfig {
    AppConfig {
        per_source_timeout_ms: 2_000,
        total_deadline_ms: 5_000,
        max_concurrent_requests: 4,
        user_agent: "sentry-test".to_string(),
        scheduler_tick_seconds: 60,
        db_path: "data/test.db".to_string(),
        sources,
    }
}

fn otx_source(base_url: String) -> SourceConfig {
    SourceConfig {
        name: "otx".to_string(),
        kind: ProviderKind::Otx,
        enabled: true,
        auto: true,
        base_url,
        api_key: Some("test-key".to_string()),
        supported_types: vec![IocType::Ip, IocType::Domain, IocType::Url, IocType::Hash],
        cache_ttl_seconds: 60,
        quota_max_requests: 100,
        quota_window_seconds: 60,
    }
}

fn abuseipdb_source(base_url: String) -> SourceConfig {
    SourceConfig {
        name: "abuseipdb".to_string(),
        kind: ProviderKind::AbuseIpDb,
        enabled: true,
        auto: true,
        base_url,
        api_key: Some("test-key".to_string()),
        supported_types: vec![IocType::Ip],
        cache_ttl_seconds: 60,
        quota_max_requests: 100,
        quota_window_seconds: 60,
    }
}

fn mock_otx<'a>(server: &'a MockServer, value: &str, pulses: i64) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/indicators/IPv4/{value}/general"));
        then.status(200)
            .json_body(serde_json::json!({ "pulse_info": { "count": pulses } }));
    })
}

fn mock_abuseipdb(server: &MockServer, confidence: i64) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/check");
        then.status(200).json_body(serde_json::json!({
            "data": {
                "abuseConfidenceScore": confidence,
                "totalReports": 12,
                "countryCode": "US"
            }
        }));
    })
}

#[tokio::test]
async fn every_enabled_source_produces_exactly_one_result() {
    let server = MockServer::start();
    let _otx = mock_otx(&server, "8.8.8.8", 0);
    let _abuse = mock_abuseipdb(&server, 85);

    let engine = Engine::new(test_config(vec![
        otx_source(server.base_url()),
        abuseipdb_source(server.base_url()),
    ]))
    .unwrap();

    let query = IocQuery::new(IocType::Ip, "8.8.8.8");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources.len(), 2);
    assert!(result
        .sources
        .iter()
        .all(|r| r.status == SourceStatus::Success));
}

#[tokio::test]
async fn overall_risk_is_the_band_of_the_max_score() {
    let server = MockServer::start();
    // otx: 0 pulses -> 0.1, abuseipdb: 85% confidence -> 0.85
    let _otx = mock_otx(&server, "8.8.8.8", 0);
    let _abuse = mock_abuseipdb(&server, 85);

    let engine = Engine::new(test_config(vec![
        otx_source(server.base_url()),
        abuseipdb_source(server.base_url()),
    ]))
    .unwrap();

    let query = IocQuery::new(IocType::Ip, "8.8.8.8");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    // Max wins: 0.85 bands to high even though the other source is clean.
    assert_eq!(result.overall_risk, RiskBand::High);
}

#[tokio::test]
async fn unsupported_type_never_reaches_the_network() {
    let server = MockServer::start();
    let abuse = mock_abuseipdb(&server, 85);

    let engine = Engine::new(test_config(vec![abuseipdb_source(server.base_url())])).unwrap();

    let query = IocQuery::new(IocType::Domain, "example.com");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].status, SourceStatus::NotSupported);
    assert_eq!(result.overall_risk, RiskBand::Unknown);
    assert_eq!(abuse.hits(), 0);
}

#[tokio::test]
async fn cache_round_trip_hits_each_source_at_most_once() {
    let server = MockServer::start();
    let otx = mock_otx(&server, "1.2.3.4", 5);

    let engine = Engine::new(test_config(vec![otx_source(server.base_url())])).unwrap();
    let query = IocQuery::new(IocType::Ip, "1.2.3.4");

    let first = engine.aggregate(&query, &QueryOpts::default()).await;
    let second = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(otx.hits(), 1);
    assert_eq!(
        first.sources[0].risk_score,
        second.sources[0].risk_score
    );
    assert_eq!(first.overall_risk, second.overall_risk);
}

#[tokio::test]
async fn force_refresh_bypasses_the_cache_read() {
    let server = MockServer::start();
    let otx = mock_otx(&server, "1.2.3.4", 5);

    let engine = Engine::new(test_config(vec![otx_source(server.base_url())])).unwrap();
    let query = IocQuery::new(IocType::Ip, "1.2.3.4");

    engine.aggregate(&query, &QueryOpts::default()).await;
    let opts = QueryOpts {
        force_refresh: true,
        ..QueryOpts::default()
    };
    engine.aggregate(&query, &opts).await;

    assert_eq!(otx.hits(), 2);
}

#[tokio::test]
async fn exhausted_quota_yields_skipped_without_network_traffic() {
    let server = MockServer::start();
    let otx = mock_otx(&server, "1.2.3.4", 5);

    let mut source = otx_source(server.base_url());
    source.quota_max_requests = 1;
    let engine = Engine::new(test_config(vec![source])).unwrap();
    let query = IocQuery::new(IocType::Ip, "1.2.3.4");

    let first = engine.aggregate(&query, &QueryOpts::default()).await;
    assert_eq!(first.sources[0].status, SourceStatus::Success);

    // Force refresh so the cached result cannot satisfy the second call.
    let opts = QueryOpts {
        force_refresh: true,
        ..QueryOpts::default()
    };
    let second = engine.aggregate(&query, &opts).await;

    assert_eq!(second.sources[0].status, SourceStatus::Skipped);
    assert_eq!(otx.hits(), 1);
}

#[tokio::test]
async fn provider_failure_becomes_an_error_result_not_a_panic() {
    let server = MockServer::start();
    let _otx = server.mock(|when, then| {
        when.method(GET).path_contains("/indicators/");
        then.status(500);
    });

    let engine = Engine::new(test_config(vec![otx_source(server.base_url())])).unwrap();
    let query = IocQuery::new(IocType::Ip, "1.2.3.4");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].status, SourceStatus::Error);
    assert_eq!(result.overall_risk, RiskBand::Unknown);
}

#[tokio::test]
async fn slow_source_times_out_as_an_error_result() {
    let server = MockServer::start();
    let _otx = server.mock(|when, then| {
        when.method(GET).path_contains("/indicators/");
        then.status(200)
            .delay(Duration::from_millis(800))
            .json_body(serde_json::json!({ "pulse_info": { "count": 0 } }));
    });

    let mut cfg = test_config(vec![otx_source(server.base_url())]);
    cfg.per_source_timeout_ms = 100;
    let engine = Engine::new(cfg).unwrap();

    let query = IocQuery::new(IocType::Ip, "1.2.3.4");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources[0].status, SourceStatus::Error);
    assert_eq!(result.sources[0].description, "timeout");
}

#[tokio::test]
async fn total_deadline_marks_pending_sources_as_errors() {
    let server = MockServer::start();
    let _otx = server.mock(|when, then| {
        when.method(GET).path_contains("/indicators/");
        then.status(200)
            .delay(Duration::from_millis(2_000))
            .json_body(serde_json::json!({ "pulse_info": { "count": 0 } }));
    });

    // Per-source timeout far above the total deadline, so only the deadline
    // can fire.
    let mut cfg = test_config(vec![otx_source(server.base_url())]);
    cfg.per_source_timeout_ms = 5_000;
    cfg.total_deadline_ms = 300;
    let engine = Engine::new(cfg).unwrap();

    let query = IocQuery::new(IocType::Ip, "1.2.3.4");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].status, SourceStatus::Error);
    assert_eq!(result.sources[0].description, "deadline exceeded");
    assert_eq!(result.overall_risk, RiskBand::Unknown);
}

#[tokio::test]
async fn missing_api_key_is_reported_as_a_source_error() {
    let server = MockServer::start();
    let otx = mock_otx(&server, "1.2.3.4", 0);

    let mut source = otx_source(server.base_url());
    source.api_key = None;
    let engine = Engine::new(test_config(vec![source])).unwrap();

    let query = IocQuery::new(IocType::Ip, "1.2.3.4");
    let result = engine.aggregate(&query, &QueryOpts::default()).await;

    assert_eq!(result.sources[0].status, SourceStatus::Error);
    assert!(result.sources[0].description.contains("api key required"));
    assert_eq!(otx.hits(), 0);
}

#[tokio::test]
async fn scheduled_queries_skip_manual_only_sources() {
    let server = MockServer::start();
    let otx = mock_otx(&server, "1.2.3.4", 0);
    let _abuse = mock_abuseipdb(&server, 10);

    let mut manual_only = otx_source(server.base_url());
    manual_only.auto = false;
    let engine = Engine::new(test_config(vec![
        manual_only,
        abuseipdb_source(server.base_url()),
    ]))
    .unwrap();

    let query = IocQuery::new(IocType::Ip, "1.2.3.4");
    let opts = QueryOpts {
        scheduled: true,
        ..QueryOpts::default()
    };
    let result = engine.aggregate(&query, &opts).await;

    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].source, "abuseipdb");
    assert_eq!(otx.hits(), 0);
}
