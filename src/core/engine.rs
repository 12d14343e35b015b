use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use crate::{
    config::{AppConfig, SourceConfig},
    core::cache::ResultCache,
    core::error::SentryError,
    core::quota::QuotaRegistry,
    core::risk::{band, RiskBand},
    core::time::now_utc,
    core::types::{AggregatedResult, IocQuery, SourceResult},
    sources::SourceClient,
};

/// Caller-side knobs for one aggregation.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    /// Restrict to these source names (case-insensitive). `None` = all enabled.
    pub sources: Option<Vec<String>>,
    /// Bypass the cache read; the fresh result still populates the cache.
    pub force_refresh: bool,
    /// Scheduled runs only spend quota on sources flagged `auto`.
    pub scheduled: bool,
}

pub struct Engine {
    http: reqwest::Client,
    pub config: AppConfig,
    semaphore: Arc<Semaphore>,
    cache: Arc<ResultCache>,
    quotas: Arc<QuotaRegistry>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Result<Self, SentryError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::limited(4))
            .build()
            .map_err(SentryError::from)?;

        Ok(Self {
            http,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            cache: Arc::new(ResultCache::new()),
            quotas: Arc::new(QuotaRegistry::new()),
            config,
        })
    }

    fn selected_sources(&self, opts: &QueryOpts) -> Vec<SourceConfig> {
        let wanted: Option<Vec<String>> = opts
            .sources
            .as_ref()
            .map(|list| list.iter().map(|s| s.to_lowercase()).collect());
        self.config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| !opts.scheduled || s.auto)
            .filter(|s| match &wanted {
                Some(names) => names.iter().any(|n| n == &s.name.to_lowercase()),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Fan one query out to every selected source and collect whatever
    /// completes before the total deadline. Infallible: every per-source
    /// failure is represented as data in the returned `sources` vec, and
    /// every selected source appears there exactly once.
    pub async fn aggregate(&self, query: &IocQuery, opts: &QueryOpts) -> AggregatedResult {
        let selected = self.selected_sources(opts);
        if selected.is_empty() {
            tracing::warn!(
                "no sources selected for {}:{}",
                query.ioc_type,
                query.ioc_value
            );
        }

        let mut pending: HashSet<String> = selected.iter().map(|s| s.name.clone()).collect();
        let mut join_set: JoinSet<SourceResult> = JoinSet::new();
        let per_source_timeout = Duration::from_millis(self.config.per_source_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.total_deadline_ms);

        for source_cfg in selected {
            let http = self.http.clone();
            let cache = self.cache.clone();
            let quotas = self.quotas.clone();
            let semaphore = self.semaphore.clone();
            let query = query.clone();
            let force_refresh = opts.force_refresh;
            join_set.spawn(async move {
                check_source(
                    source_cfg,
                    http,
                    cache,
                    quotas,
                    semaphore,
                    query,
                    force_refresh,
                    per_source_timeout,
                )
                .await
            });
        }

        let mut results: Vec<SourceResult> = Vec::new();
        let mut deadline_hit = false;
        loop {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok(result))) => {
                    pending.remove(&result.source);
                    results.push(result);
                }
                Ok(Some(Err(err))) => {
                    // The failed task's name stays in `pending` and is
                    // reported below.
                    tracing::error!("source task failed: {err}");
                }
                Ok(None) => break,
                Err(_) => {
                    // Deadline cancels this aggregation's pending calls only.
                    join_set.abort_all();
                    deadline_hit = true;
                    break;
                }
            }
        }
        let reason = if deadline_hit {
            "deadline exceeded"
        } else {
            "internal task failure"
        };
        for name in pending {
            results.push(SourceResult::error(name, reason));
        }

        // Worst case wins; triage must not dilute a single high-confidence
        // hit, so never an average.
        let max_score = results
            .iter()
            .filter_map(|r| r.risk_score)
            .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |m| m.max(s))));
        let overall_risk: RiskBand = band(max_score);

        AggregatedResult {
            ioc_type: query.ioc_type,
            ioc_value: query.ioc_value.clone(),
            overall_risk,
            sources: results,
            queried_at: now_utc(),
        }
    }

    pub fn purge_cache(&self) {
        self.cache.purge_expired();
    }
}

#[allow(clippy::too_many_arguments)]
async fn check_source(
    source_cfg: SourceConfig,
    http: reqwest::Client,
    cache: Arc<ResultCache>,
    quotas: Arc<QuotaRegistry>,
    semaphore: Arc<Semaphore>,
    query: IocQuery,
    force_refresh: bool,
    per_source_timeout: Duration,
) -> SourceResult {
    let name = source_cfg.name.clone();
    let ttl = Duration::from_secs(source_cfg.cache_ttl_seconds);

    if !force_refresh {
        if let Some(hit) = cache.get(&name, query.ioc_type, &query.ioc_value) {
            tracing::debug!("cache hit for {}:{} at {}", query.ioc_type, query.ioc_value, name);
            return hit;
        }
    }

    // Unsupported types short-circuit before spending quota.
    if !source_cfg.supports(query.ioc_type) {
        return SourceResult::not_supported(&name, query.ioc_type);
    }

    let guard = quotas.guard(
        &name,
        source_cfg.quota_max_requests,
        Duration::from_secs(source_cfg.quota_window_seconds),
    );
    if !guard.try_acquire() {
        return SourceResult::skipped(&name, "local quota exhausted");
    }

    let permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => return SourceResult::error(&name, "engine shutting down"),
    };
    let client = SourceClient::new(source_cfg);
    let result = match tokio::time::timeout(per_source_timeout, client.query(&http, &query)).await
    {
        Ok(result) => result,
        Err(_) => SourceResult::error(&name, "timeout"),
    };
    drop(permit);

    cache.put(query.ioc_type, &query.ioc_value, &result, ttl);
    result
}
