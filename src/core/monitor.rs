use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use uuid::Uuid;

use crate::core::alerts;
use crate::core::engine::{Engine, QueryOpts};
use crate::core::error::SentryError;
use crate::core::store::Store;
use crate::core::time::now_utc;
use crate::core::types::{AssetCheckHistory, IocQuery, Watchlist, WatchlistAsset};

#[derive(Debug, Clone, Serialize)]
pub struct WatchlistRunSummary {
    pub watchlist_id: String,
    pub checked_assets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckAllSummary {
    pub total_watchlists: usize,
    pub total_checked_items: usize,
}

/// Per-asset mutual exclusion. A manual "check now" and a scheduled run for
/// the same asset serialize here; the later caller waits, it never runs in
/// parallel (no duplicate quota spend, no duplicate alerts).
#[derive(Default)]
struct AssetLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AssetLocks {
    fn lock_for(&self, asset_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(asset_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Watchlist monitoring: a periodic background loop plus the manual check
/// entry points, all funneled through one `check_asset` path.
pub struct Monitor {
    engine: Arc<Engine>,
    store: Arc<Mutex<Store>>,
    locks: AssetLocks,
}

impl Monitor {
    pub fn new(engine: Arc<Engine>, store: Arc<Mutex<Store>>) -> Self {
        Self {
            engine,
            store,
            locks: AssetLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut Store) -> anyhow::Result<T>,
    ) -> Result<T, SentryError> {
        let mut store = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut store).map_err(|e| SentryError::Db(e.to_string()))
    }

    /// Check one asset through the same path whether the trigger was a
    /// scheduler tick or an analyst clicking "check now". Holds the asset
    /// lock across the aggregation and the history write.
    pub async fn check_asset(
        &self,
        asset_id: &str,
        scheduled: bool,
    ) -> Result<AssetCheckHistory, SentryError> {
        let asset = self
            .with_store(|s| s.get_asset(asset_id))?
            .ok_or_else(|| SentryError::NotFound(format!("asset {asset_id}")))?;
        let watchlist = self
            .with_store(|s| s.get_watchlist(&asset.watchlist_id))?
            .ok_or_else(|| SentryError::NotFound(format!("watchlist {}", asset.watchlist_id)))?;

        let lock = self.locks.lock_for(asset_id);
        let _guard = lock.lock().await;
        self.check_asset_locked(&watchlist, &asset, scheduled).await
    }

    async fn check_asset_locked(
        &self,
        watchlist: &Watchlist,
        asset: &WatchlistAsset,
        scheduled: bool,
    ) -> Result<AssetCheckHistory, SentryError> {
        let query = IocQuery::new(asset.ioc_type, asset.ioc_value.clone());
        let opts = QueryOpts {
            scheduled,
            ..QueryOpts::default()
        };
        let result = self.engine.aggregate(&query, &opts).await;
        let band = result.overall_risk;

        let unread = self.with_store(|s| s.unread_alert_exists(&asset.id))?;
        let emit = alerts::should_emit(watchlist, asset, band, unread);
        let alert = emit.then(|| alerts::build_alert(watchlist, asset, band));

        let history = AssetCheckHistory {
            id: Uuid::new_v4().to_string(),
            asset_id: asset.id.clone(),
            check_date: result.queried_at,
            risk_band: band,
            sources_checked: result.sources.iter().map(|r| r.source.clone()).collect(),
            alert_triggered: emit,
            intel: serde_json::json!({
                "overall_risk": band,
                "queried_sources": result.sources,
            }),
        };
        self.with_store(|s| s.record_check(&history, alert.as_ref()))?;

        tracing::info!(
            "checked asset {} ({}:{}) -> {}{}",
            asset.id,
            asset.ioc_type,
            asset.ioc_value,
            band,
            if emit { ", alert raised" } else { "" }
        );
        Ok(history)
    }

    /// Run one watchlist immediately. Per-asset failures are logged and do
    /// not stop the run; `last_checked_at` is bumped once, after every asset
    /// finished, so a crash mid-run re-checks rather than skips.
    pub async fn check_watchlist(
        &self,
        watchlist_id: &str,
        scheduled: bool,
    ) -> Result<WatchlistRunSummary, SentryError> {
        let watchlist = self
            .with_store(|s| s.get_watchlist(watchlist_id))?
            .ok_or_else(|| SentryError::NotFound(format!("watchlist {watchlist_id}")))?;
        let assets = self.with_store(|s| s.assets_for(watchlist_id, true))?;

        let mut checked = 0usize;
        for asset in &assets {
            let lock = self.locks.lock_for(&asset.id);
            let _guard = lock.lock().await;
            match self.check_asset_locked(&watchlist, asset, scheduled).await {
                Ok(_) => checked += 1,
                Err(err) => {
                    tracing::error!("error checking asset {}: {}", asset.id, err);
                }
            }
        }

        self.with_store(|s| s.touch_watchlist(watchlist_id, now_utc()))?;
        Ok(WatchlistRunSummary {
            watchlist_id: watchlist_id.to_string(),
            checked_assets: checked,
        })
    }

    /// Fan out across every active watchlist in scope, due or not.
    pub async fn check_all(&self, owner: Option<&str>) -> Result<CheckAllSummary, SentryError> {
        let watchlists: Vec<Watchlist> = self
            .with_store(|s| s.list_watchlists(owner))?
            .into_iter()
            .filter(|w| w.is_active)
            .collect();

        let mut total_checked = 0usize;
        for watchlist in &watchlists {
            match self.check_watchlist(&watchlist.id, false).await {
                Ok(summary) => total_checked += summary.checked_assets,
                Err(err) => {
                    tracing::error!("error checking watchlist {}: {}", watchlist.id, err);
                }
            }
        }
        Ok(CheckAllSummary {
            total_watchlists: watchlists.len(),
            total_checked_items: total_checked,
        })
    }

    /// One scheduler pass: check every watchlist that is due right now.
    /// Failures are isolated per watchlist; the pass always completes.
    pub async fn run_due_watchlists(&self) -> Result<usize, SentryError> {
        let now = now_utc();
        let due: Vec<Watchlist> = self
            .with_store(|s| s.list_watchlists(None))?
            .into_iter()
            .filter(|w| w.is_due(now))
            .collect();

        for watchlist in &due {
            tracing::debug!("watchlist {} is due", watchlist.id);
            if let Err(err) = self.check_watchlist(&watchlist.id, true).await {
                tracing::error!("scheduled run failed for watchlist {}: {}", watchlist.id, err);
            }
        }
        Ok(due.len())
    }

    /// The long-lived background loop. Sleeps between passes; never exits on
    /// its own. Cancellation is the caller's concern (select against ctrl-c).
    pub async fn run(&self, tick: Duration) {
        tracing::info!("watchlist scheduler started (tick: {:?})", tick);
        loop {
            tokio::time::sleep(tick).await;
            self.engine.purge_cache();
            match self.run_due_watchlists().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("scheduler pass checked {n} watchlists"),
                Err(err) => tracing::error!("scheduler pass failed: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, SourceConfig};
    use crate::core::types::IocType;
    use crate::sources::ProviderKind;
    use httpmock::prelude::*;
    use uuid::Uuid;

    fn otx_config(base_url: String) -> AppConfig {
        AppConfig {
            per_source_timeout_ms: 2_000,
            total_deadline_ms: 5_000,
            max_concurrent_requests: 4,
            user_agent: "sentry-test".to_string(),
            scheduler_tick_seconds: 60,
            db_path: "data/test.db".to_string(),
            sources: vec![SourceConfig {
                name: "otx".to_string(),
                kind: ProviderKind::Otx,
                enabled: true,
                auto: true,
                base_url,
                api_key: Some("test-key".to_string()),
                supported_types: vec![IocType::Ip],
                cache_ttl_seconds: 60,
                quota_max_requests: 100,
                quota_window_seconds: 60,
            }],
        }
    }

    fn seed_due_watchlist(monitor: &Monitor, ioc_value: &str) -> (Watchlist, WatchlistAsset) {
        let watchlist = Watchlist {
            id: Uuid::new_v4().to_string(),
            name: "infra".to_string(),
            owner: "analyst".to_string(),
            check_interval_minutes: 60,
            notification_enabled: true,
            is_active: true,
            last_checked_at: None,
            created_at: now_utc(),
        };
        let asset = WatchlistAsset {
            id: Uuid::new_v4().to_string(),
            watchlist_id: watchlist.id.clone(),
            ioc_type: IocType::Ip,
            ioc_value: ioc_value.to_string(),
            risk_threshold: None,
            is_active: true,
        };
        {
            let mut store = match monitor.store().lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            store
                .create_watchlist(&watchlist, &[asset.clone()])
                .unwrap();
        }
        (watchlist, asset)
    }

    #[tokio::test]
    async fn one_broken_watchlist_does_not_stop_the_scheduler_pass() {
        let server = MockServer::start();
        let _otx = server.mock(|when, then| {
            when.method(GET).path("/indicators/IPv4/5.6.7.8/general");
            then.status(200)
                .json_body(serde_json::json!({ "pulse_info": { "count": 0 } }));
        });

        let engine = Arc::new(Engine::new(otx_config(server.base_url())).unwrap());
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let monitor = Monitor::new(engine, store);

        let (broken_wl, broken_asset) = seed_due_watchlist(&monitor, "4.4.4.4");
        let (_, healthy_asset) = seed_due_watchlist(&monitor, "5.6.7.8");

        // Corrupt the first watchlist's asset row so its run fails at load.
        {
            let store = monitor.store().lock().unwrap();
            store
                .exec_batch(&format!(
                    "UPDATE watchlist_assets SET ioc_type = 'bogus' WHERE watchlist_id = '{}'",
                    broken_wl.id
                ))
                .unwrap();
        }

        let due = monitor.run_due_watchlists().await.unwrap();
        assert_eq!(due, 2);

        let store = monitor.store().lock().unwrap();
        assert_eq!(store.asset_history(&healthy_asset.id, 10).unwrap().len(), 1);
        assert!(store.asset_history(&broken_asset.id, 10).unwrap().is_empty());
    }
}
