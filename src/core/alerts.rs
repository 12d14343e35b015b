use uuid::Uuid;

use crate::core::risk::RiskBand;
use crate::core::time::now_utc;
use crate::core::types::{Alert, Watchlist, WatchlistAsset};

/// Threshold evaluation alone: does this check band warrant an alert for
/// this asset? A `None` threshold means the asset never alerts; `Unknown`
/// bands never trigger.
pub fn threshold_breached(asset: &WatchlistAsset, band: RiskBand) -> bool {
    match asset.risk_threshold {
        Some(threshold) => band.meets(threshold),
        None => false,
    }
}

/// Full emission decision. Dedup policy: suppress while an unread alert for
/// the same asset exists, so repeated highs do not storm the alerts view;
/// marking the alert read re-arms emission.
pub fn should_emit(
    watchlist: &Watchlist,
    asset: &WatchlistAsset,
    band: RiskBand,
    unread_exists: bool,
) -> bool {
    watchlist.notification_enabled && threshold_breached(asset, band) && !unread_exists
}

pub fn build_alert(watchlist: &Watchlist, asset: &WatchlistAsset, band: RiskBand) -> Alert {
    Alert {
        id: Uuid::new_v4().to_string(),
        watchlist_id: Some(watchlist.id.clone()),
        asset_id: Some(asset.id.clone()),
        severity: band,
        title: format!(
            "High Risk Detected: {} - {}",
            asset.ioc_type.as_str().to_uppercase(),
            asset.ioc_value
        ),
        message: format!(
            "Watchlist asset '{}' detected with {} risk level.",
            asset.ioc_value, band
        ),
        metadata: Some(serde_json::json!({
            "ioc_type": asset.ioc_type,
            "ioc_value": asset.ioc_value,
            "risk_band": band,
            "watchlist_name": watchlist.name,
        })),
        is_read: false,
        created_at: now_utc(),
    }
}
