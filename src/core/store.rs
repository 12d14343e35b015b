use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::risk::RiskBand;
use crate::core::types::{
    AggregatedResult, Alert, AssetCheckHistory, IocType, SourceResult, Watchlist, WatchlistAsset,
};

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS watchlists (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              owner TEXT NOT NULL,
              check_interval_minutes INTEGER NOT NULL,
              notification_enabled INTEGER NOT NULL,
              is_active INTEGER NOT NULL,
              last_checked_at TEXT,
              created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS watchlist_assets (
              id TEXT PRIMARY KEY,
              watchlist_id TEXT NOT NULL,
              ioc_type TEXT NOT NULL,
              ioc_value TEXT NOT NULL,
              risk_threshold TEXT,
              is_active INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assets_watchlist ON watchlist_assets(watchlist_id);

            CREATE TABLE IF NOT EXISTS asset_check_history (
              id TEXT PRIMARY KEY,
              asset_id TEXT NOT NULL,
              check_date TEXT NOT NULL,
              risk_band TEXT NOT NULL,
              sources_json TEXT NOT NULL,
              alert_triggered INTEGER NOT NULL,
              intel_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_asset ON asset_check_history(asset_id, check_date);

            CREATE TABLE IF NOT EXISTS alerts (
              id TEXT PRIMARY KEY,
              watchlist_id TEXT,
              asset_id TEXT,
              severity TEXT NOT NULL,
              title TEXT NOT NULL,
              message TEXT NOT NULL,
              metadata_json TEXT,
              is_read INTEGER NOT NULL,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_asset ON alerts(asset_id, is_read);

            CREATE TABLE IF NOT EXISTS ioc_queries (
              id TEXT PRIMARY KEY,
              ioc_type TEXT NOT NULL,
              ioc_value TEXT NOT NULL,
              overall_risk TEXT NOT NULL,
              sources_json TEXT NOT NULL,
              queried_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // -- watchlists ------------------------------------------------------

    pub fn create_watchlist(&mut self, watchlist: &Watchlist, assets: &[WatchlistAsset]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO watchlists
             (id, name, owner, check_interval_minutes, notification_enabled, is_active, last_checked_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                watchlist.id,
                watchlist.name,
                watchlist.owner,
                watchlist.check_interval_minutes,
                watchlist.notification_enabled,
                watchlist.is_active,
                watchlist.last_checked_at,
                watchlist.created_at,
            ],
        )?;
        for asset in assets {
            insert_asset(&tx, asset)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn add_asset(&self, asset: &WatchlistAsset) -> Result<()> {
        insert_asset(&self.conn, asset)?;
        Ok(())
    }

    pub fn list_watchlists(&self, owner: Option<&str>) -> Result<Vec<Watchlist>> {
        let mut out = Vec::new();
        match owner {
            Some(owner) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, owner, check_interval_minutes, notification_enabled,
                            is_active, last_checked_at, created_at
                     FROM watchlists WHERE owner = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map(params![owner], row_to_watchlist)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, owner, check_interval_minutes, notification_enabled,
                            is_active, last_checked_at, created_at
                     FROM watchlists ORDER BY created_at",
                )?;
                let rows = stmt.query_map([], row_to_watchlist)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub fn get_watchlist(&self, id: &str) -> Result<Option<Watchlist>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, owner, check_interval_minutes, notification_enabled,
                        is_active, last_checked_at, created_at
                 FROM watchlists WHERE id = ?1",
                params![id],
                row_to_watchlist,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_watchlist_active(&self, id: &str, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE watchlists SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(changed > 0)
    }

    /// Single atomic bump after a whole run completes. A crash mid-run
    /// leaves the old timestamp, so the worst case is a re-check.
    pub fn touch_watchlist(&self, id: &str, checked_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE watchlists SET last_checked_at = ?2 WHERE id = ?1",
            params![id, checked_at],
        )?;
        Ok(())
    }

    /// Deleting also removes the assets so the watchlist can never be
    /// scheduled again; history stays as an audit trail.
    pub fn delete_watchlist(&mut self, id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM watchlist_assets WHERE watchlist_id = ?1",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM watchlists WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // -- assets ----------------------------------------------------------

    pub fn assets_for(&self, watchlist_id: &str, active_only: bool) -> Result<Vec<WatchlistAsset>> {
        let sql = if active_only {
            "SELECT id, watchlist_id, ioc_type, ioc_value, risk_threshold, is_active
             FROM watchlist_assets WHERE watchlist_id = ?1 AND is_active = 1"
        } else {
            "SELECT id, watchlist_id, ioc_type, ioc_value, risk_threshold, is_active
             FROM watchlist_assets WHERE watchlist_id = ?1"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![watchlist_id], row_to_asset)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<WatchlistAsset>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, watchlist_id, ioc_type, ioc_value, risk_threshold, is_active
                 FROM watchlist_assets WHERE id = ?1",
                params![id],
                row_to_asset,
            )
            .optional()?;
        Ok(row)
    }

    // -- checks and alerts ----------------------------------------------

    /// Append one check row and, when the check triggered, its alert, in the
    /// same transaction. The `alert_triggered` flag and the alert row can
    /// never disagree.
    pub fn record_check(&mut self, history: &AssetCheckHistory, alert: Option<&Alert>) -> Result<()> {
        debug_assert_eq!(history.alert_triggered, alert.is_some());
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO asset_check_history
             (id, asset_id, check_date, risk_band, sources_json, alert_triggered, intel_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                history.id,
                history.asset_id,
                history.check_date,
                history.risk_band.as_str(),
                serde_json::to_string(&history.sources_checked)?,
                history.alert_triggered,
                serde_json::to_string(&history.intel)?,
            ],
        )?;
        if let Some(alert) = alert {
            tx.execute(
                "INSERT INTO alerts
                 (id, watchlist_id, asset_id, severity, title, message, metadata_json, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    alert.id,
                    alert.watchlist_id,
                    alert.asset_id,
                    alert.severity.as_str(),
                    alert.title,
                    alert.message,
                    alert
                        .metadata
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    alert.is_read,
                    alert.created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn asset_history(&self, asset_id: &str, limit: usize) -> Result<Vec<AssetCheckHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, asset_id, check_date, risk_band, sources_json, alert_triggered, intel_json
             FROM asset_check_history WHERE asset_id = ?1
             ORDER BY check_date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![asset_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, DateTime<Utc>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, asset_id, check_date, band, sources_json, alert_triggered, intel_json) = row?;
            out.push(AssetCheckHistory {
                id,
                asset_id,
                check_date,
                risk_band: parse_band(&band)?,
                sources_checked: serde_json::from_str(&sources_json)?,
                alert_triggered,
                intel: serde_json::from_str(&intel_json)?,
            });
        }
        Ok(out)
    }

    pub fn unread_alert_exists(&self, asset_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE asset_id = ?1 AND is_read = 0",
            params![asset_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_alerts(&self, unread_only: bool) -> Result<Vec<Alert>> {
        let sql = if unread_only {
            "SELECT id, watchlist_id, asset_id, severity, title, message, metadata_json, is_read, created_at
             FROM alerts WHERE is_read = 0 ORDER BY created_at DESC"
        } else {
            "SELECT id, watchlist_id, asset_id, severity, title, message, metadata_json, is_read, created_at
             FROM alerts ORDER BY created_at DESC"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, DateTime<Utc>>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, watchlist_id, asset_id, severity, title, message, metadata, is_read, created_at) =
                row?;
            out.push(Alert {
                id,
                watchlist_id,
                asset_id,
                severity: parse_band(&severity)?,
                title,
                message,
                metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                is_read,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn set_alert_read(&self, id: &str, read: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE alerts SET is_read = ?2 WHERE id = ?1",
            params![id, read],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_alert(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM alerts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // -- ad hoc query log ------------------------------------------------

    pub fn record_query(&self, id: &str, result: &AggregatedResult) -> Result<()> {
        self.conn.execute(
            "INSERT INTO ioc_queries (id, ioc_type, ioc_value, overall_risk, sources_json, queried_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                result.ioc_type.as_str(),
                result.ioc_value,
                result.overall_risk.as_str(),
                serde_json::to_string(&result.sources)?,
                result.queried_at,
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn exec_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn query_history(&self, limit: usize) -> Result<Vec<AggregatedResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT ioc_type, ioc_value, overall_risk, sources_json, queried_at
             FROM ioc_queries ORDER BY queried_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, DateTime<Utc>>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (ioc_type, ioc_value, overall, sources_json, queried_at) = row?;
            let sources: Vec<SourceResult> = serde_json::from_str(&sources_json)?;
            out.push(AggregatedResult {
                ioc_type: IocType::parse(&ioc_type)
                    .ok_or_else(|| anyhow!("bad ioc_type in row: {ioc_type}"))?,
                ioc_value,
                overall_risk: parse_band(&overall)?,
                sources,
                queried_at,
            });
        }
        Ok(out)
    }
}

fn insert_asset(conn: &Connection, asset: &WatchlistAsset) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO watchlist_assets (id, watchlist_id, ioc_type, ioc_value, risk_threshold, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            asset.id,
            asset.watchlist_id,
            asset.ioc_type.as_str(),
            asset.ioc_value,
            asset.risk_threshold.map(|b| b.as_str()),
            asset.is_active,
        ],
    )
}

fn row_to_watchlist(row: &rusqlite::Row<'_>) -> rusqlite::Result<Watchlist> {
    Ok(Watchlist {
        id: row.get(0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        check_interval_minutes: row.get(3)?,
        notification_enabled: row.get(4)?,
        is_active: row.get(5)?,
        last_checked_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<WatchlistAsset> {
    let ioc_type: String = row.get(2)?;
    let threshold: Option<String> = row.get(4)?;
    Ok(WatchlistAsset {
        id: row.get(0)?,
        watchlist_id: row.get(1)?,
        ioc_type: IocType::parse(&ioc_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("bad ioc_type in row: {ioc_type}").into(),
            )
        })?,
        ioc_value: row.get(3)?,
        risk_threshold: threshold.as_deref().and_then(RiskBand::parse),
        is_active: row.get(5)?,
    })
}

fn parse_band(s: &str) -> Result<RiskBand> {
    RiskBand::parse(s).ok_or_else(|| anyhow!("bad risk band in row: {s}"))
}
