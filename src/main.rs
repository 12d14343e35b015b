use std::sync::{Arc, Mutex};
use std::{fs, path::Path, time::Duration};

use chrono::Utc;
use clap::{Parser, Subcommand};
use threat_sentry::{
    config::{apply_source_filter, load_config},
    core::{
        engine::{Engine, QueryOpts},
        error::SentryError,
        monitor::Monitor,
        risk::RiskBand,
        store::Store,
        types::{IocQuery, IocType, Watchlist, WatchlistAsset},
    },
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "threat-sentry",
    about = "IOC reputation aggregation and watchlist monitoring"
)]
struct Cli {
    /// Path to config file (TOML). Default: config/threat-sentry.toml
    #[arg(long)]
    config: Option<String>,
    /// Comma-separated source names to enable (case-insensitive)
    #[arg(long, value_delimiter = ',')]
    sources: Option<Vec<String>>,
    /// SQLite path override
    #[arg(long)]
    db_path: Option<String>,
    /// Increase verbosity (info, debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Optional log file path
    #[arg(long, default_value = "data/sentry.log")]
    log_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ad hoc IOC query across all enabled sources
    Query {
        /// ip, domain, url or hash
        ioc_type: String,
        ioc_value: String,
        /// Bypass the cache read (the result still populates it)
        #[arg(long)]
        force_refresh: bool,
    },
    /// Run the watchlist scheduler loop until interrupted
    Watch,
    /// Check one watchlist immediately, outside its schedule
    CheckWatchlist { id: String },
    /// Check every active watchlist, due or not
    CheckAll {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Check a single asset
    CheckAsset { id: String },
    /// Show check history for an asset, newest first
    History {
        asset_id: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Create a watchlist with assets given as type:value[:threshold]
    WatchlistAdd {
        name: String,
        #[arg(long, default_value = "local")]
        owner: String,
        #[arg(long, default_value_t = 60)]
        interval_minutes: i64,
        #[arg(long, default_value_t = true)]
        notifications: bool,
        assets: Vec<String>,
    },
    /// List watchlists
    WatchlistList {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete a watchlist (stops its scheduled checks)
    WatchlistRemove { id: String },
    /// Suspend scheduled checks for a watchlist without deleting it
    WatchlistPause { id: String },
    /// Resume scheduled checks for a paused watchlist
    WatchlistResume { id: String },
    /// Add one asset (type:value[:threshold]) to an existing watchlist
    WatchlistAddAsset { watchlist_id: String, asset: String },
    /// List alerts
    Alerts {
        #[arg(long)]
        unread: bool,
    },
    /// Mark an alert as read
    AlertRead { id: String },
    /// Delete an alert
    AlertRemove { id: String },
    /// Show recent ad hoc queries, newest first
    QueryLog {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), SentryError> {
    let cli = Cli::parse();

    init_tracing(&cli)?;

    let mut cfg = load_config(cli.config.as_deref())?;
    cfg = apply_source_filter(cfg, cli.sources.as_deref());
    if let Some(path) = &cli.db_path {
        cfg.db_path = path.clone();
    }
    let tick = Duration::from_secs(cfg.scheduler_tick_seconds);
    let db_path = cfg.db_path.clone();

    let engine = Arc::new(Engine::new(cfg)?);
    let store = Store::new(Path::new(&db_path)).map_err(|e| SentryError::Db(e.to_string()))?;
    let store = Arc::new(Mutex::new(store));
    let monitor = Monitor::new(engine.clone(), store.clone());

    match cli.command {
        Command::Query {
            ioc_type,
            ioc_value,
            force_refresh,
        } => {
            let ioc_type = IocType::parse(&ioc_type)
                .ok_or_else(|| SentryError::Config(format!("unknown ioc type: {ioc_type}")))?;
            let query = IocQuery::new(ioc_type, ioc_value);
            let opts = QueryOpts {
                force_refresh,
                ..QueryOpts::default()
            };
            let result = engine.aggregate(&query, &opts).await;
            with_store(&store, |s| s.record_query(&Uuid::new_v4().to_string(), &result))?;
            print_json(&result)?;
        }
        Command::Watch => {
            tokio::select! {
                _ = monitor.run(tick) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                }
            }
        }
        Command::CheckWatchlist { id } => {
            let summary = monitor.check_watchlist(&id, false).await?;
            print_json(&summary)?;
        }
        Command::CheckAll { owner } => {
            let summary = monitor.check_all(owner.as_deref()).await?;
            print_json(&summary)?;
        }
        Command::CheckAsset { id } => {
            let history = monitor.check_asset(&id, false).await?;
            print_json(&history)?;
        }
        Command::History { asset_id, limit } => {
            let rows = with_store(&store, |s| s.asset_history(&asset_id, limit))?;
            print_json(&rows)?;
        }
        Command::WatchlistAdd {
            name,
            owner,
            interval_minutes,
            notifications,
            assets,
        } => {
            if interval_minutes < 1 {
                return Err(SentryError::Config(
                    "check interval must be at least 1 minute".into(),
                ));
            }
            let watchlist = Watchlist {
                id: Uuid::new_v4().to_string(),
                name,
                owner,
                check_interval_minutes: interval_minutes,
                notification_enabled: notifications,
                is_active: true,
                last_checked_at: None,
                created_at: Utc::now(),
            };
            let assets = assets
                .iter()
                .map(|spec| parse_asset_spec(&watchlist.id, spec))
                .collect::<Result<Vec<_>, _>>()?;
            with_store(&store, |s| s.create_watchlist(&watchlist, &assets))?;
            print_json(&watchlist)?;
        }
        Command::WatchlistList { owner } => {
            let watchlists = with_store(&store, |s| s.list_watchlists(owner.as_deref()))?;
            print_json(&watchlists)?;
        }
        Command::WatchlistRemove { id } => {
            let removed = with_store(&store, |s| s.delete_watchlist(&id))?;
            if !removed {
                return Err(SentryError::NotFound(format!("watchlist {id}")));
            }
            tracing::info!("watchlist {id} removed");
        }
        Command::WatchlistPause { id } => {
            set_watchlist_active(&store, &id, false)?;
        }
        Command::WatchlistResume { id } => {
            set_watchlist_active(&store, &id, true)?;
        }
        Command::WatchlistAddAsset {
            watchlist_id,
            asset,
        } => {
            if with_store(&store, |s| s.get_watchlist(&watchlist_id))?.is_none() {
                return Err(SentryError::NotFound(format!("watchlist {watchlist_id}")));
            }
            let asset = parse_asset_spec(&watchlist_id, &asset)?;
            with_store(&store, |s| s.add_asset(&asset))?;
            print_json(&asset)?;
        }
        Command::Alerts { unread } => {
            let alerts = with_store(&store, |s| s.list_alerts(unread))?;
            print_json(&alerts)?;
        }
        Command::AlertRead { id } => {
            let updated = with_store(&store, |s| s.set_alert_read(&id, true))?;
            if !updated {
                return Err(SentryError::NotFound(format!("alert {id}")));
            }
        }
        Command::AlertRemove { id } => {
            let deleted = with_store(&store, |s| s.delete_alert(&id))?;
            if !deleted {
                return Err(SentryError::NotFound(format!("alert {id}")));
            }
        }
        Command::QueryLog { limit } => {
            let rows = with_store(&store, |s| s.query_history(limit))?;
            print_json(&rows)?;
        }
    }

    Ok(())
}

fn set_watchlist_active(
    store: &Arc<Mutex<Store>>,
    id: &str,
    active: bool,
) -> Result<(), SentryError> {
    let changed = with_store(store, |s| s.set_watchlist_active(id, active))?;
    if !changed {
        return Err(SentryError::NotFound(format!("watchlist {id}")));
    }
    tracing::info!(
        "watchlist {id} {}",
        if active { "resumed" } else { "paused" }
    );
    Ok(())
}

fn with_store<T>(
    store: &Arc<Mutex<Store>>,
    f: impl FnOnce(&mut Store) -> anyhow::Result<T>,
) -> Result<T, SentryError> {
    let mut store = match store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut store).map_err(|e| SentryError::Db(e.to_string()))
}

/// Asset specs look like `ip:8.8.8.8` or `domain:example.com:high`. The
/// threshold suffix is optional; url values may themselves contain colons,
/// so the suffix only counts when it parses as a band.
fn parse_asset_spec(watchlist_id: &str, spec: &str) -> Result<WatchlistAsset, SentryError> {
    let (type_part, rest) = spec
        .split_once(':')
        .ok_or_else(|| SentryError::Config(format!("bad asset spec: {spec}")))?;
    let (value_part, threshold) = match rest.rsplit_once(':') {
        Some((value, suffix)) => match RiskBand::parse(suffix) {
            Some(band) => (value, Some(band)),
            None => (rest, None),
        },
        None => (rest, None),
    };
    if value_part.is_empty() {
        return Err(SentryError::Config(format!("bad asset spec: {spec}")));
    }
    let ioc_type = IocType::parse(type_part)
        .ok_or_else(|| SentryError::Config(format!("unknown ioc type: {type_part}")))?;
    Ok(WatchlistAsset {
        id: Uuid::new_v4().to_string(),
        watchlist_id: watchlist_id.to_string(),
        ioc_type,
        ioc_value: value_part.to_string(),
        risk_threshold: threshold,
        is_active: true,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), SentryError> {
    let json = serde_json::to_string_pretty(value).map_err(|_| SentryError::Unknown)?;
    println!("{json}");
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<(), SentryError> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = Path::new(&cli.log_file);
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).map_err(|e| SentryError::Config(e.to_string()))?;
    }
    if log_path.exists() {
        if let Ok(meta) = fs::metadata(log_path) {
            if meta.len() > 1_000_000 {
                let rotated = log_path.with_extension("log.1");
                let _ = fs::rename(log_path, rotated);
            }
        }
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| SentryError::Config(e.to_string()))?;

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(false);

    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| SentryError::Config(e.to_string()))
}
