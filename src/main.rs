use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

use macrosight::cache::ModelCache;
use macrosight::config::{now_ts, Config};
use macrosight::drift::{DriftThresholds, ModelDriftTracker};
use macrosight::feed::{fetch_or_neutral, HttpIndicatorSource};
use macrosight::http::{build_router, AppState};
use macrosight::logging::{log, log_regime, obj, v_str, Domain, Level};
use macrosight::monitor::{enforce_all, tick_all, ShadowMonitor};
use macrosight::regime::{RegimeConfig, RegimeEngine};
use macrosight::store::DocStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let mut store = DocStore::new(&cfg.sqlite_path)?;
    store.init()?;

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("mode", v_str(cfg.system_mode.as_str())),
            ("http_addr", v_str(&cfg.http_addr)),
            ("sqlite_path", v_str(&cfg.sqlite_path)),
        ]),
    );

    let state = AppState {
        cfg: Arc::new(cfg.clone()),
        store: Arc::new(Mutex::new(store)),
        cache: Arc::new(ModelCache::new(cfg.model_cache_secs)),
        regime: Arc::new(Mutex::new(RegimeEngine::new(RegimeConfig::from_config(&cfg)))),
        trackers: Arc::new(Mutex::new(HashMap::<String, ModelDriftTracker>::new())),
        divergence: Arc::new(Mutex::new(HashMap::new())),
        forecast_seq: Arc::new(AtomicU64::new(0)),
    };

    spawn_monitor_loop(state.clone());
    spawn_tick_loop(state.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}

/// Indicator poll + shadow-monitor sweep on the monitor interval.
fn spawn_monitor_loop(state: AppState) {
    tokio::spawn(async move {
        let source = HttpIndicatorSource::new(&state.cfg);
        let th = DriftThresholds::from_config(&state.cfg);
        let guards = state.guards();
        let mut monitor = ShadowMonitor::new(state.cfg.rollback_after_criticals);
        let mut ticker = interval(Duration::from_secs(state.cfg.monitor_secs.max(1)));

        loop {
            ticker.tick().await;
            let ts = now_ts();

            let (observation, degraded) = fetch_or_neutral(&source).await;
            if degraded {
                log(
                    Level::Warn,
                    Domain::System,
                    "indicator_fetch_degraded",
                    obj(&[("fallback", v_str("neutral"))]),
                );
            }
            {
                let mut engine = state.regime.lock().await;
                let snap = engine.observe(
                    observation.momentum,
                    observation.volatility,
                    observation.funding,
                    observation.breadth,
                    observation.stress,
                    observation.ts.max(ts),
                );
                log_regime(
                    snap.label.as_str(),
                    snap.confidence,
                    snap.indicators.momentum_z,
                    snap.indicators.vol_ratio,
                    snap.indicators.stress,
                );
            }

            let trackers = state.trackers.lock().await;
            let mut store = state.store.lock().await;
            if let Err(err) = monitor.sweep(
                &mut store,
                &trackers,
                &th,
                &guards,
                state.cfg.audit_trail_cap,
                ts,
            ) {
                log(
                    Level::Error,
                    Domain::Monitor,
                    "sweep_failed",
                    obj(&[("error", json!(err.to_string()))]),
                );
            }
        }
    });
}

/// Lifecycle tick + integrity sweep on the tick interval.
fn spawn_tick_loop(state: AppState) {
    tokio::spawn(async move {
        let guards = state.guards();
        let mut ticker = interval(Duration::from_secs(state.cfg.tick_secs.max(1)));
        // The first interval tick fires immediately; skip it so a fresh
        // process does not count a warmup day at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let ts = now_ts();
            let mut store = state.store.lock().await;
            match tick_all(&mut store, &guards, state.cfg.audit_trail_cap, ts) {
                Ok(fired) => {
                    if !fired.is_empty() {
                        log(
                            Level::Info,
                            Domain::Lifecycle,
                            "tick_applied",
                            obj(&[("count", json!(fired.len()))]),
                        );
                    }
                }
                Err(err) => log(
                    Level::Error,
                    Domain::Lifecycle,
                    "tick_failed",
                    obj(&[("error", json!(err.to_string()))]),
                ),
            }
            if let Err(err) = enforce_all(&mut store, &guards, state.cfg.audit_trail_cap, ts) {
                log(
                    Level::Error,
                    Domain::Lifecycle,
                    "integrity_failed",
                    obj(&[("error", json!(err.to_string()))]),
                );
            }
        }
    });
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
