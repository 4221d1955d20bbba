use serde::{Deserialize, Serialize};

/// Operating mode for the whole process. DEV relaxes admin guards
/// (reset-simulation) and is the default for local runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemMode {
    Dev,
    Prod,
}

impl SystemMode {
    pub fn from_env() -> Self {
        match std::env::var("SYSTEM_MODE").as_deref() {
            Ok("prod") | Ok("PROD") => SystemMode::Prod,
            _ => SystemMode::Dev,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Dev => "DEV",
            SystemMode::Prod => "PROD",
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub system_mode: SystemMode,
    pub http_addr: String,
    pub sqlite_path: String,
    /// Seconds between shadow-monitor evaluations.
    pub monitor_secs: u64,
    /// Seconds between lifecycle ticks (86400 in PROD, shorter in DEV runs).
    pub tick_secs: u64,
    /// Warmup days required before auto-apply.
    pub warmup_target_days: u32,
    /// Live samples required before APPLIED is valid.
    pub min_live_samples: u64,
    /// Consecutive CRITICAL evaluations before auto-rollback.
    pub rollback_after_criticals: u32,
    /// Model cache TTL.
    pub model_cache_secs: u64,
    /// Audit trail entries kept per lifecycle document.
    pub audit_trail_cap: usize,
    // Drift thresholds on the combined per-feature score.
    pub drift_watch: f64,
    pub drift_warn: f64,
    pub drift_critical: f64,
    /// Hit-rate drop (live vs baseline) that alone scores CRITICAL.
    pub hitrate_critical_drop: f64,
    /// Brier-score rise (live vs baseline) that alone scores CRITICAL.
    pub brier_critical_rise: f64,
    pub drift_baseline_window: usize,
    pub drift_recent_window: usize,
    // Regime classification.
    pub regime_window: usize,
    pub regime_momentum_th: f64,
    pub regime_vol_high: f64,
    pub regime_stress_th: f64,
    pub regime_breadth_floor: f64,
    // Direction labeling.
    pub neutral_floor: f64,
    pub atr_scale: f64,
    // Divergence scoring.
    pub divergence_watch: f64,
    pub divergence_warn: f64,
    // Sizing.
    pub base_size_pct: f64,
    pub target_vol: f64,
    pub kelly_fraction: f64,
    pub min_forecasts_for_kelly: u64,
    // Upstream indicator source.
    pub indicator_base: String,
    pub indicator_timeout_secs: u64,
    // Calibration.
    pub reliability_bins: usize,
    pub forecast_window: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            system_mode: SystemMode::from_env(),
            http_addr: std::env::var("HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8090".to_string()),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./macrosight.sqlite".to_string()),
            monitor_secs: std::env::var("MONITOR_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            tick_secs: std::env::var("TICK_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(86_400),
            warmup_target_days: std::env::var("WARMUP_DAYS").ok().and_then(|v| v.parse().ok()).unwrap_or(7),
            min_live_samples: std::env::var("MIN_LIVE_SAMPLES").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            rollback_after_criticals: std::env::var("ROLLBACK_AFTER_CRITICALS").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            model_cache_secs: std::env::var("MODEL_CACHE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
            audit_trail_cap: std::env::var("AUDIT_TRAIL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(64),
            drift_watch: std::env::var("DRIFT_WATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(1.0),
            drift_warn: std::env::var("DRIFT_WARN").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0),
            drift_critical: std::env::var("DRIFT_CRITICAL").ok().and_then(|v| v.parse().ok()).unwrap_or(3.0),
            hitrate_critical_drop: std::env::var("HITRATE_CRITICAL_DROP").ok().and_then(|v| v.parse().ok()).unwrap_or(0.15),
            brier_critical_rise: std::env::var("BRIER_CRITICAL_RISE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.08),
            drift_baseline_window: std::env::var("DRIFT_BASELINE_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            drift_recent_window: std::env::var("DRIFT_RECENT_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            regime_window: std::env::var("REGIME_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            regime_momentum_th: std::env::var("REGIME_MOM_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.5),
            regime_vol_high: std::env::var("REGIME_VOL_HIGH").ok().and_then(|v| v.parse().ok()).unwrap_or(1.6),
            regime_stress_th: std::env::var("REGIME_STRESS_TH").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0),
            regime_breadth_floor: std::env::var("REGIME_BREADTH_FLOOR").ok().and_then(|v| v.parse().ok()).unwrap_or(0.35),
            neutral_floor: std::env::var("NEUTRAL_FLOOR").ok().and_then(|v| v.parse().ok()).unwrap_or(0.0015),
            atr_scale: std::env::var("ATR_SCALE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.25),
            divergence_watch: std::env::var("DIVERGENCE_WATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(0.08),
            divergence_warn: std::env::var("DIVERGENCE_WARN").ok().and_then(|v| v.parse().ok()).unwrap_or(0.15),
            base_size_pct: std::env::var("BASE_SIZE_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(0.02),
            target_vol: std::env::var("TARGET_VOL").ok().and_then(|v| v.parse().ok()).unwrap_or(0.01),
            kelly_fraction: std::env::var("KELLY_FRACTION").ok().and_then(|v| v.parse().ok()).unwrap_or(0.25),
            min_forecasts_for_kelly: std::env::var("MIN_FORECASTS_FOR_KELLY").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            indicator_base: std::env::var("INDICATOR_BASE").unwrap_or_else(|_| "http://127.0.0.1:9050".to_string()),
            indicator_timeout_secs: std::env::var("INDICATOR_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            reliability_bins: std::env::var("RELIABILITY_BINS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            forecast_window: std::env::var("FORECAST_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(200),
        }
    }
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
