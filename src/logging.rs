//! Structured logging for the intelligence backend.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain categories for filtering (lifecycle, drift, http, ...)
//! 3. Per-run jsonl files for replay and audit
//! 4. Env-controlled verbosity (`LOG_LEVEL`, `LOG_DOMAINS`, `LOG_DIR`)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Lifecycle, // Stage transitions, warmup accounting, integrity repairs
    Registry,  // Promotions, rollbacks, shadow staging
    Drift,     // Severity evaluations, feature shift reports
    Monitor,   // Shadow monitor sweeps, rollback triggers
    Regime,    // Regime snapshots and summaries
    Forecast,  // Forecast issuance and resolution
    Http,      // Request handling
    Store,     // Document reads/writes
    System,    // Startup, shutdown, background loops
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Lifecycle => "lifecycle",
            Domain::Registry => "registry",
            Domain::Drift => "drift",
            Domain::Monitor => "monitor",
            Domain::Regime => "regime",
            Domain::Forecast => "forecast",
            Domain::Http => "http",
            Domain::Store => "store",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let events_path = run_dir.join("events.jsonl");
        let trace_path = run_dir.join("trace.jsonl");
        let manifest_path = run_dir.join("manifest.json");

        let _ = std::fs::write(
            manifest_path,
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        let events = File::create(events_path).unwrap_or_else(|err| {
            eprintln!("[log] failed to create events log: {}", err);
            File::create("/tmp/macrosight-events.jsonl").expect("events fallback")
        });
        let trace = File::create(trace_path).unwrap_or_else(|err| {
            eprintln!("[log] failed to create trace log: {}", err);
            File::create("/tmp/macrosight-trace.jsonl").expect("trace fallback")
        });

        RunContext {
            run_id,
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
        }
    })
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    let ctx = ensure_run_context();
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-specific helpers
// =============================================================================

pub fn log_transition(model_id: &str, from: &str, to: &str, trigger: &str, reason: &str) {
    log(
        Level::Info,
        Domain::Lifecycle,
        "transition",
        obj(&[
            ("model_id", v_str(model_id)),
            ("from", v_str(from)),
            ("to", v_str(to)),
            ("trigger", v_str(trigger)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_transition_rejected(model_id: &str, stage: &str, event: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Lifecycle,
        "transition_rejected",
        obj(&[
            ("model_id", v_str(model_id)),
            ("stage", v_str(stage)),
            ("event", v_str(event)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_promotion(family: &str, horizon: &str, promoted: &str, demoted: Option<&str>) {
    log(
        Level::Info,
        Domain::Registry,
        "promotion",
        obj(&[
            ("family", v_str(family)),
            ("horizon", v_str(horizon)),
            ("promoted", v_str(promoted)),
            ("demoted", demoted.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_rollback(family: &str, horizon: &str, restored: &str, retired: &str, trigger: &str) {
    log(
        Level::Warn,
        Domain::Registry,
        "rollback",
        obj(&[
            ("family", v_str(family)),
            ("horizon", v_str(horizon)),
            ("restored", v_str(restored)),
            ("retired", v_str(retired)),
            ("trigger", v_str(trigger)),
        ]),
    );
}

pub fn log_drift(model_id: &str, severity: &str, score: f64, metrics: &[(&str, f64)]) {
    let mets: Map<String, Value> = metrics
        .iter()
        .map(|(k, v)| (k.to_string(), v_num(*v)))
        .collect();
    log(
        Level::Warn,
        Domain::Drift,
        "severity",
        obj(&[
            ("model_id", v_str(model_id)),
            ("severity", v_str(severity)),
            ("score", v_num(score)),
            ("metrics", Value::Object(mets)),
        ]),
    );
}

pub fn log_monitor_sweep(evaluated: usize, criticals: usize, rollbacks: usize) {
    log(
        Level::Info,
        Domain::Monitor,
        "sweep",
        obj(&[
            ("evaluated", json!(evaluated)),
            ("criticals", json!(criticals)),
            ("rollbacks", json!(rollbacks)),
        ]),
    );
}

pub fn log_regime(label: &str, confidence: f64, momentum_z: f64, vol_ratio: f64, stress: f64) {
    log(
        Level::Debug,
        Domain::Regime,
        "snapshot",
        obj(&[
            ("label", v_str(label)),
            ("confidence", v_num(confidence)),
            ("momentum_z", v_num(momentum_z)),
            ("vol_ratio", v_num(vol_ratio)),
            ("stress", v_num(stress)),
        ]),
    );
}

pub fn log_forecast(event: &str, forecast_id: &str, model_id: &str, detail: &[(&str, Value)]) {
    let mut fields = obj(&[
        ("forecast_id", v_str(forecast_id)),
        ("model_id", v_str(model_id)),
    ]);
    for (k, v) in detail {
        fields.insert((*k).to_string(), v.clone());
    }
    log(Level::Info, Domain::Forecast, event, fields);
}

pub fn log_http(method: &str, path: &str, status: u16) {
    log(
        Level::Debug,
        Domain::Http,
        "request",
        obj(&[
            ("method", v_str(method)),
            ("path", v_str(path)),
            ("status", json!(status)),
        ]),
    );
}

pub fn log_integrity(model_id: &str, action: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Lifecycle,
        "integrity",
        obj(&[
            ("model_id", v_str(model_id)),
            ("action", v_str(action)),
            ("reason", v_str(reason)),
        ]),
    );
}

// =============================================================================
// Utility constructors
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Warn < Level::Fatal);
    }

    #[test]
    fn test_obj_builder() {
        let map = obj(&[("a", v_str("x")), ("b", v_num(1.5))]);
        assert_eq!(map.get("a").and_then(|v| v.as_str()), Some("x"));
        assert_eq!(map.get("b").and_then(|v| v.as_f64()), Some(1.5));
    }

    #[test]
    fn test_domain_names() {
        assert_eq!(Domain::Lifecycle.as_str(), "lifecycle");
        assert_eq!(Domain::Http.as_str(), "http");
    }
}
