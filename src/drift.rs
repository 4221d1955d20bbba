//! Drift detection and severity scoring.
//!
//! Two inputs feed governance: distribution shift on tracked feature
//! windows (baseline vs. recent, Welford online stats) and degradation of
//! live model performance relative to its baseline cohort (hit-rate drop,
//! Brier rise). Severity is a four-level scale consumed by sizing and by
//! the lifecycle guards.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::calibration::MetricsSnapshot;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Watch,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Watch => "WATCH",
            Severity::Warn => "WARN",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Position multiplier applied by sizing under this severity.
    pub fn position_multiplier(&self) -> f64 {
        match self {
            Severity::Ok => 1.0,
            Severity::Watch => 0.9,
            Severity::Warn => 0.5,
            Severity::Critical => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftThresholds {
    /// Combined feature-score thresholds.
    pub watch: f64,
    pub warn: f64,
    pub critical: f64,
    /// Hit-rate drop (baseline minus live) that alone scores CRITICAL.
    pub hitrate_critical_drop: f64,
    /// Brier rise (live minus baseline) that alone scores CRITICAL.
    pub brier_critical_rise: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            watch: 1.0,
            warn: 2.0,
            critical: 3.0,
            hitrate_critical_drop: 0.15,
            brier_critical_rise: 0.08,
        }
    }
}

impl DriftThresholds {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            watch: cfg.drift_watch,
            warn: cfg.drift_warn,
            critical: cfg.drift_critical,
            hitrate_critical_drop: cfg.hitrate_critical_drop,
            brier_critical_rise: cfg.brier_critical_rise,
        }
    }
}

/// Severity for a combined feature score. CRITICAL iff the critical
/// threshold is exceeded; the lower rungs ladder down from there.
pub fn score_severity(score: f64, th: &DriftThresholds) -> Severity {
    if score >= th.critical {
        Severity::Critical
    } else if score >= th.warn {
        Severity::Warn
    } else if score >= th.watch {
        Severity::Watch
    } else {
        Severity::Ok
    }
}

// =============================================================================
// Rolling window (Welford online statistics)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    max_size: usize,
    values: VecDeque<f64>,
    n: u64,
    mean: f64,
    m2: f64,
}

impl RollingWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            values: VecDeque::with_capacity(max_size),
            n: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            if let Some(old) = self.values.pop_front() {
                self.remove_from_stats(old);
            }
        }
        self.values.push_back(value);
        self.add_to_stats(value);
    }

    fn add_to_stats(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn remove_from_stats(&mut self, value: f64) {
        if self.n <= 1 {
            self.n = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = value - self.mean;
        self.mean = (self.mean * self.n as f64 - value) / (self.n as f64 - 1.0);
        let delta2 = value - self.mean;
        self.m2 -= delta * delta2;
        self.n -= 1;
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.max_size
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            self.m2 / (self.n as f64 - 1.0)
        } else {
            0.0
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

// =============================================================================
// Per-feature drift tracking
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub feature: String,
    /// Combined drift score (0.0 = no drift).
    pub score: f64,
    pub severity: Severity,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    pub recent_mean: f64,
    pub recent_std: f64,
    pub mean_shift_z: f64,
    pub psi: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTracker {
    name: String,
    baseline: RollingWindow,
    recent: RollingWindow,
}

impl FeatureTracker {
    pub fn new(name: &str, baseline_size: usize, recent_size: usize) -> Self {
        Self {
            name: name.to_string(),
            baseline: RollingWindow::new(baseline_size),
            recent: RollingWindow::new(recent_size),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, value: f64) {
        self.baseline.push(value);
        self.recent.push(value);
    }

    pub fn is_ready(&self) -> bool {
        self.baseline.is_full() && self.recent.is_full()
    }

    pub fn report(&self, th: &DriftThresholds) -> DriftReport {
        let baseline_mean = self.baseline.mean();
        let baseline_std = self.baseline.std();
        let recent_mean = self.recent.mean();
        let recent_std = self.recent.std();

        let mean_shift_z = if baseline_std > 1e-9 {
            (recent_mean - baseline_mean).abs() / baseline_std
        } else {
            0.0
        };

        let psi = self.quantile_psi();
        let score = mean_shift_z * 0.6 + psi * 0.4;

        DriftReport {
            feature: self.name.clone(),
            score,
            severity: score_severity(score, th),
            baseline_mean,
            baseline_std,
            recent_mean,
            recent_std,
            mean_shift_z,
            psi,
        }
    }

    /// Quantile-based PSI proxy over the quartiles.
    fn quantile_psi(&self) -> f64 {
        if !self.is_ready() {
            return 0.0;
        }
        let quantiles = [0.25, 0.50, 0.75];
        let mut psi_sum = 0.0;
        for q in quantiles {
            let baseline_q = self.baseline.percentile(q);
            let recent_q = self.recent.percentile(q);
            if baseline_q.abs() > 1e-9 {
                let ratio = recent_q / baseline_q;
                if ratio > 0.0 {
                    let diff = (recent_q - baseline_q) / baseline_q.abs();
                    psi_sum += diff.abs() * ratio.ln().abs();
                }
            }
        }
        psi_sum
    }
}

// =============================================================================
// Model-level drift evaluation
// =============================================================================

/// Derived per-request; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DriftResult {
    pub model_id: String,
    pub severity: Severity,
    pub hitrate_delta: f64,
    pub brier_delta: f64,
    pub feature_reports: Vec<DriftReport>,
    pub position_multiplier: f64,
}

/// Tracks score-stream features for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDriftTracker {
    pub model_id: String,
    features: Vec<FeatureTracker>,
    pub last_update_ts: u64,
}

impl ModelDriftTracker {
    pub fn new(model_id: &str, baseline_size: usize, recent_size: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            features: vec![
                FeatureTracker::new("confidence", baseline_size, recent_size),
                FeatureTracker::new("probability", baseline_size, recent_size),
                FeatureTracker::new("realized_return", baseline_size, recent_size),
                FeatureTracker::new("abs_error", baseline_size, recent_size),
            ],
            last_update_ts: 0,
        }
    }

    pub fn push(&mut self, feature: &str, value: f64, ts: u64) {
        for tracker in &mut self.features {
            if tracker.name == feature {
                tracker.push(value);
                break;
            }
        }
        self.last_update_ts = ts;
    }

    pub fn observe(&mut self, confidence: f64, probability: f64, realized_return: f64, abs_error: f64, ts: u64) {
        self.push("confidence", confidence, ts);
        self.push("probability", probability, ts);
        self.push("realized_return", realized_return, ts);
        self.push("abs_error", abs_error, ts);
    }

    pub fn reports(&self, th: &DriftThresholds) -> Vec<DriftReport> {
        self.features
            .iter()
            .filter(|f| f.is_ready())
            .map(|f| f.report(th))
            .collect()
    }
}

/// Compare live metrics against the baseline cohort and fold in feature
/// shift. CRITICAL iff any configured critical threshold is exceeded.
pub fn evaluate_model(
    model_id: &str,
    live: &MetricsSnapshot,
    baseline: &MetricsSnapshot,
    tracker: Option<&ModelDriftTracker>,
    th: &DriftThresholds,
) -> DriftResult {
    let hitrate_delta = baseline.hit_rate - live.hit_rate;
    let brier_delta = live.brier - baseline.brier;

    let feature_reports = tracker.map(|t| t.reports(th)).unwrap_or_default();

    let mut severity = feature_reports
        .iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or(Severity::Ok);

    // Metric deltas only count once the live cohort has substance.
    if live.samples >= 10 {
        if hitrate_delta >= th.hitrate_critical_drop || brier_delta >= th.brier_critical_rise {
            severity = Severity::Critical;
        } else if hitrate_delta >= th.hitrate_critical_drop * 0.5
            || brier_delta >= th.brier_critical_rise * 0.5
        {
            severity = severity.max(Severity::Warn);
        } else if hitrate_delta >= th.hitrate_critical_drop * 0.25
            || brier_delta >= th.brier_critical_rise * 0.25
        {
            severity = severity.max(Severity::Watch);
        }
    }

    DriftResult {
        model_id: model_id.to_string(),
        severity,
        hitrate_delta,
        brier_delta,
        feature_reports,
        position_multiplier: severity.position_multiplier(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(hit_rate: f64, brier: f64, samples: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            hit_rate,
            brier,
            samples,
            wins: (hit_rate * samples as f64) as u64,
        }
    }

    #[test]
    fn test_rolling_window_stats() {
        let mut window = RollingWindow::new(5);
        for i in 1..=5 {
            window.push(i as f64);
        }
        assert_eq!(window.len(), 5);
        assert!((window.mean() - 3.0).abs() < 1e-9);

        window.push(10.0);
        window.push(10.0);
        assert_eq!(window.len(), 5);
        assert!(window.mean() > 3.0);
    }

    #[test]
    fn test_score_severity_ladder() {
        let th = DriftThresholds::default();
        assert_eq!(score_severity(0.2, &th), Severity::Ok);
        assert_eq!(score_severity(1.2, &th), Severity::Watch);
        assert_eq!(score_severity(2.5, &th), Severity::Warn);
        assert_eq!(score_severity(3.0, &th), Severity::Critical);
        assert_eq!(score_severity(9.0, &th), Severity::Critical);
    }

    #[test]
    fn test_critical_iff_threshold_exceeded() {
        let th = DriftThresholds::default();
        // Sweep scores across the ladder; CRITICAL exactly when the
        // critical threshold is met or exceeded.
        for i in 0..100 {
            let score = i as f64 * 0.05;
            let sev = score_severity(score, &th);
            assert_eq!(sev == Severity::Critical, score >= th.critical, "score {}", score);
        }
    }

    #[test]
    fn test_no_drift_when_stable() {
        let th = DriftThresholds::default();
        let mut tracker = FeatureTracker::new("confidence", 50, 10);
        for i in 0..100 {
            tracker.push(0.6 + ((i % 7) as f64) * 0.01);
        }
        let report = tracker.report(&th);
        assert!(matches!(report.severity, Severity::Ok | Severity::Watch));
    }

    #[test]
    fn test_drift_when_shifted() {
        let th = DriftThresholds::default();
        let mut tracker = FeatureTracker::new("confidence", 100, 10);
        for i in 0..100 {
            tracker.push(0.6 + ((i % 5) as f64) * 0.005);
        }
        for _ in 0..10 {
            tracker.push(0.95);
        }
        let report = tracker.report(&th);
        assert!(
            report.mean_shift_z > 1.0 || report.score > 1.0,
            "should detect shift: z={:.2} score={:.2}",
            report.mean_shift_z,
            report.score
        );
    }

    #[test]
    fn test_hitrate_drop_scores_critical() {
        let th = DriftThresholds::default();
        let baseline = snapshot(0.60, 0.20, 500);
        let live = snapshot(0.40, 0.22, 50);
        let result = evaluate_model("m1", &live, &baseline, None, &th);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.position_multiplier, 0.0);
    }

    #[test]
    fn test_brier_rise_scores_critical() {
        let th = DriftThresholds::default();
        let baseline = snapshot(0.58, 0.20, 500);
        let live = snapshot(0.57, 0.30, 50);
        let result = evaluate_model("m1", &live, &baseline, None, &th);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_healthy_model_scores_ok() {
        let th = DriftThresholds::default();
        let baseline = snapshot(0.58, 0.20, 500);
        let live = snapshot(0.57, 0.21, 50);
        let result = evaluate_model("m1", &live, &baseline, None, &th);
        assert!(matches!(result.severity, Severity::Ok | Severity::Watch));
        assert!(result.position_multiplier > 0.5);
    }

    #[test]
    fn test_thin_live_cohort_ignores_deltas() {
        let th = DriftThresholds::default();
        let baseline = snapshot(0.60, 0.20, 500);
        let live = snapshot(0.10, 0.50, 5);
        let result = evaluate_model("m1", &live, &baseline, None, &th);
        assert_eq!(result.severity, Severity::Ok);
    }

    #[test]
    fn test_severity_ordering_and_multipliers() {
        assert!(Severity::Ok < Severity::Watch);
        assert!(Severity::Warn < Severity::Critical);
        assert!(Severity::Critical.position_multiplier() == 0.0);
        assert!(Severity::Ok.position_multiplier() == 1.0);
    }
}
