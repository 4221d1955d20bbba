//! Calibration diagnostics and forecast-outcome tracking.
//!
//! Forecasts are issued against a model and horizon, resolved against
//! realized prices, and accumulated into the rolling metric snapshots that
//! drift scoring compares against the baseline cohort.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::direction::{label_direction, Direction, DirectionConfig};

/// Rolling performance snapshot for a cohort of resolved forecasts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hit_rate: f64,
    pub brier: f64,
    pub samples: u64,
    pub wins: u64,
}

impl MetricsSnapshot {
    /// Fold one resolved outcome into the running means.
    pub fn absorb(&mut self, correct: bool, brier: f64) {
        self.samples = self.samples.saturating_add(1);
        if correct {
            self.wins = self.wins.saturating_add(1);
        }
        self.hit_rate = self.wins as f64 / self.samples as f64;
        let n = self.samples as f64;
        self.brier += (brier - self.brier) / n;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastOutcome {
    pub realized_return: f64,
    pub realized_direction: Direction,
    pub correct: bool,
    pub brier: f64,
    pub resolved_ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub id: String,
    pub model_id: String,
    pub family: String,
    pub horizon: String,
    pub direction: Direction,
    /// Model confidence that `direction` is correct.
    pub probability: f64,
    pub reference_price: f64,
    /// Regime label at issuance, for per-regime breakdowns.
    pub regime: Option<String>,
    pub issued_ts: u64,
    pub outcome: Option<ForecastOutcome>,
}

impl ForecastRecord {
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Resolve against a realized price. Direction labeling is ATR-scaled;
    /// a NEUTRAL forecast is correct when the realized label is NEUTRAL.
    pub fn resolve(
        &mut self,
        realized_price: f64,
        atr: f64,
        dir_cfg: &DirectionConfig,
        ts: u64,
    ) -> &ForecastOutcome {
        let realized_return = if self.reference_price > 0.0 {
            (realized_price - self.reference_price) / self.reference_price
        } else {
            0.0
        };
        let realized_direction =
            label_direction(realized_return, atr, self.reference_price, dir_cfg);
        let correct = realized_direction == self.direction;
        let p = self.probability.clamp(0.0, 1.0);
        let brier = (p - if correct { 1.0 } else { 0.0 }).powi(2);
        self.outcome = Some(ForecastOutcome {
            realized_return,
            realized_direction,
            correct,
            brier,
            resolved_ts: ts,
        });
        self.outcome.as_ref().expect("just set")
    }
}

// =============================================================================
// Reliability diagram
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
    pub mean_predicted: f64,
    pub realized_frequency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub model_id: String,
    pub samples: u64,
    pub hit_rate: f64,
    pub brier: f64,
    /// Mean |predicted - realized frequency| across populated bins.
    pub calibration_gap: f64,
    pub bins: Vec<ReliabilityBin>,
}

/// Build a calibration report from resolved forecasts for one model.
pub fn calibration_report(
    model_id: &str,
    forecasts: &[ForecastRecord],
    bin_count: usize,
) -> CalibrationReport {
    let bin_count = bin_count.max(1);
    let mut snapshot = MetricsSnapshot::default();
    let mut counts = vec![0u64; bin_count];
    let mut predicted_sums = vec![0.0f64; bin_count];
    let mut correct_counts = vec![0u64; bin_count];

    for f in forecasts {
        if f.model_id != model_id {
            continue;
        }
        let Some(outcome) = &f.outcome else { continue };
        snapshot.absorb(outcome.correct, outcome.brier);
        let p = f.probability.clamp(0.0, 1.0);
        let idx = ((p * bin_count as f64) as usize).min(bin_count - 1);
        counts[idx] += 1;
        predicted_sums[idx] += p;
        if outcome.correct {
            correct_counts[idx] += 1;
        }
    }

    let width = 1.0 / bin_count as f64;
    let mut bins = Vec::with_capacity(bin_count);
    let mut gap_sum = 0.0;
    let mut populated = 0u64;
    for i in 0..bin_count {
        let count = counts[i];
        let mean_predicted = if count > 0 { predicted_sums[i] / count as f64 } else { 0.0 };
        let realized_frequency = if count > 0 {
            correct_counts[i] as f64 / count as f64
        } else {
            0.0
        };
        if count > 0 {
            gap_sum += (mean_predicted - realized_frequency).abs();
            populated += 1;
        }
        bins.push(ReliabilityBin {
            lower: i as f64 * width,
            upper: (i + 1) as f64 * width,
            count,
            mean_predicted,
            realized_frequency,
        });
    }

    CalibrationReport {
        model_id: model_id.to_string(),
        samples: snapshot.samples,
        hit_rate: snapshot.hit_rate,
        brier: snapshot.brier,
        calibration_gap: if populated > 0 { gap_sum / populated as f64 } else { 0.0 },
        bins,
    }
}

/// Per-regime performance breakdown over resolved forecasts.
pub fn regime_breakdown(forecasts: &[ForecastRecord]) -> HashMap<String, MetricsSnapshot> {
    let mut out: HashMap<String, MetricsSnapshot> = HashMap::new();
    for f in forecasts {
        let Some(outcome) = &f.outcome else { continue };
        let key = f.regime.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        out.entry(key).or_default().absorb(outcome.correct, outcome.brier);
    }
    out
}
