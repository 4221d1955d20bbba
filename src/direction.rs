//! Direction labeling, divergence scoring, confidence modifiers.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::drift::{RollingWindow, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirectionConfig {
    /// Minimum half-width of the neutral band, as a return fraction.
    pub neutral_floor: f64,
    /// ATR fraction added on top of the floor when volatility is elevated.
    pub atr_scale: f64,
}

impl DirectionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            neutral_floor: cfg.neutral_floor,
            atr_scale: cfg.atr_scale,
        }
    }
}

/// Half-width of the neutral band for the given ATR and price.
pub fn neutral_threshold(atr: f64, price: f64, cfg: &DirectionConfig) -> f64 {
    let atr_band = if price > 0.0 && atr > 0.0 {
        (atr / price) * cfg.atr_scale
    } else {
        0.0
    };
    cfg.neutral_floor.max(atr_band)
}

/// NEUTRAL iff |ret| is inside the ATR-scaled neutral band.
pub fn label_direction(ret: f64, atr: f64, price: f64, cfg: &DirectionConfig) -> Direction {
    let th = neutral_threshold(atr, price, cfg);
    if ret.abs() <= th {
        Direction::Neutral
    } else if ret > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    }
}

// =============================================================================
// Divergence scoring
// =============================================================================

/// Rolling comparison of predicted probability against realized frequency.
/// A persistently over-confident model drifts positive; under-confident
/// drifts negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceScorer {
    predicted: RollingWindow,
    realized: RollingWindow,
    watch: f64,
    warn: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DivergenceReport {
    pub divergence: f64,
    pub mean_predicted: f64,
    pub realized_frequency: f64,
    pub samples: usize,
    pub flag: Severity,
}

impl DivergenceScorer {
    pub fn new(window: usize, watch: f64, warn: f64) -> Self {
        Self {
            predicted: RollingWindow::new(window),
            realized: RollingWindow::new(window),
            watch,
            warn,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.forecast_window, cfg.divergence_watch, cfg.divergence_warn)
    }

    pub fn observe(&mut self, predicted_prob: f64, correct: bool) {
        self.predicted.push(predicted_prob.clamp(0.0, 1.0));
        self.realized.push(if correct { 1.0 } else { 0.0 });
    }

    pub fn report(&self) -> DivergenceReport {
        let mean_predicted = self.predicted.mean();
        let realized_frequency = self.realized.mean();
        let divergence = mean_predicted - realized_frequency;
        let flag = if divergence.abs() >= self.warn {
            Severity::Warn
        } else if divergence.abs() >= self.watch {
            Severity::Watch
        } else {
            Severity::Ok
        };
        DivergenceReport {
            divergence,
            mean_predicted,
            realized_frequency,
            samples: self.predicted.len(),
            flag,
        }
    }
}

// =============================================================================
// Confidence modifier
// =============================================================================

/// Combine base model confidence with governance multipliers. Missing
/// inputs degrade to the neutral 0.5 rather than erroring; the multipliers
/// shrink conviction toward neutral, never past it.
pub fn modified_confidence(base: Option<f64>, regime_mult: f64, drift_mult: f64) -> f64 {
    let base = base.unwrap_or(0.5).clamp(0.0, 1.0);
    let mult = (regime_mult * drift_mult).clamp(0.0, 1.0);
    (0.5 + (base - 0.5) * mult).clamp(0.0, 1.0)
}
