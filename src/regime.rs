//! Regime classification from signed macro indicators.
//!
//! Threshold rules over momentum z-score, volatility ratio, breadth and a
//! stress gauge produce a categorical label. A rolling engine maintains the
//! z-score baselines; a dataset-level summary aggregates snapshot labels
//! into a dominant regime with label fractions.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::drift::RollingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    RiskOn,
    Neutral,
    RiskOff,
    RiskOffStress,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::RiskOn => "RISK_ON",
            RegimeLabel::Neutral => "NEUTRAL",
            RegimeLabel::RiskOff => "RISK_OFF",
            RegimeLabel::RiskOffStress => "RISK_OFF_STRESS",
        }
    }

    /// Exposure multiplier applied by sizing under this regime.
    pub fn position_multiplier(&self) -> f64 {
        match self {
            RegimeLabel::RiskOn => 1.0,
            RegimeLabel::Neutral => 0.7,
            RegimeLabel::RiskOff => 0.4,
            RegimeLabel::RiskOffStress => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub window: usize,
    pub momentum_th: f64,
    pub vol_high: f64,
    pub stress_th: f64,
    pub breadth_floor: f64,
}

impl RegimeConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            window: cfg.regime_window,
            momentum_th: cfg.regime_momentum_th,
            vol_high: cfg.regime_vol_high,
            stress_th: cfg.regime_stress_th,
            breadth_floor: cfg.regime_breadth_floor,
        }
    }
}

/// Signed indicator set for one observation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegimeIndicators {
    pub momentum_z: f64,
    pub vol_ratio: f64,
    pub funding_z: f64,
    /// Fraction of tracked assets above trend, 0..1.
    pub breadth: f64,
    /// Signed stress gauge (liquidation/credit proxy), in z units.
    pub stress: f64,
}

/// Pure threshold ladder over the signed indicators.
pub fn classify(ind: &RegimeIndicators, cfg: &RegimeConfig) -> RegimeLabel {
    if ind.stress >= cfg.stress_th
        || (ind.vol_ratio >= cfg.vol_high && ind.momentum_z <= -cfg.momentum_th)
    {
        return RegimeLabel::RiskOffStress;
    }
    if ind.momentum_z <= -cfg.momentum_th || ind.breadth < cfg.breadth_floor {
        return RegimeLabel::RiskOff;
    }
    if ind.momentum_z >= cfg.momentum_th && ind.vol_ratio < cfg.vol_high {
        return RegimeLabel::RiskOn;
    }
    RegimeLabel::Neutral
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeSnapshot {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub indicators: RegimeIndicators,
    pub ts: u64,
}

/// Rolling engine: turns raw momentum/volatility readings into z-scored
/// indicators and classifies each observation.
#[derive(Debug, Clone)]
pub struct RegimeEngine {
    cfg: RegimeConfig,
    momentum: RollingWindow,
    volatility: RollingWindow,
    funding: RollingWindow,
    recent_labels: Vec<RegimeLabel>,
    last: Option<RegimeSnapshot>,
}

impl RegimeEngine {
    pub fn new(cfg: RegimeConfig) -> Self {
        let window = cfg.window.max(2);
        Self {
            cfg,
            momentum: RollingWindow::new(window * 5),
            volatility: RollingWindow::new(window * 5),
            funding: RollingWindow::new(window * 5),
            recent_labels: Vec::new(),
            last: None,
        }
    }

    /// Feed one raw observation; returns the classified snapshot.
    pub fn observe(
        &mut self,
        momentum: f64,
        volatility: f64,
        funding: f64,
        breadth: f64,
        stress: f64,
        ts: u64,
    ) -> RegimeSnapshot {
        self.momentum.push(momentum);
        self.volatility.push(volatility);
        self.funding.push(funding);

        // Degrade to neutral until the baselines have substance.
        if self.momentum.len() < self.cfg.window {
            let snap = RegimeSnapshot {
                label: RegimeLabel::Neutral,
                confidence: 0.5,
                indicators: RegimeIndicators::default(),
                ts,
            };
            self.last = Some(snap.clone());
            return snap;
        }

        let mom_std = self.momentum.std().max(1e-9);
        let momentum_z = (momentum - self.momentum.mean()) / mom_std;
        let vol_mean = self.volatility.mean().max(1e-9);
        let vol_ratio = volatility / vol_mean;
        let fund_std = self.funding.std().max(1e-9);
        let funding_z = (funding - self.funding.mean()) / fund_std;

        let indicators = RegimeIndicators {
            momentum_z,
            vol_ratio,
            funding_z,
            breadth: breadth.clamp(0.0, 1.0),
            stress,
        };
        let label = classify(&indicators, &self.cfg);

        // Confidence from the margin past the nearest deciding threshold.
        let margin = match label {
            RegimeLabel::RiskOn => (momentum_z - self.cfg.momentum_th).abs(),
            RegimeLabel::RiskOff => (momentum_z + self.cfg.momentum_th).abs(),
            RegimeLabel::RiskOffStress => (stress - self.cfg.stress_th).abs().max(0.5),
            RegimeLabel::Neutral => 0.0,
        };
        let confidence = (0.5 + margin * 0.25).clamp(0.5, 0.95);

        self.recent_labels.push(label);
        if self.recent_labels.len() > self.cfg.window * 5 {
            let excess = self.recent_labels.len() - self.cfg.window * 5;
            self.recent_labels.drain(..excess);
        }

        let snap = RegimeSnapshot { label, confidence, indicators, ts };
        self.last = Some(snap.clone());
        snap
    }

    pub fn current(&self) -> Option<&RegimeSnapshot> {
        self.last.as_ref()
    }

    pub fn summary(&self) -> RegimeSummary {
        summarize(&self.recent_labels)
    }
}

/// Aggregate over a label series: dominant regime plus fractions.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeSummary {
    pub dominant: RegimeLabel,
    pub confidence: f64,
    pub risk_on_frac: f64,
    pub neutral_frac: f64,
    pub risk_off_frac: f64,
    pub stress_frac: f64,
    pub samples: usize,
}

pub fn summarize(labels: &[RegimeLabel]) -> RegimeSummary {
    if labels.is_empty() {
        return RegimeSummary {
            dominant: RegimeLabel::Neutral,
            confidence: 0.5,
            risk_on_frac: 0.0,
            neutral_frac: 1.0,
            risk_off_frac: 0.0,
            stress_frac: 0.0,
            samples: 0,
        };
    }
    let n = labels.len() as f64;
    let frac = |l: RegimeLabel| labels.iter().filter(|&&x| x == l).count() as f64 / n;
    let risk_on = frac(RegimeLabel::RiskOn);
    let neutral = frac(RegimeLabel::Neutral);
    let risk_off = frac(RegimeLabel::RiskOff);
    let stress = frac(RegimeLabel::RiskOffStress);

    let dominant = if stress >= risk_on && stress >= neutral && stress >= risk_off && stress > 0.0 {
        RegimeLabel::RiskOffStress
    } else if risk_off >= risk_on && risk_off >= neutral {
        RegimeLabel::RiskOff
    } else if risk_on >= neutral {
        RegimeLabel::RiskOn
    } else {
        RegimeLabel::Neutral
    };

    RegimeSummary {
        dominant,
        confidence: frac(dominant),
        risk_on_frac: risk_on,
        neutral_frac: neutral,
        risk_off_frac: risk_off,
        stress_frac: stress,
        samples: labels.len(),
    }
}
