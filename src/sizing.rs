//! Position construction heuristics.
//!
//! All sizing functions return a quantity in base asset units. Governance
//! (drift severity, regime label) enters as multiplicative haircuts.

use serde::Serialize;

use crate::calibration::MetricsSnapshot;
use crate::drift::Severity;
use crate::regime::RegimeLabel;

/// Fixed percentage of equity
pub fn fixed_equity_pct(equity: f64, pct: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    equity * pct / price
}

/// Size adjusted for volatility (higher vol = smaller size)
pub fn volatility_adjusted_size(base_size: f64, target_vol: f64, current_vol: f64) -> f64 {
    if current_vol <= 0.0 {
        return base_size;
    }
    base_size * (target_vol / current_vol).min(2.0).max(0.25)
}

/// Size scaled by conviction, neutral confidence halves the base.
pub fn confidence_scaled_size(base_size: f64, confidence: f64) -> f64 {
    base_size * confidence.clamp(0.0, 1.0)
}

/// Full Kelly fraction for a binary payoff.
///
/// win_rate: probability of winning (0.0 - 1.0)
/// avg_win / avg_loss: mean magnitudes of winners and losers
pub fn kelly_size(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 || win_rate <= 0.0 || win_rate >= 1.0 {
        return 0.0;
    }
    let win_loss_ratio = avg_win / avg_loss;
    let kelly = win_rate - (1.0 - win_rate) / win_loss_ratio;
    kelly.max(0.0)
}

/// Fractional Kelly (typically 0.25-0.5 of full Kelly)
pub fn fractional_kelly(win_rate: f64, avg_win: f64, avg_loss: f64, fraction: f64) -> f64 {
    kelly_size(win_rate, avg_win, avg_loss) * fraction
}

/// Kelly fraction from a tracked forecast cohort. Symmetric unit payoff is
/// assumed; thin cohorts return zero.
pub fn kelly_from_snapshot(snapshot: &MetricsSnapshot, fraction: f64, min_samples: u64) -> f64 {
    if snapshot.samples < min_samples {
        return 0.0;
    }
    fractional_kelly(snapshot.hit_rate, 1.0, 1.0, fraction)
}

#[derive(Debug, Clone, Serialize)]
pub struct SizingDecision {
    pub qty: f64,
    pub base_qty: f64,
    pub drift_multiplier: f64,
    pub regime_multiplier: f64,
    pub confidence: f64,
}

/// Full governed sizing path: equity fraction, volatility target,
/// confidence scaling, then the drift and regime haircuts.
pub fn governed_size(
    equity: f64,
    base_pct: f64,
    price: f64,
    target_vol: f64,
    current_vol: f64,
    confidence: f64,
    severity: Severity,
    regime: RegimeLabel,
) -> SizingDecision {
    let base_qty = fixed_equity_pct(equity, base_pct, price);
    let vol_adjusted = volatility_adjusted_size(base_qty, target_vol, current_vol);
    let conviction = confidence_scaled_size(vol_adjusted, confidence);
    let drift_multiplier = severity.position_multiplier();
    let regime_multiplier = regime.position_multiplier();
    SizingDecision {
        qty: conviction * drift_multiplier * regime_multiplier,
        base_qty,
        drift_multiplier,
        regime_multiplier,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_equity_pct() {
        assert!((fixed_equity_pct(10_000.0, 0.02, 100.0) - 2.0).abs() < 1e-9);
        assert_eq!(fixed_equity_pct(10_000.0, 0.02, 0.0), 0.0);
    }

    #[test]
    fn test_volatility_adjustment_clamped() {
        // Calm market: scale up, capped at 2x.
        assert!((volatility_adjusted_size(1.0, 0.01, 0.002) - 2.0).abs() < 1e-9);
        // Violent market: scale down, floored at 0.25x.
        assert!((volatility_adjusted_size(1.0, 0.01, 0.2) - 0.25).abs() < 1e-9);
        // Zero vol leaves base untouched.
        assert!((volatility_adjusted_size(1.0, 0.01, 0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_kelly_positive_edge() {
        let k = kelly_size(0.6, 1.0, 1.0);
        assert!((k - 0.2).abs() < 1e-9);
        assert_eq!(kelly_size(0.4, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_kelly_from_snapshot_requires_samples() {
        let mut snap = MetricsSnapshot::default();
        for i in 0..10 {
            snap.absorb(i % 5 < 3, 0.2);
        }
        assert_eq!(kelly_from_snapshot(&snap, 0.25, 20), 0.0);
        for i in 0..10 {
            snap.absorb(i % 5 < 3, 0.2);
        }
        let k = kelly_from_snapshot(&snap, 0.25, 20);
        assert!(k > 0.0);
        assert!((k - fractional_kelly(0.6, 1.0, 1.0, 0.25)).abs() < 1e-9);
    }

    #[test]
    fn test_governed_size_haircuts() {
        let healthy = governed_size(
            10_000.0,
            0.02,
            100.0,
            0.01,
            0.01,
            0.8,
            Severity::Ok,
            RegimeLabel::RiskOn,
        );
        assert!(healthy.qty > 0.0);

        let warned = governed_size(
            10_000.0,
            0.02,
            100.0,
            0.01,
            0.01,
            0.8,
            Severity::Warn,
            RegimeLabel::RiskOn,
        );
        assert!((warned.qty - healthy.qty * 0.5).abs() < 1e-9);

        let stressed = governed_size(
            10_000.0,
            0.02,
            100.0,
            0.01,
            0.01,
            0.8,
            Severity::Ok,
            RegimeLabel::RiskOffStress,
        );
        assert_eq!(stressed.qty, 0.0);

        let critical = governed_size(
            10_000.0,
            0.02,
            100.0,
            0.01,
            0.01,
            0.8,
            Severity::Critical,
            RegimeLabel::RiskOn,
        );
        assert_eq!(critical.qty, 0.0);
    }
}
