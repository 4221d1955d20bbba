//! Model lifecycle state machine.
//!
//! Per-model status document with a bounded transition audit trail.
//! Stages: SIMULATION → WARMUP → APPLIED (or APPLIED_MANUAL) → REVOKED,
//! with FROZEN as a hold state and RESET_SIMULATION as a dev-only escape.
//!
//! Transitions come from three places: admin HTTP calls, the periodic
//! lifecycle tick, and the shadow monitor's auto-rollback. Guard checks run
//! at transition time and again in [`LifecycleState::enforce_integrity`],
//! which downgrades invalid APPLIED documents back to WARMUP.

use serde::{Deserialize, Serialize};

use crate::calibration::MetricsSnapshot;
use crate::config::SystemMode;
use crate::drift::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Simulation,
    Warmup,
    Applied,
    AppliedManual,
    Revoked,
    Frozen,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Simulation => "SIMULATION",
            Stage::Warmup => "WARMUP",
            Stage::Applied => "APPLIED",
            Stage::AppliedManual => "APPLIED_MANUAL",
            Stage::Revoked => "REVOKED",
            Stage::Frozen => "FROZEN",
        }
    }

    /// Stages in which the model influences live decisions.
    pub fn is_applied(&self) -> bool {
        matches!(self, Stage::Applied | Stage::AppliedManual)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ForceWarmup,
    ForceApply,
    Revoke { reason: String },
    Freeze,
    Unfreeze,
    ResetSimulation,
    AutoRollback { reason: String },
}

impl LifecycleEvent {
    pub fn trigger(&self) -> &'static str {
        match self {
            LifecycleEvent::ForceWarmup => "admin_warmup",
            LifecycleEvent::ForceApply => "admin_apply",
            LifecycleEvent::Revoke { .. } => "admin_revoke",
            LifecycleEvent::Freeze => "admin_freeze",
            LifecycleEvent::Unfreeze => "admin_unfreeze",
            LifecycleEvent::ResetSimulation => "admin_reset",
            LifecycleEvent::AutoRollback { .. } => "auto_rollback",
        }
    }
}

/// Guard thresholds, carried from config so transitions stay pure.
#[derive(Debug, Clone, Copy)]
pub struct Guards {
    pub min_live_samples: u64,
    pub warmup_target_days: u32,
    pub system_mode: SystemMode,
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for TransitionError {}

fn reject(msg: impl Into<String>) -> TransitionError {
    TransitionError { msg: msg.into() }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: u64,
    pub from: Stage,
    pub to: Stage,
    pub trigger: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleState {
    pub model_id: String,
    pub family: String,
    pub horizon: String,
    pub stage: Stage,
    pub system_mode: SystemMode,
    pub warmup_days: u32,
    pub live_samples: u64,
    pub drift_severity: Severity,
    pub live_metrics: MetricsSnapshot,
    pub baseline_metrics: MetricsSnapshot,
    /// Stage to restore on unfreeze.
    pub frozen_from: Option<Stage>,
    pub history: Vec<AuditEntry>,
    pub created_ts: u64,
    pub updated_ts: u64,
}

impl LifecycleState {
    pub fn new(model_id: &str, family: &str, horizon: &str, mode: SystemMode, ts: u64) -> Self {
        Self {
            model_id: model_id.to_string(),
            family: family.to_string(),
            horizon: horizon.to_string(),
            stage: Stage::Simulation,
            system_mode: mode,
            warmup_days: 0,
            live_samples: 0,
            drift_severity: Severity::Ok,
            live_metrics: MetricsSnapshot::default(),
            baseline_metrics: MetricsSnapshot::default(),
            frozen_from: None,
            history: Vec::new(),
            created_ts: ts,
            updated_ts: ts,
        }
    }

    /// Resolve the target stage for an event, or reject the pair.
    fn next_stage(&self, event: &LifecycleEvent, guards: &Guards) -> Result<Stage, TransitionError> {
        match (self.stage, event) {
            (Stage::Simulation, LifecycleEvent::ForceWarmup)
            | (Stage::Revoked, LifecycleEvent::ForceWarmup) => Ok(Stage::Warmup),
            (Stage::Warmup, LifecycleEvent::ForceApply) => {
                if self.drift_severity == Severity::Critical {
                    return Err(reject("cannot apply while drift severity is CRITICAL"));
                }
                Ok(Stage::AppliedManual)
            }
            (Stage::Warmup, LifecycleEvent::Revoke { .. })
            | (Stage::Applied, LifecycleEvent::Revoke { .. })
            | (Stage::AppliedManual, LifecycleEvent::Revoke { .. }) => Ok(Stage::Revoked),
            (Stage::Warmup, LifecycleEvent::Freeze)
            | (Stage::Applied, LifecycleEvent::Freeze)
            | (Stage::AppliedManual, LifecycleEvent::Freeze) => Ok(Stage::Frozen),
            (Stage::Frozen, LifecycleEvent::Unfreeze) => self
                .frozen_from
                .ok_or_else(|| reject("frozen state lost its origin stage")),
            (_, LifecycleEvent::ResetSimulation) => {
                if guards.system_mode != SystemMode::Dev {
                    return Err(reject("reset-simulation is DEV-only"));
                }
                Ok(Stage::Simulation)
            }
            (Stage::Applied, LifecycleEvent::AutoRollback { .. })
            | (Stage::AppliedManual, LifecycleEvent::AutoRollback { .. }) => Ok(Stage::Warmup),
            (stage, event) => Err(reject(format!(
                "event {} invalid in stage {}",
                event.trigger(),
                stage.as_str()
            ))),
        }
    }

    /// Apply an admin/monitor event, mutating stage and appending audit.
    pub fn handle(
        &mut self,
        event: &LifecycleEvent,
        guards: &Guards,
        ts: u64,
        trail_cap: usize,
    ) -> Result<Transition, TransitionError> {
        let to = self.next_stage(event, guards)?;
        let from = self.stage;
        let reason = match event {
            LifecycleEvent::Revoke { reason } | LifecycleEvent::AutoRollback { reason } => {
                reason.clone()
            }
            _ => String::new(),
        };

        match event {
            LifecycleEvent::Freeze => self.frozen_from = Some(from),
            LifecycleEvent::Unfreeze => self.frozen_from = None,
            LifecycleEvent::ResetSimulation => {
                self.warmup_days = 0;
                self.live_samples = 0;
                self.live_metrics = MetricsSnapshot::default();
                self.drift_severity = Severity::Ok;
                self.frozen_from = None;
            }
            _ => {}
        }

        self.stage = to;
        self.push_audit(ts, from, to, event.trigger(), &reason, trail_cap);
        Ok(Transition { from, to })
    }

    /// Periodic tick: advance warmup accounting and auto-apply when the
    /// guard conjunction holds. Returns the transition if one fired.
    pub fn tick(&mut self, guards: &Guards, ts: u64, trail_cap: usize) -> Option<Transition> {
        if self.stage != Stage::Warmup {
            return None;
        }
        self.warmup_days = self.warmup_days.saturating_add(1);
        self.updated_ts = ts;

        let ready = self.warmup_days >= guards.warmup_target_days
            && self.live_samples >= guards.min_live_samples
            && self.drift_severity != Severity::Critical;
        if !ready {
            return None;
        }
        let from = self.stage;
        self.stage = Stage::Applied;
        self.push_audit(ts, from, Stage::Applied, "auto_apply", "warmup complete", trail_cap);
        Some(Transition { from, to: Stage::Applied })
    }

    /// Record a resolved live outcome against this model.
    pub fn record_live_sample(&mut self, correct: bool, brier: f64, ts: u64) {
        self.live_samples = self.live_samples.saturating_add(1);
        self.live_metrics.absorb(correct, brier);
        self.updated_ts = ts;
    }

    /// Post-hoc guard re-check. An APPLIED document with insufficient live
    /// samples or CRITICAL severity is downgraded back to WARMUP.
    pub fn enforce_integrity(
        &mut self,
        guards: &Guards,
        ts: u64,
        trail_cap: usize,
    ) -> Option<Transition> {
        if !self.stage.is_applied() {
            return None;
        }
        let reason = if self.live_samples < guards.min_live_samples {
            format!(
                "live_samples {} below required {}",
                self.live_samples, guards.min_live_samples
            )
        } else if self.drift_severity == Severity::Critical {
            "drift severity CRITICAL".to_string()
        } else {
            return None;
        };
        let from = self.stage;
        self.stage = Stage::Warmup;
        self.push_audit(ts, from, Stage::Warmup, "integrity", &reason, trail_cap);
        Some(Transition { from, to: Stage::Warmup })
    }

    fn push_audit(
        &mut self,
        ts: u64,
        from: Stage,
        to: Stage,
        trigger: &str,
        reason: &str,
        cap: usize,
    ) {
        self.history.push(AuditEntry {
            ts,
            from,
            to,
            trigger: trigger.to_string(),
            reason: reason.to_string(),
        });
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
        self.updated_ts = ts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guards(mode: SystemMode) -> Guards {
        Guards {
            min_live_samples: 30,
            warmup_target_days: 7,
            system_mode: mode,
        }
    }

    fn state() -> LifecycleState {
        LifecycleState::new("m1", "exchange", "4h", SystemMode::Dev, 1_000)
    }

    #[test]
    fn test_warmup_then_auto_apply() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        assert_eq!(st.stage, Stage::Warmup);

        for i in 0..40 {
            st.record_live_sample(i % 2 == 0, 0.2, 1_002 + i);
        }
        // Six ticks: not enough warmup days yet.
        for i in 0..6 {
            assert!(st.tick(&g, 2_000 + i, 64).is_none());
        }
        // Seventh tick crosses warmup_target_days with samples in place.
        let t = st.tick(&g, 2_006, 64).expect("auto apply");
        assert_eq!(t.to, Stage::Applied);
        assert_eq!(st.stage, Stage::Applied);
    }

    #[test]
    fn test_auto_apply_blocked_without_samples() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        for i in 0..20 {
            assert!(st.tick(&g, 2_000 + i, 64).is_none());
        }
        assert_eq!(st.stage, Stage::Warmup);
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        assert!(st.handle(&LifecycleEvent::ForceApply, &g, 1_001, 64).is_err());
        assert!(st
            .handle(&LifecycleEvent::AutoRollback { reason: "x".into() }, &g, 1_001, 64)
            .is_err());
        assert_eq!(st.stage, Stage::Simulation);
        assert!(st.history.is_empty());
    }

    #[test]
    fn test_manual_apply_blocked_on_critical() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        st.drift_severity = Severity::Critical;
        let err = st.handle(&LifecycleEvent::ForceApply, &g, 1_002, 64).unwrap_err();
        assert!(err.msg.contains("CRITICAL"));
    }

    #[test]
    fn test_freeze_restores_prior_stage() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        for i in 0..40 {
            st.record_live_sample(true, 0.1, 1_002 + i);
        }
        st.handle(&LifecycleEvent::ForceApply, &g, 1_100, 64).unwrap();
        assert_eq!(st.stage, Stage::AppliedManual);

        st.handle(&LifecycleEvent::Freeze, &g, 1_101, 64).unwrap();
        assert_eq!(st.stage, Stage::Frozen);
        st.handle(&LifecycleEvent::Unfreeze, &g, 1_102, 64).unwrap();
        assert_eq!(st.stage, Stage::AppliedManual);
        assert!(st.frozen_from.is_none());
    }

    #[test]
    fn test_reset_simulation_dev_only() {
        let mut st = state();
        let prod = guards(SystemMode::Prod);
        assert!(st.handle(&LifecycleEvent::ResetSimulation, &prod, 1_001, 64).is_err());

        let dev = guards(SystemMode::Dev);
        st.handle(&LifecycleEvent::ForceWarmup, &dev, 1_001, 64).unwrap();
        st.record_live_sample(true, 0.1, 1_002);
        st.handle(&LifecycleEvent::ResetSimulation, &dev, 1_003, 64).unwrap();
        assert_eq!(st.stage, Stage::Simulation);
        assert_eq!(st.live_samples, 0);
        assert_eq!(st.warmup_days, 0);
    }

    #[test]
    fn test_integrity_downgrades_thin_applied() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        // Manual apply with too few samples; enforcer pulls it back.
        st.record_live_sample(true, 0.1, 1_002);
        st.handle(&LifecycleEvent::ForceApply, &g, 1_003, 64).unwrap();
        assert_eq!(st.stage, Stage::AppliedManual);

        let t = st.enforce_integrity(&g, 1_004, 64).expect("downgrade");
        assert_eq!(t.to, Stage::Warmup);
        assert_eq!(st.stage, Stage::Warmup);
        assert_eq!(st.history.last().unwrap().trigger, "integrity");
    }

    #[test]
    fn test_integrity_ignores_healthy_applied() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        st.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
        for i in 0..40 {
            st.record_live_sample(true, 0.1, 1_002 + i);
        }
        st.handle(&LifecycleEvent::ForceApply, &g, 1_100, 64).unwrap();
        assert!(st.enforce_integrity(&g, 1_101, 64).is_none());
        assert_eq!(st.stage, Stage::AppliedManual);
    }

    #[test]
    fn test_audit_trail_bounded() {
        let g = guards(SystemMode::Dev);
        let mut st = state();
        for i in 0..20u64 {
            st.handle(&LifecycleEvent::ForceWarmup, &g, 2_000 + i, 8).unwrap();
            st.handle(&LifecycleEvent::Revoke { reason: "cycle".into() }, &g, 2_000 + i, 8)
                .unwrap();
        }
        assert!(st.history.len() <= 8);
        assert_eq!(st.history.last().unwrap().to, Stage::Revoked);
    }
}
