//! Shadow monitor and periodic governance sweeps.
//!
//! The monitor re-evaluates drift for every APPLIED model, keeps a
//! consecutive-CRITICAL streak per model, and fires auto-rollback when a
//! streak reaches the configured limit. The tick sweep advances warmup
//! accounting, and the integrity sweep re-checks the APPLIED guards.

use anyhow::Result;
use std::collections::HashMap;

use crate::drift::{evaluate_model, DriftThresholds, ModelDriftTracker, Severity};
use crate::lifecycle::{Guards, LifecycleEvent, LifecycleState, Transition};
use crate::logging::{log_drift, log_integrity, log_monitor_sweep, log_transition};
use crate::registry;
use crate::store::{Collection, DocStore};

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub evaluated: usize,
    pub criticals: usize,
    pub rollbacks: Vec<String>,
}

pub struct ShadowMonitor {
    rollback_after: u32,
    streaks: HashMap<String, u32>,
}

impl ShadowMonitor {
    pub fn new(rollback_after: u32) -> Self {
        Self {
            rollback_after: rollback_after.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Record one evaluation. Returns true when the streak reaches the
    /// rollback limit; the streak resets on any non-CRITICAL result and
    /// after a fired rollback.
    pub fn note(&mut self, model_id: &str, severity: Severity) -> bool {
        if severity != Severity::Critical {
            self.streaks.remove(model_id);
            return false;
        }
        let streak = self.streaks.entry(model_id.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= self.rollback_after {
            self.streaks.remove(model_id);
            return true;
        }
        false
    }

    pub fn streak(&self, model_id: &str) -> u32 {
        self.streaks.get(model_id).copied().unwrap_or(0)
    }

    /// One monitor pass over every lifecycle document.
    pub fn sweep(
        &mut self,
        store: &mut DocStore,
        trackers: &HashMap<String, ModelDriftTracker>,
        th: &DriftThresholds,
        guards: &Guards,
        trail_cap: usize,
        ts: u64,
    ) -> Result<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        let ids = store.ids(Collection::LifecycleState)?;

        for model_id in ids {
            let Some(mut state) =
                store.get::<LifecycleState>(Collection::LifecycleState, &model_id)?
            else {
                continue;
            };
            if !state.stage.is_applied() {
                self.streaks.remove(&model_id);
                continue;
            }
            outcome.evaluated += 1;

            let result = evaluate_model(
                &model_id,
                &state.live_metrics,
                &state.baseline_metrics,
                trackers.get(&model_id),
                th,
            );
            state.drift_severity = result.severity;

            if result.severity >= Severity::Warn {
                log_drift(
                    &model_id,
                    result.severity.as_str(),
                    result.hitrate_delta.max(result.brier_delta),
                    &[
                        ("hitrate_delta", result.hitrate_delta),
                        ("brier_delta", result.brier_delta),
                    ],
                );
            }
            if result.severity == Severity::Critical {
                outcome.criticals += 1;
            }

            if self.note(&model_id, result.severity) {
                let event = LifecycleEvent::AutoRollback {
                    reason: format!(
                        "{} consecutive CRITICAL evaluations",
                        self.rollback_after
                    ),
                };
                match state.handle(&event, guards, ts, trail_cap) {
                    Ok(t) => {
                        log_transition(
                            &model_id,
                            t.from.as_str(),
                            t.to.as_str(),
                            "auto_rollback",
                            "sustained critical drift",
                        );
                        // Registry rollback is best-effort: a slot without
                        // a previous model still demotes the lifecycle.
                        let _ = registry::rollback(
                            store,
                            &state.family,
                            &state.horizon,
                            "auto_rollback",
                            ts,
                        );
                        outcome.rollbacks.push(model_id.clone());
                    }
                    Err(err) => {
                        log_integrity(&model_id, "rollback_skipped", &err.msg);
                    }
                }
            }

            store.upsert(Collection::LifecycleState, &model_id, &state)?;
        }

        log_monitor_sweep(outcome.evaluated, outcome.criticals, outcome.rollbacks.len());
        Ok(outcome)
    }
}

/// Daily tick across all lifecycle documents. Returns fired transitions.
pub fn tick_all(
    store: &mut DocStore,
    guards: &Guards,
    trail_cap: usize,
    ts: u64,
) -> Result<Vec<(String, Transition)>> {
    let mut fired = Vec::new();
    for model_id in store.ids(Collection::LifecycleState)? {
        let Some(mut state) = store.get::<LifecycleState>(Collection::LifecycleState, &model_id)?
        else {
            continue;
        };
        if let Some(t) = state.tick(guards, ts, trail_cap) {
            log_transition(&model_id, t.from.as_str(), t.to.as_str(), "auto_apply", "warmup complete");
            fired.push((model_id.clone(), t));
        }
        store.upsert(Collection::LifecycleState, &model_id, &state)?;
    }
    Ok(fired)
}

/// Integrity sweep: downgrade APPLIED documents whose guards no longer
/// hold. Returns the repairs performed.
pub fn enforce_all(
    store: &mut DocStore,
    guards: &Guards,
    trail_cap: usize,
    ts: u64,
) -> Result<Vec<(String, Transition)>> {
    let mut repaired = Vec::new();
    for model_id in store.ids(Collection::LifecycleState)? {
        let Some(mut state) = store.get::<LifecycleState>(Collection::LifecycleState, &model_id)?
        else {
            continue;
        };
        if let Some(t) = state.enforce_integrity(guards, ts, trail_cap) {
            log_integrity(
                &model_id,
                "downgraded",
                &format!("{} -> {}", t.from.as_str(), t.to.as_str()),
            );
            store.upsert(Collection::LifecycleState, &model_id, &state)?;
            repaired.push((model_id.clone(), t));
        }
    }
    Ok(repaired)
}
