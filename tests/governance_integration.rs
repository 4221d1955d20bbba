//! Integration test: lifecycle governance end to end.
//!
//! Walks a model through registration, shadow promotion, warmup with live
//! forecast outcomes, auto-apply on the lifecycle tick, and finally
//! auto-rollback after sustained CRITICAL drift.

use std::collections::HashMap;

use serde_json::json;

use macrosight::calibration::{ForecastRecord, MetricsSnapshot};
use macrosight::config::SystemMode;
use macrosight::direction::{Direction, DirectionConfig};
use macrosight::drift::DriftThresholds;
use macrosight::lifecycle::{Guards, LifecycleEvent, LifecycleState, Stage};
use macrosight::monitor::{enforce_all, tick_all, ShadowMonitor};
use macrosight::registry;
use macrosight::store::{Collection, DocStore};

fn guards() -> Guards {
    Guards {
        min_live_samples: 30,
        warmup_target_days: 7,
        system_mode: SystemMode::Dev,
    }
}

fn dir_cfg() -> DirectionConfig {
    DirectionConfig { neutral_floor: 0.0015, atr_scale: 0.25 }
}

#[test]
fn test_promotion_warmup_apply_rollback_cycle() {
    let mut store = DocStore::open_in_memory().unwrap();
    store.init().unwrap();
    let g = guards();
    let th = DriftThresholds::default();

    // Phase 1: two models; promote both so the slot carries a previous.
    let m1 = registry::register_model(
        &mut store,
        "exchange",
        "4h",
        json!({"thresholds": [0.2, 0.5]}),
        MetricsSnapshot { hit_rate: 0.58, brier: 0.21, samples: 400, wins: 232 },
        SystemMode::Dev,
        1_000,
    )
    .unwrap();
    let m2 = registry::register_model(
        &mut store,
        "exchange",
        "4h",
        json!({"thresholds": [0.25, 0.45]}),
        MetricsSnapshot { hit_rate: 0.60, brier: 0.20, samples: 400, wins: 240 },
        SystemMode::Dev,
        1_001,
    )
    .unwrap();

    registry::stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 1_002).unwrap();
    registry::promote(&mut store, "exchange", "4h", 1_003).unwrap();
    registry::stage_shadow(&mut store, "exchange", "4h", &m2.model_id, 1_004).unwrap();
    let slot = registry::promote(&mut store, "exchange", "4h", 1_005).unwrap();
    assert_eq!(slot.active_model_id.as_deref(), Some(m2.model_id.as_str()));
    assert_eq!(slot.prev_model_id.as_deref(), Some(m1.model_id.as_str()));

    // Phase 2: warmup with live forecast outcomes (healthy 60% hit rate).
    let mut state: LifecycleState = store
        .get(Collection::LifecycleState, &m2.model_id)
        .unwrap()
        .unwrap();
    state.handle(&LifecycleEvent::ForceWarmup, &g, 1_010, 64).unwrap();
    state.baseline_metrics =
        MetricsSnapshot { hit_rate: 0.60, brier: 0.20, samples: 400, wins: 240 };

    for i in 0..50u64 {
        let mut forecast = ForecastRecord {
            id: format!("f-{}", i),
            model_id: m2.model_id.clone(),
            family: "exchange".to_string(),
            horizon: "4h".to_string(),
            direction: Direction::Up,
            probability: 0.6,
            reference_price: 100.0,
            regime: Some("RISK_ON".to_string()),
            issued_ts: 2_000 + i,
            outcome: None,
        };
        // Three of every five realized moves go the forecast's way.
        let realized_price = if i % 5 < 3 { 102.0 } else { 98.0 };
        let outcome = forecast.resolve(realized_price, 1.0, &dir_cfg(), 2_100 + i).clone();
        store.upsert(Collection::Forecasts, &forecast.id, &forecast).unwrap();
        state.record_live_sample(outcome.correct, outcome.brier, 2_100 + i);
    }
    assert_eq!(state.live_samples, 50);
    assert!((state.live_metrics.hit_rate - 0.6).abs() < 1e-9);
    store.upsert(Collection::LifecycleState, &m2.model_id, &state).unwrap();

    // Phase 3: lifecycle ticks cross the warmup target and auto-apply.
    for day in 0..6u64 {
        assert!(tick_all(&mut store, &g, 64, 3_000 + day).unwrap().is_empty());
    }
    let fired = tick_all(&mut store, &g, 64, 3_006).unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, m2.model_id);
    assert_eq!(fired[0].1.to, Stage::Applied);

    // Integrity enforcer has nothing to repair on the healthy doc.
    assert!(enforce_all(&mut store, &g, 64, 3_007).unwrap().is_empty());

    // Phase 4: healthy sweeps leave the model applied.
    let mut monitor = ShadowMonitor::new(3);
    let trackers = HashMap::new();
    for i in 0..3u64 {
        let outcome = monitor
            .sweep(&mut store, &trackers, &th, &g, 64, 4_000 + i)
            .unwrap();
        assert!(outcome.rollbacks.is_empty());
    }

    // Phase 5: live performance collapses; the third consecutive CRITICAL
    // sweep rolls the slot back to the previous model.
    let mut state: LifecycleState = store
        .get(Collection::LifecycleState, &m2.model_id)
        .unwrap()
        .unwrap();
    state.live_metrics = MetricsSnapshot { hit_rate: 0.30, brier: 0.35, samples: 80, wins: 24 };
    store.upsert(Collection::LifecycleState, &m2.model_id, &state).unwrap();

    for i in 0..2u64 {
        let outcome = monitor
            .sweep(&mut store, &trackers, &th, &g, 64, 5_000 + i)
            .unwrap();
        assert_eq!(outcome.criticals, 1);
        assert!(outcome.rollbacks.is_empty(), "rolled back early on sweep {}", i);
    }
    let outcome = monitor.sweep(&mut store, &trackers, &th, &g, 64, 5_002).unwrap();
    assert_eq!(outcome.rollbacks, vec![m2.model_id.clone()]);

    let slot = registry::get_slot(&store, "exchange", "4h").unwrap().unwrap();
    assert_eq!(slot.active_model_id.as_deref(), Some(m1.model_id.as_str()));
    assert!(slot.prev_model_id.is_none());
    assert_eq!(slot.rollbacks, 1);

    let state: LifecycleState = store
        .get(Collection::LifecycleState, &m2.model_id)
        .unwrap()
        .unwrap();
    assert_eq!(state.stage, Stage::Warmup);
    let last = state.history.last().unwrap();
    assert_eq!(last.trigger, "auto_rollback");
    assert_eq!(last.from, Stage::Applied);
}

#[test]
fn test_manual_apply_is_repaired_until_samples_arrive() {
    let mut store = DocStore::open_in_memory().unwrap();
    store.init().unwrap();
    let g = guards();

    let m = registry::register_model(
        &mut store,
        "fractal",
        "1d",
        json!({"levels": 5}),
        MetricsSnapshot::default(),
        SystemMode::Dev,
        1_000,
    )
    .unwrap();

    let mut state: LifecycleState = store
        .get(Collection::LifecycleState, &m.model_id)
        .unwrap()
        .unwrap();
    state.handle(&LifecycleEvent::ForceWarmup, &g, 1_001, 64).unwrap();
    state.record_live_sample(true, 0.16, 1_002);
    state.handle(&LifecycleEvent::ForceApply, &g, 1_003, 64).unwrap();
    assert_eq!(state.stage, Stage::AppliedManual);
    store.upsert(Collection::LifecycleState, &m.model_id, &state).unwrap();

    // The enforcer pulls the thin manual apply back to warmup.
    let repaired = enforce_all(&mut store, &g, 64, 1_004).unwrap();
    assert_eq!(repaired.len(), 1);
    assert_eq!(repaired[0].0, m.model_id);

    // With a full cohort the same manual apply sticks.
    let mut state: LifecycleState = store
        .get(Collection::LifecycleState, &m.model_id)
        .unwrap()
        .unwrap();
    for i in 0..40u64 {
        state.record_live_sample(i % 2 == 0, 0.2, 1_010 + i);
    }
    state.handle(&LifecycleEvent::ForceApply, &g, 1_100, 64).unwrap();
    store.upsert(Collection::LifecycleState, &m.model_id, &state).unwrap();
    assert!(enforce_all(&mut store, &g, 64, 1_101).unwrap().is_empty());
}
