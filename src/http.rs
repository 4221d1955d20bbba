//! REST surface.
//!
//! `/api/v10/...` for user-facing reads, `/api/admin/...` for mutation and
//! administration. Failures return `{"ok": false, "error": ...}` JSON with
//! a 4xx/5xx status; CORS is permissive (dashboard backend).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::cache::ModelCache;
use crate::calibration::{calibration_report, regime_breakdown, ForecastRecord, MetricsSnapshot};
use crate::config::{now_ts, Config};
use crate::direction::{modified_confidence, Direction, DirectionConfig, DivergenceScorer};
use crate::drift::{evaluate_model, DriftThresholds, ModelDriftTracker};
use crate::lifecycle::{Guards, LifecycleEvent, LifecycleState};
use crate::logging::{log_forecast, log_http, log_transition, log_transition_rejected, v_num, v_str};
use crate::monitor::{enforce_all, tick_all};
use crate::regime::RegimeEngine;
use crate::registry;
use crate::sizing::governed_size;
use crate::store::{Collection, DocStore};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub store: Arc<Mutex<DocStore>>,
    pub cache: Arc<ModelCache>,
    pub regime: Arc<Mutex<RegimeEngine>>,
    pub trackers: Arc<Mutex<HashMap<String, ModelDriftTracker>>>,
    pub divergence: Arc<Mutex<HashMap<String, DivergenceScorer>>>,
    pub forecast_seq: Arc<AtomicU64>,
}

impl AppState {
    pub fn guards(&self) -> Guards {
        Guards {
            min_live_samples: self.cfg.min_live_samples,
            warmup_target_days: self.cfg.warmup_target_days,
            system_mode: self.cfg.system_mode,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v10/regime/current", get(regime_current))
        .route("/api/v10/regime/summary", get(regime_summary))
        .route("/api/v10/models/{family}/{horizon}", get(models_get))
        .route("/api/v10/lifecycle/{model_id}", get(lifecycle_get))
        .route("/api/v10/drift/{model_id}", get(drift_get))
        .route("/api/v10/divergence/{model_id}", get(divergence_get))
        .route("/api/v10/forecasts/recent", get(forecasts_recent))
        .route("/api/v10/calibration/{model_id}", get(calibration_get))
        .route("/api/v10/sizing/preview", get(sizing_preview))
        .route("/api/admin/models", post(admin_register_model))
        .route("/api/admin/registry/{family}/{horizon}/shadow", post(admin_stage_shadow))
        .route("/api/admin/registry/{family}/{horizon}/promote", post(admin_promote))
        .route("/api/admin/registry/{family}/{horizon}/rollback", post(admin_rollback))
        .route("/api/admin/lifecycle/{model_id}/warmup", post(admin_warmup))
        .route("/api/admin/lifecycle/{model_id}/apply", post(admin_apply))
        .route("/api/admin/lifecycle/{model_id}/revoke", post(admin_revoke))
        .route("/api/admin/lifecycle/{model_id}/freeze", post(admin_freeze))
        .route("/api/admin/lifecycle/{model_id}/unfreeze", post(admin_unfreeze))
        .route("/api/admin/lifecycle/{model_id}/reset", post(admin_reset))
        .route("/api/admin/forecasts", post(admin_issue_forecast))
        .route("/api/admin/forecasts/{id}/resolve", post(admin_resolve_forecast))
        .route("/api/admin/tick", post(admin_tick))
        .route("/api/admin/integrity", get(admin_integrity))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let resp = next.run(req).await;
    log_http(&method, &path, resp.status().as_u16());
    resp
}

fn fail(status: StatusCode, err: impl std::fmt::Display) -> Response {
    (status, Json(json!({"ok": false, "error": err.to_string()}))).into_response()
}

fn not_found(what: &str) -> Response {
    fail(StatusCode::NOT_FOUND, format!("{} not found", what))
}

// =============================================================================
// Reads
// =============================================================================

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "mode": state.cfg.system_mode.as_str(),
    }))
}

async fn regime_current(State(state): State<AppState>) -> Json<Value> {
    let engine = state.regime.lock().await;
    match engine.current() {
        Some(snap) => Json(serde_json::to_value(snap).unwrap_or_else(|_| json!({}))),
        // Neutral default until the engine has observations.
        None => Json(json!({"label": "NEUTRAL", "confidence": 0.5, "indicators": null})),
    }
}

async fn regime_summary(State(state): State<AppState>) -> Json<Value> {
    let engine = state.regime.lock().await;
    Json(serde_json::to_value(engine.summary()).unwrap_or_else(|_| json!({})))
}

async fn models_get(
    State(state): State<AppState>,
    Path((family, horizon)): Path<(String, String)>,
) -> Response {
    let store = state.store.lock().await;
    let slot = match registry::get_slot(&store, &family, &horizon) {
        Ok(Some(slot)) => slot,
        Ok(None) => return not_found("registry slot"),
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    let active = match state.cache.get_or_load(&family, &horizon, || {
        registry::active_model(&store, &family, &horizon)
    }) {
        Ok(model) => model,
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    Json(json!({
        "slot": slot,
        "active_model": active.as_deref(),
    }))
    .into_response()
}

async fn lifecycle_get(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Response {
    let store = state.store.lock().await;
    match store.get::<LifecycleState>(Collection::LifecycleState, &model_id) {
        Ok(Some(doc)) => Json(serde_json::to_value(doc).unwrap_or_else(|_| json!({}))).into_response(),
        Ok(None) => not_found("lifecycle state"),
        Err(err) => fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

async fn drift_get(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    let store = state.store.lock().await;
    let doc = match store.get::<LifecycleState>(Collection::LifecycleState, &model_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return not_found("lifecycle state"),
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    drop(store);

    let th = DriftThresholds::from_config(&state.cfg);
    let trackers = state.trackers.lock().await;
    let result = evaluate_model(
        &model_id,
        &doc.live_metrics,
        &doc.baseline_metrics,
        trackers.get(&model_id),
        &th,
    );
    Json(serde_json::to_value(result).unwrap_or_else(|_| json!({}))).into_response()
}

async fn divergence_get(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    let scorers = state.divergence.lock().await;
    match scorers.get(&model_id) {
        Some(scorer) => {
            Json(serde_json::to_value(scorer.report()).unwrap_or_else(|_| json!({}))).into_response()
        }
        None => not_found("divergence scorer"),
    }
}

async fn forecasts_recent(State(state): State<AppState>) -> Response {
    let store = state.store.lock().await;
    match store.list::<ForecastRecord>(Collection::Forecasts, 100) {
        Ok(records) => Json(json!({"forecasts": records})).into_response(),
        Err(err) => fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

async fn calibration_get(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    let store = state.store.lock().await;
    let forecasts = match store.list::<ForecastRecord>(Collection::Forecasts, state.cfg.forecast_window)
    {
        Ok(records) => records,
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    drop(store);

    let report = calibration_report(&model_id, &forecasts, state.cfg.reliability_bins);
    let model_forecasts: Vec<ForecastRecord> = forecasts
        .into_iter()
        .filter(|f| f.model_id == model_id)
        .collect();
    let by_regime = regime_breakdown(&model_forecasts);
    Json(json!({
        "report": report,
        "by_regime": by_regime,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct SizingQuery {
    equity: f64,
    price: f64,
    #[serde(default)]
    current_vol: f64,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    model_id: Option<String>,
}

async fn sizing_preview(
    State(state): State<AppState>,
    Query(q): Query<SizingQuery>,
) -> Response {
    if q.equity <= 0.0 || q.price <= 0.0 {
        return fail(StatusCode::BAD_REQUEST, "equity and price must be positive");
    }

    let severity = match &q.model_id {
        Some(model_id) => {
            let store = state.store.lock().await;
            match store.get::<LifecycleState>(Collection::LifecycleState, model_id) {
                Ok(Some(doc)) => doc.drift_severity,
                Ok(None) => return not_found("lifecycle state"),
                Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
            }
        }
        None => crate::drift::Severity::Ok,
    };

    let engine = state.regime.lock().await;
    let label = match engine.current() {
        Some(snap) => snap.label,
        None => crate::regime::RegimeLabel::Neutral,
    };
    drop(engine);

    // Governance haircuts are applied once, inside governed_size; the
    // modified confidence is reported alongside for dashboards.
    let base_confidence = q.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
    let adjusted_confidence = modified_confidence(
        q.confidence,
        label.position_multiplier(),
        severity.position_multiplier(),
    );
    let decision = governed_size(
        q.equity,
        state.cfg.base_size_pct,
        q.price,
        state.cfg.target_vol,
        q.current_vol,
        base_confidence,
        severity,
        label,
    );
    Json(json!({
        "regime": label.as_str(),
        "severity": severity.as_str(),
        "adjusted_confidence": adjusted_confidence,
        "decision": decision,
    }))
    .into_response()
}

// =============================================================================
// Admin: registry
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegisterModelReq {
    family: String,
    horizon: String,
    weights: Value,
    #[serde(default)]
    training_metrics: Option<MetricsSnapshot>,
}

async fn admin_register_model(
    State(state): State<AppState>,
    Json(req): Json<RegisterModelReq>,
) -> Response {
    if req.family.is_empty() || req.horizon.is_empty() {
        return fail(StatusCode::BAD_REQUEST, "family and horizon are required");
    }
    let mut store = state.store.lock().await;
    match registry::register_model(
        &mut store,
        &req.family,
        &req.horizon,
        req.weights,
        req.training_metrics.unwrap_or_default(),
        state.cfg.system_mode,
        now_ts(),
    ) {
        Ok(model) => Json(serde_json::to_value(model).unwrap_or_else(|_| json!({}))).into_response(),
        Err(err) => fail(StatusCode::BAD_REQUEST, err),
    }
}

#[derive(Debug, Deserialize)]
struct StageShadowReq {
    model_id: String,
}

async fn admin_stage_shadow(
    State(state): State<AppState>,
    Path((family, horizon)): Path<(String, String)>,
    Json(req): Json<StageShadowReq>,
) -> Response {
    let mut store = state.store.lock().await;
    match registry::stage_shadow(&mut store, &family, &horizon, &req.model_id, now_ts()) {
        Ok(slot) => Json(serde_json::to_value(slot).unwrap_or_else(|_| json!({}))).into_response(),
        Err(err) => fail(StatusCode::BAD_REQUEST, err),
    }
}

async fn admin_promote(
    State(state): State<AppState>,
    Path((family, horizon)): Path<(String, String)>,
) -> Response {
    let mut store = state.store.lock().await;
    match registry::promote(&mut store, &family, &horizon, now_ts()) {
        Ok(slot) => {
            state.cache.invalidate(&family, &horizon);
            Json(serde_json::to_value(slot).unwrap_or_else(|_| json!({}))).into_response()
        }
        Err(err) => fail(StatusCode::BAD_REQUEST, err),
    }
}

async fn admin_rollback(
    State(state): State<AppState>,
    Path((family, horizon)): Path<(String, String)>,
) -> Response {
    let mut store = state.store.lock().await;
    match registry::rollback(&mut store, &family, &horizon, "admin", now_ts()) {
        Ok(slot) => {
            state.cache.invalidate(&family, &horizon);
            Json(serde_json::to_value(slot).unwrap_or_else(|_| json!({}))).into_response()
        }
        Err(err) => fail(StatusCode::BAD_REQUEST, err),
    }
}

// =============================================================================
// Admin: lifecycle
// =============================================================================

async fn apply_lifecycle_event(
    state: &AppState,
    model_id: &str,
    event: LifecycleEvent,
) -> Response {
    let guards = state.guards();
    let mut store = state.store.lock().await;
    let mut doc = match store.get::<LifecycleState>(Collection::LifecycleState, model_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return not_found("lifecycle state"),
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    match doc.handle(&event, &guards, now_ts(), state.cfg.audit_trail_cap) {
        Ok(t) => {
            log_transition(model_id, t.from.as_str(), t.to.as_str(), event.trigger(), "");
            if let Err(err) = store.upsert(Collection::LifecycleState, model_id, &doc) {
                return fail(StatusCode::INTERNAL_SERVER_ERROR, err);
            }
            Json(json!({
                "model_id": model_id,
                "from": t.from.as_str(),
                "to": t.to.as_str(),
            }))
            .into_response()
        }
        Err(err) => {
            log_transition_rejected(model_id, doc.stage.as_str(), event.trigger(), &err.msg);
            fail(StatusCode::CONFLICT, err)
        }
    }
}

async fn admin_warmup(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::ForceWarmup).await
}

async fn admin_apply(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::ForceApply).await
}

#[derive(Debug, Default, Deserialize)]
struct RevokeReq {
    #[serde(default)]
    reason: String,
}

async fn admin_revoke(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    body: Option<Json<RevokeReq>>,
) -> Response {
    let reason = body.map(|Json(b)| b.reason).unwrap_or_default();
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::Revoke { reason }).await
}

async fn admin_freeze(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::Freeze).await
}

async fn admin_unfreeze(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::Unfreeze).await
}

async fn admin_reset(State(state): State<AppState>, Path(model_id): Path<String>) -> Response {
    apply_lifecycle_event(&state, &model_id, LifecycleEvent::ResetSimulation).await
}

// =============================================================================
// Admin: forecasts
// =============================================================================

#[derive(Debug, Deserialize)]
struct IssueForecastReq {
    model_id: String,
    direction: Direction,
    probability: f64,
    reference_price: f64,
}

async fn admin_issue_forecast(
    State(state): State<AppState>,
    Json(req): Json<IssueForecastReq>,
) -> Response {
    if !(0.0..=1.0).contains(&req.probability) {
        return fail(StatusCode::BAD_REQUEST, "probability must be in [0, 1]");
    }
    if req.reference_price <= 0.0 {
        return fail(StatusCode::BAD_REQUEST, "reference_price must be positive");
    }

    let regime = {
        let engine = state.regime.lock().await;
        engine.current().map(|s| s.label.as_str().to_string())
    };

    let mut store = state.store.lock().await;
    let model = match registry::get_model(&store, &req.model_id) {
        Ok(Some(model)) => model,
        Ok(None) => return not_found("trained model"),
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    let ts = now_ts();
    let seq = state.forecast_seq.fetch_add(1, Ordering::SeqCst);
    let record = ForecastRecord {
        id: format!("f-{}-{}", ts, seq),
        model_id: model.model_id.clone(),
        family: model.family.clone(),
        horizon: model.horizon.clone(),
        direction: req.direction,
        probability: req.probability,
        reference_price: req.reference_price,
        regime,
        issued_ts: ts,
        outcome: None,
    };
    if let Err(err) = store.upsert(Collection::Forecasts, &record.id, &record) {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, err);
    }
    log_forecast(
        "issued",
        &record.id,
        &record.model_id,
        &[
            ("direction", v_str(record.direction.as_str())),
            ("probability", v_num(record.probability)),
        ],
    );
    Json(serde_json::to_value(&record).unwrap_or_else(|_| json!({}))).into_response()
}

#[derive(Debug, Deserialize)]
struct ResolveForecastReq {
    realized_price: f64,
    #[serde(default)]
    atr: f64,
}

async fn admin_resolve_forecast(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveForecastReq>,
) -> Response {
    if req.realized_price <= 0.0 {
        return fail(StatusCode::BAD_REQUEST, "realized_price must be positive");
    }

    let mut store = state.store.lock().await;
    let mut record = match store.get::<ForecastRecord>(Collection::Forecasts, &id) {
        Ok(Some(record)) => record,
        Ok(None) => return not_found("forecast"),
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    if record.is_resolved() {
        return fail(StatusCode::CONFLICT, "forecast already resolved");
    }

    let ts = now_ts();
    let dir_cfg = DirectionConfig::from_config(&state.cfg);
    let outcome = record.resolve(req.realized_price, req.atr, &dir_cfg, ts).clone();
    if let Err(err) = store.upsert(Collection::Forecasts, &id, &record) {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, err);
    }

    // Fold the outcome into the model's live cohort and score streams.
    if let Ok(Some(mut doc)) =
        store.get::<LifecycleState>(Collection::LifecycleState, &record.model_id)
    {
        doc.record_live_sample(outcome.correct, outcome.brier, ts);
        let _ = store.upsert(Collection::LifecycleState, &record.model_id, &doc);
    }
    drop(store);

    {
        let mut trackers = state.trackers.lock().await;
        let tracker = trackers.entry(record.model_id.clone()).or_insert_with(|| {
            ModelDriftTracker::new(
                &record.model_id,
                state.cfg.drift_baseline_window,
                state.cfg.drift_recent_window,
            )
        });
        tracker.observe(
            record.probability,
            record.probability,
            outcome.realized_return,
            outcome.brier.sqrt(),
            ts,
        );
    }
    {
        let mut scorers = state.divergence.lock().await;
        let scorer = scorers
            .entry(record.model_id.clone())
            .or_insert_with(|| DivergenceScorer::from_config(&state.cfg));
        scorer.observe(record.probability, outcome.correct);
    }

    log_forecast(
        "resolved",
        &id,
        &record.model_id,
        &[
            ("correct", Value::Bool(outcome.correct)),
            ("realized_return", v_num(outcome.realized_return)),
            ("brier", v_num(outcome.brier)),
        ],
    );
    Json(serde_json::to_value(&record).unwrap_or_else(|_| json!({}))).into_response()
}

// =============================================================================
// Admin: sweeps
// =============================================================================

async fn admin_tick(State(state): State<AppState>) -> Response {
    let guards = state.guards();
    let mut store = state.store.lock().await;
    let ts = now_ts();
    let applied = match tick_all(&mut store, &guards, state.cfg.audit_trail_cap, ts) {
        Ok(fired) => fired,
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    let repaired = match enforce_all(&mut store, &guards, state.cfg.audit_trail_cap, ts) {
        Ok(repaired) => repaired,
        Err(err) => return fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    };
    Json(json!({
        "auto_applied": applied.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
        "repaired": repaired.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
    }))
    .into_response()
}

async fn admin_integrity(State(state): State<AppState>) -> Response {
    let guards = state.guards();
    let mut store = state.store.lock().await;
    match enforce_all(&mut store, &guards, state.cfg.audit_trail_cap, now_ts()) {
        Ok(repaired) => Json(json!({
            "repaired": repaired
                .iter()
                .map(|(id, t)| json!({"model_id": id, "from": t.from.as_str(), "to": t.to.as_str()}))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(err) => fail(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}
