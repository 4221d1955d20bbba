//! Model registry: active/shadow/previous pointers per (family, horizon)
//! with promotion and rollback bookkeeping.
//!
//! One registry serves every module family (exchange-ml, fractal, ...);
//! the family is part of the slot key. Rollback depth is a single
//! `prev_model_id` slot.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::calibration::MetricsSnapshot;
use crate::config::{now_ts, SystemMode};
use crate::lifecycle::LifecycleState;
use crate::logging::{log_promotion, log_rollback};
use crate::store::{Collection, DocStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    Ready,
    Shadow,
    Active,
    Retired,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Ready => "READY",
            ModelStatus::Shadow => "SHADOW",
            ModelStatus::Active => "ACTIVE",
            ModelStatus::Retired => "RETIRED",
        }
    }
}

/// Versioned weight/threshold blob with training metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_id: String,
    pub family: String,
    pub horizon: String,
    pub version: u32,
    /// SHA-256 of the weight blob.
    pub fingerprint: String,
    pub status: ModelStatus,
    pub weights: Value,
    pub training_metrics: MetricsSnapshot,
    pub created_ts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySlot {
    pub family: String,
    pub horizon: String,
    pub active_model_id: Option<String>,
    pub shadow_model_id: Option<String>,
    pub prev_model_id: Option<String>,
    pub promotions: u32,
    pub rollbacks: u32,
    pub updated_ts: u64,
}

impl RegistrySlot {
    pub fn new(family: &str, horizon: &str, ts: u64) -> Self {
        Self {
            family: family.to_string(),
            horizon: horizon.to_string(),
            active_model_id: None,
            shadow_model_id: None,
            prev_model_id: None,
            promotions: 0,
            rollbacks: 0,
            updated_ts: ts,
        }
    }
}

pub fn slot_key(family: &str, horizon: &str) -> String {
    format!("{}/{}", family, horizon)
}

pub fn fingerprint(weights: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(weights.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn load_slot(store: &DocStore, family: &str, horizon: &str) -> Result<RegistrySlot> {
    let key = slot_key(family, horizon);
    Ok(store
        .get::<RegistrySlot>(Collection::ModelRegistry, &key)?
        .unwrap_or_else(|| RegistrySlot::new(family, horizon, now_ts())))
}

fn save_slot(store: &mut DocStore, slot: &RegistrySlot) -> Result<()> {
    let key = slot_key(&slot.family, &slot.horizon);
    store.upsert(Collection::ModelRegistry, &key, slot)
}

fn set_model_status(store: &mut DocStore, model_id: &str, status: ModelStatus) -> Result<()> {
    let mut model: TrainedModel = store
        .get(Collection::TrainedModels, model_id)?
        .ok_or_else(|| anyhow!("trained model {} not found", model_id))?;
    model.status = status;
    store.upsert(Collection::TrainedModels, model_id, &model)
}

/// Register a trained model (status READY) and seed its lifecycle
/// document in SIMULATION.
pub fn register_model(
    store: &mut DocStore,
    family: &str,
    horizon: &str,
    weights: Value,
    training_metrics: MetricsSnapshot,
    mode: SystemMode,
    ts: u64,
) -> Result<TrainedModel> {
    let fp = fingerprint(&weights);
    let existing: Vec<TrainedModel> = store.list(Collection::TrainedModels, 10_000)?;
    let version = existing
        .iter()
        .filter(|m| m.family == family && m.horizon == horizon)
        .map(|m| m.version)
        .max()
        .unwrap_or(0)
        + 1;
    let model_id = format!("{}-{}-v{}-{}", family, horizon, version, &fp[..8]);

    let model = TrainedModel {
        model_id: model_id.clone(),
        family: family.to_string(),
        horizon: horizon.to_string(),
        version,
        fingerprint: fp,
        status: ModelStatus::Ready,
        weights,
        training_metrics,
        created_ts: ts,
    };
    store.upsert(Collection::TrainedModels, &model_id, &model)?;

    let lifecycle = LifecycleState::new(&model_id, family, horizon, mode, ts);
    store.upsert(Collection::LifecycleState, &model_id, &lifecycle)?;

    Ok(model)
}

/// Stage a READY model as the slot's shadow.
pub fn stage_shadow(
    store: &mut DocStore,
    family: &str,
    horizon: &str,
    model_id: &str,
    ts: u64,
) -> Result<RegistrySlot> {
    let model: TrainedModel = store
        .get(Collection::TrainedModels, model_id)?
        .ok_or_else(|| anyhow!("trained model {} not found", model_id))?;
    if model.family != family || model.horizon != horizon {
        bail!("model {} belongs to {}/{}", model_id, model.family, model.horizon);
    }

    let mut slot = load_slot(store, family, horizon)?;
    if slot.active_model_id.as_deref() == Some(model_id) {
        bail!("model {} is already active in {}/{}", model_id, family, horizon);
    }
    if let Some(old_shadow) = slot.shadow_model_id.take() {
        if old_shadow != model_id {
            set_model_status(store, &old_shadow, ModelStatus::Ready)
                .context("demoting previous shadow")?;
        }
    }
    set_model_status(store, model_id, ModelStatus::Shadow)?;
    slot.shadow_model_id = Some(model_id.to_string());
    slot.updated_ts = ts;
    save_slot(store, &slot)?;
    Ok(slot)
}

/// Promote the shadow to active. The outgoing active drops into the
/// single previous-model slot.
pub fn promote(store: &mut DocStore, family: &str, horizon: &str, ts: u64) -> Result<RegistrySlot> {
    let mut slot = load_slot(store, family, horizon)?;
    let shadow = slot
        .shadow_model_id
        .take()
        .ok_or_else(|| anyhow!("no shadow staged for {}/{}", family, horizon))?;

    let demoted = slot.active_model_id.take();
    if let Some(prev) = &demoted {
        set_model_status(store, prev, ModelStatus::Retired)?;
    }
    set_model_status(store, &shadow, ModelStatus::Active)?;

    slot.prev_model_id = demoted.clone();
    slot.active_model_id = Some(shadow.clone());
    slot.promotions += 1;
    slot.updated_ts = ts;
    save_slot(store, &slot)?;

    log_promotion(family, horizon, &shadow, demoted.as_deref());
    Ok(slot)
}

/// Restore the previous model. Errors when no previous slot exists (depth
/// is one; a second rollback needs a fresh promotion first).
pub fn rollback(
    store: &mut DocStore,
    family: &str,
    horizon: &str,
    trigger: &str,
    ts: u64,
) -> Result<RegistrySlot> {
    let mut slot = load_slot(store, family, horizon)?;
    let prev = slot
        .prev_model_id
        .take()
        .ok_or_else(|| anyhow!("no previous model for {}/{}", family, horizon))?;
    let retired = slot
        .active_model_id
        .take()
        .ok_or_else(|| anyhow!("no active model for {}/{}", family, horizon))?;

    set_model_status(store, &retired, ModelStatus::Retired)?;
    set_model_status(store, &prev, ModelStatus::Active)?;

    slot.active_model_id = Some(prev.clone());
    slot.rollbacks += 1;
    slot.updated_ts = ts;
    save_slot(store, &slot)?;

    log_rollback(family, horizon, &prev, &retired, trigger);
    Ok(slot)
}

pub fn get_slot(store: &DocStore, family: &str, horizon: &str) -> Result<Option<RegistrySlot>> {
    store.get(Collection::ModelRegistry, &slot_key(family, horizon))
}

pub fn get_model(store: &DocStore, model_id: &str) -> Result<Option<TrainedModel>> {
    store.get(Collection::TrainedModels, model_id)
}

/// The active model for a slot, if any.
pub fn active_model(store: &DocStore, family: &str, horizon: &str) -> Result<Option<TrainedModel>> {
    let Some(slot) = get_slot(store, family, horizon)? else {
        return Ok(None);
    };
    let Some(active_id) = slot.active_model_id else {
        return Ok(None);
    };
    get_model(store, &active_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open() -> DocStore {
        let mut store = DocStore::open_in_memory().unwrap();
        store.init().unwrap();
        store
    }

    fn register(store: &mut DocStore, n: u64) -> TrainedModel {
        register_model(
            store,
            "exchange",
            "4h",
            json!({"weights": [0.1, 0.2, n]}),
            MetricsSnapshot { hit_rate: 0.55, brier: 0.23, samples: 400, wins: 220 },
            SystemMode::Dev,
            1_000 + n,
        )
        .unwrap()
    }

    #[test]
    fn test_register_assigns_versions_and_lifecycle() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        let m2 = register(&mut store, 2);
        assert_eq!(m1.version, 1);
        assert_eq!(m2.version, 2);
        assert_eq!(m1.status, ModelStatus::Ready);
        assert_ne!(m1.fingerprint, m2.fingerprint);

        let lc: Option<LifecycleState> =
            store.get(Collection::LifecycleState, &m1.model_id).unwrap();
        assert!(lc.is_some());
    }

    #[test]
    fn test_stage_and_promote() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_000).unwrap();
        let slot = promote(&mut store, "exchange", "4h", 2_001).unwrap();
        assert_eq!(slot.active_model_id.as_deref(), Some(m1.model_id.as_str()));
        assert!(slot.shadow_model_id.is_none());
        assert!(slot.prev_model_id.is_none());
        assert_eq!(slot.promotions, 1);

        let active = active_model(&store, "exchange", "4h").unwrap().unwrap();
        assert_eq!(active.status, ModelStatus::Active);
    }

    #[test]
    fn test_promote_moves_active_to_prev() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        let m2 = register(&mut store, 2);
        stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_000).unwrap();
        promote(&mut store, "exchange", "4h", 2_001).unwrap();
        stage_shadow(&mut store, "exchange", "4h", &m2.model_id, 2_002).unwrap();
        let slot = promote(&mut store, "exchange", "4h", 2_003).unwrap();

        assert_eq!(slot.active_model_id.as_deref(), Some(m2.model_id.as_str()));
        assert_eq!(slot.prev_model_id.as_deref(), Some(m1.model_id.as_str()));

        let demoted = get_model(&store, &m1.model_id).unwrap().unwrap();
        assert_eq!(demoted.status, ModelStatus::Retired);
    }

    #[test]
    fn test_rollback_restores_prev_once() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        let m2 = register(&mut store, 2);
        stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_000).unwrap();
        promote(&mut store, "exchange", "4h", 2_001).unwrap();
        stage_shadow(&mut store, "exchange", "4h", &m2.model_id, 2_002).unwrap();
        promote(&mut store, "exchange", "4h", 2_003).unwrap();

        let slot = rollback(&mut store, "exchange", "4h", "admin", 2_004).unwrap();
        assert_eq!(slot.active_model_id.as_deref(), Some(m1.model_id.as_str()));
        assert!(slot.prev_model_id.is_none());
        assert_eq!(slot.rollbacks, 1);

        let restored = get_model(&store, &m1.model_id).unwrap().unwrap();
        assert_eq!(restored.status, ModelStatus::Active);
        let retired = get_model(&store, &m2.model_id).unwrap().unwrap();
        assert_eq!(retired.status, ModelStatus::Retired);

        // Depth is one: a second rollback has nothing to restore.
        assert!(rollback(&mut store, "exchange", "4h", "admin", 2_005).is_err());
    }

    #[test]
    fn test_shadow_cannot_be_active_model() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_000).unwrap();
        promote(&mut store, "exchange", "4h", 2_001).unwrap();
        assert!(stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_002).is_err());
    }

    #[test]
    fn test_restage_replaces_old_shadow() {
        let mut store = open();
        let m1 = register(&mut store, 1);
        let m2 = register(&mut store, 2);
        stage_shadow(&mut store, "exchange", "4h", &m1.model_id, 2_000).unwrap();
        let slot = stage_shadow(&mut store, "exchange", "4h", &m2.model_id, 2_001).unwrap();
        assert_eq!(slot.shadow_model_id.as_deref(), Some(m2.model_id.as_str()));

        let released = get_model(&store, &m1.model_id).unwrap().unwrap();
        assert_eq!(released.status, ModelStatus::Ready);
    }
}
