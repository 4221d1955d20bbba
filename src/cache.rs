//! In-memory model cache with TTL, keyed by family/horizon.
//!
//! Fronts registry reads on the hot serving path so repeated lookups do
//! not hit the document store within the TTL window.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::registry::TrainedModel;

#[derive(Debug, Clone)]
struct CachedModel {
    model: Option<Arc<TrainedModel>>,
    fetched_at: Instant,
}

impl CachedModel {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

pub struct ModelCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedModel>>,
}

impl ModelCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached active model for the slot, loading through `loader` on a
    /// miss or stale entry. Negative results are cached too.
    pub fn get_or_load<F>(
        &self,
        family: &str,
        horizon: &str,
        loader: F,
    ) -> Result<Option<Arc<TrainedModel>>>
    where
        F: FnOnce() -> Result<Option<TrainedModel>>,
    {
        let key = format!("{}/{}", family, horizon);
        if let Ok(entries) = self.entries.lock() {
            if let Some(entry) = entries.get(&key) {
                if entry.is_fresh(self.ttl) {
                    return Ok(entry.model.clone());
                }
            }
        }

        let loaded = loader()?.map(Arc::new);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CachedModel { model: loaded.clone(), fetched_at: Instant::now() },
            );
        }
        Ok(loaded)
    }

    /// Drop one slot's entry (after promote/rollback).
    pub fn invalidate(&self, family: &str, horizon: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&format!("{}/{}", family, horizon));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MetricsSnapshot;
    use crate::registry::ModelStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn model(id: &str) -> TrainedModel {
        TrainedModel {
            model_id: id.to_string(),
            family: "exchange".to_string(),
            horizon: "4h".to_string(),
            version: 1,
            fingerprint: "f".repeat(64),
            status: ModelStatus::Active,
            weights: json!({}),
            training_metrics: MetricsSnapshot::default(),
            created_ts: 0,
        }
    }

    #[test]
    fn test_second_read_is_cached() {
        let cache = ModelCache::new(60);
        let loads = AtomicU32::new(0);
        for _ in 0..3 {
            let got = cache
                .get_or_load("exchange", "4h", || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(model("m1")))
                })
                .unwrap();
            assert_eq!(got.unwrap().model_id, "m1");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_negative_result_cached() {
        let cache = ModelCache::new(60);
        let loads = AtomicU32::new(0);
        for _ in 0..2 {
            let got = cache
                .get_or_load("exchange", "4h", || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .unwrap();
            assert!(got.is_none());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let cache = ModelCache::new(60);
        cache
            .get_or_load("exchange", "4h", || Ok(Some(model("m1"))))
            .unwrap();
        cache.invalidate("exchange", "4h");
        let got = cache
            .get_or_load("exchange", "4h", || Ok(Some(model("m2"))))
            .unwrap();
        assert_eq!(got.unwrap().model_id, "m2");
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let cache = ModelCache::new(0);
        let loads = AtomicU32::new(0);
        for _ in 0..2 {
            cache
                .get_or_load("exchange", "4h", || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(model("m1")))
                })
                .unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_slots_are_independent() {
        let cache = ModelCache::new(60);
        cache
            .get_or_load("exchange", "4h", || Ok(Some(model("m1"))))
            .unwrap();
        let got = cache
            .get_or_load("fractal", "1d", || Ok(Some(model("m2"))))
            .unwrap();
        assert_eq!(got.unwrap().model_id, "m2");
    }
}
