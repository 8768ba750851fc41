//! Caller-owned model registry
//!
//! Replaces a process-wide engine singleton: whoever hosts the engine creates
//! a registry and passes it to each forecaster call. Models are stored behind
//! `Arc` so lookups hand out cheap shared references.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::forecast::model::FittedModel;
use crate::models::ModelId;

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelId, Arc<FittedModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Models are immutable once inserted.
    pub fn insert(&self, model: FittedModel) -> ModelId {
        let id = model.id;
        self.models.write().insert(id, Arc::new(model));
        id
    }

    pub fn get(&self, id: &ModelId) -> Result<Arc<FittedModel>> {
        self.models
            .read()
            .get(id)
            .cloned()
            .ok_or(EngineError::ModelNotFound(*id))
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.models.read().contains_key(id)
    }

    pub fn remove(&self, id: &ModelId) -> Option<Arc<FittedModel>> {
        self.models.write().remove(id)
    }

    /// Non-ensemble models trained on a series with this fingerprint.
    pub fn models_for_fingerprint(&self, fingerprint: u64) -> Vec<Arc<FittedModel>> {
        let mut found: Vec<Arc<FittedModel>> = self
            .models
            .read()
            .values()
            .filter(|m| m.fingerprint == Some(fingerprint) && !m.is_ensemble())
            .cloned()
            .collect();
        found.sort_by_key(|m| m.trained_at);
        found
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    pub fn ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.models.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.models.write().clear();
    }
}
