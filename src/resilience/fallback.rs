use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::provider::ModelId;

/// Ordered fallback models per primary model, loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackTable {
    table: HashMap<ModelId, Vec<ModelId>>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, primary: ModelId, fallbacks: Vec<ModelId>) -> Self {
        self.table.insert(primary, fallbacks);
        self
    }

    pub fn fallbacks(&self, primary: &ModelId) -> &[ModelId] {
        self.table.get(primary).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The primary followed by its fallbacks, without repeats.
    pub fn chain(&self, primary: &ModelId) -> Vec<ModelId> {
        let mut chain = vec![primary.clone()];
        for model in self.fallbacks(primary) {
            if !chain.contains(model) {
                chain.push(model.clone());
            }
        }
        chain
    }

    /// Length of the longest chain any configured primary can produce.
    pub fn longest_chain(&self) -> usize {
        self.table
            .keys()
            .map(|primary| self.chain(primary).len())
            .max()
            .unwrap_or(1)
    }
}
