use std::fs;
use std::path::Path;

use serde::Deserialize;

use ll_core::LayerBudgets;

use crate::error::{Result, StoreError};

/// Project-level store configuration, loaded from an optional TOML file.
/// Every field has a default, and a missing file means all defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache_capacity: usize,
    pub default_token_budget: usize,
    pub memory_fraction: f64,
    pub history_fraction: f64,
    pub retrieval_fraction: f64,
    pub document_ext: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            default_token_budget: 4096,
            memory_fraction: 0.10,
            history_fraction: 0.60,
            retrieval_fraction: 0.30,
            document_ext: "json".into(),
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| StoreError::InvalidData(format!("bad config {}: {e}", path.display())))
    }

    pub fn layer_budgets(&self) -> LayerBudgets {
        LayerBudgets {
            memory: self.memory_fraction,
            history: self.history_fraction,
            retrieval: self.retrieval_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::load(&dir.path().join("ledger.toml")).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        fs::write(&path, "cache_capacity = 32\nhistory_fraction = 0.5\n").unwrap();

        let config = StoreConfig::load(&path).unwrap();
        assert_eq!(config.cache_capacity, 32);
        assert!((config.history_fraction - 0.5).abs() < 1e-9);
        assert_eq!(config.default_token_budget, 4096);
    }

    #[test]
    fn test_bad_file_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        fs::write(&path, "cache_capacity = \"lots\"").unwrap();

        match StoreConfig::load(&path) {
            Err(StoreError::InvalidData(_)) => {}
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }

    #[test]
    fn test_layer_budgets_mapping() {
        let budgets = StoreConfig::default().layer_budgets();
        let (m, h, r) = budgets.split(1000);
        assert_eq!((m, h, r), (100, 600, 300));
    }
}
