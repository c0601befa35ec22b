// MIT License - Copyright (c) 2026 Peter Wright
// Per-panel severity lookup

use std::collections::HashMap;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Event code → severity, per panel model id.
///
/// Loaded from a TOML file whose tables are keyed by panel model id:
///
/// ```toml
/// [10001]
/// "FIRE ALARM" = 6
/// "TROUBLE" = 2
/// ```
#[derive(Debug, Clone, Default)]
pub struct SeverityTable {
    levels: HashMap<u32, HashMap<String, i32>>,
    default_severity: i32,
}

impl SeverityTable {
    pub fn new(default_severity: i32) -> Self {
        Self {
            levels: HashMap::new(),
            default_severity,
        }
    }

    /// Add (or replace) the table for one panel model.
    pub fn with_levels<I, K>(mut self, model_id: u32, levels: I) -> Self
    where
        I: IntoIterator<Item = (K, i32)>,
        K: Into<String>,
    {
        self.levels.insert(
            model_id,
            levels.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        );
        self
    }

    pub fn from_toml_str(text: &str, default_severity: i32) -> Result<Self> {
        let raw: HashMap<String, HashMap<String, i32>> = toml::from_str(text)
            .map_err(|e| BridgeError::config(format!("invalid severity table: {e}")))?;
        let mut levels = HashMap::with_capacity(raw.len());
        for (model, codes) in raw {
            let id = model
                .parse::<u32>()
                .map_err(|_| BridgeError::config(format!("invalid panel model id: {model}")))?;
            levels.insert(id, codes);
        }
        Ok(Self {
            levels,
            default_severity,
        })
    }

    pub fn load(path: impl AsRef<Path>, default_severity: i32) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("cannot read severity table {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text, default_severity)
    }

    /// Table entry for `code`, if the panel model has one.
    pub fn lookup(&self, model_id: u32, code: &str) -> Option<i32> {
        self.levels.get(&model_id)?.get(code).copied()
    }

    /// Severity for `code`, falling back to the configured default.
    pub fn resolve(&self, model_id: u32, code: &str) -> i32 {
        self.lookup(model_id, code).unwrap_or(self.default_severity)
    }

    pub fn default_severity(&self) -> i32 {
        self.default_severity
    }

    pub fn models(&self) -> impl Iterator<Item = u32> + '_ {
        self.levels.keys().copied()
    }
}
