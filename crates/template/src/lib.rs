use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The key to value mapping used to expand `{{ KEY }}` placeholders in
/// configuration templates.
///
/// Both the spaced (`{{ KEY }}`) and the tight (`{{KEY}}`) forms are
/// recognized. Keys that are not present in the mapping are left in place
/// as literal placeholders. Substitution is a single pass over the mapping:
/// a value that itself contains a placeholder-like substring is never
/// re-processed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Variables {
    vars: BTreeMap<Arc<str>, Arc<str>>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the calling process environment as the variable mapping.
    pub fn from_env() -> Self {
        let mut variables = Self::new();
        for (key, value) in std::env::vars() {
            variables.insert(key.as_str(), value.as_str());
        }
        variables
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|value| value.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn substitute(&self, content: &str) -> String {
        let mut result = content.to_string();
        for (key, value) in self.vars.iter() {
            let spaced_placeholder = format!("{{{{ {key} }}}}");
            let tight_placeholder = format!("{{{{{key}}}}}");
            result = result.replace(spaced_placeholder.as_str(), value);
            result = result.replace(tight_placeholder.as_str(), value);
        }
        result
    }

    pub fn substitute_file(&self, path: &std::path::Path) -> anyhow::Result<String> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        Ok(self.substitute(contents.as_str()))
    }
}
