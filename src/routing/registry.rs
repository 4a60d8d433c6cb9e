//! Provider catalog and task routing table

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// What kind of work a provider can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Chat,
    Vision,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::Vision => write!(f, "vision"),
        }
    }
}

/// Static description of one upstream model/provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier used in routes and usage records
    pub id: String,

    /// Human readable label
    pub name: String,

    pub capability: Capability,

    /// Admission ceiling per calendar day
    pub max_requests_per_day: u64,

    /// Cost per 1k tokens (0.0 for free tiers)
    pub cost_per_unit: f64,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Upstream model name, when it differs from the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability,
            max_requests_per_day: 1000,
            cost_per_unit: 0.0,
            base_url: None,
            model: None,
            api_key_env: None,
        }
    }

    pub fn with_quota(mut self, max_requests_per_day: u64) -> Self {
        self.max_requests_per_day = max_requests_per_day;
        self
    }

    pub fn with_cost(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn with_endpoint(
        mut self,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
    ) -> Self {
        self.base_url = Some(base_url.into());
        self.model = Some(model.into());
        self.api_key_env = Some(api_key_env.into());
        self
    }

    /// Model name sent upstream
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }

    /// Estimated cost of a call that consumed `tokens`
    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * self.cost_per_unit
    }
}

/// Routing entry for one logical task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRoute {
    pub task_type: String,
    pub primary_provider_id: String,
    /// Strict priority order, tried after the primary
    #[serde(default)]
    pub fallback_provider_ids: Vec<String>,
    /// Budget for one provider invocation
    pub timeout_ms: u64,
}

impl TaskRoute {
    pub fn new(
        task_type: impl Into<String>,
        primary: impl Into<String>,
        fallbacks: &[&str],
        timeout_ms: u64,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            primary_provider_id: primary.into(),
            fallback_provider_ids: fallbacks.iter().map(|s| s.to_string()).collect(),
            timeout_ms,
        }
    }

    /// Primary followed by the fallbacks, in declared order
    pub fn chain(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_provider_id.as_str())
            .chain(self.fallback_provider_ids.iter().map(String::as_str))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the route against the registry: every id known, no repeats.
    pub fn validate(&self, registry: &ModelRegistry) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidRoute {
                task: self.task_type.clone(),
                reason: "timeout_ms must be greater than zero".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for id in self.chain() {
            if !registry.contains(id) {
                return Err(ConfigError::InvalidRoute {
                    task: self.task_type.clone(),
                    reason: format!("unknown provider '{}'", id),
                });
            }
            if !seen.insert(id) {
                return Err(ConfigError::InvalidRoute {
                    task: self.task_type.clone(),
                    reason: format!("provider '{}' appears more than once", id),
                });
            }
        }

        Ok(())
    }
}

/// Immutable provider catalog, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    providers: Vec<ProviderConfig>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(providers.len());
        for (i, provider) in providers.iter().enumerate() {
            if index.insert(provider.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateProvider(provider.id.clone()));
            }
        }
        Ok(Self { providers, index })
    }

    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.index.get(id).map(|&i| &self.providers[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Providers in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Task type -> route lookup
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, TaskRoute>,
}

impl RoutingTable {
    pub fn new(routes: Vec<TaskRoute>, registry: &ModelRegistry) -> Result<Self, ConfigError> {
        let mut table = HashMap::with_capacity(routes.len());
        for route in routes {
            route.validate(registry)?;
            let task = route.task_type.clone();
            if table.insert(task.clone(), route).is_some() {
                return Err(ConfigError::InvalidRoute {
                    task,
                    reason: "task type declared twice".to_string(),
                });
            }
        }
        Ok(Self { routes: table })
    }

    pub fn get(&self, task_type: &str) -> Option<&TaskRoute> {
        self.routes.get(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(vec![
            ProviderConfig::new("a", "A", Capability::Chat),
            ProviderConfig::new("b", "B", Capability::Chat),
        ])
        .unwrap()
    }

    #[test]
    fn test_chain_order() {
        let route = TaskRoute::new("t", "a", &["b"], 1000);
        let chain: Vec<_> = route.chain().collect();
        assert_eq!(chain, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let route = TaskRoute::new("t", "a", &["missing"], 1000);
        assert!(matches!(
            route.validate(&registry()),
            Err(ConfigError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_duplicate_in_chain_rejected() {
        let route = TaskRoute::new("t", "a", &["b", "a"], 1000);
        assert!(route.validate(&registry()).is_err());
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let result = ModelRegistry::new(vec![
            ProviderConfig::new("a", "A", Capability::Chat),
            ProviderConfig::new("a", "A again", Capability::Vision),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateProvider(id)) if id == "a"));
    }

    #[test]
    fn test_estimate_cost() {
        let provider = ProviderConfig::new("p", "P", Capability::Chat).with_cost(0.002);
        assert!((provider.estimate_cost(1500) - 0.003).abs() < 1e-9);
    }
}
