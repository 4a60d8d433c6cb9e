//! Model selection over a task's fallback chain

use super::{AvailabilityChecker, RouterError, RoutingTable, TaskRoute};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller's cost preference.
///
/// Accepted and logged, but not consulted by selection yet: the intended
/// policy (e.g. a cost ceiling per tier) has not been decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    FreeOnly,
    LowCost,
    #[default]
    Balanced,
    Premium,
}

impl Priority {
    /// Lenient parse; unknown values fall back to `Balanced`
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            None => Priority::Balanced,
            Some(v) => match v.as_str() {
                "free_only" => Priority::FreeOnly,
                "low_cost" => Priority::LowCost,
                "balanced" | "" => Priority::Balanced,
                "premium" => Priority::Premium,
                other => {
                    warn!(priority = other, "unknown priority, using balanced");
                    Priority::Balanced
                }
            },
        }
    }
}

/// Picks the first admissible provider for a task
#[derive(Clone)]
pub struct ModelSelector {
    routes: Arc<RoutingTable>,
    availability: AvailabilityChecker,
}

impl ModelSelector {
    pub fn new(routes: Arc<RoutingTable>, availability: AvailabilityChecker) -> Self {
        Self {
            routes,
            availability,
        }
    }

    pub fn route(&self, task_type: &str) -> Result<&TaskRoute, RouterError> {
        self.routes
            .get(task_type)
            .ok_or_else(|| RouterError::NoRouteFound(task_type.to_string()))
    }

    pub fn availability(&self) -> &AvailabilityChecker {
        &self.availability
    }

    /// Primary if admissible, otherwise the first admissible fallback in
    /// declared order.
    pub async fn select_model(
        &self,
        task_type: &str,
        priority: Priority,
    ) -> Result<String, RouterError> {
        self.select_excluding(task_type, priority, &[]).await
    }

    /// Same walk, skipping providers that already failed for this request
    pub async fn select_excluding(
        &self,
        task_type: &str,
        priority: Priority,
        tried: &[String],
    ) -> Result<String, RouterError> {
        let route = self.route(task_type)?;
        debug!(task = task_type, ?priority, "selecting model");

        for (position, provider_id) in route.chain().enumerate() {
            if tried.iter().any(|t| t == provider_id) {
                continue;
            }
            if self.availability.is_available(provider_id).await {
                if position > 0 {
                    info!(
                        task = task_type,
                        provider = provider_id,
                        primary = %route.primary_provider_id,
                        "routing to fallback provider"
                    );
                }
                return Ok(provider_id.to_string());
            }
            debug!(task = task_type, provider = provider_id, "provider not admissible");
        }

        warn!(task = task_type, "all providers exhausted");
        Err(RouterError::AllProvidersExhausted(task_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Capability, ModelRegistry, ProviderConfig};
    use crate::usage::{today_key, MemoryUsageStore, StoreError, UsageRecord, UsageStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    /// Memory store whose lookups fail for the listed providers
    struct PartlyDownStore {
        down: Vec<&'static str>,
        inner: MemoryUsageStore,
    }

    #[async_trait]
    impl UsageStore for PartlyDownStore {
        async fn get(&self, provider_id: &str, date: &str) -> Result<Option<UsageRecord>, StoreError> {
            if self.down.iter().any(|d| *d == provider_id) {
                return Err(StoreError::Unavailable("shard offline".into()));
            }
            self.inner.get(provider_id, date).await
        }
        async fn increment(
            &self,
            provider_id: &str,
            date: &str,
            token_delta: u64,
            at: DateTime<Utc>,
        ) -> Result<UsageRecord, StoreError> {
            self.inner.increment(provider_id, date, token_delta, at).await
        }
        async fn list_since(&self, date: &str) -> Result<Vec<UsageRecord>, StoreError> {
            self.inner.list_since(date).await
        }
    }

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::new(vec![
                ProviderConfig::new("p", "P", Capability::Chat).with_quota(10),
                ProviderConfig::new("f1", "F1", Capability::Chat).with_quota(10),
                ProviderConfig::new("f2", "F2", Capability::Chat).with_quota(10),
            ])
            .unwrap(),
        )
    }

    fn selector_over(store: Arc<dyn UsageStore>) -> ModelSelector {
        let registry = registry();
        let table = RoutingTable::new(
            vec![crate::routing::TaskRoute::new("t", "p", &["f1", "f2"], 1000)],
            &registry,
        )
        .unwrap();
        ModelSelector::new(Arc::new(table), AvailabilityChecker::new(registry, store))
    }

    async fn setup() -> (ModelSelector, Arc<MemoryUsageStore>) {
        let store = Arc::new(MemoryUsageStore::new());
        (selector_over(store.clone()), store)
    }

    async fn exhaust(store: &MemoryUsageStore, id: &str) {
        store
            .insert(UsageRecord {
                provider_id: id.into(),
                date: today_key(),
                request_count: 10,
                token_count: 0,
                last_used_at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_primary_preferred() {
        let (selector, _) = setup().await;
        assert_eq!(selector.select_model("t", Priority::Balanced).await.unwrap(), "p");
    }

    #[tokio::test]
    async fn test_first_admissible_fallback() {
        let (selector, store) = setup().await;
        exhaust(&store, "p").await;
        assert_eq!(selector.select_model("t", Priority::Balanced).await.unwrap(), "f1");
    }

    #[tokio::test]
    async fn test_unreachable_usage_moves_down_the_chain() {
        let selector = selector_over(Arc::new(PartlyDownStore {
            down: vec!["p"],
            inner: MemoryUsageStore::new(),
        }));
        assert_eq!(selector.select_model("t", Priority::Balanced).await.unwrap(), "f1");

        let selector = selector_over(Arc::new(PartlyDownStore {
            down: vec!["p", "f1", "f2"],
            inner: MemoryUsageStore::new(),
        }));
        assert!(matches!(
            selector.select_model("t", Priority::Balanced).await,
            Err(RouterError::AllProvidersExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_all_exhausted() {
        let (selector, store) = setup().await;
        for id in ["p", "f1", "f2"] {
            exhaust(&store, id).await;
        }
        assert!(matches!(
            selector.select_model("t", Priority::Balanced).await,
            Err(RouterError::AllProvidersExhausted(t)) if t == "t"
        ));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (selector, _) = setup().await;
        assert!(matches!(
            selector.select_model("nope", Priority::Premium).await,
            Err(RouterError::NoRouteFound(_))
        ));
    }

    #[tokio::test]
    async fn test_excluding_skips_tried() {
        let (selector, _) = setup().await;
        let tried = vec!["p".to_string(), "f1".to_string()];
        assert_eq!(
            selector
                .select_excluding("t", Priority::Balanced, &tried)
                .await
                .unwrap(),
            "f2"
        );
    }

    #[tokio::test]
    async fn test_priority_does_not_change_routing() {
        let (selector, _) = setup().await;
        for priority in [
            Priority::FreeOnly,
            Priority::LowCost,
            Priority::Balanced,
            Priority::Premium,
        ] {
            assert_eq!(selector.select_model("t", priority).await.unwrap(), "p");
        }
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(Priority::parse(Some("free_only")), Priority::FreeOnly);
        assert_eq!(Priority::parse(Some("PREMIUM")), Priority::Premium);
        assert_eq!(Priority::parse(Some("whatever")), Priority::Balanced);
        assert_eq!(Priority::parse(None), Priority::Balanced);
    }
}
