//! Quota admission check

use super::ModelRegistry;
use crate::usage::{today_key, UsageStore};
use std::sync::Arc;
use tracing::warn;

/// Answers "has this provider used up today's request quota?"
#[derive(Clone)]
pub struct AvailabilityChecker {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn UsageStore>,
}

impl AvailabilityChecker {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn UsageStore>) -> Self {
        Self { registry, store }
    }

    /// Available iff today's request count is below the provider's quota.
    ///
    /// Unknown providers and store failures both read as unavailable, so the
    /// selector moves on down the chain instead of erroring.
    pub async fn is_available(&self, provider_id: &str) -> bool {
        self.is_available_on(provider_id, &today_key()).await
    }

    pub async fn is_available_on(&self, provider_id: &str, date: &str) -> bool {
        let Some(provider) = self.registry.get(provider_id) else {
            warn!(provider = provider_id, "availability check for unknown provider");
            return false;
        };

        match self.store.get(provider_id, date).await {
            Ok(None) => true,
            Ok(Some(record)) => record.request_count < provider.max_requests_per_day,
            Err(e) => {
                warn!(provider = provider_id, error = %e, "usage store unreachable, treating provider as unavailable");
                false
            }
        }
    }
}
