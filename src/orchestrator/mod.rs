//! Task dispatch with automatic fallback
//!
//! This module coordinates one request end to end:
//! - Model selection over the task's route (primary first, then fallbacks)
//! - Response cache for chat completions
//! - Time-boxed provider invocation with usage recording
//! - The vision degradation pipeline for image recognition

use crate::api::{
    invoke_within, Action, ChatRequest, ChatResponse, DispatchRequest, DispatchResponse,
    FallbackFlag, InvokeError, ProviderInvoker,
};
use crate::cache::{fingerprint, CacheStore, CacheSummary, MemoryCacheStore, ResponseCache};
use crate::config::{Config, ConfigError};
use crate::metrics::{MetricsSummary, MetricsTracker};
use crate::routing::{AvailabilityChecker, ModelRegistry, ModelSelector, Priority, RouterError};
use crate::usage::{MemoryUsageStore, UsageRecorder, UsageStore};
use crate::vision::{RecognitionInput, VisionPipeline};
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Task used when a chat request names none
pub const DEFAULT_CHAT_TASK: &str = "general_chat";

/// Shown to end users when no chat provider could answer
pub const SERVICE_UNAVAILABLE: &str = "AI服务暂时不可用，请稍后再试";

/// Routes dispatch requests to providers
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    selector: ModelSelector,
    invoker: Arc<dyn ProviderInvoker>,
    recorder: UsageRecorder,
    cache: ResponseCache,
    vision: VisionPipeline,
    metrics: MetricsTracker,
    stats_days: u32,
}

impl Orchestrator {
    /// Build from a config; fails if the catalog or routes are invalid
    pub fn from_config(
        config: &Config,
        invoker: Arc<dyn ProviderInvoker>,
        usage_store: Arc<dyn UsageStore>,
        cache_store: Arc<dyn CacheStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(config.build_registry()?);
        let routes = Arc::new(config.build_routes(&registry)?);
        let availability = AvailabilityChecker::new(Arc::clone(&registry), Arc::clone(&usage_store));
        let selector = ModelSelector::new(routes, availability);
        let recorder = UsageRecorder::new(usage_store);

        let cache = if config.cache.enabled {
            ResponseCache::new(cache_store, config.cache.ttl_secs)
        } else {
            ResponseCache::disabled(cache_store)
        };

        let vision = VisionPipeline::new(
            selector.clone(),
            Arc::clone(&registry),
            Arc::clone(&invoker),
            recorder.clone(),
            config.vision.clone(),
        );

        info!(
            providers = registry.len(),
            cache_enabled = cache.is_enabled(),
            invoker = invoker.name(),
            "orchestrator ready"
        );

        Ok(Self {
            registry,
            selector,
            invoker,
            recorder,
            cache,
            vision,
            metrics: MetricsTracker::new(),
            stats_days: config.usage.stats_days,
        })
    }

    /// Same, backed by in-process usage and cache stores
    pub fn in_memory(config: &Config, invoker: Arc<dyn ProviderInvoker>) -> Result<Self, ConfigError> {
        Self::from_config(
            config,
            invoker,
            Arc::new(MemoryUsageStore::new()),
            Arc::new(MemoryCacheStore::new(config.cache.max_entries)),
        )
    }

    /// Seed the vision estimator for reproducible results
    pub fn with_vision_seed(mut self, seed: u64) -> Self {
        self.vision = self.vision.with_seed(seed);
        self
    }

    /// Second invoker for the alternate vision stage
    pub fn with_alternate_vision(mut self, invoker: Arc<dyn ProviderInvoker>) -> Self {
        self.vision = self.vision.with_alternate(invoker);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn recorder(&self) -> &UsageRecorder {
        &self.recorder
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn cache_summary(&self) -> CacheSummary {
        self.cache.summary()
    }

    /// Parse and dispatch one raw JSON request
    pub async fn dispatch_json(&self, raw: &str) -> DispatchResponse {
        match serde_json::from_str::<DispatchRequest>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!(error = %e, "rejecting malformed request");
                self.metrics.record_failure();
                DispatchResponse::failure(format!("Invalid request: {}", e))
            }
        }
    }

    /// Handle one request. Never panics or errors; failures are reported in
    /// the response envelope.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        debug!(action = ?request.action, task = ?request.task_type, "dispatching");

        let response = match request.action {
            Action::ChatCompletion => self.chat_completion(&request).await,
            Action::ImageRecognition => self.image_recognition(&request).await,
            Action::GetUsageStats => self.usage_stats().await,
            Action::HealthCheck => self.health_check().await,
        };

        if !response.success {
            self.metrics.record_failure();
        }
        response
    }

    async fn chat_completion(&self, request: &DispatchRequest) -> DispatchResponse {
        let task_type = request.task_type.as_deref().unwrap_or(DEFAULT_CHAT_TASK);
        let priority = Priority::parse(request.priority.as_deref());

        let route = match self.selector.route(task_type) {
            Ok(route) => route,
            Err(e) => return DispatchResponse::failure(e.to_string()),
        };
        let primary = route.primary_provider_id.clone();
        let budget = route.timeout();

        let mut provider_id = match self.selector.select_model(task_type, priority).await {
            Ok(id) => id,
            Err(e) => return self.unavailable(e),
        };

        let key = fingerprint(task_type, &request.messages);
        if let Some(hit) = self.cached_response(&key).await {
            return hit;
        }

        let chat_request = ChatRequest {
            task_type: task_type.to_string(),
            messages: request.messages.clone(),
            options: request.options.clone(),
        };

        let mut tried = Vec::new();
        loop {
            match self.invoke_chat(&provider_id, budget, &chat_request).await {
                Ok(response) => {
                    return self
                        .chat_success(&key, &provider_id, &primary, response)
                        .await;
                }
                Err(e) => {
                    warn!(
                        task = task_type,
                        provider = %provider_id,
                        error = %e,
                        "provider call failed, trying next in chain"
                    );
                    tried.push(provider_id);
                }
            }

            provider_id = match self
                .selector
                .select_excluding(task_type, priority, &tried)
                .await
            {
                Ok(id) => id,
                Err(e) => return self.unavailable(e),
            };
        }
    }

    async fn invoke_chat(
        &self,
        provider_id: &str,
        budget: std::time::Duration,
        request: &ChatRequest,
    ) -> Result<ChatResponse, InvokeError> {
        let provider = self.registry.get(provider_id).cloned().ok_or_else(|| {
            InvokeError::Provider(format!("provider '{}' missing from registry", provider_id))
        })?;

        let invoker = Arc::clone(&self.invoker);
        let request = request.clone();
        let call = async move { invoker.chat(&provider, &request).await };

        invoke_within(
            budget,
            self.recorder.clone(),
            provider_id.to_string(),
            |response: &ChatResponse| u64::from(response.usage.total_tokens),
            call,
        )
        .await
    }

    async fn chat_success(
        &self,
        key: &str,
        provider_id: &str,
        primary: &str,
        response: ChatResponse,
    ) -> DispatchResponse {
        let cost = self
            .registry
            .get(provider_id)
            .map(|p| p.estimate_cost(u64::from(response.usage.total_tokens)))
            .unwrap_or(0.0);
        self.metrics.record_request(provider_id, response.usage, cost);

        let data = match serde_json::to_value(&response) {
            Ok(data) => data,
            Err(e) => return DispatchResponse::failure(format!("Failed to encode response: {}", e)),
        };

        self.cache
            .put(key, json!({ "data": data.clone(), "modelId": provider_id }))
            .await;

        let mut reply = DispatchResponse::ok(data)
            .with_model(provider_id)
            .with_cache_flag(false);
        if provider_id != primary {
            self.metrics.record_fallback();
            reply = reply.with_fallback(FallbackFlag::Flag(true));
        }
        reply
    }

    async fn cached_response(&self, key: &str) -> Option<DispatchResponse> {
        let mut cached = self.cache.get(key).await?;
        let data = cached.get_mut("data").map(Value::take)?;
        let model_id = cached.get("modelId").and_then(Value::as_str)?.to_string();

        self.metrics.record_cache_hit();
        Some(
            DispatchResponse::ok(data)
                .with_model(model_id)
                .with_cache_flag(true),
        )
    }

    fn unavailable(&self, error: RouterError) -> DispatchResponse {
        match error {
            RouterError::NoRouteFound(_) => DispatchResponse::failure(error.to_string()),
            RouterError::AllProvidersExhausted(task) => {
                warn!(task = %task, "no chat provider could answer");
                DispatchResponse::failure(SERVICE_UNAVAILABLE).with_fallback(FallbackFlag::Flag(true))
            }
        }
    }

    async fn image_recognition(&self, request: &DispatchRequest) -> DispatchResponse {
        let input = RecognitionInput {
            image_data: request.image_data.clone().unwrap_or_default(),
            location: request.location.clone(),
            expected_range: request.expected_range,
            priority: Priority::parse(request.priority.as_deref()),
        };

        let outcome = self.vision.recognize(&input).await;
        let method = outcome.estimate.estimation_method;
        self.metrics.record_vision(method);
        info!(
            method = %method,
            count = outcome.estimate.total_count,
            confidence = outcome.estimate.confidence,
            "image recognized"
        );

        let data = serde_json::to_value(&outcome.estimate).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode estimate");
            Value::Null
        });

        let reply = DispatchResponse::ok(data).with_model(outcome.model_id());
        if method.is_vendor() {
            reply
        } else {
            reply.with_fallback(FallbackFlag::Method(method.as_str().to_string()))
        }
    }

    async fn usage_stats(&self) -> DispatchResponse {
        match self.recorder.stats(self.stats_days, &self.registry).await {
            Ok(stats) => match serde_json::to_value(&stats) {
                Ok(data) => DispatchResponse::ok(data),
                Err(e) => DispatchResponse::failure(format!("Failed to encode usage: {}", e)),
            },
            Err(e) => {
                warn!(error = %e, "usage statistics unavailable");
                DispatchResponse::failure(format!("Usage statistics unavailable: {}", e))
            }
        }
    }

    async fn health_check(&self) -> DispatchResponse {
        let availability = self.selector.availability();
        let checks = self.registry.iter().map(|provider| async move {
            let available = availability.is_available(&provider.id).await;
            (provider, available)
        });

        let providers: BTreeMap<String, Value> = join_all(checks)
            .await
            .into_iter()
            .map(|(provider, available)| {
                (
                    provider.id.clone(),
                    json!({
                        "available": available,
                        "name": provider.name,
                        "capability": provider.capability,
                    }),
                )
            })
            .collect();

        DispatchResponse::ok(json!({
            "providers": providers,
            "checkedAt": Utc::now().to_rfc3339(),
        }))
    }
}
