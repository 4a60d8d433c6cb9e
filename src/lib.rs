//! task-router - Route AI tasks across providers with quotas and fallbacks
//!
//! Given a logical task ("urgent_diagnosis", "image_recognition", ...) this
//! library picks a concrete provider, respects each provider's daily quota,
//! walks a fallback chain when a provider is exhausted or failing, caches
//! idempotent chat responses and records usage per provider and day.
//!
//! ## Key Features
//!
//! - **Model Selection**: primary first, then fallbacks in declared order
//! - **Daily Quotas**: availability checked against an atomic usage ledger, failing closed
//! - **Response Cache**: SHA-256 fingerprints of normalized requests with lazy TTL expiry
//! - **Time Budgets**: each route bounds provider calls; abandoned calls still record usage
//! - **Vision Degradation**: image recognition always yields a head-count estimate,
//!   tagged with how it was produced
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use task_router::{Config, DispatchRequest, Message, OpenAiCompatInvoker, Orchestrator};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let router = Orchestrator::in_memory(&config, Arc::new(OpenAiCompatInvoker::new()))?;
//!
//! let reply = router
//!     .dispatch(DispatchRequest::chat("urgent_diagnosis", vec![Message::user("母猪发烧")]))
//!     .await;
//! println!("{}", serde_json::to_string(&reply)?);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod routing;
pub mod usage;
pub mod vision;

pub use api::{
    DispatchRequest, DispatchResponse, InvokeError, Message, OpenAiCompatInvoker, ProviderInvoker,
};
pub use cache::{CacheMetrics, CacheStore, MemoryCacheStore, ResponseCache};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use metrics::{MetricsSummary, MetricsTracker};
pub use orchestrator::Orchestrator;
pub use routing::{ModelRegistry, ModelSelector, Priority, RouterError, RoutingTable};
pub use usage::{JsonFileUsageStore, MemoryUsageStore, UsageRecorder, UsageStore};
pub use vision::{CountEstimate, EstimationMethod, ExpectedRange, VisionPipeline};
