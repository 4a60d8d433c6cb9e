//! Degradation pipeline for the image recognition task

use super::{
    estimate_from_detections, fixed_fallback, CountEstimate, EstimationError, EstimatorConfig,
    ExpectedRange, StatisticalEstimator,
};
use crate::api::{invoke_within, InvokeError, ProviderInvoker, VisionRequest, VisionResponse};
use crate::routing::{ModelRegistry, ModelSelector, Priority, RouterError};
use crate::usage::UsageRecorder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Task type whose route lists the vision providers
pub const IMAGE_TASK: &str = "image_recognition";

/// Reported as `modelId` when no vision provider produced the estimate
pub const FALLBACK_MODEL_ID: &str = "fallback-estimate";

/// Terminal state that produced an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VendorVision,
    AlternateVendorVision,
    StatisticalEstimate,
    FixedFallback,
}

#[derive(Debug, Clone, Default)]
pub struct RecognitionInput {
    pub image_data: String,
    pub location: Option<String>,
    /// Missing ranges use the configured default
    pub expected_range: Option<ExpectedRange>,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub estimate: CountEstimate,
    /// Vision provider that answered, if any
    pub provider_id: Option<String>,
    pub stage: Stage,
}

impl RecognitionOutcome {
    pub fn model_id(&self) -> &str {
        self.provider_id.as_deref().unwrap_or(FALLBACK_MODEL_ID)
    }
}

#[derive(Error, Debug)]
enum VendorFailure {
    #[error(transparent)]
    Selection(#[from] RouterError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

impl VendorFailure {
    fn is_not_implemented(&self) -> bool {
        matches!(self, VendorFailure::Invoke(InvokeError::NotImplemented(_)))
    }
}

/// Runs the four recognition stages in order. `recognize` never fails.
pub struct VisionPipeline {
    selector: ModelSelector,
    registry: Arc<ModelRegistry>,
    invoker: Arc<dyn ProviderInvoker>,
    alternate: Option<Arc<dyn ProviderInvoker>>,
    recorder: UsageRecorder,
    config: EstimatorConfig,
    rng: Mutex<StdRng>,
}

impl VisionPipeline {
    pub fn new(
        selector: ModelSelector,
        registry: Arc<ModelRegistry>,
        invoker: Arc<dyn ProviderInvoker>,
        recorder: UsageRecorder,
        config: EstimatorConfig,
    ) -> Self {
        Self {
            selector,
            registry,
            invoker,
            alternate: None,
            recorder,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Second vendor path, tried when the primary invoker has no vision
    /// protocol for the selected provider.
    pub fn with_alternate(mut self, invoker: Arc<dyn ProviderInvoker>) -> Self {
        self.alternate = Some(invoker);
        self
    }

    /// Deterministic draws, for tests and reproducible CLI runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub async fn recognize(&self, input: &RecognitionInput) -> RecognitionOutcome {
        let range = input.expected_range.unwrap_or(self.config.default_range);
        let mut tried = Vec::new();

        match self
            .vendor_stage(&self.invoker, input, range, &mut tried, Stage::VendorVision)
            .await
        {
            Ok(outcome) => return outcome,
            Err(failure) if failure.is_not_implemented() => {
                debug!(invoker = self.invoker.name(), "vision protocol not implemented");
                if let Some(outcome) = self.alternate_stage(input, range, &mut tried).await {
                    return outcome;
                }
            }
            Err(failure) => {
                warn!(error = %failure, "vendor vision failed, using statistical estimate");
            }
        }

        self.statistical_stage(input, range)
    }

    async fn alternate_stage(
        &self,
        input: &RecognitionInput,
        range: ExpectedRange,
        tried: &mut Vec<String>,
    ) -> Option<RecognitionOutcome> {
        let Some(alternate) = &self.alternate else {
            info!("alternate vision: framework present, statistical fallback active");
            return None;
        };

        match self
            .vendor_stage(alternate, input, range, tried, Stage::AlternateVendorVision)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(failure) => {
                warn!(
                    invoker = alternate.name(),
                    error = %failure,
                    "alternate vision failed, using statistical estimate"
                );
                None
            }
        }
    }

    async fn vendor_stage(
        &self,
        invoker: &Arc<dyn ProviderInvoker>,
        input: &RecognitionInput,
        range: ExpectedRange,
        tried: &mut Vec<String>,
        stage: Stage,
    ) -> Result<RecognitionOutcome, VendorFailure> {
        if input.image_data.trim().is_empty() {
            return Err(EstimationError::EmptyImage.into());
        }

        let provider_id = self
            .selector
            .select_excluding(IMAGE_TASK, input.priority, tried)
            .await?;
        tried.push(provider_id.clone());

        let provider = self.registry.get(&provider_id).cloned().ok_or_else(|| {
            InvokeError::Provider(format!("provider '{}' missing from registry", provider_id))
        })?;
        let budget = self.selector.route(IMAGE_TASK)?.timeout();

        let request = VisionRequest {
            image_data: input.image_data.clone(),
            location: input.location.clone(),
        };
        let invoker = Arc::clone(invoker);
        let call = async move { invoker.recognize(&provider, &request).await };

        let response = invoke_within(
            budget,
            self.recorder.clone(),
            provider_id.clone(),
            |_: &VisionResponse| 0,
            call,
        )
        .await?;

        debug!(
            provider = %provider_id,
            detections = response.detections.len(),
            "vision provider answered"
        );

        let estimate = estimate_from_detections(
            &response.detections,
            range,
            input.location.as_deref(),
            input.image_data.len(),
            &self.config,
            &mut *self.rng(),
        )?;

        Ok(RecognitionOutcome {
            estimate,
            provider_id: Some(provider_id),
            stage,
        })
    }

    fn statistical_stage(&self, input: &RecognitionInput, range: ExpectedRange) -> RecognitionOutcome {
        let result = StatisticalEstimator::new(&self.config).estimate(
            range,
            input.location.as_deref(),
            input.image_data.len(),
            &mut *self.rng(),
        );

        match result {
            Ok(estimate) => RecognitionOutcome {
                estimate,
                provider_id: None,
                stage: Stage::StatisticalEstimate,
            },
            Err(e) => {
                warn!(error = %e, "statistical estimate failed, using fixed fallback");
                RecognitionOutcome {
                    estimate: fixed_fallback(range),
                    provider_id: None,
                    stage: Stage::FixedFallback,
                }
            }
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatRequest, ChatResponse};
    use crate::routing::{
        AvailabilityChecker, Capability, ProviderConfig, RoutingTable, TaskRoute,
    };
    use crate::usage::{today_key, MemoryUsageStore, UsageStore};
    use crate::vision::{Detection, EstimationMethod};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Fails,
        NotImplemented,
        Detects(usize),
    }

    struct StubVision {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubVision {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderInvoker for StubVision {
        async fn chat(&self, _: &ProviderConfig, _: &ChatRequest) -> Result<ChatResponse, InvokeError> {
            Err(InvokeError::Provider("chat not supported".into()))
        }

        async fn recognize(
            &self,
            provider: &ProviderConfig,
            _: &VisionRequest,
        ) -> Result<VisionResponse, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fails => Err(InvokeError::Provider("connection reset".into())),
                Behavior::NotImplemented => Err(InvokeError::NotImplemented(provider.id.clone())),
                Behavior::Detects(n) => Ok(VisionResponse {
                    detections: (0..n).map(|_| Detection::new("pig", 0.9)).collect(),
                }),
            }
        }

        fn name(&self) -> &str {
            "stub-vision"
        }
    }

    fn pipeline(invoker: Arc<dyn ProviderInvoker>) -> (VisionPipeline, Arc<MemoryUsageStore>) {
        let registry = Arc::new(
            ModelRegistry::new(vec![
                ProviderConfig::new("baidu-vision", "Baidu", Capability::Vision).with_quota(500),
                ProviderConfig::new("tencent-vision", "Tencent", Capability::Vision)
                    .with_quota(1000),
            ])
            .unwrap(),
        );
        let table = RoutingTable::new(
            vec![TaskRoute::new(IMAGE_TASK, "baidu-vision", &["tencent-vision"], 1000)],
            &registry,
        )
        .unwrap();
        let store = Arc::new(MemoryUsageStore::new());
        let selector = ModelSelector::new(
            Arc::new(table),
            AvailabilityChecker::new(registry.clone(), store.clone()),
        );
        let pipeline = VisionPipeline::new(
            selector,
            registry,
            invoker,
            UsageRecorder::new(store.clone()),
            EstimatorConfig::default(),
        )
        .with_seed(11);
        (pipeline, store)
    }

    fn input(range: Option<ExpectedRange>) -> RecognitionInput {
        RecognitionInput {
            image_data: "aGVsbG8gcGlncw==".into(),
            location: Some("1号栏".into()),
            expected_range: range,
            priority: Priority::Balanced,
        }
    }

    #[tokio::test]
    async fn test_vendor_detections_used() {
        let (pipeline, store) = pipeline(StubVision::new(Behavior::Detects(10)));
        let outcome = pipeline.recognize(&input(None)).await;

        assert_eq!(outcome.stage, Stage::VendorVision);
        assert_eq!(outcome.model_id(), "baidu-vision");
        assert_eq!(outcome.estimate.estimation_method, EstimationMethod::VisionApi);
        assert_eq!(outcome.estimate.total_count, 15);

        let rec = store.get("baidu-vision", &today_key()).await.unwrap().unwrap();
        assert_eq!(rec.request_count, 1);
    }

    #[tokio::test]
    async fn test_failing_vendor_degrades_to_statistical() {
        let stub = StubVision::new(Behavior::Fails);
        let (pipeline, store) = pipeline(stub.clone());
        let outcome = pipeline.recognize(&input(Some(ExpectedRange::new(10, 500)))).await;

        assert_eq!(outcome.stage, Stage::StatisticalEstimate);
        assert_eq!(outcome.model_id(), FALLBACK_MODEL_ID);
        assert_eq!(
            outcome.estimate.estimation_method,
            EstimationMethod::IntelligentAlgorithm
        );
        assert!((10..=500).contains(&outcome.estimate.total_count));
        // Failures are not retried against the fallback vendor
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_not_implemented_without_alternate() {
        let (pipeline, _) = pipeline(StubVision::new(Behavior::NotImplemented));
        let outcome = pipeline.recognize(&input(None)).await;
        assert_eq!(outcome.stage, Stage::StatisticalEstimate);
    }

    #[tokio::test]
    async fn test_not_implemented_uses_alternate_on_next_provider() {
        let (pipeline, _) = pipeline(StubVision::new(Behavior::NotImplemented));
        let pipeline = pipeline.with_alternate(StubVision::new(Behavior::Detects(4)));
        let outcome = pipeline.recognize(&input(None)).await;

        assert_eq!(outcome.stage, Stage::AlternateVendorVision);
        assert_eq!(outcome.model_id(), "tencent-vision");
        assert_eq!(outcome.estimate.total_count, 10);
    }

    #[tokio::test]
    async fn test_invalid_range_reaches_fixed_fallback() {
        let (pipeline, _) = pipeline(StubVision::new(Behavior::Fails));
        let outcome = pipeline.recognize(&input(Some(ExpectedRange::new(40, 5)))).await;

        assert_eq!(outcome.stage, Stage::FixedFallback);
        assert_eq!(outcome.estimate.estimation_method, EstimationMethod::Fallback);
        assert_eq!(outcome.estimate.confidence, 50);
        assert_eq!(outcome.estimate.total_count, 22);
    }

    #[tokio::test]
    async fn test_extreme_ranges_never_panic() {
        let (pipeline, _) = pipeline(StubVision::new(Behavior::Fails));
        let cases = [
            (ExpectedRange::new(i64::MIN, -1), Stage::StatisticalEstimate),
            (ExpectedRange::new(i64::MIN, i64::MAX), Stage::StatisticalEstimate),
            (ExpectedRange::new(i64::MAX, i64::MAX - 1), Stage::FixedFallback),
        ];

        for (range, stage) in cases {
            let outcome = pipeline.recognize(&input(Some(range))).await;
            assert_eq!(outcome.stage, stage, "{range:?}");
            if stage == Stage::StatisticalEstimate {
                assert!(range.contains(outcome.estimate.total_count), "{range:?}");
            } else {
                assert_eq!(outcome.estimate.total_count, i64::MAX - 1);
            }
        }
    }

    #[tokio::test]
    async fn test_empty_image_skips_vendor() {
        let stub = StubVision::new(Behavior::Detects(3));
        let (pipeline, _) = pipeline(stub.clone());
        let mut req = input(None);
        req.image_data.clear();

        let outcome = pipeline.recognize(&req).await;
        assert_eq!(outcome.stage, Stage::StatisticalEstimate);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }
}
