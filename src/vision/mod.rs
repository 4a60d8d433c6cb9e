//! Head-count estimation for the image recognition task
//!
//! The pipeline degrades through four strategies and always produces a
//! well-formed [`CountEstimate`]:
//!
//! 1. vendor vision call, counted from relevant detections
//! 2. alternate vendor (framework only; without a protocol implementation it
//!    hands straight to the statistical estimate)
//! 3. statistical estimate from the expected range and location
//! 4. fixed midpoint of the expected range
//!
//! `estimation_method` on the result records which strategy produced it.

mod detection;
mod estimator;
mod pipeline;

pub use detection::{estimate_from_detections, relevant_detections};
pub use estimator::{fixed_fallback, StatisticalEstimator};
pub use pipeline::{
    RecognitionInput, RecognitionOutcome, Stage, VisionPipeline, FALLBACK_MODEL_ID, IMAGE_TASK,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest and highest confidence an estimate may report
pub const MIN_CONFIDENCE: u8 = 50;
pub const MAX_CONFIDENCE: u8 = 95;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    #[error("Invalid expected range: min {min}, max {max}")]
    InvalidRange { min: i64, max: i64 },

    #[error("Image payload is empty")]
    EmptyImage,
}

/// Caller's expectation of how many animals are in frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: i64,
    pub max: i64,
}

impl Default for ExpectedRange {
    fn default() -> Self {
        Self { min: 10, max: 500 }
    }
}

impl ExpectedRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Any `min <= max` is accepted, negative bounds included
    pub fn validate(&self) -> Result<(), EstimationError> {
        if self.min > self.max {
            return Err(EstimationError::InvalidRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Assumes a validated range
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.min, self.max)
    }

    /// Midpoint floored at zero. Defined for any bounds, malformed included.
    pub fn midpoint(&self) -> i64 {
        let mid = (i128::from(self.min) + i128::from(self.max)) / 2;
        // 0..=i64::MAX after the floor
        mid.max(0) as i64
    }

    /// `max - min` without overflow
    pub fn span(&self) -> f64 {
        (i128::from(self.max) - i128::from(self.min)) as f64
    }
}

/// Provenance of an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimationMethod {
    #[serde(rename = "vision-api")]
    VisionApi,
    #[serde(rename = "detection-based")]
    DetectionBased,
    #[serde(rename = "intelligent-algorithm")]
    IntelligentAlgorithm,
    #[serde(rename = "fallback")]
    Fallback,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::VisionApi => "vision-api",
            EstimationMethod::DetectionBased => "detection-based",
            EstimationMethod::IntelligentAlgorithm => "intelligent-algorithm",
            EstimationMethod::Fallback => "fallback",
        }
    }

    /// Whether a real vision provider answered
    pub fn is_vendor(&self) -> bool {
        matches!(
            self,
            EstimationMethod::VisionApi | EstimationMethod::DetectionBased
        )
    }
}

impl std::fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized box, all values in `0.0..=1.0` of the image size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// `index`-th of `total` vertical strips across the frame
    pub fn strip(index: usize, total: usize) -> Self {
        let total = total.max(1) as f32;
        Self {
            left: index as f32 / total,
            top: 0.0,
            width: 1.0 / total,
            height: 1.0,
        }
    }
}

/// One labelled object reported by a vision provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Provider confidence, `0.0..=1.0`
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
            bbox: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub estimated_count: i64,
    pub confidence: u8,
    pub position: BoundingBox,
}

/// Placeholder anomaly flags; see [`StatisticalEstimator`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalDetection {
    pub suspicious_animals: i64,
    pub health_concerns: Vec<String>,
}

/// Result of the vision pipeline. Built per request, never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountEstimate {
    pub total_count: i64,
    pub confidence: u8,
    pub regions: Vec<Region>,
    pub abnormal_detection: AbnormalDetection,
    pub estimation_method: EstimationMethod,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Location keyword and the density factor it implies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMultiplier {
    pub keyword: String,
    pub factor: f64,
}

impl LocationMultiplier {
    pub fn new(keyword: impl Into<String>, factor: f64) -> Self {
        Self {
            keyword: keyword.into(),
            factor,
        }
    }
}

/// Tunables for detection filtering and statistical estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Used when the caller sends no expected range
    pub default_range: ExpectedRange,

    /// Detection labels counted as animals (case-insensitive substring)
    pub keywords: Vec<String>,

    /// Detections at or below this score are ignored
    pub min_detection_score: f32,

    /// Applied multiplicatively for every keyword found in the location
    pub location_multipliers: Vec<LocationMultiplier>,

    /// Image payload size (bytes of encoded data) treated as a complex scene
    pub complex_image_bytes: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            default_range: ExpectedRange::default(),
            keywords: [
                "pig", "hog", "swine", "boar", "sow", "piglet", "livestock", "animal", "mammal",
                "猪", "牲畜", "动物",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_detection_score: 0.3,
            location_multipliers: vec![
                LocationMultiplier::new("号栏", 1.2),
                LocationMultiplier::new("高密度", 1.2),
                LocationMultiplier::new("出栏", 1.1),
                LocationMultiplier::new("隔离", 0.8),
            ],
            complex_image_bytes: 200_000,
        }
    }
}

impl EstimatorConfig {
    /// Product of all multipliers whose keyword appears in `location`
    pub fn location_factor(&self, location: Option<&str>) -> f64 {
        let Some(location) = location else {
            return 1.0;
        };
        self.location_multipliers
            .iter()
            .filter(|m| location.contains(&m.keyword))
            .map(|m| m.factor)
            .product()
    }

    pub fn is_relevant_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.keywords
            .iter()
            .any(|k| label.contains(&k.to_lowercase()))
    }
}

pub(crate) fn clamp_confidence(value: f64) -> u8 {
    value
        .round()
        .clamp(f64::from(MIN_CONFIDENCE), f64::from(MAX_CONFIDENCE)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(ExpectedRange::new(10, 500).validate().is_ok());
        assert!(ExpectedRange::new(7, 7).validate().is_ok());
        assert!(ExpectedRange::new(500, 10).validate().is_err());
        assert!(ExpectedRange::new(-10, 10).validate().is_ok());
    }

    #[test]
    fn test_midpoint_at_extreme_bounds() {
        assert_eq!(ExpectedRange::new(10, 500).midpoint(), 255);
        assert_eq!(ExpectedRange::new(i64::MIN, -1).midpoint(), 0);
        assert_eq!(
            ExpectedRange::new(i64::MAX, i64::MAX - 1).midpoint(),
            i64::MAX - 1
        );
        assert_eq!(ExpectedRange::new(i64::MIN, i64::MAX).midpoint(), 0);
    }

    #[test]
    fn test_span_does_not_overflow() {
        let span = ExpectedRange::new(i64::MIN, i64::MAX).span();
        assert!(span > 1.8e19);
        assert_eq!(ExpectedRange::new(10, 500).span(), 490.0);
    }

    #[test]
    fn test_location_factor_combines() {
        let config = EstimatorConfig::default();
        let factor = config.location_factor(Some("1号栏出栏区域"));
        assert!((factor - 1.32).abs() < 1e-9);
        assert_eq!(config.location_factor(Some("办公室")), 1.0);
        assert_eq!(config.location_factor(None), 1.0);
    }

    #[test]
    fn test_relevant_label_is_case_insensitive() {
        let config = EstimatorConfig::default();
        assert!(config.is_relevant_label("Domestic PIG"));
        assert!(config.is_relevant_label("小猪"));
        assert!(!config.is_relevant_label("fence"));
    }

    #[test]
    fn test_method_serialization() {
        let value = serde_json::to_value(EstimationMethod::IntelligentAlgorithm).unwrap();
        assert_eq!(value, "intelligent-algorithm");
        assert!(EstimationMethod::DetectionBased.is_vendor());
        assert!(!EstimationMethod::Fallback.is_vendor());
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(12.0), MIN_CONFIDENCE);
        assert_eq!(clamp_confidence(99.6), MAX_CONFIDENCE);
        assert_eq!(clamp_confidence(72.4), 72);
    }
}
