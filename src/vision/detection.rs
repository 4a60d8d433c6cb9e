//! Counting from vendor detections

use super::estimator::{abnormal_heuristic, StatisticalEstimator};
use super::{
    clamp_confidence, BoundingBox, CountEstimate, Detection, EstimationError, EstimationMethod,
    EstimatorConfig, ExpectedRange, Region,
};
use rand::Rng;

/// Not every animal is visible to the detector; matched objects are scaled
/// up by this before clamping.
const OCCLUSION_FACTOR: f64 = 1.5;

/// Confidence floor when the vendor answered but nothing matched
const UNMATCHED_CONFIDENCE_FLOOR: u8 = 60;

/// Detections above the score floor whose label names an animal
pub fn relevant_detections<'a>(
    detections: &'a [Detection],
    config: &EstimatorConfig,
) -> Vec<&'a Detection> {
    detections
        .iter()
        .filter(|d| d.score > config.min_detection_score && config.is_relevant_label(&d.label))
        .collect()
}

/// Turn a vendor answer into an estimate.
///
/// With no relevant detections the count falls back to the statistical draw
/// with confidence raised to at least 60, marked `detection-based`.
pub fn estimate_from_detections<R: Rng + ?Sized>(
    detections: &[Detection],
    range: ExpectedRange,
    location: Option<&str>,
    image_len: usize,
    config: &EstimatorConfig,
    rng: &mut R,
) -> Result<CountEstimate, EstimationError> {
    range.validate()?;
    let matched = relevant_detections(detections, config);

    if matched.is_empty() {
        let mut estimate =
            StatisticalEstimator::new(config).estimate(range, location, image_len, rng)?;
        estimate.confidence = estimate.confidence.max(UNMATCHED_CONFIDENCE_FLOOR);
        for region in &mut estimate.regions {
            region.confidence = estimate.confidence;
        }
        estimate.estimation_method = EstimationMethod::DetectionBased;
        estimate.suggestions = vec!["未检测到明确的猪只目标，建议调整拍摄角度后重试".to_string()];
        return Ok(estimate);
    }

    let seen = matched.len() as i64;
    let scaled = (seen as f64 * OCCLUSION_FACTOR).floor() as i64;
    let count = range.clamp(seen.max(scaled));

    let mean_score =
        matched.iter().map(|d| f64::from(d.score)).sum::<f64>() / matched.len() as f64;
    let confidence = clamp_confidence(mean_score * 100.0);

    let per_detection = (count + seen - 1) / seen;
    let regions = matched
        .iter()
        .enumerate()
        .map(|(i, d)| Region {
            id: format!("detection_{}", i + 1),
            estimated_count: per_detection,
            confidence: clamp_confidence(f64::from(d.score) * 100.0),
            position: d.bbox.unwrap_or_else(|| BoundingBox::strip(i, matched.len())),
        })
        .collect();

    Ok(CountEstimate {
        total_count: count,
        confidence,
        regions,
        abnormal_detection: abnormal_heuristic(count, confidence, rng),
        estimation_method: EstimationMethod::VisionApi,
        suggestions: vec!["识别结果基于视觉检测，遮挡个体已按比例估算".to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pig(score: f32) -> Detection {
        Detection::new("pig", score)
    }

    #[test]
    fn test_filters_low_score_and_unrelated_labels() {
        let config = EstimatorConfig::default();
        let detections = vec![
            pig(0.9),
            pig(0.2),
            Detection::new("fence", 0.99),
            Detection::new("Animal", 0.5),
        ];
        let matched = relevant_detections(&detections, &config);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_count_scales_matched_detections() {
        let config = EstimatorConfig::default();
        let detections: Vec<_> = (0..20).map(|_| pig(0.8)).collect();
        let est = estimate_from_detections(
            &detections,
            ExpectedRange::new(10, 500),
            None,
            0,
            &config,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();

        assert_eq!(est.total_count, 30);
        assert_eq!(est.confidence, 80);
        assert_eq!(est.regions.len(), 20);
        assert_eq!(est.estimation_method, EstimationMethod::VisionApi);
    }

    #[test]
    fn test_count_clamped_to_range() {
        let config = EstimatorConfig::default();
        let detections: Vec<_> = (0..20).map(|_| pig(0.99)).collect();
        let est = estimate_from_detections(
            &detections,
            ExpectedRange::new(0, 25),
            None,
            0,
            &config,
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();

        assert_eq!(est.total_count, 25);
        assert_eq!(est.confidence, 95);
    }

    #[test]
    fn test_no_match_is_detection_based() {
        let config = EstimatorConfig::default();
        let detections = vec![Detection::new("tractor", 0.9)];
        for seed in 0..50 {
            let est = estimate_from_detections(
                &detections,
                ExpectedRange::new(10, 500),
                Some("1号栏"),
                0,
                &config,
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap();
            assert_eq!(est.estimation_method, EstimationMethod::DetectionBased);
            assert!((60..=95).contains(&est.confidence));
            assert!((10..=500).contains(&est.total_count));
        }
    }
}
