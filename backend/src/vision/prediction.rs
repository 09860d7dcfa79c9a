use shared::{ClassLabel, PredictionResponse};

use super::labels::LabelMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("Expected {expected} logits, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("Model produced non-finite logits")]
    NonFinite,
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value. Ties go to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Probability as a percentage rounded to three decimals.
pub fn round_confidence(probability: f32) -> f64 {
    let percent = (probability as f64 * 100.0).clamp(0.0, 100.0);
    (percent * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: ClassLabel,
    pub probabilities: Vec<f32>,
    /// Winning probability in percent, three decimals.
    pub confidence: f64,
}

impl Prediction {
    pub fn from_logits(logits: &[f32], labels: &LabelMap) -> Result<Self, PredictionError> {
        if logits.len() != labels.len() {
            return Err(PredictionError::Length {
                expected: labels.len(),
                actual: logits.len(),
            });
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(PredictionError::NonFinite);
        }

        let probabilities = softmax(logits);
        let class_index = argmax(&probabilities).ok_or(PredictionError::Length {
            expected: labels.len(),
            actual: 0,
        })?;
        let label = labels.label(class_index).ok_or(PredictionError::Length {
            expected: labels.len(),
            actual: logits.len(),
        })?;

        Ok(Self {
            class_index,
            label,
            confidence: round_confidence(probabilities[class_index]),
            probabilities,
        })
    }

    pub fn is_ai_generated(&self) -> bool {
        self.label.is_ai_generated()
    }

    pub fn to_response(&self) -> PredictionResponse {
        PredictionResponse {
            is_ai_generated: self.is_ai_generated(),
            confidence: self.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one_and_survives_large_logits() {
        let probs = softmax(&[1000.0, 999.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs[0] > probs[1]);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn confidence_is_rounded_percentage() {
        assert_eq!(round_confidence(0.880797), 88.08);
        assert_eq!(round_confidence(0.5), 50.0);
        assert_eq!(round_confidence(1.0), 100.0);
        assert_eq!(round_confidence(0.123456), 12.346);
    }

    #[test]
    fn fake_logit_wins_means_ai_generated() {
        let prediction = Prediction::from_logits(&[2.0, 0.0], &LabelMap::default()).unwrap();
        assert_eq!(prediction.label, ClassLabel::Fake);
        assert!(prediction.is_ai_generated());
        assert_eq!(prediction.confidence, 88.08);

        let response = prediction.to_response();
        assert!(response.is_ai_generated);
        assert_eq!(response.confidence, 88.08);
    }

    #[test]
    fn label_map_decides_meaning_of_index() {
        let reversed = LabelMap::new(vec![ClassLabel::Real, ClassLabel::Fake]).unwrap();
        let prediction = Prediction::from_logits(&[2.0, 0.0], &reversed).unwrap();
        assert_eq!(prediction.label, ClassLabel::Real);
        assert!(!prediction.is_ai_generated());
    }

    #[test]
    fn rejects_bad_logits() {
        let labels = LabelMap::default();
        assert_eq!(
            Prediction::from_logits(&[1.0], &labels),
            Err(PredictionError::Length {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            Prediction::from_logits(&[f32::NAN, 0.0], &labels),
            Err(PredictionError::NonFinite)
        );
    }
}
