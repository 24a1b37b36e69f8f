//! Quality control scoring

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::types::QcStatus;

/// QC thresholds and weights
///
/// The score is `missing * missing_weight + substitutions * substitution_weight`.
/// Scores at or above `bad_threshold` are bad, at or above
/// `mediocre_threshold` mediocre, anything lower good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcConfig {
    pub missing_weight: f64,
    pub substitution_weight: f64,
    pub mediocre_threshold: f64,
    pub bad_threshold: f64,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            missing_weight: 1.0,
            substitution_weight: 1.0,
            mediocre_threshold: 30.0,
            bad_threshold: 100.0,
        }
    }
}

impl QcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_weight(mut self, weight: f64) -> Self {
        self.missing_weight = weight;
        self
    }

    pub fn with_substitution_weight(mut self, weight: f64) -> Self {
        self.substitution_weight = weight;
        self
    }

    pub fn with_thresholds(mut self, mediocre: f64, bad: f64) -> Self {
        self.mediocre_threshold = mediocre;
        self.bad_threshold = bad;
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let values = [
            self.missing_weight,
            self.substitution_weight,
            self.mediocre_threshold,
            self.bad_threshold,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AnalysisError::QcConfig(
                "weights and thresholds must be finite and non-negative".into(),
            ));
        }
        if self.mediocre_threshold > self.bad_threshold {
            return Err(AnalysisError::QcConfig(format!(
                "mediocre threshold {} exceeds bad threshold {}",
                self.mediocre_threshold, self.bad_threshold
            )));
        }
        Ok(())
    }

    pub fn score(&self, missing: usize, substitutions: usize) -> f64 {
        missing as f64 * self.missing_weight + substitutions as f64 * self.substitution_weight
    }

    pub fn status(&self, score: f64) -> QcStatus {
        if score >= self.bad_threshold {
            QcStatus::Bad
        } else if score >= self.mediocre_threshold {
            QcStatus::Mediocre
        } else {
            QcStatus::Good
        }
    }
}
