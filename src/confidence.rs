//! Confidence arithmetic shared by rules, stages and graphs.
//!
//! Every confidence that crosses a module boundary is a finite `f64`
//! clamped to `[0.0, 1.0]`. Aggregation is always a weighted mean so the
//! caller decides how much each contribution matters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Minimum valid confidence value.
pub const MIN_CONFIDENCE: f64 = 0.0;

/// Maximum valid confidence value.
pub const MAX_CONFIDENCE: f64 = 1.0;

/// Clamps a raw score into `[0.0, 1.0]`. NaN maps to `0.0`.
#[must_use]
pub fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_CONFIDENCE;
    }
    value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Checks that a caller-supplied confidence is already in range.
///
/// # Errors
///
/// Returns `ValidationError::ConfidenceOutOfRange` if the value is NaN or outside [0.0, 1.0].
pub fn validate(value: f64) -> Result<f64, ValidationError> {
    if value.is_nan() || !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange { value });
    }
    Ok(value)
}

/// Weighted mean of `(confidence, weight)` pairs.
///
/// Returns `None` when the total weight is zero. Negative or non-finite
/// weights contribute nothing.
#[must_use]
pub fn weighted_mean<I>(items: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut weighted_sum = 0.0f64;
    let mut total_weight = 0.0f64;
    for (confidence, weight) in items {
        if !weight.is_finite() || weight <= 0.0 {
            continue;
        }
        weighted_sum += clamp(confidence) * weight;
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        None
    } else {
        Some(clamp(weighted_sum / total_weight))
    }
}

/// Coarse interpretation of a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// Below 0.5.
    Low,
    /// In [0.5, 0.8).
    Medium,
    /// 0.8 and above.
    High,
}

impl ConfidenceLevel {
    /// Buckets a confidence value.
    #[must_use]
    pub fn from_value(value: f64) -> Self {
        let v = clamp(value);
        if v >= 0.8 {
            Self::High
        } else if v >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Distribution summary of a set of confidence values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl ConfidenceSummary {
    /// Summarizes the given values. An empty input yields all zeros.
    #[must_use]
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            let v = clamp(v);
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return Self::default();
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / count as f64;
        Self {
            mean: clamp(mean),
            min,
            max,
            count,
        }
    }
}
