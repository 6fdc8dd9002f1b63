//! Request and result types exchanged with callers of the orchestrator

use serde::{Deserialize, Serialize};

use crate::error::PredictError;

/// One uploaded leaf photograph plus optional free-text notes.
///
/// Owned by the call that receives it and dropped when that call returns.
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    pub image: Vec<u8>,
    /// Carried for audit; not used by classification
    pub notes: Option<String>,
}

impl PredictionRequest {
    pub fn new(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: image.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PredictionStatus {
    Success,
    Error,
}

/// Outcome of one prediction, encoded to callers as
/// `{status, predictedClass, confidence, recommendation}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub status: PredictionStatus,
    pub predicted_class: String,
    /// Passed through from the inference routine without range checks
    pub confidence: f64,
    pub recommendation: String,
}

impl PredictionResult {
    pub fn success(
        predicted_class: impl Into<String>,
        confidence: f64,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            status: PredictionStatus::Success,
            predicted_class: predicted_class.into(),
            confidence,
            recommendation: recommendation.into(),
        }
    }

    /// Error result: empty class, zero confidence, diagnostic in `recommendation`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: PredictionStatus::Error,
            predicted_class: String::new(),
            confidence: 0.0,
            recommendation: message.into(),
        }
    }

    pub fn from_error(err: &PredictError) -> Self {
        let message = match err {
            PredictError::EmptyInput => "Please upload an image.".to_string(),
            other => format!("Failed to predict disease: {}", other),
        };
        Self::error(message)
    }

    pub fn is_success(&self) -> bool {
        self.status == PredictionStatus::Success
    }
}
