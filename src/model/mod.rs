//! Classifier boundary. The model is opaque: one aligned vector in,
//! a class label and its probability out.

mod onnx;

pub use onnx::OnnxScorer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class reported when no model is loaded.
pub const UNSCORED_CLASS: &str = "unscored";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_class: String,
    /// Probability of `predicted_class`, in [0, 1]
    pub probability: f64,
}

/// Per-row scoring failure. Never fatal to a batch.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model expects {expected} features, got {found}")]
    Shape { expected: usize, found: usize },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model output unusable: {0}")]
    Output(String),
    #[error("probability {0} outside [0, 1]")]
    Probability(f64),
}

pub trait Scorer: Send + Sync {
    fn score(&self, features: &[f32]) -> Result<Prediction, ScoringError>;
}

impl Prediction {
    /// Reject probabilities a well-behaved classifier cannot produce.
    pub fn checked(predicted_class: String, probability: f64) -> Result<Self, ScoringError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ScoringError::Probability(probability));
        }
        Ok(Self {
            predicted_class,
            probability,
        })
    }
}
