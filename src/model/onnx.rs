//! ONNX Runtime classifier. Input: [1, feature_dim] f32.
//!
//! Two output conventions are understood:
//! - `label` (int64 or float) followed by `probabilities` ([1, n_classes] f32),
//!   as exported by sklearn converters with `zipmap` disabled;
//! - a single anomaly score in [0, 1], thresholded into `anomaly` / `normal`.
//!
//! If the model file is missing, the scorer runs in no-op mode and every row is
//! reported as `unscored` with probability 0.0.

use super::{Prediction, Scorer, ScoringError, UNSCORED_CLASS};
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

pub struct OnnxScorer {
    session: Option<Mutex<Session>>,
    output_names: Vec<String>,
    feature_dim: usize,
    anomaly_threshold: f32,
}

impl OnnxScorer {
    /// Load model from path. A missing file yields a no-op scorer; a present
    /// but invalid file is an error.
    pub fn load(path: &Path, feature_dim: usize, anomaly_threshold: f32) -> Result<Self, ort::Error> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "ONNX model not found; rows will be stored unscored");
            return Ok(Self::disabled(feature_dim));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(path)?;

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        tracing::info!(
            path = %path.display(),
            feature_dim,
            outputs = ?output_names,
            "ONNX model loaded"
        );

        Ok(Self {
            session: Some(Mutex::new(session)),
            output_names,
            feature_dim,
            anomaly_threshold,
        })
    }

    pub fn disabled(feature_dim: usize) -> Self {
        Self {
            session: None,
            output_names: Vec::new(),
            feature_dim,
            anomaly_threshold: 0.5,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

impl Scorer for OnnxScorer {
    fn score(&self, features: &[f32]) -> Result<Prediction, ScoringError> {
        let Some(ref session) = self.session else {
            return Ok(Prediction {
                predicted_class: UNSCORED_CLASS.to_string(),
                probability: 0.0,
            });
        };
        if features.len() != self.feature_dim {
            return Err(ScoringError::Shape {
                expected: self.feature_dim,
                found: features.len(),
            });
        }

        let arr = Array2::from_shape_vec((1, self.feature_dim), features.to_vec())
            .map_err(|e| ScoringError::Inference(e.to_string()))?;
        let input = Value::from_array(arr).map_err(|e| ScoringError::Inference(e.to_string()))?;

        let mut session = session
            .lock()
            .map_err(|_| ScoringError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ScoringError::Inference(e.to_string()))?;

        match self.output_names.as_slice() {
            [] => Err(ScoringError::Output("model declares no outputs".to_string())),
            [score_name] => {
                let out = outputs
                    .get(score_name.as_str())
                    .ok_or_else(|| ScoringError::Output(format!("missing output {score_name}")))?;
                let (_, data) = out
                    .try_extract_tensor::<f32>()
                    .map_err(|e| ScoringError::Output(e.to_string()))?;
                let score = data
                    .first()
                    .copied()
                    .ok_or_else(|| ScoringError::Output("empty score tensor".to_string()))?;
                let class = if score >= self.anomaly_threshold {
                    "anomaly"
                } else {
                    "normal"
                };
                Prediction::checked(class.to_string(), f64::from(score))
            }
            [label_name, prob_name, ..] => {
                let label = outputs
                    .get(label_name.as_str())
                    .ok_or_else(|| ScoringError::Output(format!("missing output {label_name}")))?;
                let predicted_class = if let Ok((_, data)) = label.try_extract_tensor::<i64>() {
                    data.first().map(|v| v.to_string())
                } else if let Ok((_, data)) = label.try_extract_tensor::<f32>() {
                    data.first().map(|v| v.to_string())
                } else {
                    return Err(ScoringError::Output(
                        "label tensor is neither int64 nor float".to_string(),
                    ));
                }
                .ok_or_else(|| ScoringError::Output("empty label tensor".to_string()))?;

                let probs = outputs
                    .get(prob_name.as_str())
                    .ok_or_else(|| ScoringError::Output(format!("missing output {prob_name}")))?;
                let (_, data) = probs
                    .try_extract_tensor::<f32>()
                    .map_err(|e| ScoringError::Output(e.to_string()))?;
                let probability = data
                    .iter()
                    .copied()
                    .fold(None, |best: Option<f32>, p| Some(best.map_or(p, |b| b.max(p))))
                    .ok_or_else(|| ScoringError::Output("empty probability tensor".to_string()))?;
                Prediction::checked(predicted_class, f64::from(probability))
            }
        }
    }
}
