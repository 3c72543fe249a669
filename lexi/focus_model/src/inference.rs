//! Request validation, classification and focus ranking over a loaded bundle.

use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    bundle::ArtifactBundle,
    error::{TrainingError, ValidationError},
    features::{FeatureVector, FEATURE_NAMES},
    focus::{rank_focus_areas, round_to, FocusArea},
    telemetry::{log, FocusTelemetry},
};

/// Answer to one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Decoded class label.
    pub predicted_difficulty: String,
    /// Probability per class label (4 decimals), `null` without the capability.
    pub probabilities: Option<IndexMap<String, f64>>,
    /// Three domains, weakest first.
    pub focus_areas: Vec<FocusArea>,
    /// The ten raw inputs in canonical order.
    pub assessment_scores: IndexMap<String, f64>,
}

/// Errors surfaced to a caller of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The request was rejected before any computation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The bundle could not serve the request.
    #[error(transparent)]
    Model(#[from] TrainingError),
}

/// Stateless predictor over a shared, read-only bundle.
#[derive(Debug, Clone)]
pub struct InferencePipeline {
    bundle: Arc<ArtifactBundle>,
    telemetry: Option<FocusTelemetry>,
}

impl InferencePipeline {
    /// Wraps a loaded bundle.
    #[must_use]
    pub const fn new(bundle: Arc<ArtifactBundle>) -> Self {
        Self {
            bundle,
            telemetry: None,
        }
    }

    /// Attaches telemetry for rejected requests.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: FocusTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Bundle in use.
    #[must_use]
    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    /// Validates a JSON request, then predicts.
    pub fn predict(&self, request: &Value) -> Result<PredictionResponse, InferenceError> {
        let features = FeatureVector::from_json(request).map_err(|err| {
            log(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "inference.rejected",
                json!({ "reason": err.to_string(), "field": err.field() }),
            );
            err
        })?;
        Ok(self.predict_features(&features)?)
    }

    /// Scales, classifies and ranks an already validated vector.
    pub fn predict_features(
        &self,
        features: &FeatureVector,
    ) -> Result<PredictionResponse, TrainingError> {
        let bundle = &*self.bundle;
        let scaled = bundle.scaler.transform_vector(features)?;
        let row = ArrayView1::from(&scaled[..]);
        let label = bundle.model.predict_label(row);
        let predicted_difficulty = bundle
            .codec
            .decode(label)
            .ok_or_else(|| TrainingError::UnknownLabel(format!("class index {label}")))?
            .to_string();
        let probabilities = bundle.model.predict_probabilities(row).map(|distribution| {
            bundle
                .codec
                .classes()
                .iter()
                .cloned()
                .zip(distribution.into_iter().map(|value| round_to(value, 4)))
                .collect()
        });
        let focus_areas = rank_focus_areas(features).areas();
        let assessment_scores = FEATURE_NAMES
            .iter()
            .zip(features.as_array())
            .map(|(name, value)| ((*name).to_string(), value))
            .collect();
        Ok(PredictionResponse {
            predicted_difficulty,
            probabilities,
            focus_areas,
            assessment_scores,
        })
    }
}
