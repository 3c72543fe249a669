#![deny(clippy::all, clippy::pedantic, clippy::nursery, rust_2018_idioms)]
#![warn(missing_docs)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Lexi focus model: trains difficulty-level classifiers on ten assessment
//! scores, keeps the best one as an artefact bundle, and serves predictions
//! with ranked focus areas.

/// Persisted model, scaler and codec.
pub mod bundle;
/// Label codec.
pub mod codec;
/// TOML training configuration.
pub mod config;
/// CSV dataset loading.
pub mod dataset;
/// Typed errors.
pub mod error;
/// The ten assessment features.
pub mod features;
/// Focus-area ranking.
pub mod focus;
/// Request → response pipeline.
pub mod inference;
/// Confusion-matrix metrics.
pub mod metrics;
/// Candidate classifier families.
pub mod models;
/// Training reports.
pub mod report;
/// Standardisation.
pub mod scaler;
/// Best-candidate selection.
pub mod selection;
/// JSON-lines serving loop.
pub mod serving;
/// Stratified split and folds.
pub mod split;
/// Telemetry handle.
pub mod telemetry;
/// Training orchestration.
pub mod training;

pub use bundle::{ArtifactBundle, BundleMember, BUNDLE_FORMAT_VERSION};
pub use codec::LabelCodec;
pub use config::{TrainingConfig, DEFAULT_FIT_GAP_THRESHOLD};
pub use dataset::{ClassShare, Dataset, DEFAULT_LABEL_COLUMN};
pub use error::{BundleLoadError, DataSchemaError, DatasetError, TrainingError, ValidationError};
pub use features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use focus::{rank_focus_areas, FocusArea, FocusAreaRanking, FocusDomain};
pub use inference::{InferenceError, InferencePipeline, PredictionResponse};
pub use metrics::{evaluate, ConfusionMatrix, EvaluationResult};
pub use models::{default_candidates, CandidateSpec, Classifier, FittedModel};
pub use report::{CandidateReport, TrainingReport};
pub use scaler::StandardScaler;
pub use selection::{select_best, SelectionMetric};
pub use serving::{ConsoleServer, ServeCommand, ServeStats};
pub use split::{stratified_train_test_split, StratifiedKFold, TrainTestSplit};
pub use telemetry::{FocusTelemetry, FocusTelemetryBuilder};
pub use training::{
    CrossValidationResult, FitDiagnostic, TrainingOrchestrator, TrainingOutcome, TrainingPipeline,
};
