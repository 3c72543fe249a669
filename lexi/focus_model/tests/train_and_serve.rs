use std::{fmt::Write as _, fs, sync::Arc};

use lexi_focus_model::{
    ArtifactBundle, BundleLoadError, FocusTelemetry, InferencePipeline, TrainingConfig,
    TrainingPipeline, TrainingReport, FEATURE_NAMES,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use shared_logging::MemoryLogger;
use tempfile::tempdir;

fn synthetic_csv(n_per_class: usize) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut csv = format!("student_id,{},difficulty_level\n", FEATURE_NAMES.join(","));
    let mut id = 0;
    for (label, base) in [("Easy", 82.0), ("Medium", 58.0), ("Hard", 32.0)] {
        for _ in 0..n_per_class {
            id += 1;
            let age: f64 = rng.gen_range(7.0..13.0);
            write!(csv, "S{id:03},{age:.1}").unwrap();
            for _ in 1..FEATURE_NAMES.len() {
                let score: f64 = base + rng.gen_range(-9.0..9.0);
                write!(csv, ",{score:.1}").unwrap();
            }
            writeln!(csv, ",{label}").unwrap();
        }
    }
    csv
}

#[test]
fn trained_bundle_serves_predictions_after_reload() {
    let tmp = tempdir().unwrap();
    let data_path = tmp.path().join("assessments.csv");
    fs::write(&data_path, synthetic_csv(30)).unwrap();

    let memory = Arc::new(MemoryLogger::new());
    let telemetry = FocusTelemetry::builder("focus_model")
        .sink(memory.clone())
        .build()
        .unwrap();
    let training =
        TrainingPipeline::new(TrainingConfig::default()).with_telemetry(telemetry.clone());
    let outcome = training.run_csv(&data_path).unwrap();
    assert_eq!(outcome.report.candidates.len(), 5);
    assert_eq!(outcome.report.classes, ["Easy", "Hard", "Medium"]);
    let best_f1 = outcome
        .report
        .candidates
        .iter()
        .map(|candidate| candidate.test.weighted_f1)
        .fold(f64::NEG_INFINITY, f64::max);
    let selected = outcome
        .report
        .candidates
        .iter()
        .find(|candidate| candidate.name == outcome.report.selected)
        .unwrap();
    assert_eq!(selected.test.weighted_f1, best_f1);
    assert!(selected.test.accuracy > 0.8);

    let bundle_dir = tmp.path().join("bundle");
    training.persist(&outcome, &bundle_dir).unwrap();
    let report = TrainingReport::load(bundle_dir.join(TrainingReport::FILE_NAME)).unwrap();
    assert_eq!(report.bundle_id, outcome.bundle.bundle_id);

    let bundle = Arc::new(ArtifactBundle::load(&bundle_dir).unwrap());
    assert_eq!(*bundle, outcome.bundle);
    let pipeline = InferencePipeline::new(Arc::clone(&bundle)).with_telemetry(telemetry);

    let response = pipeline
        .predict(&json!({
            "age": 10,
            "reading_speed": 60, "reading_accuracy": 55, "reading_comprehension": 65,
            "writing_speed": 58, "writing_quality": 62, "grammar_sentence": 60,
            "phonetic_spelling": 25, "irregular_word_spelling": 20, "spelling_accuracy": 30
        }))
        .unwrap();
    assert!(bundle
        .codec
        .classes()
        .contains(&response.predicted_difficulty));
    assert_eq!(response.focus_areas[0].name, "Spelling");
    assert_eq!(response.focus_areas[0].score, 25.0);
    if let Some(probabilities) = &response.probabilities {
        assert_eq!(probabilities.len(), 3);
        assert!((probabilities.values().sum::<f64>() - 1.0).abs() < 1e-3);
    }

    let easy = pipeline
        .predict(&json!({
            "age": 9,
            "reading_speed": 84, "reading_accuracy": 80, "reading_comprehension": 83,
            "writing_speed": 81, "writing_quality": 85, "grammar_sentence": 79,
            "phonetic_spelling": 82, "irregular_word_spelling": 84, "spelling_accuracy": 80
        }))
        .unwrap();
    assert_eq!(easy.predicted_difficulty, "Easy");

    assert!(pipeline.predict(&json!({ "age": 9 })).is_err());
    assert_eq!(memory.find("inference.rejected").len(), 1);
    assert_eq!(memory.find("training.selected").len(), 1);
    assert_eq!(memory.find("bundle.persisted").len(), 1);
}

#[test]
fn missing_columns_are_named_before_training() {
    let tmp = tempdir().unwrap();
    let data_path = tmp.path().join("broken.csv");
    fs::write(&data_path, "age,reading_speed,difficulty_level\n9,50,Easy\n").unwrap();
    let err = TrainingPipeline::default().run_csv(&data_path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("reading_accuracy"));
    assert!(message.contains("spelling_accuracy"));
}

#[test]
fn empty_bundle_directory_fails_to_load() {
    let tmp = tempdir().unwrap();
    assert!(matches!(
        ArtifactBundle::load(tmp.path()),
        Err(BundleLoadError::MissingMember { member: "model", .. })
    ));
}
