//! JSON-lines serving loop over any async reader/writer pair.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    inference::InferencePipeline,
    telemetry::{log, FocusTelemetry},
};

/// Commands accepted on the serving loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServeCommand {
    /// Classify one assessment.
    Predict {
        /// Raw request object, validated by the pipeline.
        features: Value,
    },
    /// Report the loaded model.
    Health,
    /// Exit the loop.
    Quit,
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Successful predictions.
    pub predictions: usize,
    /// Lines answered with an error.
    pub errors: usize,
}

/// Answers JSON-lines commands with one JSON line each.
#[derive(Debug, Clone)]
pub struct ConsoleServer {
    pipeline: InferencePipeline,
    telemetry: Option<FocusTelemetry>,
}

impl ConsoleServer {
    /// Creates a server around a ready pipeline.
    #[must_use]
    pub const fn new(pipeline: InferencePipeline, telemetry: Option<FocusTelemetry>) -> Self {
        Self {
            pipeline,
            telemetry,
        }
    }

    /// Serves stdin/stdout until `quit` or end of input.
    pub async fn run_stdio(&self) -> Result<ServeStats> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Serves `reader` into `writer` until `quit` or end of input.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<ServeStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = ServeStats::default();
        while let Some(line) = lines.next_line().await.context("reading command")? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<ServeCommand>(&line) {
                Ok(ServeCommand::Quit) => break,
                Ok(ServeCommand::Health) => self.health(),
                Ok(ServeCommand::Predict { features }) => match self.pipeline.predict(&features) {
                    Ok(prediction) => {
                        stats.predictions += 1;
                        serde_json::to_value(prediction)?
                    }
                    Err(err) => {
                        stats.errors += 1;
                        json!({ "error": err.to_string() })
                    }
                },
                Err(err) => {
                    stats.errors += 1;
                    json!({ "error": format!("invalid command: {err}") })
                }
            };
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await.context("writing response")?;
            writer.flush().await?;
        }
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "serving.shutdown",
            json!({ "predictions": stats.predictions, "errors": stats.errors }),
        );
        Ok(stats)
    }

    fn health(&self) -> Value {
        let bundle = self.pipeline.bundle();
        json!({
            "status": "ok",
            "model": bundle.model.name,
            "classes": bundle.codec.classes(),
            "bundle_id": bundle.bundle_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bundle::ArtifactBundle,
        codec::LabelCodec,
        features::{features_to_matrix, FeatureVector, FEATURE_COUNT},
        models::{Algorithm, CandidateSpec, KnnParams},
        scaler::StandardScaler,
    };
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn server() -> ConsoleServer {
        let features: Vec<FeatureVector> = [20.0, 25.0, 30.0, 70.0, 75.0, 80.0]
            .iter()
            .map(|value| FeatureVector::from_array([*value; FEATURE_COUNT]))
            .collect();
        let labels = ["Hard", "Hard", "Hard", "Easy", "Easy", "Easy"];
        let codec = LabelCodec::fit(&labels);
        let y = codec.encode_all(&labels).unwrap();
        let x = features_to_matrix(&features);
        let scaler = StandardScaler::fit(&x).unwrap();
        let knn = Algorithm::KNearestNeighbors(KnnParams::default());
        let model = CandidateSpec::new("K-Nearest Neighbors", knn)
            .fit(&scaler.transform(&x).unwrap(), &y, 2)
            .unwrap();
        let bundle = Arc::new(ArtifactBundle::new(model, scaler, codec));
        ConsoleServer::new(InferencePipeline::new(bundle), None)
    }

    fn serve(input: &str) -> (ServeStats, Vec<Value>) {
        let runtime = Runtime::new().unwrap();
        let mut output = Vec::new();
        let stats = runtime
            .block_on(server().run(input.as_bytes(), &mut output))
            .unwrap();
        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (stats, lines)
    }

    #[test]
    fn answers_predict_and_health_then_quits() {
        let features = json!({
            "age": 22, "reading_speed": 22, "reading_accuracy": 22, "reading_comprehension": 22,
            "writing_speed": 22, "writing_quality": 22, "grammar_sentence": 22,
            "phonetic_spelling": 22, "irregular_word_spelling": 22, "spelling_accuracy": 22
        });
        let input = format!(
            "{}\n\n{}\n{}\n{}\n",
            json!({ "type": "predict", "features": features }),
            json!({ "type": "health" }),
            json!({ "type": "quit" }),
            json!({ "type": "health" }),
        );
        let (stats, lines) = serve(&input);
        assert_eq!(stats, ServeStats { predictions: 1, errors: 0 });
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["predicted_difficulty"], "Hard");
        assert_eq!(lines[1]["status"], "ok");
        assert_eq!(lines[1]["model"], "K-Nearest Neighbors");
        assert_eq!(lines[1]["classes"], json!(["Easy", "Hard"]));
    }

    #[test]
    fn errors_are_reported_and_the_loop_continues() {
        let input = format!(
            "{}\nnot json\n{}\n",
            json!({ "type": "predict", "features": { "age": 9 } }),
            json!({ "type": "health" }),
        );
        let (stats, lines) = serve(&input);
        assert_eq!(stats.errors, 2);
        assert_eq!(lines.len(), 3);
        assert!(lines[0]["error"].as_str().unwrap().contains("reading_speed"));
        assert!(lines[1]["error"].as_str().unwrap().starts_with("invalid command"));
        assert_eq!(lines[2]["status"], "ok");
    }
}
