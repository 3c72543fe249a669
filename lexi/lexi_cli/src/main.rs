use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Parser, Subcommand};
use lexi_focus_model::{
    ArtifactBundle, ConsoleServer, FocusTelemetry, InferencePipeline, TrainingConfig,
    TrainingPipeline, TrainingReport,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::{ConsoleLogger, JsonLogger, LogLevel, LogRecord};
use tokio::runtime::Runtime;
use uuid::Uuid;

const DEFAULT_MANIFEST: &str = "runs/index.jsonl";
const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Parser, Debug)]
#[command(name = "lexi", version, about = "Lexi difficulty model trainer and server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains every candidate and writes the winning bundle.
    Train(TrainArgs),
    /// Lists the most recent training runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows one training run.
    Status {
        run_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Classifies one assessment read from a file, an argument or stdin.
    Predict {
        #[arg(long)]
        bundle: PathBuf,
        /// JSON file holding the request object.
        #[arg(long, conflicts_with = "json")]
        input: Option<PathBuf>,
        /// Inline request object.
        #[arg(long)]
        json: Option<String>,
    },
    /// Prints what a bundle contains.
    Inspect {
        #[arg(long)]
        bundle: PathBuf,
    },
    /// Serves JSON-lines commands on stdin/stdout.
    Serve {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long, default_value = DEFAULT_LOG_DIR)]
        log_dir: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Headered CSV with the ten assessment columns and a label column.
    #[arg(long)]
    data: PathBuf,
    /// Optional TOML training configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bundle output directory.
    #[arg(long, default_value = "artifacts/latest")]
    out: PathBuf,
    /// Train candidates concurrently.
    #[arg(long)]
    parallel: bool,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct RunManifestEntry {
    run_id: String,
    submitted_at: DateTime<Utc>,
    dataset: PathBuf,
    config: Option<PathBuf>,
    output_dir: PathBuf,
    log_path: PathBuf,
    status: String,
    #[serde(default)]
    selected_model: Option<String>,
}

impl RunManifestEntry {
    fn new(args: &TrainArgs, log_path: PathBuf) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            dataset: args.data.clone(),
            config: args.config.clone(),
            output_dir: args.out.clone(),
            log_path,
            status: "queued".into(),
            selected_model: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => handle_train(&args),
        Commands::List { limit, manifest } => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {} | {}",
                    entry.run_id,
                    entry.status,
                    entry.submitted_at,
                    entry.dataset.display(),
                    entry.selected_model.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Status { run_id, manifest } => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.run_id == run_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("run {run_id} not found");
            }
            Ok(())
        }
        Commands::Predict {
            bundle,
            input,
            json,
        } => handle_predict(&bundle, input.as_deref(), json.as_deref()),
        Commands::Inspect { bundle } => handle_inspect(&bundle),
        Commands::Serve { bundle, log_dir } => handle_serve(&bundle, &log_dir),
    }
}

fn handle_train(args: &TrainArgs) -> Result<()> {
    anyhow::ensure!(args.data.exists(), "dataset {} not found", args.data.display());
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    if args.parallel {
        config.parallel_candidates = true;
    }

    let log_path = compute_log_path(&args.log_dir)?;
    let entry = RunManifestEntry::new(args, log_path);
    append_manifest(&args.manifest, &entry)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "event": "run_submitted",
            "run_id": entry.run_id,
            "dataset": entry.dataset,
            "config": entry.config,
            "output_dir": entry.output_dir,
            "log_path": entry.log_path,
            "submitted_at": entry.submitted_at,
        }))?
    );
    log_run_event(
        &entry.log_path,
        LogLevel::Info,
        "run queued",
        json!({ "run_id": entry.run_id }),
    )?;

    update_entry(&args.manifest, &entry.run_id, |e| e.status = "running".into())?;
    let telemetry = FocusTelemetry::builder("focus_model")
        .log_path(&entry.log_path)
        .sink(Arc::new(ConsoleLogger::new(LogLevel::Info)))
        .build()?;
    let pipeline = TrainingPipeline::new(config).with_telemetry(telemetry);
    let outcome = pipeline.run_csv(&args.data).and_then(|outcome| {
        pipeline.persist(&outcome, &args.out)?;
        Ok(outcome)
    });
    match outcome {
        Ok(outcome) => {
            let selected = outcome.report.selected.clone();
            update_entry(&args.manifest, &entry.run_id, |e| {
                e.status = "completed".into();
                e.selected_model = Some(selected.clone());
            })?;
            log_run_event(
                &entry.log_path,
                LogLevel::Info,
                "run completed",
                json!({ "run_id": entry.run_id, "selected": selected }),
            )?;
            println!("{}", outcome.report.summary());
            Ok(())
        }
        Err(err) => {
            update_entry(&args.manifest, &entry.run_id, |e| e.status = "failed".into())?;
            log_run_event(
                &entry.log_path,
                LogLevel::Error,
                "run failed",
                json!({ "run_id": entry.run_id, "error": format!("{err:#}") }),
            )?;
            Err(err)
        }
    }
}

fn log_bundle_loaded(telemetry: &FocusTelemetry, bundle_id: Uuid, model: &str) -> Result<()> {
    telemetry
        .log(
            LogLevel::Info,
            "bundle.loaded",
            json!({ "bundle_id": bundle_id, "model": model }),
        )
        .context("recording bundle load")
}

fn load_bundle(dir: &Path) -> Result<Arc<ArtifactBundle>> {
    let bundle = ArtifactBundle::load(dir)
        .with_context(|| format!("loading bundle {}", dir.display()))?;
    Ok(Arc::new(bundle))
}

fn handle_predict(bundle: &Path, input: Option<&Path>, inline: Option<&str>) -> Result<()> {
    let raw = match (input, inline) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("reading request {}", path.display()))?,
        (None, Some(text)) => text.to_string(),
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let request: Value = serde_json::from_str(&raw).context("request is not valid JSON")?;
    let pipeline = InferencePipeline::new(load_bundle(bundle)?);
    let response = pipeline.predict(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn handle_inspect(dir: &Path) -> Result<()> {
    let bundle = load_bundle(dir)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "bundle_id": bundle.bundle_id,
            "created_at": bundle.created_at,
            "model": bundle.model.name,
            "supports_probability": bundle.model.supports_probability,
            "classes": bundle.codec.classes(),
            "scaler_means": bundle.scaler.means(),
            "scaler_stds": bundle.scaler.stds(),
        }))?
    );
    let report_path = dir.join(TrainingReport::FILE_NAME);
    if report_path.exists() {
        println!("{}", TrainingReport::load(&report_path)?.summary());
    }
    Ok(())
}

fn handle_serve(dir: &Path, log_dir: &Path) -> Result<()> {
    let bundle = load_bundle(dir)?;
    let telemetry = FocusTelemetry::builder("focus_model")
        .log_path(compute_log_path(log_dir)?)
        .build()?;
    log_bundle_loaded(&telemetry, bundle.bundle_id, &bundle.model.name)?;
    let pipeline = InferencePipeline::new(bundle).with_telemetry(telemetry.clone());
    let server = ConsoleServer::new(pipeline, Some(telemetry));
    let runtime = Runtime::new()?;
    let stats = runtime.block_on(server.run_stdio())?;
    eprintln!(
        "served {} predictions, {} errors",
        stats.predictions, stats.errors
    );
    Ok(())
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RunManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn update_entry(path: &Path, run_id: &str, apply: impl Fn(&mut RunManifestEntry)) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let mut changed = false;
    for entry in entries.iter_mut().filter(|entry| entry.run_id == run_id) {
        apply(entry);
        changed = true;
    }
    if !changed {
        return Ok(());
    }
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "lexi-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn log_run_event(path: &Path, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let logger = JsonLogger::new(path)?;
    logger.log(&LogRecord::new("lexi", level, message).with_metadata(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_logging::{LogSink, MemoryLogger};
    use tempfile::tempdir;

    struct FailingSink;

    impl LogSink for FailingSink {
        fn write(&self, _record: &LogRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn bundle_load_is_recorded_and_sink_errors_surface() {
        let memory = Arc::new(MemoryLogger::new());
        let telemetry = FocusTelemetry::builder("focus_model")
            .sink(memory.clone())
            .build()
            .unwrap();
        let bundle_id = Uuid::new_v4();
        log_bundle_loaded(&telemetry, bundle_id, "SVM").unwrap();
        assert_eq!(memory.find("bundle.loaded").len(), 1);

        let failing = FocusTelemetry::builder("focus_model")
            .sink(Arc::new(FailingSink))
            .build()
            .unwrap();
        let err = log_bundle_loaded(&failing, bundle_id, "SVM").unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
    }

    fn args(dir: &Path) -> TrainArgs {
        TrainArgs {
            data: dir.join("data.csv"),
            config: None,
            out: dir.join("bundle"),
            parallel: false,
            log_dir: dir.join("logs"),
            manifest: dir.join("runs/index.jsonl"),
        }
    }

    #[test]
    fn manifest_tracks_status_transitions() {
        let tmp = tempdir().unwrap();
        let args = args(tmp.path());
        let first = RunManifestEntry::new(&args, tmp.path().join("a.log"));
        let second = RunManifestEntry::new(&args, tmp.path().join("b.log"));
        append_manifest(&args.manifest, &first).unwrap();
        append_manifest(&args.manifest, &second).unwrap();
        update_entry(&args.manifest, &first.run_id, |e| {
            e.status = "completed".into();
            e.selected_model = Some("SVM".into());
        })
        .unwrap();
        let entries = read_manifest(&args.manifest).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "completed");
        assert_eq!(entries[0].selected_model.as_deref(), Some("SVM"));
        assert_eq!(entries[1], second);
    }

    #[test]
    fn missing_manifest_reads_empty() {
        let tmp = tempdir().unwrap();
        assert!(read_manifest(&tmp.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn log_path_is_dated() {
        let tmp = tempdir().unwrap();
        let path = compute_log_path(tmp.path()).unwrap();
        assert!(path.starts_with(tmp.path()));
        assert!(path.parent().unwrap().is_dir());
        log_run_event(&path, LogLevel::Info, "run queued", json!({ "run_id": "run-1" })).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("run queued"));
    }

    #[test]
    fn cli_parses_train_and_serve() {
        let cli = Cli::try_parse_from(["lexi", "train", "--data", "d.csv", "--parallel"]).unwrap();
        match cli.command {
            Commands::Train(args) => {
                assert!(args.parallel);
                assert_eq!(args.out, PathBuf::from("artifacts/latest"));
                assert_eq!(args.manifest, PathBuf::from(DEFAULT_MANIFEST));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["lexi", "serve", "--bundle", "b"]).is_ok());
        assert!(Cli::try_parse_from([
            "lexi", "predict", "--bundle", "b", "--input", "x", "--json", "{}"
        ])
        .is_err());
    }
}
