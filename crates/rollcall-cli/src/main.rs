use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rollcall_core::attendance::AttendanceError;
use rollcall_core::session::StopReason;
use rollcall_core::{
    train, AttendanceLog, FaceRecognizer, Gallery, IdentityStore, LandmarkModel, SessionEvent,
    UltraFaceDetector,
};
use rollcall_hw::Camera;
use std::path::PathBuf;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Blink-verified face attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save photos of a person for training
    Register {
        /// Student ID
        #[arg(long)]
        id: String,
        /// Student name
        #[arg(long)]
        name: String,
        /// JPEG or PNG photos
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Rebuild the identity store from registered photos
    Train,
    /// Run a live attendance session until Ctrl-C or liveness timeout
    Attend(ThresholdArgs),
    /// Show attendance logs
    Logs {
        /// Day to print (YYYY-MM-DD); lists available days when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print configuration and model/store presence as JSON
    Status,
    /// Run camera diagnostics
    Test,
}

/// Per-run overrides of the configured thresholds.
#[derive(Args)]
struct ThresholdArgs {
    /// EAR below which the eyes count as closed
    #[arg(long)]
    ear_threshold: Option<f32>,
    /// Closed frames needed before a reopening counts as a blink
    #[arg(long)]
    consec_frames: Option<u32>,
    /// Blinks needed to pass liveness
    #[arg(long)]
    required_blinks: Option<u32>,
    /// Seconds from the first face until unproven faces fail
    #[arg(long)]
    time_limit: Option<f32>,
    /// Embedding distance below which a match is accepted
    #[arg(long)]
    match_threshold: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Register { id, name, photos } => {
            let saved = train::register(&config.images_dir, &id, &name, &photos)?;
            println!("Saved {} photo(s) for {id} - {name}", saved.len());
            println!("Run `rollcall train` to update the identity store.");
        }
        Commands::Train => run_train(&config)?,
        Commands::Attend(overrides) => {
            apply_overrides(&mut config, &overrides)?;
            run_attend(&config).await?;
        }
        Commands::Logs { date } => show_logs(&config, date)?,
        Commands::Status => {
            let status = serde_json::json!({
                "config": &config,
                "store": {
                    "path": &config.store_path,
                    "present": IdentityStore::new(&config.store_path).exists(),
                },
                "models": {
                    "detector": model_status(&config.detector_model_path()),
                    "landmarks": model_status(&config.landmark_model_path()),
                    "embedding": model_status(&config.embedding_model_path()),
                },
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Test => run_camera_test(&config)?,
    }

    Ok(())
}

fn model_status(path: &str) -> serde_json::Value {
    serde_json::json!({ "path": path, "present": std::path::Path::new(path).exists() })
}

fn apply_overrides(config: &mut Config, args: &ThresholdArgs) -> Result<()> {
    let t = &mut config.thresholds;
    if let Some(v) = args.ear_threshold {
        t.ear_threshold = v;
    }
    if let Some(v) = args.consec_frames {
        t.consec_frames_required = v;
    }
    if let Some(v) = args.required_blinks {
        t.required_blinks = v;
    }
    if let Some(v) = args.time_limit {
        t.time_limit_secs = v;
    }
    if let Some(v) = args.match_threshold {
        t.match_threshold = v;
    }
    t.validate().context("invalid threshold flag")?;
    Ok(())
}

fn run_train(config: &Config) -> Result<()> {
    let mut detector = UltraFaceDetector::load(&config.detector_model_path())?;
    let mut recognizer = FaceRecognizer::load(&config.embedding_model_path())?;

    println!("Training from {}", config.images_dir.display());
    let report = train::train(&config.images_dir, &mut detector, &mut recognizer)?;

    for t in &report.trained {
        println!("  {}: {} embedding(s) from {} image(s)", t.label, t.embeddings, t.images);
    }
    for label in &report.skipped {
        println!("  {label}: no faces found, skipped");
    }
    if report.identities.is_empty() {
        bail!("no identity produced any embedding; store left unchanged");
    }

    let store = IdentityStore::new(&config.store_path);
    store.save(&report.identities)?;
    println!("Saved {} identities to {}", report.identities.len(), store.path().display());
    Ok(())
}

async fn run_attend(config: &Config) -> Result<()> {
    // Store and models first, so a missing file fails before the camera opens.
    let identities = IdentityStore::new(&config.store_path).load()?;
    let gallery = Gallery::from_identities(&identities);
    let landmarks = LandmarkModel::load(&config.landmark_model_path())?;
    let detector = UltraFaceDetector::load(&config.detector_model_path())?;
    let mut recognizer = FaceRecognizer::load(&config.embedding_model_path())?;

    let model_dim = recognizer.embedding_dim()?;
    if let Some(stored_dim) = gallery.dim() {
        if stored_dim != model_dim {
            bail!(
                "identity store holds {stored_dim}-value embeddings but the model produces \
                 {model_dim}; run `rollcall train` again"
            );
        }
    }

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("cannot open camera {}", config.camera_device))?;

    let inputs = engine::SessionInputs {
        detector,
        landmarks,
        recognizer,
        gallery,
        log: AttendanceLog::new(&config.log_dir),
        config: config.thresholds.session_config(),
        warmup_frames: config.warmup_frames,
    };

    println!(
        "Attendance running: {} identities, {} blink(s) within {}s. Ctrl-C to stop.",
        identities.len(),
        config.thresholds.required_blinks,
        config.thresholds.time_limit_secs
    );
    let mut handle = engine::spawn_session(camera, inputs, print_event)?;

    let summary = tokio::select! {
        result = handle.finished() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stop requested");
            handle.request_stop();
            handle.finished().await?
        }
    };

    let reason = match summary.reason {
        StopReason::Stopped => "stopped",
        StopReason::LivenessTimeout => "liveness time limit reached",
        StopReason::SourceEnded => "camera stream ended",
    };
    println!("\nSession ended ({reason}) after {} frames", summary.frames);
    for (slot, label) in &summary.matched {
        println!("  face {slot}: {label}");
    }
    for slot in &summary.failed {
        println!("  face {slot}: liveness failed");
    }
    println!("{} attendance record(s) written", summary.records.len());
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Blink { slot, count } => println!("face {slot}: blink {count}"),
        SessionEvent::LivenessPassed { slot, .. } => println!("face {slot}: liveness passed"),
        SessionEvent::LivenessFailed { slot, blinks } => {
            println!("face {slot}: liveness failed ({blinks} blink(s)), possible spoof")
        }
        SessionEvent::Matched { slot, label, recorded: true, .. } => {
            println!("face {slot}: {label}, attendance marked")
        }
        SessionEvent::Matched { slot, label, recorded: false, .. } => {
            println!("face {slot}: {label}, already marked this session")
        }
        SessionEvent::Unknown { slot, distance } => {
            println!("face {slot}: unknown (distance {distance:.3})")
        }
        _ => {}
    }
}

fn show_logs(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let log = AttendanceLog::new(&config.log_dir);
    let Some(date) = date else {
        let days = log.list_days()?;
        if days.is_empty() {
            println!("No attendance logs in {}", log.dir().display());
        }
        for day in days {
            println!("{day}");
        }
        return Ok(());
    };

    match log.read_day(date) {
        Ok(records) => {
            println!("{:<32} {:<10} {}", "ID-Name", "Date", "Time");
            for r in records {
                println!("{:<32} {:<10} {}", r.identity_label, r.date, r.time);
            }
            Ok(())
        }
        Err(AttendanceError::NotFound(d)) => {
            println!("No attendance recorded on {d}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_camera_test(config: &Config) -> Result<()> {
    println!("Running camera diagnostics...");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}: {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .with_context(|| format!("cannot open camera {}", config.camera_device))?;
    let mut stream = camera.stream()?;
    stream.discard(config.warmup_frames)?;
    let frame = stream.next_frame()?;

    println!(
        "{}: {}x{} {:?}, brightness {:.1}{}",
        camera.device_path,
        frame.width,
        frame.height,
        camera.fourcc,
        frame.avg_brightness(),
        if frame.is_dark { " (dark frame)" } else { "" }
    );
    Ok(())
}
