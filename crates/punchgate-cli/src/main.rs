use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use punchgate_core::gate::evaluate_fix;
use punchgate_core::{
    detector_or_manual, DetectorError, FlowPhase, PunchCollaborators, PunchConfig, PunchFlow,
    PunchType, RecoveryAction,
};
use punchgate_hw::{CameraBackend, CameraError, Facing, PositionFix, VideoStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod ledger;
mod track;

use ledger::{JsonlLedger, TerminalNavigator};
use track::SampleTrack;

#[derive(Parser)]
#[command(name = "punchgate", about = "Location-gated attendance punches")]
struct Cli {
    /// TOML configuration file (default: $XDG_CONFIG_HOME/punchgate/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,
    /// Evaluate one position fix against the site geofence
    Check {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Reported accuracy in meters
        #[arg(long, default_value_t = 10.0)]
        accuracy: f64,
    },
    /// Run a full punch from an image file and a recorded sample track
    Punch {
        /// Photo to punch with (any common image format)
        #[arg(short, long)]
        image: PathBuf,
        /// Punch type: in or out
        #[arg(short = 't', long = "type", default_value = "in")]
        punch_type: PunchType,
        /// JSON sample track replayed as the device position
        #[arg(short, long)]
        samples: PathBuf,
        /// JSON-lines ledger the punch is appended to
        #[arg(short, long)]
        ledger: Option<PathBuf>,
        /// Extra location rechecks or save retries before giving up
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },
    /// Summarize the punch ledger as JSON
    Status {
        #[arg(short, long)]
        ledger: Option<PathBuf>,
    },
}

/// Camera backend for hosts without a camera; punches go through file upload.
struct NoCamera;

#[async_trait]
impl CameraBackend for NoCamera {
    async fn open(&self, _facing: Facing) -> Result<Arc<dyn VideoStream>, CameraError> {
        Err(CameraError::DeviceUnavailable("no camera on this host".into()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Check { lat, lng, accuracy } => {
            let fix = PositionFix {
                latitude: lat,
                longitude: lng,
                accuracy_m: accuracy,
                captured_at_ms: chrono::Utc::now().timestamp_millis(),
            };
            let result = evaluate_fix(fix, &config.site, config.geo.max_accuracy_m);
            println!("{}", result.hint);
            if let Some(summary) = result.fix_summary() {
                println!("{summary}");
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Punch {
            image,
            punch_type,
            samples,
            ledger,
            retries,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read image {}", image.display()))?;
            let track = SampleTrack::load(&samples)
                .with_context(|| format!("failed to load sample track {}", samples.display()))?;
            let ledger = JsonlLedger::new(ledger.unwrap_or_else(default_ledger_path));
            if let Some(dir) = ledger.path().parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            run_punch(config, &bytes, punch_type, track, ledger, retries).await?;
        }
        Commands::Status { ledger } => {
            let ledger = JsonlLedger::new(ledger.unwrap_or_else(default_ledger_path));
            let summary = ledger
                .summary()
                .with_context(|| format!("failed to read ledger {}", ledger.path().display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

async fn run_punch(
    config: PunchConfig,
    image: &[u8],
    punch_type: PunchType,
    track: SampleTrack,
    ledger: JsonlLedger,
    retries: u32,
) -> Result<()> {
    let detector = detector_or_manual(Err(DetectorError::LoadFailed(
        "no face model on this host".into(),
    )));
    let flow = PunchFlow::new(
        config,
        PunchCollaborators {
            camera: Arc::new(NoCamera),
            detector,
            geo: Arc::new(track),
            saver: Arc::new(ledger),
            navigator: Arc::new(TerminalNavigator),
        },
        punch_type,
    );

    flow.upload(image).await.context("image rejected")?;

    for attempt in 1..=retries {
        let snapshot = flow.snapshot();
        if snapshot.actions.contains(&RecoveryAction::RetrySave) {
            tracing::info!(attempt, "retrying save");
            flow.retry_save().await?;
        } else if snapshot.actions.contains(&RecoveryAction::RecheckLocation) {
            tracing::info!(attempt, "rechecking location");
            flow.recheck_location().await?;
        } else {
            break;
        }
    }

    let snapshot = flow.snapshot();
    if let Some(failure) = &snapshot.failure {
        println!("{}", failure.hint);
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if snapshot.phase != FlowPhase::Succeeded {
        anyhow::bail!("punch not recorded ({:?})", snapshot.phase);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PunchConfig> {
    let path = path.map(Path::to_path_buf).or_else(|| {
        let default = config_dir().join("config.toml");
        default.exists().then_some(default)
    });
    match path {
        Some(path) => PunchConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => PunchConfig::from_env().context("invalid PUNCHGATE_* environment"),
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("punchgate")
}

fn default_ledger_path() -> PathBuf {
    std::env::var("PUNCHGATE_LEDGER")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| home_dir().join(".local/share"))
                .join("punchgate")
                .join("punches.jsonl")
        })
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
