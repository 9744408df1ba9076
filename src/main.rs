//! Replays recorded face landmarks through the gaze tracker.

use anyhow::{Context, Result};
use clap::Parser;
use iris_gaze_tracking::{
    config::{Config, EyeSelection, SmoothingMode},
    landmarks::{LandmarkRecording, ReplaySource},
    storage::YamlFileStore,
    tracker::GazeTracker,
    utils::safe_cast::f64_to_pixel,
};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Landmark recording to replay (YAML)
    #[arg(short, long)]
    recording: String,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,

    /// Key-value store holding calibrations and settings (YAML)
    #[arg(short, long, default_value = "gaze_store.yaml")]
    store: String,

    /// Smoothing mode (none, kalman, adaptive, per_eye), overrides the config
    #[arg(long)]
    smoothing: Option<String>,

    /// Eye selection (left, right, both), overrides the config
    #[arg(long)]
    eyes: Option<String>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {path}");
            match Config::from_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Failed to load config file: {e}. Using defaults.");
                    Config::default()
                }
            }
        }
        None => Config::default(),
    };
    if let Some(mode) = &args.smoothing {
        config.filter.smoothing_mode = mode.parse::<SmoothingMode>()?;
    }
    if let Some(eyes) = &args.eyes {
        config.gaze.eye_selection = eyes.parse::<EyeSelection>()?;
    }
    let (width, height) = (config.screen.width, config.screen.height);

    let recording = LandmarkRecording::from_file(&args.recording)
        .with_context(|| format!("Failed to load recording {}", args.recording))?;
    let frames = recording.frames.len();
    info!("Replaying {frames} frames from {}", args.recording);

    let store = YamlFileStore::open(&args.store).with_context(|| format!("Failed to open store {}", args.store))?;
    let mut tracker = GazeTracker::new(config, Box::new(ReplaySource::from(recording)), Box::new(store))?;

    if tracker.load_calibration() {
        info!(
            "Using stored calibration ({:.1} px error)",
            tracker.calibrator().calibration_error().unwrap_or(0.0)
        );
    } else {
        info!("No stored calibration, mapping gaze linearly");
    }

    let mut tracked = 0usize;
    for frame in 0..frames {
        match tracker.process_frame().await? {
            Some(gaze) => {
                tracked += 1;
                let (x, y) = gaze.screen_point;
                println!(
                    "{frame:5}  gaze ({:+.3}, {:+.3})  screen ({:4}, {:4})  conf {:.1}{}",
                    gaze.gaze_x,
                    gaze.gaze_y,
                    f64_to_pixel(x, width),
                    f64_to_pixel(y, height),
                    gaze.confidence,
                    if tracker.is_dwelling() { "  dwell" } else { "" }
                );
            }
            None => println!("{frame:5}  no gaze"),
        }
    }

    info!(
        "Tracked {tracked}/{frames} frames, average latency {:.2} ms",
        tracker.average_latency_ms()
    );
    Ok(())
}
