//! Iris-based gaze tracking library.
//!
//! Turns per-frame face landmarks into a smoothed gaze estimate and a screen
//! point:
//! 1. An external [`landmarks::LandmarkSource`] supplies face mesh landmarks
//! 2. A landmark heuristic estimates head pose
//! 3. Each open eye yields an iris offset vector, combined per eye selection
//! 4. Head rotation is compensated and a Kalman variant smooths the result
//! 5. A fitted affine or polynomial calibration maps the vector to pixels
//!
//! # Examples
//!
//! ## Processing recorded frames
//!
//! ```no_run
//! use iris_gaze_tracking::{
//!     config::Config,
//!     landmarks::{LandmarkRecording, ReplaySource},
//!     storage::MemoryStore,
//!     tracker::GazeTracker,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let recording = LandmarkRecording::from_file("session.yaml")?;
//! let frames = recording.frames.len();
//! let mut tracker = GazeTracker::new(
//!     Config::default(),
//!     Box::new(ReplaySource::from(recording)),
//!     Box::new(MemoryStore::new()),
//! )?;
//!
//! for _ in 0..frames {
//!     if let Some(gaze) = tracker.process_frame().await? {
//!         println!("gaze ({:.3}, {:.3}) -> {:?}", gaze.gaze_x, gaze.gaze_y, gaze.screen_point);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Calibrating
//!
//! ```
//! use iris_gaze_tracking::{calibration::Calibrator, config::CalibrationMode};
//!
//! let mut calibrator = Calibrator::new(1920, 1080, CalibrationMode::Affine);
//! let targets: Vec<(f64, f64)> = calibrator
//!     .generate_calibration_points(0.1)
//!     .iter()
//!     .map(|p| (p.screen_x, p.screen_y))
//!     .collect();
//!
//! for (index, (x, y)) in targets.iter().enumerate() {
//!     // Gaze samples would come from the tracker while the user looks at the target
//!     calibrator.add_calibration_sample(index, x / 960.0 - 1.0, y / 540.0 - 1.0);
//! }
//!
//! assert!(calibrator.compute_calibration());
//! let (x, y) = calibrator.gaze_to_screen(0.0, 0.0);
//! assert!((x - 960.0).abs() < 1.0 && (y - 540.0).abs() < 1.0);
//! ```

/// Constant-velocity Kalman filters and screen smoothing
pub mod filters;

/// Multi-point gaze-to-screen calibration
pub mod calibration;

/// Face landmark types and the detector seam
pub mod landmarks;

/// Head pose heuristic
pub mod head_pose;

/// Per-eye iris gaze vectors
pub mod iris;

/// Calibration and settings persistence
pub mod storage;

/// Per-frame pipeline orchestration
pub mod tracker;

/// Checked numeric conversions
pub mod utils;

/// Error types and result handling
pub mod error;

/// Constants used throughout the library
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
