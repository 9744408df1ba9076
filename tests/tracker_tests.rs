//! Integration tests for the per-frame gaze pipeline


use async_trait::async_trait;
use iris_gaze_tracking::{
    config::{Config, EyeSelection, SmoothingMode, TrackingMethod},
    head_pose::{HeadPose, HeadPoseEstimator},
    iris::{GazeVector, OffsetMeasurement},
    landmarks::{FaceLandmarks, LandmarkSource, ReplaySource},
    storage::{MemoryStore, YamlFileStore},
    tracker::GazeTracker,
    Error, Result,
};
use test_helpers::FaceBuilder;

fn tracker_with(config: Config, frames: Vec<Option<FaceLandmarks>>) -> GazeTracker {
    GazeTracker::new(config, Box::new(ReplaySource::new(frames)), Box::new(MemoryStore::new())).unwrap()
}

fn tracker(config: Config) -> GazeTracker {
    tracker_with(config, Vec::new())
}

struct FailingSource;

#[async_trait]
impl LandmarkSource for FailingSource {
    async fn detect_landmarks(&mut self) -> Result<Option<FaceLandmarks>> {
        Err(Error::LandmarkSource("camera disconnected".to_string()))
    }
}

struct FixedPose(HeadPose);

impl HeadPoseEstimator for FixedPose {
    fn estimate(&self, _landmarks: &FaceLandmarks) -> HeadPose {
        self.0
    }
}

#[test]
fn test_centred_gaze_in_every_mode() {
    // Centred irises map to the configured offsets: (0.0, 0.3)
    for mode in [SmoothingMode::None, SmoothingMode::Kalman, SmoothingMode::Adaptive, SmoothingMode::PerEye] {
        let mut config = Config::default();
        config.filter.smoothing_mode = mode;
        let mut tracker = tracker(config);

        let result = tracker.process_landmarks(&FaceBuilder::new().build()).unwrap();
        assert!(result.gaze_x.abs() < 1e-9, "{mode}: {}", result.gaze_x);
        assert!((result.gaze_y - 0.3).abs() < 1e-9, "{mode}: {}", result.gaze_y);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.left_blink && !result.right_blink);
        assert!(result.head_yaw.abs() < 1e-9);
    }
}

#[test]
fn test_one_blinking_eye_falls_back_to_open_eye() {
    let mut tracker = tracker(Config::default());
    let result = tracker
        .process_landmarks(&FaceBuilder::new().blink_left().build())
        .unwrap();

    assert_eq!(result.confidence, 0.7);
    assert!(result.left_blink);
    assert!(!result.right_blink);
    assert!(result.left_iris_pixel.is_none());
    let (x, y) = result.right_iris_pixel.unwrap();
    assert!((x - 384.0).abs() < 1e-6 && (y - 216.0).abs() < 1e-6);
}

#[test]
fn test_both_eyes_blinking_gives_no_result() {
    let mut tracker = tracker(Config::default());
    let face = FaceBuilder::new().blink_left().blink_right().build();
    assert!(tracker.process_landmarks(&face).is_none());
}

#[test]
fn test_single_selected_eye_has_full_confidence() {
    let mut config = Config::default();
    config.gaze.eye_selection = EyeSelection::LeftOnly;
    let mut tracker = tracker(config);

    let result = tracker
        .process_landmarks(&FaceBuilder::new().blink_right().build())
        .unwrap();
    assert_eq!(result.confidence, 1.0);
    assert!(result.right_iris_pixel.is_none());

    // The selected eye blinking leaves nothing to track
    assert!(tracker
        .process_landmarks(&FaceBuilder::new().blink_left().build())
        .is_none());
}

#[test]
fn test_iris_offset_moves_gaze() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    config.head_pose.compensation_enabled = false;
    let mut tracker = tracker(config);

    // 0.01 of a 640 px frame is 6.4 px, a fifth of the 32 px half eye width
    let result = tracker
        .process_landmarks(&FaceBuilder::new().iris_offset(0.01, 0.0).build())
        .unwrap();
    assert!((result.gaze_x - 0.5).abs() < 1e-9);
}

#[test]
fn test_contour_fallback_without_iris_landmarks() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    let mut tracker = tracker(config);

    let result = tracker
        .process_landmarks(&FaceBuilder::new().iris_offset(0.02, 0.0).without_iris().build())
        .unwrap();
    assert!(result.gaze_x.abs() < 1e-9);

    tracker.set_tracking_method(TrackingMethod::EyeContour);
    let result = tracker
        .process_landmarks(&FaceBuilder::new().iris_offset(0.02, 0.0).build())
        .unwrap();
    assert!(result.gaze_x.abs() < 1e-9);
}

#[test]
fn test_head_yaw_is_compensated() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    let mut tracker = tracker(config);

    // Nose 0.05 right of the ear midpoint over a 0.4 span: 15 degrees of yaw
    let face = FaceBuilder::new().nose_x(0.55).build();
    let result = tracker.process_landmarks(&face).unwrap();
    assert!((result.head_yaw - 15.0).abs() < 1e-9);
    assert!((result.gaze_x + 0.5 / 3.0).abs() < 1e-9);

    tracker.set_head_compensation(false, 0.5, 0.5);
    let result = tracker.process_landmarks(&face).unwrap();
    assert!(result.gaze_x.abs() < 1e-9);
}

#[test]
fn test_custom_head_pose_estimator() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    let mut tracker = tracker(config).with_head_pose_estimator(Box::new(FixedPose(HeadPose::clamped(0.0, 45.0, 0.0))));

    let result = tracker.process_landmarks(&FaceBuilder::new().build()).unwrap();
    assert_eq!(result.head_pitch, 45.0);
    assert!((result.gaze_y - (0.3 - 0.5)).abs() < 1e-9);
}

#[test]
fn test_per_eye_smoothing_damps_a_jump() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::PerEye;
    config.head_pose.compensation_enabled = false;
    let mut tracker = tracker(config);

    for _ in 0..5 {
        tracker.process_landmarks(&FaceBuilder::new().build());
    }
    let result = tracker
        .process_landmarks(&FaceBuilder::new().iris_offset(0.01, 0.0).build())
        .unwrap();
    assert!(result.gaze_x > 0.0 && result.gaze_x < 0.5);

    tracker.reset();
    let result = tracker
        .process_landmarks(&FaceBuilder::new().iris_offset(0.01, 0.0).build())
        .unwrap();
    assert!((result.gaze_x - 0.5).abs() < 1e-9);
}

#[test]
fn test_adaptive_mode_reports_dwell() {
    let mut tracker = tracker(Config::default());
    for i in 0..10 {
        tracker.process_landmarks(&FaceBuilder::new().timestamp(i * 33).build());
    }
    assert!(tracker.is_dwelling());

    tracker.set_smoothing_mode(SmoothingMode::None);
    assert!(!tracker.is_dwelling());
}

#[test]
fn test_screen_point_uses_uncalibrated_mapping() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    config.screen.width = 1000;
    config.screen.height = 500;
    let mut tracker = tracker(config);

    let result = tracker.process_landmarks(&FaceBuilder::new().build()).unwrap();
    assert_eq!(result.screen_point, tracker.gaze_to_screen(result.gaze_x, result.gaze_y));
    assert!((result.screen_point.0 - 500.0).abs() < 1e-6);
    assert!((result.screen_point.1 - 325.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_process_frame_sequence() {
    let frames = vec![Some(FaceBuilder::new().build()), None, Some(FaceBuilder::new().blink_right().build())];
    let mut tracker = tracker_with(Config::default(), frames);

    assert_eq!(tracker.process_frame().await.unwrap().map(|r| r.confidence), Some(1.0));
    assert!(tracker.process_frame().await.unwrap().is_none());
    assert_eq!(tracker.process_frame().await.unwrap().map(|r| r.confidence), Some(0.7));
    assert!(tracker.process_frame().await.unwrap().is_none());
    assert!(tracker.average_latency_ms() >= 0.0);
}

#[tokio::test]
async fn test_source_failure_is_an_error() {
    let mut tracker =
        GazeTracker::new(Config::default(), Box::new(FailingSource), Box::new(MemoryStore::new())).unwrap();
    let result = tracker.process_frame().await;
    assert!(matches!(result, Err(Error::LandmarkSource(_))));
}

#[test]
fn test_calibration_persists_across_trackers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.yaml");

    let mut config = Config::default();
    config.screen.width = 1000;
    config.screen.height = 1000;

    let mut first = GazeTracker::new(
        config.clone(),
        Box::new(ReplaySource::default()),
        Box::new(YamlFileStore::open(&path).unwrap()),
    )
    .unwrap();
    let targets: Vec<(f64, f64)> = first
        .calibrator()
        .points()
        .iter()
        .map(|p| (p.screen_x, p.screen_y))
        .collect();
    for (index, (sx, sy)) in targets.into_iter().enumerate() {
        for _ in 0..5 {
            assert!(first.add_calibration_sample(index, sx / 500.0 - 1.0, sy / 500.0 - 1.0));
        }
    }
    assert!(first.calibrator_mut().compute_calibration());
    assert!(first.save_calibration());

    let mut second = GazeTracker::new(
        config,
        Box::new(ReplaySource::default()),
        Box::new(YamlFileStore::open(&path).unwrap()),
    )
    .unwrap();
    assert!(!second.calibrator().is_calibrated());
    assert!(second.load_calibration());
    for probe in [(-0.5, 0.5), (0.0, 0.0), (0.7, -0.2)] {
        let a = first.gaze_to_screen(probe.0, probe.1);
        let b = second.gaze_to_screen(probe.0, probe.1);
        assert!((a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6);
    }

    assert!(second.delete_calibration());
    assert!(!second.delete_calibration());
}

#[test]
fn test_calibration_collection_follows_configured_counts() {
    let mut config = Config::default();
    config.calibration.samples_per_point = 4;
    config.calibration.min_samples_per_point = 2;
    let mut tracker = tracker(config);

    assert_eq!(tracker.next_calibration_target(), Some(0));
    assert!(tracker.add_calibration_sample(0, 0.1, -0.1));
    assert!(!tracker.calibration_target_complete(0));
    assert!(tracker.add_calibration_sample(0, 0.1, -0.1));
    assert!(tracker.calibration_target_complete(0));
    assert_eq!(tracker.next_calibration_target(), Some(1));

    assert!(tracker.add_calibration_sample(0, 0.1, -0.1));
    assert!(tracker.add_calibration_sample(0, 0.1, -0.1));
    assert!(!tracker.add_calibration_sample(0, 0.1, -0.1));
    assert_eq!(tracker.calibrator().samples_collected(0), 4);
    assert!(!tracker.add_calibration_sample(99, 0.0, 0.0));
}

#[test]
fn test_offset_correction_recentres_biased_gaze() {
    let mut config = Config::default();
    config.filter.smoothing_mode = SmoothingMode::None;
    config.head_pose.compensation_enabled = false;
    let mut tracker = tracker(config);
    let (width, height) = tracker.calibrator().screen_size();

    // The user looks at each target but the eyes stay centred, so every
    // reading carries the default vertical offset of 0.3
    let measurements: Vec<OffsetMeasurement> = tracker
        .offset_calibration_targets()
        .into_iter()
        .map(|(x, y)| {
            let gaze = tracker.process_landmarks(&FaceBuilder::new().build()).unwrap();
            OffsetMeasurement::at_screen_point(x, y, width, height, GazeVector::new(gaze.gaze_x, gaze.gaze_y))
        })
        .collect();

    assert!(tracker.apply_offset_correction(&measurements));
    let (offset_x, offset_y) = tracker.calculator().offset();
    assert!(offset_x.abs() < 1e-9 && offset_y.abs() < 1e-9);

    let result = tracker.process_landmarks(&FaceBuilder::new().build()).unwrap();
    assert!(result.gaze_x.abs() < 1e-9 && result.gaze_y.abs() < 1e-9);

    assert!(!tracker.apply_offset_correction(&[]));
}
