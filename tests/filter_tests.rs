//! Behavioural tests for the smoothing filters

use iris_gaze_tracking::filters::{
    adaptive::{AdaptiveKalmanFilter, AdaptiveParams},
    exponential::ExponentialFilter,
    kalman::KalmanFilter,
    GazeFilter, NoFilter,
};

/// Starting on the target, the bootstrap state already equals the input and
/// the filter stays put. From anywhere else the constant-velocity model
/// overshoots slightly before settling.
#[test]
fn test_fixed_filter_converges_on_constant_input() {
    let mut filter = KalmanFilter::default();
    for _ in 0..10 {
        assert_eq!(filter.update(0.4, -0.2), (0.4, -0.2));
    }

    let mut filter = KalmanFilter::default();
    filter.update(-0.6, 0.3);
    let (step_x, step_y) = (1.0_f64, -0.5_f64);
    let mut output = (-0.6, 0.3);
    for _ in 0..100 {
        output = filter.update(0.4, -0.2);
        // Overshoot stays within 2% of the step
        assert!(output.0 <= 0.4 + 0.02 * step_x.abs());
        assert!(output.1 >= -0.2 - 0.02 * step_y.abs());
    }
    assert!((output.0 - 0.4).abs() < 1e-3);
    assert!((output.1 + 0.2).abs() < 1e-3);
}

#[test]
fn test_fixed_filter_settles_after_step() {
    let mut filter = KalmanFilter::default();
    filter.update(0.0, 0.0);
    let mut output = (0.0, 0.0);
    for _ in 0..100 {
        output = filter.update(1.0, 1.0);
    }
    assert!((output.0 - 1.0).abs() < 1e-3);
    assert!((output.1 - 1.0).abs() < 1e-3);
    assert!(filter.velocity() < 1e-3);
}

#[test]
fn test_fixed_filter_smooths_jitter() {
    let mut filter = KalmanFilter::default();
    filter.update(0.0, 0.0);
    let mut max_output: f64 = 0.0;
    for i in 0..200 {
        let jitter = if i % 2 == 0 { 0.05 } else { -0.05 };
        let (x, _) = filter.update(jitter, 0.0);
        if i > 20 {
            max_output = max_output.max(x.abs());
        }
    }
    assert!(max_output < 0.05);
}

#[test]
fn test_reset_gives_first_sample_passthrough() {
    let mut filter = KalmanFilter::default();
    for i in 0..10 {
        filter.update(f64::from(i) * 0.1, 0.0);
    }
    filter.reset();
    assert!(!filter.is_initialized());
    assert_eq!(filter.position(), (0.0, 0.0));
    assert_eq!(filter.update(0.7, -0.3), (0.7, -0.3));

    let mut adaptive = AdaptiveKalmanFilter::new(AdaptiveParams::default());
    adaptive.update(0.1, 0.1);
    adaptive.update(0.5, 0.5);
    adaptive.reset();
    assert_eq!(adaptive.position(), (0.0, 0.0));
    assert_eq!(adaptive.update(-0.25, 0.75), (-0.25, 0.75));
}

#[test]
fn test_adaptive_dwell_on_near_stationary_gaze() {
    let mut filter = AdaptiveKalmanFilter::new(AdaptiveParams::default());
    for i in 0..10 {
        filter.update(0.2 + 1e-4 * f64::from(i % 2), -0.1);
    }
    assert!(filter.is_dwelling());
    assert!(filter.current_measurement_noise() > filter.params().base_measurement_noise);
}

#[test]
fn test_adaptive_not_dwelling_during_saccade() {
    let mut filter = AdaptiveKalmanFilter::new(AdaptiveParams::default());
    for i in 0..10 {
        filter.update(-0.9 + 0.2 * f64::from(i), 0.0);
    }
    assert!(!filter.is_dwelling());
    assert!(filter.velocity_magnitude() > filter.params().high_velocity_threshold);
    assert!(filter.current_measurement_noise() < filter.params().base_measurement_noise);
    assert!(filter.current_process_noise() > filter.params().base_process_noise);
}

#[test]
fn test_adaptive_smooths_fixation_jitter_harder_than_fixed() {
    let params = AdaptiveParams::default();
    let mut adaptive = AdaptiveKalmanFilter::new(params);
    let mut fixed = KalmanFilter::new(params.base_process_noise, params.base_measurement_noise);

    let mut adaptive_error = 0.0;
    let mut fixed_error = 0.0;
    for i in 0..100 {
        let sample = if i % 2 == 0 { 0.31 } else { 0.29 };
        let (ax, _) = adaptive.update(sample, 0.0);
        let (fx, _) = fixed.update(sample, 0.0);
        if i >= 20 {
            adaptive_error += (ax - 0.3).abs();
            fixed_error += (fx - 0.3).abs();
        }
    }
    assert!(adaptive.is_dwelling());
    assert!(adaptive_error < fixed_error);
}

#[test]
#[should_panic(expected = "High velocity threshold must exceed low velocity threshold")]
fn test_adaptive_rejects_inverted_thresholds() {
    let _ = AdaptiveKalmanFilter::new(AdaptiveParams {
        low_velocity_threshold: 0.2,
        high_velocity_threshold: 0.1,
        ..AdaptiveParams::default()
    });
}

#[test]
#[should_panic(expected = "Alpha must be in (0, 1]")]
fn test_exponential_zero_alpha() {
    let _ = ExponentialFilter::new(0.0);
}

#[test]
fn test_filters_through_trait_objects() {
    let mut filters: Vec<Box<dyn GazeFilter>> = vec![
        Box::new(NoFilter),
        Box::new(KalmanFilter::default()),
        Box::new(AdaptiveKalmanFilter::new(AdaptiveParams::default())),
        Box::new(ExponentialFilter::new(0.5)),
    ];

    for filter in &mut filters {
        assert_eq!(filter.update(0.3, 0.6), (0.3, 0.6), "{} first sample", filter.name());
        let (x, y) = filter.update(0.5, 0.6);
        assert!(x.is_finite() && y.is_finite());
        filter.reset();
        assert_eq!(filter.update(-0.1, 0.1), (-0.1, 0.1), "{} after reset", filter.name());
    }
}
